//! Cross-isolation channel messages
//!
//! The page-world tap and the content-world engine only share a one-way
//! `{type, payload}` channel. Inbound messages are validated by their declared
//! type before the payload is looked at; unknown types are dropped.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const XHR_DATA: &str = "CHZZK_XHR_DATA";
pub const URL_CHANGED: &str = "CHZZK_URL_CHANGED";
pub const PROFILE_DATA: &str = "CHZZK_PROFILE_DATA";
pub const CLIP_METADATA: &str = "CHZZK_CLIP_METADATA";
pub const BLOCKED_IDS: &str = "CHZZK_BLOCKED_IDS";
pub const DOWNLOAD_IMAGE: &str = "DOWNLOAD_IMAGE";
pub const DOWNLOAD_PDF: &str = "DOWNLOAD_PDF";
pub const DOWNLOAD_CSV: &str = "DOWNLOAD_CSV";

/// Error type for malformed tapped data. Always swallowed by callers.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message is not an object")]
    NotAnObject,
    #[error("missing field: {0}")]
    MissingField(&'static str),
}

/// Clip page metadata recovered from the short-form card endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClipMetadata {
    pub streamer_name: String,
    pub title: String,
    pub clip_id: String,
}

/// Messages from the tap into the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum TapMessage {
    /// Comment feed body (`CHZZK_XHR_DATA`)
    CommentFeed(Value),
    /// Client-side navigation happened (`CHZZK_URL_CHANGED`)
    UrlChanged,
    /// Chat profile card content (`CHZZK_PROFILE_DATA`)
    Profile(Value),
    /// Clip card metadata (`CHZZK_CLIP_METADATA`)
    Clip(ClipMetadata),
}

impl TapMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CommentFeed(_) => XHR_DATA,
            Self::UrlChanged => URL_CHANGED,
            Self::Profile(_) => PROFILE_DATA,
            Self::Clip(_) => CLIP_METADATA,
        }
    }

    /// Validate and decode a raw channel message.
    ///
    /// `Ok(None)` means the message type is not ours.
    pub fn parse(message: &Value) -> Result<Option<Self>, ParseError> {
        let object = message.as_object().ok_or(ParseError::NotAnObject)?;
        let Some(kind) = object.get("type").and_then(Value::as_str) else {
            return Ok(None);
        };
        let payload = object.get("payload");

        let parsed = match kind {
            XHR_DATA => Self::CommentFeed(payload.cloned().ok_or(ParseError::MissingField("payload"))?),
            URL_CHANGED => Self::UrlChanged,
            PROFILE_DATA => Self::Profile(payload.cloned().ok_or(ParseError::MissingField("payload"))?),
            CLIP_METADATA => {
                let payload = payload.cloned().ok_or(ParseError::MissingField("payload"))?;
                Self::Clip(serde_json::from_value(payload)?)
            }
            _ => return Ok(None),
        };
        Ok(Some(parsed))
    }

    /// Encode for posting across the channel.
    pub fn to_value(&self) -> Value {
        match self {
            Self::CommentFeed(payload) | Self::Profile(payload) => {
                json!({ "type": self.kind(), "payload": payload })
            }
            Self::UrlChanged => json!({ "type": URL_CHANGED }),
            Self::Clip(meta) => json!({ "type": CLIP_METADATA, "payload": meta }),
        }
    }
}

/// Blocked author ids from the content world to the page-world chat filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedIdsMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Vec<String>,
}

impl BlockedIdsMessage {
    pub fn new(ids: Vec<String>) -> Self {
        Self {
            kind: BLOCKED_IDS.to_string(),
            payload: ids,
        }
    }

    /// The id list if `message` is a blocked-ids message.
    pub fn parse(message: &Value) -> Option<Vec<String>> {
        if message.get("type").and_then(Value::as_str) != Some(BLOCKED_IDS) {
            return None;
        }
        serde_json::from_value::<Self>(message.clone()).ok().map(|m| m.payload)
    }
}

/// Download requests from the content world to the background worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "dataUrl")]
    pub data_url: String,
    pub filename: String,
}

impl DownloadMessage {
    pub fn is_download(&self) -> bool {
        matches!(self.kind.as_str(), DOWNLOAD_IMAGE | DOWNLOAD_PDF | DOWNLOAD_CSV)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_types() {
        let feed = json!({"type": "CHZZK_XHR_DATA", "payload": {"content": {}}});
        assert!(matches!(TapMessage::parse(&feed).unwrap(), Some(TapMessage::CommentFeed(_))));

        let nav = json!({"type": "CHZZK_URL_CHANGED"});
        assert_eq!(TapMessage::parse(&nav).unwrap(), Some(TapMessage::UrlChanged));

        let clip = json!({"type": "CHZZK_CLIP_METADATA", "payload": {"streamerName": "s", "title": "t"}});
        match TapMessage::parse(&clip).unwrap() {
            Some(TapMessage::Clip(meta)) => {
                assert_eq!(meta.streamer_name, "s");
                assert_eq!(meta.clip_id, "");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_and_malformed() {
        assert_eq!(TapMessage::parse(&json!({"type": "SOMETHING_ELSE", "payload": 1})).unwrap(), None);
        assert_eq!(TapMessage::parse(&json!({"payload": 1})).unwrap(), None);
        assert!(TapMessage::parse(&json!("CHZZK_URL_CHANGED")).is_err());
        assert!(TapMessage::parse(&json!({"type": "CHZZK_XHR_DATA"})).is_err());
    }

    #[test]
    fn test_encode_then_parse() {
        let message = TapMessage::Clip(ClipMetadata {
            streamer_name: "a".into(),
            title: "b".into(),
            clip_id: "c".into(),
        });
        assert_eq!(TapMessage::parse(&message.to_value()).unwrap(), Some(message));
    }

    #[test]
    fn test_download_message() {
        let message: DownloadMessage =
            serde_json::from_value(json!({"type": "DOWNLOAD_PDF", "dataUrl": "data:,", "filename": "a.pdf"})).unwrap();
        assert!(message.is_download());
    }

    #[test]
    fn test_blocked_ids_message() {
        let value = serde_json::to_value(BlockedIdsMessage::new(vec!["u1".into()])).unwrap();
        assert_eq!(value, json!({"type": "CHZZK_BLOCKED_IDS", "payload": ["u1"]}));
        assert_eq!(BlockedIdsMessage::parse(&value), Some(vec!["u1".to_string()]));
        assert_eq!(BlockedIdsMessage::parse(&json!({"type": "CHZZK_URL_CHANGED"})), None);
        // The engine ignores it like any foreign type.
        assert_eq!(TapMessage::parse(&value).unwrap(), None);
    }
}
