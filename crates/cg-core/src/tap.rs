//! Network tap
//!
//! Classifies completed host requests against a small allow-list and turns the
//! interesting ones into [`TapMessage`]s. The hooking of the page's request and
//! history primitives lives in the host adapter; this module only ever sees a
//! copy of the URL and body, so the host's own handling is never affected.

use serde_json::Value;

use crate::message::{ClipMetadata, ParseError, TapMessage};

// =============================================================================
// Endpoints
// =============================================================================

/// Endpoints worth inspecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Comment list of a replay or community post
    CommentFeed,
    /// Chat user profile card
    ProfileCard,
    /// Short-form clip card
    ClipCard,
}

/// A URL matches a rule when it contains every listed substring.
#[derive(Debug, Clone)]
pub struct TapRule {
    pub endpoint: Endpoint,
    pub needles: &'static [&'static str],
}

pub const DEFAULT_RULES: &[TapRule] = &[
    TapRule {
        endpoint: Endpoint::CommentFeed,
        needles: &["/comments", "nng_comment_api"],
    },
    TapRule {
        endpoint: Endpoint::ProfileCard,
        needles: &["/profile-card", "chatType=STREAMING"],
    },
    TapRule {
        endpoint: Endpoint::ClipCard,
        needles: &["/shortformhub", "/card", "seedType=SPECIFIC"],
    },
];

/// How the page moved without reloading the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    Push,
    Replace,
    Pop,
}

// =============================================================================
// Tap
// =============================================================================

/// Stateless request observer.
#[derive(Debug, Clone)]
pub struct Tap {
    rules: &'static [TapRule],
}

impl Default for Tap {
    fn default() -> Self {
        Self::new(DEFAULT_RULES)
    }
}

impl Tap {
    pub fn new(rules: &'static [TapRule]) -> Self {
        Self { rules }
    }

    /// Which endpoint a request URL belongs to, if any.
    pub fn classify(&self, url: &str) -> Option<Endpoint> {
        self.rules
            .iter()
            .find(|rule| rule.needles.iter().all(|needle| url.contains(needle)))
            .map(|rule| rule.endpoint)
    }

    /// Inspect a completed request. Never fails: malformed bodies are dropped.
    pub fn observe(&self, url: &str, body: &str) -> Option<TapMessage> {
        let endpoint = self.classify(url)?;
        match decode_body(endpoint, body) {
            Ok(message) => message,
            Err(e) => {
                log::debug!("tap: dropped {:?} body: {}", endpoint, e);
                None
            }
        }
    }

    /// Any history change is a logical location change.
    pub fn navigated(&self, how: Navigation) -> TapMessage {
        log::trace!("tap: navigation via {:?}", how);
        TapMessage::UrlChanged
    }
}

fn decode_body(endpoint: Endpoint, body: &str) -> Result<Option<TapMessage>, ParseError> {
    let data: Value = serde_json::from_str(body)?;
    let message = match endpoint {
        Endpoint::CommentFeed => Some(TapMessage::CommentFeed(data)),
        Endpoint::ProfileCard => {
            let ok = data.get("code").and_then(Value::as_i64) == Some(200);
            match data.get("content") {
                Some(content) if ok && !content.is_null() => Some(TapMessage::Profile(content.clone())),
                _ => None,
            }
        }
        Endpoint::ClipCard => data.get("card").map(|card| TapMessage::Clip(clip_metadata(card))),
    };
    Ok(message)
}

fn clip_metadata(card: &Value) -> ClipMetadata {
    let text = |pointer: &str, fallback: &str| {
        card.pointer(pointer)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(fallback)
            .to_string()
    };
    ClipMetadata {
        streamer_name: text("/interaction/subscription/name", "알 수 없음"),
        title: text("/content/title", "제목 없음"),
        clip_id: text("/content/contentId", ""),
    }
}
