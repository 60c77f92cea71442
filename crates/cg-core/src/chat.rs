//! Live chat filter
//!
//! Runs inside the page's JSON decoding hook, before the host renders chat
//! records. Strictly fail-open: whenever anything about a payload is
//! unexpected the caller keeps the original text.

use serde_json::Value;

/// Fields that carry the author hash directly on a chat record.
const DIRECT_AUTHOR_FIELDS: &[&str] = &["uid", "userId", "userIdHash"];

/// Author hash of one chat record.
///
/// Falls back to the `userIdHash` inside the `profile` field, which the host
/// ships either as an object or as an embedded JSON string. An unparsable
/// embedded profile yields `None`, so the record is kept.
pub fn record_author(record: &Value) -> Option<String> {
    for field in DIRECT_AUTHOR_FIELDS {
        if let Some(id) = record.get(*field).and_then(Value::as_str).filter(|id| !id.is_empty()) {
            return Some(id.to_string());
        }
    }

    let profile = record.get("profile")?;
    let parsed;
    let profile = match profile {
        Value::String(text) => {
            parsed = serde_json::from_str::<Value>(text).ok()?;
            &parsed
        }
        other => other,
    };
    profile
        .get("userIdHash")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Drop blocked records from a decoded chat frame in place.
///
/// Live frames carry records in `bdy`, history frames in `bdy.messageList`.
/// Returns how many records were removed.
pub fn filter_frame(frame: &mut Value, is_blocked: &dyn Fn(&str) -> bool) -> usize {
    let Some(body) = frame.get_mut("bdy") else {
        return 0;
    };
    let records = match body {
        Value::Array(records) => records,
        Value::Object(map) => match map.get_mut("messageList") {
            Some(Value::Array(records)) => records,
            _ => return 0,
        },
        _ => return 0,
    };

    let before = records.len();
    records.retain(|record| match record_author(record) {
        Some(author) => !is_blocked(&author),
        None => true,
    });
    before - records.len()
}

/// Filter a raw chat frame.
///
/// Returns the re-encoded frame only when records were removed; `None` tells
/// the hook to decode the original text untouched.
pub fn filter_chat_text(text: &str, is_blocked: &dyn Fn(&str) -> bool) -> Option<String> {
    let trimmed = text.trim_start();
    if !trimmed.starts_with('{') || !text.contains("bdy") {
        return None;
    }
    let mut frame: Value = serde_json::from_str(text).ok()?;
    let removed = filter_frame(&mut frame, is_blocked);
    if removed == 0 {
        return None;
    }
    log::debug!("chat: dropped {} blocked records", removed);
    serde_json::to_string(&frame).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn blocked(id: &str) -> bool {
        id == "bad"
    }

    #[test]
    fn test_record_author_sources() {
        assert_eq!(record_author(&json!({"uid": "a"})), Some("a".to_string()));
        assert_eq!(record_author(&json!({"userId": "b"})), Some("b".to_string()));
        assert_eq!(
            record_author(&json!({"profile": "{\"userIdHash\":\"c\"}"})),
            Some("c".to_string())
        );
        assert_eq!(record_author(&json!({"profile": {"userIdHash": "d"}})), Some("d".to_string()));
        assert_eq!(record_author(&json!({"profile": "{broken"})), None);
        assert_eq!(record_author(&json!({"msg": "hi"})), None);
    }

    #[test]
    fn test_filter_live_frame() {
        let text = json!({
            "cmd": 93101,
            "bdy": [
                {"uid": "bad", "msg": "spam"},
                {"uid": "good", "msg": "hello"},
                {"profile": "{\"userIdHash\":\"bad\"}", "msg": "spam again"}
            ]
        })
        .to_string();
        let filtered: Value = serde_json::from_str(&filter_chat_text(&text, &blocked).unwrap()).unwrap();
        let records = filtered["bdy"].as_array().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["uid"], "good");
    }

    #[test]
    fn test_filter_history_frame() {
        let mut frame = json!({
            "cmd": 15101,
            "bdy": {"messageList": [{"userId": "bad"}, {"userId": "ok"}]}
        });
        assert_eq!(filter_frame(&mut frame, &blocked), 1);
        assert_eq!(frame["bdy"]["messageList"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_fail_open() {
        assert_eq!(filter_chat_text("not json", &blocked), None);
        assert_eq!(filter_chat_text(r#"{"bdy": "#, &blocked), None);
        assert_eq!(filter_chat_text(r#"{"bdy": [{"uid": "ok"}]}"#, &blocked), None);
        assert_eq!(filter_chat_text(r#"{"bdy": [{"profile": "{oops"}]}"#, &blocked), None);
        assert_eq!(filter_chat_text(r#"[1, 2]"#, &blocked), None);
    }
}
