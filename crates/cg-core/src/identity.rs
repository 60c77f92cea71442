//! Identity index
//!
//! Maps comment ids to author hashes recovered from tapped comment feeds. The
//! rendered comment markup never carries the author hash, so this map is the
//! only link between a container and its author.

use std::collections::HashMap;

use serde_json::Value;

/// commentId → authorId for the current page session.
#[derive(Debug, Default, Clone)]
pub struct IdentityIndex {
    authors: HashMap<String, String>,
}

impl IdentityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn author_of(&self, comment_id: &str) -> Option<&str> {
        self.authors.get(comment_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.authors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.authors.is_empty()
    }

    /// Record one mapping. A reused comment id overwrites the stale author.
    pub fn insert(&mut self, comment_id: impl Into<String>, author_id: impl Into<String>) {
        self.authors.insert(comment_id.into(), author_id.into());
    }

    /// Forget everything; comment ids are not unique across pages.
    pub fn clear(&mut self) {
        self.authors.clear();
    }

    /// Index a comment feed body (`content.bestComments` and
    /// `content.comments.data`). Returns the number of mappings recorded.
    pub fn ingest_feed(&mut self, feed: &Value) -> usize {
        let Some(content) = feed.get("content") else {
            return 0;
        };
        let mut recorded = 0;
        if let Some(best) = content.get("bestComments").and_then(Value::as_array) {
            recorded += self.ingest_nodes(best);
        }
        if let Some(list) = content.pointer("/comments/data").and_then(Value::as_array) {
            recorded += self.ingest_nodes(list);
        }
        recorded
    }

    /// Walk comment nodes and their `replyComments` recursively.
    pub fn ingest_nodes(&mut self, nodes: &[Value]) -> usize {
        let mut recorded = 0;
        for node in nodes {
            let comment_id = node.pointer("/comment/commentId").and_then(id_string);
            let author_id = node
                .pointer("/user/userIdHash")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty());
            if let (Some(comment_id), Some(author_id)) = (comment_id, author_id) {
                self.insert(comment_id, author_id);
                recorded += 1;
            }
            if let Some(replies) = node.get("replyComments").and_then(Value::as_array) {
                recorded += self.ingest_nodes(replies);
            }
        }
        recorded
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.authors.iter().map(|(c, a)| (c.as_str(), a.as_str()))
    }
}

/// Comment ids arrive as numbers or strings.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_reply_indexed() {
        let feed = json!({
            "content": {
                "comments": {
                    "data": [{
                        "comment": {"commentId": 100},
                        "user": {"userIdHash": "u0"},
                        "replyComments": [{
                            "comment": {"commentId": 101},
                            "user": {"userIdHash": "u2"},
                            "replyComments": [{
                                "comment": {"commentId": "c1"},
                                "user": {"userIdHash": "u1"}
                            }]
                        }]
                    }]
                }
            }
        });
        let mut index = IdentityIndex::new();
        assert_eq!(index.ingest_feed(&feed), 3);
        assert_eq!(index.author_of("c1"), Some("u1"));
        assert_eq!(index.author_of("100"), Some("u0"));
    }

    #[test]
    fn test_best_comments_and_skips() {
        let feed = json!({
            "content": {
                "bestComments": [
                    {"comment": {"commentId": 5}, "user": {"userIdHash": "best"}},
                    {"comment": {"commentId": 6}},
                    {"user": {"userIdHash": "orphan"}},
                    {"comment": {"commentId": null}, "user": {"userIdHash": "x"}}
                ],
                "comments": {"data": "not a list"}
            }
        });
        let mut index = IdentityIndex::new();
        assert_eq!(index.ingest_feed(&feed), 1);
        assert_eq!(index.author_of("5"), Some("best"));
        assert_eq!(index.author_of("6"), None);
    }

    #[test]
    fn test_cumulative_and_overwrite() {
        let mut index = IdentityIndex::new();
        index.ingest_nodes(&[json!({"comment": {"commentId": 1}, "user": {"userIdHash": "a"}})]);
        index.ingest_nodes(&[json!({"comment": {"commentId": 2}, "user": {"userIdHash": "b"}})]);
        index.ingest_nodes(&[json!({"comment": {"commentId": 1}, "user": {"userIdHash": "c"}})]);
        assert_eq!(index.len(), 2);
        assert_eq!(index.author_of("1"), Some("c"));
        index.clear();
        assert!(index.is_empty());
    }

    #[test]
    fn test_missing_content() {
        let mut index = IdentityIndex::new();
        assert_eq!(index.ingest_feed(&json!({"code": 500})), 0);
        assert_eq!(index.ingest_feed(&json!(null)), 0);
    }
}
