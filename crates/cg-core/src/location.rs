//! Page location helpers
//!
//! Deep-link parsing and building, export-control visibility and the native
//! block request all derive from the current page URL.

use serde::{Deserialize, Serialize};
use url::Url;

/// Read the deep-link target comment id from a page URL.
pub fn target_from_url(page_url: &str, param: &str) -> Option<String> {
    let url = Url::parse(page_url).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == param)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// Build a URL that opens `page_url` focused on `comment_id`.
///
/// Returns `None` when `page_url` does not parse.
pub fn deep_link(page_url: &str, param: &str, comment_id: Option<&str>) -> Option<String> {
    let mut url = Url::parse(page_url).ok()?;
    if let Some(comment_id) = comment_id.filter(|id| !id.is_empty()) {
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key != param)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            for (key, value) in &kept {
                pairs.append_pair(key, value);
            }
            pairs.append_pair(param, comment_id);
        }
    }
    Some(url.into())
}

/// Path component of a page URL, or the input itself if it is already a path.
pub fn page_path(page_url: &str) -> String {
    match Url::parse(page_url) {
        Ok(url) => url.path().to_string(),
        Err(_) => page_url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    }
}

/// Export controls only make sense on replay and community pages.
pub fn shows_export_controls(page_url: &str) -> bool {
    let path = page_path(page_url);
    path.contains("/video/") || path.contains("/community/")
}

/// Channel id is the first path segment (`/<channel>/community/...`).
pub fn channel_from_url(page_url: &str) -> Option<String> {
    page_path(page_url)
        .split('/')
        .nth(1)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

// =============================================================================
// Native Block Request
// =============================================================================

/// A block request against the host's own endpoint, performed by the host
/// adapter with the user's credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeBlockRequest {
    pub author_id: String,
    pub url: String,
    pub method: String,
}

impl NativeBlockRequest {
    pub fn new(base: &str, author_id: &str, channel: &str) -> Self {
        Self {
            author_id: author_id.to_string(),
            url: format!(
                "{}/privateUserBlocks/{}?loungeId={}",
                base.trim_end_matches('/'),
                author_id,
                channel
            ),
            method: "POST".to_string(),
        }
    }
}

// =============================================================================
// Filenames
// =============================================================================

/// Replace characters that download targets reject.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_from_url() {
        assert_eq!(
            target_from_url("https://chzzk.naver.com/video/123?chzzk_target=987", "chzzk_target"),
            Some("987".to_string())
        );
        assert_eq!(target_from_url("https://chzzk.naver.com/video/123", "chzzk_target"), None);
        assert_eq!(target_from_url("https://chzzk.naver.com/video/1?chzzk_target=", "chzzk_target"), None);
        assert_eq!(target_from_url("not a url", "chzzk_target"), None);
    }

    #[test]
    fn test_deep_link_replaces_existing_target() {
        let link = deep_link(
            "https://chzzk.naver.com/video/123?t=5&chzzk_target=1",
            "chzzk_target",
            Some("42"),
        )
        .unwrap();
        assert_eq!(link, "https://chzzk.naver.com/video/123?t=5&chzzk_target=42");
        assert_eq!(target_from_url(&link, "chzzk_target"), Some("42".to_string()));
    }

    #[test]
    fn test_deep_link_without_comment() {
        let link = deep_link("https://chzzk.naver.com/abc/community/detail/7", "chzzk_target", None).unwrap();
        assert_eq!(link, "https://chzzk.naver.com/abc/community/detail/7");
        assert!(deep_link("", "chzzk_target", Some("1")).is_none());
    }

    #[test]
    fn test_export_visibility() {
        assert!(shows_export_controls("https://chzzk.naver.com/video/123"));
        assert!(shows_export_controls("https://chzzk.naver.com/abc/community/detail/7"));
        assert!(!shows_export_controls("https://chzzk.naver.com/live/abc"));
        assert!(shows_export_controls("/video/9?x=1"));
    }

    #[test]
    fn test_native_block_request() {
        assert_eq!(channel_from_url("https://chzzk.naver.com/abc123/community/detail/7"), Some("abc123".to_string()));
        assert_eq!(channel_from_url("https://chzzk.naver.com/"), None);

        let request = NativeBlockRequest::new("https://api.example/v1/", "hash", "abc123");
        assert_eq!(request.url, "https://api.example/v1/privateUserBlocks/hash?loungeId=abc123");
        assert_eq!(request.method, "POST");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a/b:c?.png"), "a_b_c_.png");
        assert_eq!(sanitize_filename("치지직 로그.csv"), "치지직 로그.csv");
    }
}
