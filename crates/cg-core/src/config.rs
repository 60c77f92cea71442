//! Engine configuration
//!
//! Every field has a default matching the shipped extension, so hosts only
//! pass the values they want to override.

use serde::{Deserialize, Serialize};

/// Timing, storage and label settings for the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Trailing debounce window for reconciliation passes
    pub debounce_ms: u64,
    /// How long a click-to-reveal keeps a blocked comment readable
    pub reveal_ms: u64,
    /// Delay before re-reading the deep-link target after a navigation
    pub navigation_grace_ms: u64,
    /// Delay between highlighting a deep-link target and scrolling to it
    pub scroll_delay_ms: u64,
    /// How long confirmation labels stay before reverting
    pub confirm_ms: u64,
    /// Query parameter naming the deep-link target comment
    pub target_param: String,
    /// Base URL of the host's block endpoint
    pub native_block_base: String,
    pub storage: StorageKeys,
    pub labels: Labels,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debounce_ms: 200,
            reveal_ms: 3000,
            navigation_grace_ms: 500,
            scroll_delay_ms: 500,
            confirm_ms: 1000,
            target_param: "chzzk_target".to_string(),
            native_block_base: "https://comm-api.game.naver.com/nng_main/v1".to_string(),
            storage: StorageKeys::default(),
            labels: Labels::default(),
        }
    }
}

/// Fixed logical names of the persisted collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageKeys {
    pub blocked: String,
    pub details: String,
    pub captures: String,
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self {
            blocked: "CHZZK_REPLY_BLOCKED_USERS".to_string(),
            details: "CHZZK_BLOCKED_DETAILS".to_string(),
            captures: "CHZZK_BLOCKED_IMAGES".to_string(),
        }
    }
}

impl StorageKeys {
    pub fn all(&self) -> [&str; 3] {
        [&self.blocked, &self.details, &self.captures]
    }
}

/// User-facing strings of injected controls and notices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Labels {
    pub copy_tooltip: String,
    pub copied: String,
    pub capture_icon: String,
    pub capture_tooltip: String,
    pub capture_busy: String,
    pub capture_done: String,
    pub collect_icon: String,
    pub collect_done: String,
    pub collect_tooltip: String,
    pub collect_remove_tooltip: String,
    pub block: String,
    pub blocked: String,
    pub block_tooltip: String,
    pub blur_tooltip: String,
    pub unknown: String,
    pub untitled: String,
    pub community: String,
    pub image_placeholder: String,
    pub no_content: String,
    pub not_ready: String,
    pub blocked_notice: String,
    pub unblocked_notice: String,
    pub copied_notice: String,
    pub collected_notice: String,
    pub removed_notice: String,
    pub cleared_notice: String,
    pub nothing_to_clear: String,
    pub capture_failed: String,
    pub target_found: String,
    pub native_block_done: String,
    pub native_block_failed: String,
    pub native_blocked_comment: String,
    pub missing_channel: String,
    pub native_block: String,
    pub report: String,
}

impl Default for Labels {
    fn default() -> Self {
        Self {
            copy_tooltip: "UID 복사하기".to_string(),
            copied: "복사됨".to_string(),
            capture_icon: "📷".to_string(),
            capture_tooltip: "댓글 캡처 이미지 다운로드 (PNG)".to_string(),
            capture_busy: "⏳ 캡처 중...".to_string(),
            capture_done: "✅".to_string(),
            collect_icon: "📥".to_string(),
            collect_done: "📥 담기 완료".to_string(),
            collect_tooltip: "PDF 목록에 담기".to_string(),
            collect_remove_tooltip: "목록에서 제거".to_string(),
            block: "차단하기".to_string(),
            blocked: "차단됨".to_string(),
            block_tooltip: "유저 차단/해제".to_string(),
            blur_tooltip: "차단된 댓글입니다. 클릭하여 잠시 확인".to_string(),
            unknown: "알 수 없음".to_string(),
            untitled: "제목 없음".to_string(),
            community: "커뮤니티".to_string(),
            image_placeholder: "(이미지/스티커)".to_string(),
            no_content: "내용 없음".to_string(),
            not_ready: "데이터를 불러오는 중입니다. 잠시 후 다시 시도해주세요.".to_string(),
            blocked_notice: "유저가 차단되었습니다.".to_string(),
            unblocked_notice: "유저 차단이 해제되었습니다.".to_string(),
            copied_notice: "UID가 클립보드에 복사되었습니다.".to_string(),
            collected_notice: "PDF 생성 목록에 담겼습니다.".to_string(),
            removed_notice: "목록에서 제거되었습니다.".to_string(),
            cleared_notice: "목록이 모두 삭제되었습니다.".to_string(),
            nothing_to_clear: "비울 내용이 없습니다.".to_string(),
            capture_failed: "캡처 중 오류가 발생했습니다.".to_string(),
            target_found: "선택한 댓글 위치로 이동했습니다.".to_string(),
            native_block_done: "유저를 차단했습니다.".to_string(),
            native_block_failed: "요청 처리 중 오류가 발생했습니다.".to_string(),
            native_blocked_comment: "내가 차단한 이용자의 댓글입니다.".to_string(),
            missing_channel: "채널 정보를 찾을 수 없습니다.".to_string(),
            native_block: "차단".to_string(),
            report: "신고".to_string(),
        }
    }
}
