//! DOM abstraction
//!
//! The host page owns the comment markup and rewrites it at will. The engine
//! only sees it through [`Dom`]: reads never fail (a missing node is just
//! absent), mutations may fail when a node was detached by the host between
//! the lookup and the write.
//!
//! Host markup is located by [`HostPart`]s, each of which carries the CSS
//! selector that browser adapters hand to `querySelector`. Injected markup uses
//! the fixed class names below.

pub mod memory;

use std::fmt::Debug;

use crate::types::{Action, Markers};

pub use memory::{MemDom, MemNode};

// =============================================================================
// Injected Markup
// =============================================================================

pub const CONTAINER_PREFIX: &str = "commentBox-";
pub const CONTAINER_SELECTOR: &str = "[id^=\"commentBox-\"]";

pub const GROUP: &str = "chzzk-btn-group";
pub const ACTION_BTN: &str = "chzzk-action-btn";
pub const COPY_BTN: &str = "chzzk-copy-btn";
pub const CAPTURE_BTN: &str = "chzzk-capture-btn";
pub const COLLECT_BTN: &str = "chzzk-collect-btn";
pub const BLOCK_BTN: &str = "chzzk-block-btn";
pub const NATIVE_BLOCK_BTN: &str = "chzzk-native-block-btn";
pub const LABEL: &str = "btn-label";
pub const TOOLTIP: &str = "chzzk-tooltip-text";
pub const BLUR_TOOLTIP: &str = "for-blur";
pub const BLUR: &str = "chzzk-blur-content";
pub const IS_BLOCKED: &str = "is-blocked";
pub const IS_CAPTURED: &str = "is-captured";
pub const HIGHLIGHT: &str = "chzzk-target-highlight";
pub const BLOCKED_PLACEHOLDER: &str = "chzzk-native-blocked";
pub const DEFAULT_PROFILE_IMAGE: &str = "https://ssl.pstatic.net/static/nng/glive/image/default_profile_light.png";

/// Attribute carrying the author a control group was built for.
pub const OWNER_ATTR: &str = "data-owner-hash";

/// Per-author class on the block control.
pub fn block_class(author_id: &str) -> String {
    format!("block-btn-{}", author_id)
}

/// Comment key of a container id (`commentBox-<key>` → `<key>`).
pub fn container_key(id: &str) -> Option<&str> {
    if !id.starts_with(CONTAINER_PREFIX) {
        return None;
    }
    id.rsplit('-').next().filter(|key| !key.is_empty())
}

// =============================================================================
// Host Parts
// =============================================================================

/// Pieces of host markup the engine reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostPart {
    /// Author nickname inside a comment
    NameText,
    /// Comment body wrapper
    Content,
    /// Comment text node wrapper
    ContentText,
    /// Sticker or image attached to a comment
    AttachmentImage,
    /// Nested reply area
    RepliedItem,
    /// Channel name on a replay page
    VideoChannelName,
    /// Channel name on a community post
    CommunityName,
    /// Replay title
    VideoTitle,
    /// Entry of an opened comment menu
    MenuItem,
    /// Button inside a menu entry
    MenuButton,
}

impl HostPart {
    pub fn selector(self) -> &'static str {
        match self {
            Self::NameText => "span[class*=\"name_text\"]",
            Self::Content => "div[class*=\"comment_item_content\"]",
            Self::ContentText => "[class*=\"comment_item_text\"]",
            Self::AttachmentImage => "div[class*=\"comment_item_attachment\"] img",
            Self::RepliedItem => "[class*=\"comment_item_is_replied\"]",
            Self::VideoChannelName => "div[class*=\"video_information_name\"] span[class*=\"name_text\"]",
            Self::CommunityName => "div[class*=\"community_detail_name\"] span[class*=\"name_text\"]",
            Self::VideoTitle => "h2[class*=\"video_information_title\"]",
            Self::MenuItem => "li",
            Self::MenuButton => "button",
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomError {
    #[error("node is detached")]
    Detached,
    #[error("cannot create element <{0}>")]
    Create(String),
    #[error("host rejected mutation: {0}")]
    Host(String),
}

// =============================================================================
// Dom Trait
// =============================================================================

/// Access to the rendered page.
pub trait Dom {
    type Node: Clone + PartialEq + Debug;

    // -- reads --------------------------------------------------------------

    /// Root of page-level lookups.
    fn document(&self) -> Self::Node;

    /// Current page URL.
    fn location(&self) -> String;

    /// Every rendered comment container, in document order.
    fn comment_containers(&self) -> Vec<Self::Node>;

    fn container_by_key(&self, key: &str) -> Option<Self::Node>;

    fn id(&self, node: &Self::Node) -> Option<String>;

    fn parent(&self, node: &Self::Node) -> Option<Self::Node>;

    fn find_part(&self, scope: &Self::Node, part: HostPart) -> Option<Self::Node>;

    fn find_parts(&self, scope: &Self::Node, part: HostPart) -> Vec<Self::Node>;

    /// First descendant of `scope` carrying `class`.
    fn find_class(&self, scope: &Self::Node, class: &str) -> Option<Self::Node>;

    fn find_classes(&self, scope: &Self::Node, class: &str) -> Vec<Self::Node>;

    fn has_class(&self, node: &Self::Node, class: &str) -> bool;

    /// Text content of the node and its descendants.
    fn text(&self, node: &Self::Node) -> String;

    /// Text content of the last child node.
    fn last_child_text(&self, node: &Self::Node) -> Option<String>;

    fn attr(&self, node: &Self::Node, name: &str) -> Option<String>;

    /// Inline style property, empty when unset.
    fn style(&self, node: &Self::Node, property: &str) -> String;

    fn markers(&self, node: &Self::Node) -> Markers;

    fn is_dark_theme(&self) -> bool;

    // -- mutations ----------------------------------------------------------

    fn add_class(&mut self, node: &Self::Node, class: &str) -> Result<(), DomError>;

    fn remove_class(&mut self, node: &Self::Node, class: &str) -> Result<(), DomError>;

    /// Replace the node's content with plain text.
    fn set_text(&mut self, node: &Self::Node, text: &str) -> Result<(), DomError>;

    fn create_element(&mut self, tag: &str, classes: &[&str]) -> Result<Self::Node, DomError>;

    fn append_child(&mut self, parent: &Self::Node, child: &Self::Node) -> Result<(), DomError>;

    /// Insert `node` as the next sibling of `anchor`.
    fn insert_after(&mut self, anchor: &Self::Node, node: &Self::Node) -> Result<(), DomError>;

    fn remove(&mut self, node: &Self::Node) -> Result<(), DomError>;

    fn set_attr(&mut self, node: &Self::Node, name: &str, value: &str) -> Result<(), DomError>;

    fn remove_attr(&mut self, node: &Self::Node, name: &str) -> Result<(), DomError>;

    /// Set an inline style property; an empty value clears it.
    fn set_style(&mut self, node: &Self::Node, property: &str, value: &str) -> Result<(), DomError>;

    fn set_markers(&mut self, node: &Self::Node, markers: Markers) -> Result<(), DomError>;

    /// Make a click on `node` dispatch `action` to the engine.
    fn bind_action(&mut self, node: &Self::Node, action: &Action) -> Result<(), DomError>;

    fn unbind_action(&mut self, node: &Self::Node) -> Result<(), DomError>;

    fn scroll_into_view(&mut self, node: &Self::Node) -> Result<(), DomError>;
}
