//! Shared type definitions for Cheese Grinder
//!
//! These types cross the boundary between the engine and the host adapter:
//! click actions bound to injected controls, per-node marker flags and the
//! UI-only effects the host drains after every call into the engine.

use serde::{Deserialize, Serialize};

// =============================================================================
// Capture Modes
// =============================================================================

/// What to do with a rendered comment snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Hand the image straight to the delivery capability
    Download,
    /// Keep the image in the capture collection for a later PDF
    Collect,
}

// =============================================================================
// Actions
// =============================================================================

/// A click action bound to an injected control.
///
/// Host adapters store the serialized form on the element and feed it back to
/// [`crate::Engine::handle_action`] when the element is clicked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Action {
    /// Copy the author identifier to the clipboard
    CopyAuthor {
        #[serde(rename = "authorId")]
        author_id: String,
    },
    /// Snapshot the comment and download it immediately
    Capture {
        #[serde(rename = "commentId")]
        comment_id: String,
    },
    /// Add the comment to the capture collection, or remove it if present
    Collect {
        #[serde(rename = "commentId")]
        comment_id: String,
    },
    /// Block or unblock the author of the comment
    ToggleBlock {
        #[serde(rename = "authorId")]
        author_id: String,
        #[serde(rename = "commentId")]
        comment_id: String,
    },
    /// Temporarily reveal a blurred comment body
    Reveal {
        #[serde(rename = "commentId")]
        comment_id: String,
    },
    /// Block the author through the host site's own block endpoint
    NativeBlock,
}

/// Result of dispatching an [`Action`].
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome<N> {
    /// The click was consumed; the host should stop propagation
    Handled,
    /// The action did not apply in the current state; let the click through
    Ignored,
    /// The DOM is prepared for a snapshot; the host must render and report back
    Render(crate::capture::RenderRequest<N>),
    /// The host must perform the native block request and report back
    NativeBlock(crate::location::NativeBlockRequest),
}

// =============================================================================
// Marker Flags
// =============================================================================

bitflags::bitflags! {
    /// Per-node bookkeeping flags kept on host elements.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Markers: u8 {
        /// Control group was injected into this container generation
        const UI_INJECTED = 1 << 0;
        /// Click-to-reveal handler is bound on this content node
        const REVEAL_BOUND = 1 << 1;
        /// Content is temporarily unblurred
        const TEMP_UNBLUR = 1 << 2;
    }
}

// =============================================================================
// Effects
// =============================================================================

/// Severity of a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// Presentation-only side effects emitted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Effect {
    /// Show a transient toast
    Toast { level: NoticeLevel, message: String },
    /// Write text to the clipboard
    Clipboard { text: String },
    /// Export control counters changed
    Counts { summary: ExportSummary },
    /// Export controls should be shown or hidden for the current path
    ExportControls { visible: bool },
    /// The blocked author set changed; the live chat filter needs the new list
    BlockedIds { ids: Vec<String> },
}

impl Effect {
    pub fn toast(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self::Toast {
            level,
            message: message.into(),
        }
    }
}

// =============================================================================
// Export Summary
// =============================================================================

/// Counters shown on the export controls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSummary {
    /// Rows in the CSV log (block records + captures)
    pub csv_rows: usize,
    /// Images in the PDF collection
    pub pdf_items: usize,
    /// JSON size of the capture collection
    pub capture_bytes: usize,
    /// Human readable form of `capture_bytes`
    pub size_text: String,
}

impl ExportSummary {
    pub fn new(block_records: usize, captures: usize, capture_bytes: usize) -> Self {
        Self {
            csv_rows: block_records + captures,
            pdf_items: captures,
            capture_bytes,
            size_text: format_size(capture_bytes),
        }
    }
}

/// Format a byte count as `B`, whole `KB` or one-decimal `MB`.
pub fn format_size(bytes: usize) -> String {
    let kbytes = bytes as f64 / 1024.0;
    let mbytes = kbytes / 1024.0;
    if mbytes >= 1.0 {
        format!("{:.1}MB", mbytes)
    } else if kbytes >= 1.0 {
        format!("{:.0}KB", kbytes)
    } else {
        format!("{}B", bytes)
    }
}
