//! Capture pipeline
//!
//! A capture prepares a comment container for a clean snapshot, hands it to the
//! host's raster primitive and then puts everything back. Every property touched
//! while preparing is saved first and restored in reverse order, whether the
//! render succeeded or not.
//!
//! ```text
//! Idle → Preparing → Rendering → Succeeded | Failed → Restoring → Idle
//! ```

use serde::{Deserialize, Serialize};

use crate::dom::{Dom, DomError, HostPart, BLOCK_BTN, BLUR, CAPTURE_BTN, COLLECT_BTN, LABEL};
use crate::types::CaptureMode;

pub const DARK_BACKGROUND: &str = "#1c1d1f";
pub const LIGHT_BACKGROUND: &str = "#f9f9f9";
pub const REPLIED_MARGIN: &str = "12px 6px 7px 8px";
pub const CAPTURE_PADDING: &str = "10px";

// =============================================================================
// Errors
// =============================================================================

/// The host raster primitive failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("render failed: {0}")]
    Failed(String),
    #[error("render produced no image")]
    Empty,
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("capture of comment {0} already in flight")]
    Busy(String),
    #[error("comment {0} is not rendered")]
    NotRendered(String),
    #[error("unknown capture ticket {0}")]
    UnknownTicket(u64),
    #[error(transparent)]
    Dom(#[from] DomError),
}

// =============================================================================
// Render Request
// =============================================================================

/// Options for the host raster primitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOptions {
    pub background_color: String,
    pub skip_fonts: bool,
    pub cache_bust: bool,
    /// Drop `<link rel="stylesheet">` nodes from the clone
    pub skip_stylesheets: bool,
}

impl RenderOptions {
    pub fn for_theme(dark: bool) -> Self {
        Self {
            background_color: if dark { DARK_BACKGROUND } else { LIGHT_BACKGROUND }.to_string(),
            skip_fonts: true,
            cache_bust: true,
            skip_stylesheets: true,
        }
    }
}

/// A prepared container waiting for the host to rasterize it.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest<N> {
    pub ticket: u64,
    pub node: N,
    pub options: RenderOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePhase {
    Idle,
    Preparing,
    Rendering,
    Succeeded,
    Failed,
    Restoring,
}

/// What the capture is of, read while preparing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CaptureContext {
    pub comment_id: String,
    pub author_id: String,
    pub display_name: String,
    pub streamer_name: String,
    pub title: String,
    pub comment_text: String,
    pub page_url: String,
}

// =============================================================================
// Prepare / Restore
// =============================================================================

#[derive(Debug, Clone)]
enum Saved<N> {
    /// Class that was removed and must come back
    Class { node: N, class: &'static str },
    /// Inline style value before it was overridden
    Style { node: N, property: &'static str, previous: String },
}

/// Mutations applied to a container for one capture.
#[derive(Debug, Clone)]
pub struct PreparedCapture<N> {
    pub container: N,
    pub button: N,
    /// Label node of the triggering control (the control itself if it has none)
    pub label: N,
    pub original_label: String,
    pub mode: CaptureMode,
    saved: Vec<Saved<N>>,
}

impl<N: Clone + PartialEq + std::fmt::Debug> PreparedCapture<N> {
    /// Put the container into capture layout.
    ///
    /// Partial progress is kept on error so that [`Self::restore`] can still
    /// undo it.
    pub fn prepare<D: Dom<Node = N>>(
        dom: &mut D,
        container: N,
        button: N,
        mode: CaptureMode,
        busy_label: &str,
    ) -> (Self, Result<(), DomError>) {
        let label = dom.find_class(&button, LABEL).unwrap_or_else(|| button.clone());
        let original_label = dom.text(&label);
        let mut prepared = Self {
            container,
            button,
            label,
            original_label,
            mode,
            saved: Vec::new(),
        };
        let result = prepared.apply(dom, busy_label);
        (prepared, result)
    }

    fn apply<D: Dom<Node = N>>(&mut self, dom: &mut D, busy_label: &str) -> Result<(), DomError> {
        dom.set_text(&self.label, busy_label)?;

        let button = self.button.clone();
        self.override_style(dom, &button, "cursor", "wait")?;
        self.override_style(dom, &button, "opacity", "0.7")?;

        for node in dom.find_classes(&self.container, BLUR) {
            dom.remove_class(&node, BLUR)?;
            self.saved.push(Saved::Class { node, class: BLUR });
        }

        let mut hidden = Vec::new();
        for class in [CAPTURE_BTN, COLLECT_BTN, BLOCK_BTN] {
            hidden.extend(dom.find_classes(&self.container, class));
        }
        hidden.extend(dom.find_parts(&self.container, HostPart::RepliedItem));
        for node in hidden {
            self.override_style(dom, &node, "display", "none")?;
        }

        // Replied containers sit next to the box, not only inside it.
        let scope = dom.parent(&self.container).unwrap_or_else(|| self.container.clone());
        for node in dom.find_parts(&scope, HostPart::RepliedItem) {
            self.override_style(dom, &node, "margin", REPLIED_MARGIN)?;
        }

        let container = self.container.clone();
        self.override_style(dom, &container, "padding", CAPTURE_PADDING)?;
        self.override_style(dom, &container, "box-sizing", "border-box")?;
        Ok(())
    }

    fn override_style<D: Dom<Node = N>>(
        &mut self,
        dom: &mut D,
        node: &N,
        property: &'static str,
        value: &str,
    ) -> Result<(), DomError> {
        let previous = dom.style(node, property);
        dom.set_style(node, property, value)?;
        self.saved.push(Saved::Style {
            node: node.clone(),
            property,
            previous,
        });
        Ok(())
    }

    /// Undo every saved mutation in reverse order. Failures are logged and the
    /// remaining entries are still restored.
    pub fn restore<D: Dom<Node = N>>(&mut self, dom: &mut D) {
        while let Some(saved) = self.saved.pop() {
            let result = match &saved {
                Saved::Class { node, class } => dom.add_class(node, class),
                Saved::Style { node, property, previous } => dom.set_style(node, property, previous),
            };
            if let Err(e) = result {
                log::warn!("capture: restore of {:?} failed: {}", saved, e);
            }
        }
    }

    /// Number of saved mutations still to undo.
    pub fn pending_restores(&self) -> usize {
        self.saved.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::MemDom;

    fn fixture() -> (MemDom, crate::dom::MemNode, crate::dom::MemNode) {
        let mut dom = MemDom::new();
        let root = dom.root();
        let list = dom.element("div", &["comment_list"]);
        dom.append(root, list);
        let container = dom.comment(list, "7", "nick", "text");

        let content = dom.find_part(&container, HostPart::Content).unwrap();
        dom.add_class(&content, BLUR).unwrap();

        let button = dom.element("span", &[CAPTURE_BTN]);
        let label = dom.element("span", &[LABEL]);
        dom.set_host_text(label, "📷");
        dom.append(button, label);
        dom.append(container, button);

        let replied = dom.element("div", &["comment_item_is_replied__r"]);
        dom.append(list, replied);
        dom.set_style(&replied, "margin", "4px").unwrap();

        dom.reset_mutations();
        (dom, container, button)
    }

    #[test]
    fn test_prepare_then_restore_is_exact() {
        let (mut dom, container, button) = fixture();
        let content = dom.find_part(&container, HostPart::Content).unwrap();
        let replied = dom.find_part(&dom.root(), HostPart::RepliedItem).unwrap();

        let (mut prepared, result) =
            PreparedCapture::prepare(&mut dom, container, button, CaptureMode::Download, "busy");
        result.unwrap();

        assert_eq!(dom.text(&prepared.label), "busy");
        assert_eq!(prepared.original_label, "📷");
        assert!(!dom.has_class(&content, BLUR));
        assert_eq!(dom.style(&button, "display"), "none");
        assert_eq!(dom.style(&button, "cursor"), "wait");
        assert_eq!(dom.style(&replied, "margin"), REPLIED_MARGIN);
        assert_eq!(dom.style(&container, "padding"), "10px");
        assert_eq!(dom.style(&container, "box-sizing"), "border-box");

        prepared.restore(&mut dom);
        assert_eq!(prepared.pending_restores(), 0);
        assert!(dom.has_class(&content, BLUR));
        assert_eq!(dom.style(&button, "display"), "");
        assert_eq!(dom.style(&button, "cursor"), "");
        assert_eq!(dom.style(&replied, "margin"), "4px");
        assert_eq!(dom.style(&container, "padding"), "");
    }

    #[test]
    fn test_partial_prepare_still_restores() {
        let (mut dom, container, button) = fixture();
        let content = dom.find_part(&container, HostPart::Content).unwrap();
        let replied = dom.find_part(&dom.root(), HostPart::RepliedItem).unwrap();
        dom.reject_mutations(replied);

        let (mut prepared, result) =
            PreparedCapture::prepare(&mut dom, container, button, CaptureMode::Collect, "busy");
        assert!(result.is_err());
        assert!(!dom.has_class(&content, BLUR));

        prepared.restore(&mut dom);
        assert!(dom.has_class(&content, BLUR));
        assert_eq!(dom.style(&button, "opacity"), "");
    }

    #[test]
    fn test_render_options_theme() {
        assert_eq!(RenderOptions::for_theme(true).background_color, DARK_BACKGROUND);
        assert_eq!(RenderOptions::for_theme(false).background_color, LIGHT_BACKGROUND);
    }
}
