//! Reconciliation pass
//!
//! Re-applies moderation state onto whatever the host currently renders. A pass
//! reads first and writes only what differs, so running it twice in a row
//! performs no DOM mutation the second time.

use crate::dom::{
    block_class, container_key, Dom, DomError, HostPart, ACTION_BTN, BLOCK_BTN, BLUR, BLUR_TOOLTIP, CAPTURE_BTN,
    COLLECT_BTN, COPY_BTN, GROUP, HIGHLIGHT, IS_BLOCKED, IS_CAPTURED, LABEL, OWNER_ATTR, TOOLTIP,
};
use crate::engine::Engine;
use crate::scheduler::Task;
use crate::types::{Action, Markers, NoticeLevel};

/// Flags cleared when a content node stops being blurred.
const REVEAL_FLAGS: Markers = Markers::REVEAL_BOUND.union(Markers::TEMP_UNBLUR);

/// What one pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Containers with a comment key
    pub visited: usize,
    /// Containers whose author is known
    pub identified: usize,
    /// Control groups built
    pub injected: usize,
    /// Containers that failed part way
    pub failed: usize,
}

impl<D: Dom> Engine<D> {
    /// Run a pass immediately, dropping any pending debounced request.
    pub fn reconcile_now(&mut self) -> PassReport {
        self.scheduler.cancel_reconcile();
        self.run_pass()
    }

    pub(crate) fn run_pass(&mut self) -> PassReport {
        let mut report = PassReport::default();
        for container in self.dom.comment_containers() {
            let Some(id) = self.dom.id(&container) else {
                continue;
            };
            let Some(key) = container_key(&id).map(str::to_string) else {
                continue;
            };
            report.visited += 1;
            if let Err(e) = self.reconcile_container(&container, &key, &mut report) {
                log::warn!("reconcile: comment {} skipped: {}", key, e);
                report.failed += 1;
            }
        }
        report
    }

    fn reconcile_container(&mut self, container: &D::Node, key: &str, report: &mut PassReport) -> Result<(), DomError> {
        self.highlight_target(container, key)?;

        let Some(author) = self.identity.author_of(key).map(str::to_string) else {
            return Ok(());
        };
        report.identified += 1;
        let blocked = self.store.is_blocked(&author);

        // A reused container may carry controls built for a previous author.
        if let Some(group) = self.dom.find_class(container, GROUP) {
            if self.dom.attr(&group, OWNER_ATTR).as_deref() != Some(author.as_str()) {
                self.dom.remove(&group)?;
                for tooltip in self.dom.find_classes(container, TOOLTIP) {
                    self.dom.remove(&tooltip)?;
                }
                let markers = self.dom.markers(container);
                if markers.contains(Markers::UI_INJECTED) {
                    self.dom.set_markers(container, markers - Markers::UI_INJECTED)?;
                }
            }
        }

        let markers = self.dom.markers(container);
        let has_group = self.dom.find_class(container, GROUP).is_some();
        if markers.contains(Markers::UI_INJECTED) && !has_group {
            // The host re-rendered the box contents and dropped our controls.
            log::debug!("reconcile: controls of {} lost, rebuilding", key);
            self.dom.set_markers(container, markers - Markers::UI_INJECTED)?;
        }
        if !has_group {
            if let Some(name) = self.dom.find_part(container, HostPart::NameText) {
                self.inject_group(container, &name, &author, key, blocked)?;
                let markers = self.dom.markers(container);
                self.dom.set_markers(container, markers | Markers::UI_INJECTED)?;
                report.injected += 1;
            }
        } else if !markers.contains(Markers::UI_INJECTED) {
            self.dom.set_markers(container, markers | Markers::UI_INJECTED)?;
        }

        if let Some(content) = self.dom.find_part(container, HostPart::Content) {
            if let Some(parent) = self.dom.parent(&content) {
                if self.dom.style(&parent, "position") != "relative" {
                    self.dom.set_style(&parent, "position", "relative")?;
                }
            }
            // A capture in flight has lifted the blur for the snapshot; its
            // restore puts it back.
            if !self.capture_in_flight(key) {
                if blocked {
                    self.apply_blur(&content, key)?;
                } else {
                    self.clear_blur(&content)?;
                }
            }
        }

        self.sync_controls(container, &author, key, blocked)
    }

    fn highlight_target(&mut self, container: &D::Node, key: &str) -> Result<(), DomError> {
        if self.pending_target.as_deref() != Some(key) || self.dom.has_class(container, HIGHLIGHT) {
            return Ok(());
        }
        self.dom.add_class(container, HIGHLIGHT)?;
        let now = self.clock.now_ms();
        self.scheduler
            .schedule(now, self.config.scroll_delay_ms, Task::ScrollIntoView(container.clone()));
        let message = self.config.labels.target_found.clone();
        self.toast(NoticeLevel::Success, message);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Control group
    // -------------------------------------------------------------------------

    fn inject_group(
        &mut self,
        container: &D::Node,
        name: &D::Node,
        author: &str,
        key: &str,
        blocked: bool,
    ) -> Result<(), DomError> {
        let labels = self.config.labels.clone();
        let captured = self.store.is_captured(key);

        let group = self.dom.create_element("span", &[GROUP])?;
        self.dom.set_attr(&group, OWNER_ATTR, author)?;

        let copy = self.build_control(
            &[ACTION_BTN, COPY_BTN],
            author,
            &labels.copy_tooltip,
            &Action::CopyAuthor {
                author_id: author.to_string(),
            },
        )?;
        let capture = self.build_control(
            &[ACTION_BTN, CAPTURE_BTN],
            &labels.capture_icon,
            &labels.capture_tooltip,
            &Action::Capture {
                comment_id: key.to_string(),
            },
        )?;

        let mut collect_classes = vec![ACTION_BTN, COLLECT_BTN];
        if captured {
            collect_classes.push(IS_CAPTURED);
        }
        let (collect_label, collect_tooltip) = if captured {
            (&labels.collect_done, &labels.collect_remove_tooltip)
        } else {
            (&labels.collect_icon, &labels.collect_tooltip)
        };
        let collect = self.build_control(
            &collect_classes,
            collect_label,
            collect_tooltip,
            &Action::Collect {
                comment_id: key.to_string(),
            },
        )?;

        let owner_class = block_class(author);
        let mut block_classes = vec![ACTION_BTN, BLOCK_BTN, owner_class.as_str()];
        if blocked {
            block_classes.push(IS_BLOCKED);
        }
        let block = self.build_control(
            &block_classes,
            if blocked { &labels.blocked } else { &labels.block },
            &labels.block_tooltip,
            &Action::ToggleBlock {
                author_id: author.to_string(),
                comment_id: key.to_string(),
            },
        )?;

        for control in [&copy, &capture, &collect, &block] {
            self.dom.append_child(&group, control)?;
        }
        let anchor = self.dom.parent(name).unwrap_or_else(|| container.clone());
        self.dom.append_child(&anchor, &group)
    }

    /// A labelled control with its tooltip, dispatching `action` on click.
    fn build_control(&mut self, classes: &[&str], label: &str, tooltip: &str, action: &Action) -> Result<D::Node, DomError> {
        let control = self.dom.create_element("span", classes)?;
        let label_node = self.dom.create_element("span", &[LABEL])?;
        self.dom.set_text(&label_node, label)?;
        self.dom.append_child(&control, &label_node)?;
        let tooltip_node = self.dom.create_element("span", &[TOOLTIP])?;
        self.dom.set_text(&tooltip_node, tooltip)?;
        self.dom.append_child(&control, &tooltip_node)?;
        self.dom.bind_action(&control, action)?;
        Ok(control)
    }

    fn sync_controls(&mut self, container: &D::Node, author: &str, key: &str, blocked: bool) -> Result<(), DomError> {
        if let Some(button) = self.dom.find_class(container, &block_class(author)) {
            if self.dom.has_class(&button, IS_BLOCKED) != blocked {
                let text = if blocked {
                    self.dom.add_class(&button, IS_BLOCKED)?;
                    self.config.labels.blocked.clone()
                } else {
                    self.dom.remove_class(&button, IS_BLOCKED)?;
                    self.config.labels.block.clone()
                };
                if let Some(label) = self.dom.find_class(&button, LABEL) {
                    self.dom.set_text(&label, &text)?;
                }
            }
        }

        if self.capture_in_flight(key) {
            return Ok(());
        }
        if let Some(button) = self.dom.find_class(container, COLLECT_BTN) {
            let captured = self.store.is_captured(key);
            if self.dom.has_class(&button, IS_CAPTURED) != captured {
                self.set_collect_state(&button, captured)?;
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Blur
    // -------------------------------------------------------------------------

    fn apply_blur(&mut self, content: &D::Node, key: &str) -> Result<(), DomError> {
        let markers = self.dom.markers(content);
        if !markers.contains(Markers::TEMP_UNBLUR) {
            if !self.dom.has_class(content, BLUR) {
                self.dom.add_class(content, BLUR)?;
            }
            let scope = self.dom.parent(content);
            let existing = scope.as_ref().and_then(|scope| self.dom.find_class(scope, BLUR_TOOLTIP));
            if existing.is_none() && scope.is_some() {
                let tooltip = self.dom.create_element("span", &[TOOLTIP, BLUR_TOOLTIP])?;
                self.dom.set_text(&tooltip, &self.config.labels.blur_tooltip)?;
                self.dom.set_style(&tooltip, "bottom", "100%")?;
                self.dom.set_style(&tooltip, "left", "50%")?;
                self.dom.insert_after(content, &tooltip)?;
            }
        }
        if !markers.contains(Markers::REVEAL_BOUND) {
            self.dom.bind_action(
                content,
                &Action::Reveal {
                    comment_id: key.to_string(),
                },
            )?;
            self.dom.set_markers(content, markers | Markers::REVEAL_BOUND)?;
        }
        Ok(())
    }

    fn clear_blur(&mut self, content: &D::Node) -> Result<(), DomError> {
        if self.dom.has_class(content, BLUR) {
            self.dom.remove_class(content, BLUR)?;
        }
        if let Some(scope) = self.dom.parent(content) {
            if let Some(tooltip) = self.dom.find_class(&scope, BLUR_TOOLTIP) {
                self.dom.remove(&tooltip)?;
            }
        }
        let markers = self.dom.markers(content);
        if markers.contains(Markers::REVEAL_BOUND) {
            self.dom.unbind_action(content)?;
        }
        if markers.intersects(REVEAL_FLAGS) {
            self.dom.set_markers(content, markers - REVEAL_FLAGS)?;
            self.reveals.retain(|(node, _)| node != content);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Navigation cleanup
    // -------------------------------------------------------------------------

    /// Remove every injected control, tooltip, highlight and blur marker.
    pub(crate) fn strip_injected_ui(&mut self) -> Result<(), DomError> {
        let document = self.dom.document();
        let mut first_error = None;
        let mut note = |result: Result<(), DomError>| {
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        };

        for group in self.dom.find_classes(&document, GROUP) {
            note(self.dom.remove(&group));
        }
        for tooltip in self.dom.find_classes(&document, TOOLTIP) {
            note(self.dom.remove(&tooltip));
        }
        for node in self.dom.find_classes(&document, HIGHLIGHT) {
            note(self.dom.remove_class(&node, HIGHLIGHT));
        }
        for container in self.dom.comment_containers() {
            let markers = self.dom.markers(&container);
            if !markers.is_empty() {
                note(self.dom.set_markers(&container, Markers::empty()));
            }
            for content in self.dom.find_parts(&container, HostPart::Content) {
                let markers = self.dom.markers(&content);
                if markers.contains(Markers::REVEAL_BOUND) {
                    note(self.dom.unbind_action(&content));
                }
                if !markers.is_empty() {
                    note(self.dom.set_markers(&content, Markers::empty()));
                }
            }
        }
        for node in self.dom.find_classes(&document, BLUR) {
            note(self.dom.remove_class(&node, BLUR));
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CapturePhase;
    use crate::dom::MemNode;
    use crate::testing::{Harness, VIDEO};
    use crate::types::ActionOutcome;

    fn blurred(h: &Harness, container: MemNode) -> bool {
        let content = h.engine.dom().find_part(&container, HostPart::Content).unwrap();
        h.engine.dom().has_class(&content, BLUR)
    }

    #[test]
    fn test_second_pass_is_quiet() {
        let mut h = Harness::loaded(VIDEO);
        h.comment("c1", "u1", "a", "one");
        h.comment("c2", "u2", "b", "two");
        h.comment("c3", "u3", "c", "three");
        h.engine.toggle_block("u2", None);

        let first = h.engine.reconcile_now();
        assert_eq!(first.injected, 3);
        assert!(h.engine.dom().mutations() > 0);

        h.engine.dom_mut().reset_mutations();
        let second = h.engine.reconcile_now();
        assert_eq!(second.injected, 0);
        assert_eq!(second.identified, 3);
        assert_eq!(h.engine.dom().mutations(), 0);
    }

    #[test]
    fn test_blur_follows_block_state() {
        let mut h = Harness::loaded(VIDEO);
        let a = h.comment("c1", "u1", "a", "one");
        let b = h.comment("c2", "u2", "b", "two");
        let c = h.comment("c3", "u1", "a", "three");

        h.engine.toggle_block("u1", None);
        h.engine.reconcile_now();
        assert!(blurred(&h, a));
        assert!(!blurred(&h, b));
        assert!(blurred(&h, c));
        let tooltips = h.engine.dom().find_classes(&a, BLUR_TOOLTIP);
        assert_eq!(tooltips.len(), 1);

        let block = h.button(b, &block_class("u2"));
        assert_eq!(h.engine.dom().text(&h.button(block, LABEL)), "차단하기");

        h.engine.toggle_block("u1", None);
        h.engine.toggle_block("u2", None);
        h.engine.reconcile_now();
        assert!(!blurred(&h, a));
        assert!(blurred(&h, b));
        assert!(!blurred(&h, c));
        assert!(h.engine.dom().find_class(&a, BLUR_TOOLTIP).is_none());
        assert!(h.engine.dom().has_class(&block, IS_BLOCKED));
        assert_eq!(h.engine.dom().text(&h.button(block, LABEL)), "차단됨");
    }

    #[test]
    fn test_reused_container_rebuilt_for_new_owner() {
        let mut h = Harness::loaded(VIDEO);
        let container = h.comment("c1", "u1", "a", "one");
        h.engine.toggle_block("u1", None);
        h.engine.reconcile_now();

        // The host reused the node for another author's comment.
        h.engine.identity.insert("c1", "u2");
        let report = h.engine.reconcile_now();
        assert_eq!(report.injected, 1);

        let groups = h.engine.dom().find_classes(&container, GROUP);
        assert_eq!(groups.len(), 1);
        assert_eq!(h.engine.dom().attr(&groups[0], OWNER_ATTR).as_deref(), Some("u2"));
        assert!(h.engine.dom().find_class(&container, &block_class("u1")).is_none());
        assert!(!blurred(&h, container));
        assert!(h.engine.dom().markers(&container).contains(Markers::UI_INJECTED));
    }

    #[test]
    fn test_unknown_author_left_alone() {
        let mut h = Harness::loaded(VIDEO);
        let list = h.list;
        let container = h.engine.dom_mut().comment(list, "c9", "a", "one");
        let report = h.engine.reconcile_now();
        assert_eq!(report.visited, 1);
        assert_eq!(report.identified, 0);
        assert!(h.engine.dom().find_class(&container, GROUP).is_none());
        assert_eq!(h.engine.dom().mutations(), 0);
    }

    #[test]
    fn test_failing_container_does_not_stop_pass() {
        let mut h = Harness::loaded(VIDEO);
        let broken = h.comment("c1", "u1", "a", "one");
        let fine = h.comment("c2", "u2", "b", "two");
        let name = h.engine.dom().find_part(&broken, HostPart::NameText).unwrap();
        let anchor = h.engine.dom().parent(&name).unwrap();
        h.engine.dom_mut().reject_mutations(anchor);

        let report = h.engine.reconcile_now();
        assert_eq!(report.failed, 1);
        assert!(h.engine.dom().find_class(&fine, GROUP).is_some());
    }

    #[test]
    fn test_collect_control_follows_store() {
        let mut h = Harness::loaded(VIDEO);
        let container = h.comment("c1", "u1", "a", "one");
        h.engine
            .store
            .upsert_capture(crate::store::CaptureRecord {
                comment_id: "c1".into(),
                ..Default::default()
            })
            .unwrap();
        h.engine.reconcile_now();
        let collect = h.button(container, COLLECT_BTN);
        assert!(h.engine.dom().has_class(&collect, IS_CAPTURED));

        h.engine.store.clear_captures().unwrap();
        h.engine.reconcile_now();
        assert!(!h.engine.dom().has_class(&collect, IS_CAPTURED));
        assert_eq!(h.engine.dom().text(&h.button(collect, LABEL)), "📥");
    }

    #[test]
    fn test_pass_during_capture_keeps_content_unblurred() {
        let mut h = Harness::loaded(VIDEO);
        let container = h.comment("c1", "u1", "a", "one");
        h.engine.toggle_block("u1", None);
        h.engine.reconcile_now();
        assert!(blurred(&h, container));

        let capture = h.button(container, CAPTURE_BTN);
        let ActionOutcome::Render(request) = h.click(capture) else {
            panic!("expected render request");
        };
        assert!(!blurred(&h, container));

        // The busy label change comes back as a host mutation.
        h.engine.on_mutation();
        h.clock.advance(250);
        h.engine.run_due();
        assert_eq!(h.engine.capture_phase("c1"), CapturePhase::Rendering);
        assert!(!blurred(&h, container));
        assert!(h.engine.dom().find_class(&container, BLUR_TOOLTIP).is_some());

        h.engine
            .complete_capture(request.ticket, Ok("data:image/png;base64,AA==".into()))
            .unwrap();
        assert!(blurred(&h, container));
        h.engine.dom_mut().reset_mutations();
        h.engine.reconcile_now();
        assert_eq!(h.engine.dom().mutations(), 0);
    }

    #[test]
    fn test_dropped_controls_rebuilt() {
        let mut h = Harness::loaded(VIDEO);
        let container = h.comment("c1", "u1", "a", "one");
        h.engine.reconcile_now();
        assert!(h.engine.dom().markers(&container).contains(Markers::UI_INJECTED));

        let group = h.button(container, GROUP);
        h.engine.dom_mut().remove(&group).unwrap();
        let report = h.engine.reconcile_now();
        assert_eq!(report.injected, 1);
        assert_eq!(h.engine.dom().find_classes(&container, GROUP).len(), 1);
        assert!(h.engine.dom().markers(&container).contains(Markers::UI_INJECTED));
    }
}
