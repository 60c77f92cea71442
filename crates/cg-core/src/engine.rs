//! Moderation engine
//!
//! Owns every piece of per-page state and is driven entirely by the host
//! adapter: channel messages, DOM mutation notices, clicks on injected
//! controls, render completions and timer deadlines all enter through the
//! methods below. UI-only side effects are queued and drained with
//! [`Engine::drain_effects`].

use serde_json::Value;

use crate::artifact::{Artifact, ArtifactKind, Delivery};
use crate::capture::{CaptureContext, CaptureError, CapturePhase, PreparedCapture, RenderError, RenderOptions, RenderRequest};
use crate::clock::Clock;
use crate::config::Config;
use crate::dom::{
    container_key, Dom, DomError, HostPart, BLOCKED_PLACEHOLDER, BLUR, BLUR_TOOLTIP, COLLECT_BTN, DEFAULT_PROFILE_IMAGE,
    GROUP, IS_CAPTURED, LABEL, NATIVE_BLOCK_BTN, TOOLTIP,
};
use crate::identity::IdentityIndex;
use crate::location::{channel_from_url, shows_export_controls, target_from_url, NativeBlockRequest};
use crate::message::{ClipMetadata, TapMessage};
use crate::scheduler::{Scheduler, Task};
use crate::store::{BlockChange, BlockMetadata, CaptureRecord, LedgerEntry, ModerationStore, Storage, StoreError};
use crate::types::{Action, ActionOutcome, CaptureMode, Effect, ExportSummary, Markers, NoticeLevel};

/// A capture waiting for the host's raster primitive.
#[derive(Debug)]
struct InFlightCapture<N> {
    ticket: u64,
    key: String,
    phase: CapturePhase,
    prepared: PreparedCapture<N>,
    context: CaptureContext,
}

/// Page-level facts gathered from the tap and user input.
#[derive(Debug)]
struct PageState<N> {
    clip: Option<ClipMetadata>,
    profile: Option<Value>,
    /// Author of the comment whose "more" menu was opened last
    menu_author: Option<String>,
    menu_layer: Option<N>,
}

impl<N> Default for PageState<N> {
    fn default() -> Self {
        Self {
            clip: None,
            profile: None,
            menu_author: None,
            menu_layer: None,
        }
    }
}

pub struct Engine<D: Dom> {
    pub(crate) dom: D,
    pub(crate) store: ModerationStore,
    pub(crate) identity: IdentityIndex,
    pub(crate) scheduler: Scheduler<D::Node>,
    pub(crate) config: Config,
    pub(crate) clock: Box<dyn Clock>,
    delivery: Box<dyn Delivery>,
    pub(crate) pending_target: Option<String>,
    page: PageState<D::Node>,
    captures: Vec<InFlightCapture<D::Node>>,
    next_ticket: u64,
    /// Content nodes under a temporary reveal and the token of their timer
    pub(crate) reveals: Vec<(D::Node, u64)>,
    next_reveal: u64,
    effects: Vec<Effect>,
}

impl<D: Dom> Engine<D> {
    pub fn new(
        dom: D,
        storage: Box<dyn Storage>,
        config: Config,
        clock: Box<dyn Clock>,
        delivery: Box<dyn Delivery>,
    ) -> Self {
        let store = ModerationStore::new(storage, config.storage.clone());
        Self {
            dom,
            store,
            identity: IdentityIndex::new(),
            scheduler: Scheduler::new(),
            config,
            clock,
            delivery,
            pending_target: None,
            page: PageState::default(),
            captures: Vec::new(),
            next_ticket: 0,
            reveals: Vec::new(),
            next_reveal: 0,
            effects: Vec::new(),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn dom(&self) -> &D {
        &self.dom
    }

    pub fn dom_mut(&mut self) -> &mut D {
        &mut self.dom
    }

    pub fn store(&self) -> &ModerationStore {
        &self.store
    }

    pub fn identity(&self) -> &IdentityIndex {
        &self.identity
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn pending_target(&self) -> Option<&str> {
        self.pending_target.as_deref()
    }

    pub fn clip_metadata(&self) -> Option<&ClipMetadata> {
        self.page.clip.as_ref()
    }

    /// Content of the last chat profile card seen by the tap.
    pub fn last_profile(&self) -> Option<&Value> {
        self.page.profile.as_ref()
    }

    pub fn capture_phase(&self, comment_id: &str) -> CapturePhase {
        self.captures
            .iter()
            .find(|capture| capture.key == comment_id)
            .map_or(CapturePhase::Idle, |capture| capture.phase)
    }

    pub(crate) fn capture_in_flight(&self, comment_id: &str) -> bool {
        self.captures.iter().any(|capture| capture.key == comment_id)
    }

    /// Take every queued UI effect.
    pub fn drain_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    pub(crate) fn emit(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    pub(crate) fn toast(&mut self, level: NoticeLevel, message: String) {
        self.emit(Effect::toast(level, message));
    }

    pub fn export_summary(&self) -> ExportSummary {
        self.store.summary()
    }

    fn emit_counts(&mut self) {
        let summary = self.store.summary();
        self.emit(Effect::Counts { summary });
    }

    fn emit_blocked_ids(&mut self) {
        let ids = self.store.blocked_ids().to_vec();
        self.emit(Effect::BlockedIds { ids });
    }

    /// Hand a finished artifact to the delivery capability.
    pub fn deliver(&mut self, artifact: Artifact) {
        log::info!("engine: delivering {}", artifact.filename);
        self.delivery.deliver(artifact);
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Initial page setup: export controls and the deep-link target.
    pub fn start(&mut self) {
        let visible = shows_export_controls(&self.dom.location());
        self.emit(Effect::ExportControls { visible });
        self.check_target();
        self.request_reconcile();
    }

    /// Load moderation state synchronously from storage.
    pub fn load_store(&mut self) -> Result<(), StoreError> {
        self.store.load()?;
        self.on_store_ready();
        Ok(())
    }

    /// Complete a load whose storage read the host performed asynchronously.
    pub fn apply_loaded(&mut self, values: &serde_json::Map<String, Value>) -> Result<(), StoreError> {
        self.store.apply_loaded(values)?;
        self.on_store_ready();
        Ok(())
    }

    fn on_store_ready(&mut self) {
        self.emit_counts();
        self.emit_blocked_ids();
        self.request_reconcile();
    }

    pub fn request_reconcile(&mut self) {
        let now = self.clock.now_ms();
        self.scheduler.request_reconcile(now, self.config.debounce_ms);
    }

    /// The host rewrote part of the page.
    pub fn on_mutation(&mut self) {
        self.request_reconcile();
    }

    // =========================================================================
    // Channel Messages
    // =========================================================================

    /// Dispatch a raw channel message. Malformed or foreign messages are dropped.
    pub fn handle_message(&mut self, message: &Value) {
        match TapMessage::parse(message) {
            Ok(Some(parsed)) => self.handle_tap(parsed),
            Ok(None) => {}
            Err(e) => log::debug!("engine: dropped channel message: {}", e),
        }
    }

    pub fn handle_tap(&mut self, message: TapMessage) {
        match message {
            TapMessage::CommentFeed(feed) => {
                let recorded = self.identity.ingest_feed(&feed);
                log::debug!("engine: indexed {} comment authors", recorded);
                if feed.get("content").is_some() {
                    self.request_reconcile();
                }
            }
            TapMessage::UrlChanged => self.on_navigation(),
            TapMessage::Profile(profile) => self.page.profile = Some(profile),
            TapMessage::Clip(clip) => {
                log::debug!("engine: clip metadata for {}", clip.clip_id);
                self.page.clip = Some(clip);
            }
        }
    }

    /// Read the deep-link target from the current location.
    pub fn check_target(&mut self) {
        if let Some(target) = target_from_url(&self.dom.location(), &self.config.target_param) {
            log::debug!("engine: deep-link target {}", target);
            self.pending_target = Some(target);
            self.request_reconcile();
        }
    }

    // =========================================================================
    // Timers
    // =========================================================================

    pub fn next_deadline(&self) -> Option<u64> {
        self.scheduler.next_deadline()
    }

    /// Run every task whose deadline has passed.
    pub fn run_due(&mut self) {
        let now = self.clock.now_ms();
        for task in self.scheduler.take_due(now) {
            self.run_task(task);
        }
    }

    fn run_task(&mut self, task: Task<D::Node>) {
        let result = match task {
            Task::Reconcile => {
                let report = self.run_pass();
                log::trace!("engine: pass {:?}", report);
                Ok(())
            }
            Task::Reblur { node, token } => self.end_reveal(&node, token),
            Task::ScrollIntoView(node) => self.dom.scroll_into_view(&node),
            Task::RecheckTarget => {
                self.check_target();
                Ok(())
            }
            Task::RestoreLabel { node, text } => self.dom.set_text(&node, &text),
        };
        if let Err(e) = result {
            log::warn!("engine: deferred task failed: {}", e);
        }
    }

    // =========================================================================
    // Actions
    // =========================================================================

    /// Dispatch a click on an injected control bound to `action`.
    pub fn handle_action(&mut self, target: &D::Node, action: Action) -> ActionOutcome<D::Node> {
        match action {
            Action::CopyAuthor { author_id } => {
                self.copy_author(target, author_id);
                ActionOutcome::Handled
            }
            Action::Capture { comment_id } => self.start_capture(target, &comment_id, CaptureMode::Download),
            Action::Collect { comment_id } => {
                if self.store.is_captured(&comment_id) {
                    self.remove_capture(&comment_id);
                    ActionOutcome::Handled
                } else if !self.store.is_ready() {
                    let message = self.config.labels.not_ready.clone();
                    self.toast(NoticeLevel::Error, message);
                    ActionOutcome::Handled
                } else {
                    self.start_capture(target, &comment_id, CaptureMode::Collect)
                }
            }
            Action::ToggleBlock { author_id, comment_id } => {
                let metadata = self.block_metadata(&comment_id);
                self.toggle_block(&author_id, Some(metadata));
                ActionOutcome::Handled
            }
            Action::Reveal { comment_id } => match self.begin_reveal(target) {
                Ok(true) => ActionOutcome::Handled,
                Ok(false) => ActionOutcome::Ignored,
                Err(e) => {
                    log::warn!("engine: reveal of {} failed: {}", comment_id, e);
                    ActionOutcome::Ignored
                }
            },
            Action::NativeBlock => self.native_block_request(),
        }
    }

    fn copy_author(&mut self, button: &D::Node, author_id: String) {
        self.emit(Effect::Clipboard { text: author_id });
        let message = self.config.labels.copied_notice.clone();
        self.toast(NoticeLevel::Success, message);

        let label = self.dom.find_class(button, LABEL).unwrap_or_else(|| button.clone());
        let original = self.dom.text(&label);
        let copied = self.config.labels.copied.clone();
        if original == copied {
            return;
        }
        match self.dom.set_text(&label, &copied) {
            Ok(()) => {
                let now = self.clock.now_ms();
                self.scheduler
                    .schedule(now, self.config.confirm_ms, Task::RestoreLabel { node: label, text: original });
            }
            Err(e) => log::warn!("engine: copy feedback failed: {}", e),
        }
    }

    /// Block or unblock an author, reporting the outcome to the UI.
    pub fn toggle_block(&mut self, author_id: &str, metadata: Option<BlockMetadata>) -> Option<BlockChange> {
        match self.store.toggle_block(author_id, metadata, self.clock.as_ref()) {
            Ok(change) => {
                let (level, message) = match change {
                    BlockChange::Blocked => (NoticeLevel::Success, self.config.labels.blocked_notice.clone()),
                    BlockChange::Unblocked => (NoticeLevel::Info, self.config.labels.unblocked_notice.clone()),
                };
                log::info!("engine: {:?} {}", change, author_id);
                self.toast(level, message);
                self.emit_counts();
                self.emit_blocked_ids();
                self.request_reconcile();
                Some(change)
            }
            Err(e) => {
                self.report_store_error(e);
                None
            }
        }
    }

    /// Unblock from the ledger. A no-op for authors that are not blocked.
    pub fn unblock(&mut self, author_id: &str) -> bool {
        if !self.store.is_blocked(author_id) {
            return false;
        }
        self.toggle_block(author_id, None) == Some(BlockChange::Unblocked)
    }

    fn report_store_error(&mut self, error: StoreError) {
        let message = match error {
            StoreError::NotReady => self.config.labels.not_ready.clone(),
            other => {
                log::warn!("engine: store rejected change: {}", other);
                other.to_string()
            }
        };
        self.toast(NoticeLevel::Error, message);
    }

    /// Delete one capture and reset its collect control if rendered.
    pub fn remove_capture(&mut self, comment_id: &str) -> bool {
        match self.store.delete_capture(comment_id) {
            Ok(true) => {
                if let Err(e) = self.reset_collect_control(comment_id) {
                    log::warn!("engine: collect control reset failed: {}", e);
                }
                let message = self.config.labels.removed_notice.clone();
                self.toast(NoticeLevel::Success, message);
                self.emit_counts();
                true
            }
            Ok(false) => false,
            Err(e) => {
                self.report_store_error(e);
                false
            }
        }
    }

    /// Drop every capture; refuses when there is nothing to clear.
    pub fn clear_captures(&mut self) -> usize {
        if self.store.is_ready() && self.store.capture_count() == 0 {
            let message = self.config.labels.nothing_to_clear.clone();
            self.toast(NoticeLevel::Error, message);
            return 0;
        }
        match self.store.clear_captures() {
            Ok(count) => {
                let document = self.dom.document();
                for button in self.dom.find_classes(&document, COLLECT_BTN) {
                    if self.dom.has_class(&button, IS_CAPTURED) {
                        if let Err(e) = self.set_collect_state(&button, false) {
                            log::warn!("engine: collect control reset failed: {}", e);
                        }
                    }
                }
                let message = self.config.labels.cleared_notice.clone();
                self.toast(NoticeLevel::Success, message);
                self.emit_counts();
                count
            }
            Err(e) => {
                self.report_store_error(e);
                0
            }
        }
    }

    fn reset_collect_control(&mut self, comment_id: &str) -> Result<(), DomError> {
        let Some(container) = self.dom.container_by_key(comment_id) else {
            return Ok(());
        };
        match self.dom.find_class(&container, COLLECT_BTN) {
            Some(button) => self.set_collect_state(&button, false),
            None => Ok(()),
        }
    }

    /// Flip a collect control between its default and collected look.
    pub(crate) fn set_collect_state(&mut self, button: &D::Node, collected: bool) -> Result<(), DomError> {
        let labels = &self.config.labels;
        let (label_text, tooltip_text) = if collected {
            (labels.collect_done.clone(), labels.collect_remove_tooltip.clone())
        } else {
            (labels.collect_icon.clone(), labels.collect_tooltip.clone())
        };
        if collected {
            self.dom.add_class(button, IS_CAPTURED)?;
        } else {
            self.dom.remove_class(button, IS_CAPTURED)?;
        }
        if let Some(label) = self.dom.find_class(button, LABEL) {
            self.dom.set_text(&label, &label_text)?;
        }
        if let Some(tooltip) = self.dom.find_class(button, TOOLTIP) {
            self.dom.set_text(&tooltip, &tooltip_text)?;
        }
        Ok(())
    }

    pub fn ledger(&self) -> Vec<LedgerEntry> {
        self.store.ledger(&self.config.target_param)
    }

    // =========================================================================
    // Reveal
    // =========================================================================

    fn blur_tooltip(&self, content: &D::Node) -> Option<D::Node> {
        let scope = self.dom.parent(content)?;
        self.dom.find_class(&scope, BLUR_TOOLTIP)
    }

    /// Returns whether a blurred node was revealed.
    fn begin_reveal(&mut self, content: &D::Node) -> Result<bool, DomError> {
        if !self.dom.has_class(content, BLUR) {
            return Ok(false);
        }
        self.dom.remove_class(content, BLUR)?;
        let markers = self.dom.markers(content) | Markers::TEMP_UNBLUR;
        self.dom.set_markers(content, markers)?;
        if let Some(tooltip) = self.blur_tooltip(content) {
            self.dom.set_style(&tooltip, "display", "none")?;
        }

        self.next_reveal += 1;
        let token = self.next_reveal;
        self.reveals.retain(|(node, _)| node != content);
        self.reveals.push((content.clone(), token));
        let now = self.clock.now_ms();
        self.scheduler.schedule(
            now,
            self.config.reveal_ms,
            Task::Reblur {
                node: content.clone(),
                token,
            },
        );
        Ok(true)
    }

    /// Re-apply the blur unless the reveal was cancelled meanwhile.
    fn end_reveal(&mut self, content: &D::Node, token: u64) -> Result<(), DomError> {
        let Some(index) = self.reveals.iter().position(|(node, t)| node == content && *t == token) else {
            return Ok(());
        };
        self.reveals.remove(index);

        let markers = self.dom.markers(content);
        if !markers.contains(Markers::TEMP_UNBLUR) {
            return Ok(());
        }
        self.dom.add_class(content, BLUR)?;
        self.dom.set_markers(content, markers - Markers::TEMP_UNBLUR)?;
        if let Some(tooltip) = self.blur_tooltip(content) {
            self.dom.set_style(&tooltip, "display", "")?;
        }
        Ok(())
    }

    // =========================================================================
    // Capture
    // =========================================================================

    fn start_capture(&mut self, button: &D::Node, comment_id: &str, mode: CaptureMode) -> ActionOutcome<D::Node> {
        if self.capture_in_flight(comment_id) {
            log::debug!("engine: capture of {} refused, already in flight", comment_id);
            return ActionOutcome::Handled;
        }
        let Some(container) = self.dom.container_by_key(comment_id) else {
            log::warn!("engine: {}", CaptureError::NotRendered(comment_id.to_string()));
            return ActionOutcome::Ignored;
        };

        let context = self.capture_context(&container, comment_id);
        let busy = self.config.labels.capture_busy.clone();
        let (mut prepared, result) = PreparedCapture::prepare(&mut self.dom, container.clone(), button.clone(), mode, &busy);

        if let Err(e) = result {
            log::error!("engine: capture of {} failed while preparing: {}", comment_id, e);
            prepared.restore(&mut self.dom);
            if let Err(e) = self.dom.set_text(&prepared.label, &prepared.original_label) {
                log::warn!("engine: label restore failed: {}", e);
            }
            let message = self.config.labels.capture_failed.clone();
            self.toast(NoticeLevel::Error, message);
            return ActionOutcome::Handled;
        }

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.captures.push(InFlightCapture {
            ticket,
            key: comment_id.to_string(),
            phase: CapturePhase::Rendering,
            prepared,
            context,
        });
        log::debug!("engine: capture {} of {} rendering", ticket, comment_id);

        ActionOutcome::Render(RenderRequest {
            ticket,
            node: container,
            options: RenderOptions::for_theme(self.dom.is_dark_theme()),
        })
    }

    /// Finish a capture with the host's render result. Restoring always runs.
    pub fn complete_capture(&mut self, ticket: u64, result: Result<String, RenderError>) -> Result<(), CaptureError> {
        let index = self
            .captures
            .iter()
            .position(|capture| capture.ticket == ticket)
            .ok_or(CaptureError::UnknownTicket(ticket))?;
        let mut capture = self.captures.remove(index);

        let result = result.and_then(|data| if data.is_empty() { Err(RenderError::Empty) } else { Ok(data) });
        match result {
            Ok(data_uri) => {
                capture.phase = CapturePhase::Succeeded;
                if let Err(e) = self.finish_capture(&capture, data_uri) {
                    log::warn!("engine: capture feedback failed: {}", e);
                }
            }
            Err(e) => {
                capture.phase = CapturePhase::Failed;
                log::error!("engine: capture of {} failed: {}", capture.key, e);
                let message = self.config.labels.capture_failed.clone();
                self.toast(NoticeLevel::Error, message);
                if let Err(e) = self.dom.set_text(&capture.prepared.label, &capture.prepared.original_label) {
                    log::warn!("engine: label restore failed: {}", e);
                }
            }
        }

        capture.phase = CapturePhase::Restoring;
        capture.prepared.restore(&mut self.dom);
        self.request_reconcile();
        Ok(())
    }

    fn finish_capture(&mut self, capture: &InFlightCapture<D::Node>, data_uri: String) -> Result<(), DomError> {
        let context = &capture.context;
        let label = &capture.prepared.label;
        match capture.prepared.mode {
            CaptureMode::Download => {
                let filename = format!(
                    "chzzk_{}_comment_{}_{}_{}_{}.png",
                    context.streamer_name,
                    context.display_name,
                    context.author_id,
                    context.comment_id,
                    self.clock.date_stamp()
                );
                self.deliver(Artifact::from_data_uri(ArtifactKind::Image, &filename, data_uri));

                let done = self.config.labels.capture_done.clone();
                self.dom.set_text(label, &done)?;
                let now = self.clock.now_ms();
                self.scheduler.schedule(
                    now,
                    self.config.confirm_ms,
                    Task::RestoreLabel {
                        node: label.clone(),
                        text: self.config.labels.capture_icon.clone(),
                    },
                );
            }
            CaptureMode::Collect => {
                let record = CaptureRecord {
                    comment_id: context.comment_id.clone(),
                    image: data_uri,
                    captured_at: self.clock.wall_clock(),
                    created_at: self.clock.now_ms(),
                    display_name: context.display_name.clone(),
                    author_id: context.author_id.clone(),
                    streamer_name: context.streamer_name.clone(),
                    title: context.title.clone(),
                    comment_text: context.comment_text.clone(),
                    page_url: context.page_url.clone(),
                };
                match self.store.upsert_capture(record) {
                    Ok(()) => {
                        let button = capture.prepared.button.clone();
                        self.set_collect_state(&button, true)?;
                        let message = self.config.labels.collected_notice.clone();
                        self.toast(NoticeLevel::Success, message);
                        self.emit_counts();
                    }
                    Err(e) => {
                        self.report_store_error(e);
                        self.dom.set_text(label, &capture.prepared.original_label)?;
                    }
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Page Metadata
    // =========================================================================

    fn part_text(&self, scope: &D::Node, part: HostPart) -> Option<String> {
        self.dom
            .find_part(scope, part)
            .map(|node| self.dom.text(&node).trim().to_string())
            .filter(|text| !text.is_empty())
    }

    /// Streamer (or community) name and title of the current page.
    fn page_names(&self) -> (String, String) {
        let document = self.dom.document();
        let labels = &self.config.labels;
        let community = self.part_text(&document, HostPart::CommunityName);
        let clip = self.page.clip.as_ref();

        let streamer = self
            .part_text(&document, HostPart::VideoChannelName)
            .or_else(|| community.clone())
            .or_else(|| clip.map(|clip| clip.streamer_name.clone()).filter(|s| !s.is_empty()))
            .unwrap_or_else(|| labels.unknown.clone());
        let title = self
            .part_text(&document, HostPart::VideoTitle)
            .or_else(|| community.as_ref().map(|_| labels.community.clone()))
            .or_else(|| clip.map(|clip| clip.title.clone()).filter(|s| !s.is_empty()))
            .unwrap_or_else(|| labels.untitled.clone());
        (streamer, title)
    }

    fn nickname(&self, container: &D::Node) -> String {
        self.part_text(container, HostPart::NameText)
            .unwrap_or_else(|| self.config.labels.unknown.clone())
    }

    /// Comment text, or the attachment placeholder for sticker-only comments.
    fn comment_text(&self, container: &D::Node) -> Option<String> {
        let text_node = self
            .dom
            .find_part(container, HostPart::ContentText)
            .or_else(|| self.dom.find_part(container, HostPart::Content));
        let text = text_node
            .and_then(|node| self.dom.last_child_text(&node))
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());
        text.or_else(|| {
            self.dom
                .find_part(container, HostPart::AttachmentImage)
                .map(|_| self.config.labels.image_placeholder.clone())
        })
    }

    fn capture_context(&self, container: &D::Node, comment_id: &str) -> CaptureContext {
        let (streamer_name, title) = self.page_names();
        CaptureContext {
            comment_id: comment_id.to_string(),
            author_id: self.identity.author_of(comment_id).unwrap_or_default().to_string(),
            display_name: self.nickname(container),
            streamer_name,
            title,
            comment_text: self.comment_text(container).unwrap_or_default(),
            page_url: self.dom.location(),
        }
    }

    fn block_metadata(&self, comment_id: &str) -> BlockMetadata {
        let (streamer_name, title) = self.page_names();
        let container = self.dom.container_by_key(comment_id);
        BlockMetadata {
            display_name: container
                .as_ref()
                .map(|container| self.nickname(container))
                .unwrap_or_else(|| self.config.labels.unknown.clone()),
            streamer_name,
            title,
            comment_id: comment_id.to_string(),
            comment_text: container
                .as_ref()
                .and_then(|container| self.comment_text(container))
                .unwrap_or_else(|| self.config.labels.no_content.clone()),
            url: self.dom.location(),
        }
    }

    // =========================================================================
    // Native Block
    // =========================================================================

    /// The "more" menu of a comment was opened.
    pub fn note_menu_opened(&mut self, comment_id: &str) {
        if let Some(author) = self.identity.author_of(comment_id) {
            self.page.menu_author = Some(author.to_string());
        }
    }

    /// Add a native block entry after the report entry of an opened menu.
    pub fn on_menu_layer(&mut self, layer: &D::Node) {
        if self.page.menu_author.is_none() || self.dom.find_class(layer, NATIVE_BLOCK_BTN).is_some() {
            return;
        }
        let report = self.config.labels.report.clone();
        let Some(report_item) = self
            .dom
            .find_parts(layer, HostPart::MenuItem)
            .into_iter()
            .find(|item| self.dom.text(item).contains(&report))
        else {
            return;
        };
        match self.inject_native_block(layer, &report_item) {
            Ok(()) => self.page.menu_layer = Some(layer.clone()),
            Err(e) => log::warn!("engine: native block entry failed: {}", e),
        }
    }

    fn inject_native_block(&mut self, layer: &D::Node, report_item: &D::Node) -> Result<(), DomError> {
        let host_classes = self
            .dom
            .find_part(report_item, HostPart::MenuButton)
            .and_then(|button| self.dom.attr(&button, "class"))
            .unwrap_or_default();
        let mut classes: Vec<&str> = host_classes.split_whitespace().collect();
        classes.push(NATIVE_BLOCK_BTN);

        let item = self.dom.create_element("li", &[])?;
        let button = self.dom.create_element("button", &classes)?;
        self.dom.set_attr(&button, "type", "button")?;
        self.dom.set_text(&button, &self.config.labels.native_block)?;
        self.dom.bind_action(&button, &Action::NativeBlock)?;
        self.dom.append_child(&item, &button)?;
        self.dom.insert_after(report_item, &item)?;
        log::trace!("engine: native block entry added to {:?}", layer);
        Ok(())
    }

    fn native_block_request(&mut self) -> ActionOutcome<D::Node> {
        let Some(author_id) = self.page.menu_author.clone() else {
            return ActionOutcome::Ignored;
        };
        if let Some(layer) = self.page.menu_layer.take() {
            if let Err(e) = self.dom.set_style(&layer, "display", "none") {
                log::debug!("engine: menu close failed: {}", e);
            }
        }
        let Some(channel) = channel_from_url(&self.dom.location()) else {
            let message = self.config.labels.missing_channel.clone();
            self.toast(NoticeLevel::Error, message);
            return ActionOutcome::Handled;
        };
        ActionOutcome::NativeBlock(NativeBlockRequest::new(&self.config.native_block_base, &author_id, &channel))
    }

    /// Report the outcome of a native block request.
    pub fn complete_native_block(&mut self, author_id: &str, ok: bool) {
        if !ok {
            log::error!("engine: native block of {} failed", author_id);
            let message = self.config.labels.native_block_failed.clone();
            self.toast(NoticeLevel::Error, message);
            return;
        }
        let message = self.config.labels.native_block_done.clone();
        self.toast(NoticeLevel::Success, message);
        if !self.store.is_blocked(author_id) {
            self.toggle_block(author_id, None);
        }
        for container in self.dom.comment_containers() {
            let Some(key) = self.dom.id(&container).and_then(|id| container_key(&id).map(str::to_string)) else {
                continue;
            };
            if self.identity.author_of(&key) != Some(author_id) {
                continue;
            }
            if let Err(e) = self.show_blocked_placeholder(&container) {
                log::warn!("engine: placeholder for {} not shown: {}", key, e);
            }
        }
    }

    /// Swap a comment for the host's own "blocked user" look. Without a name
    /// or a body left, later passes leave the container alone.
    fn show_blocked_placeholder(&mut self, container: &D::Node) -> Result<(), DomError> {
        if self.dom.find_class(container, BLOCKED_PLACEHOLDER).is_some() {
            return Ok(());
        }
        for tooltip in self.dom.find_classes(container, TOOLTIP) {
            self.dom.remove(&tooltip)?;
        }
        if let Some(group) = self.dom.find_class(container, GROUP) {
            self.dom.remove(&group)?;
        }
        let markers = self.dom.markers(container);
        if markers.contains(Markers::UI_INJECTED) {
            self.dom.set_markers(container, markers - Markers::UI_INJECTED)?;
        }

        if let Some(content) = self.dom.find_part(container, HostPart::Content) {
            self.reveals.retain(|(node, _)| *node != content);
            self.dom.remove(&content)?;
        }
        if let Some(name) = self.dom.find_part(container, HostPart::NameText) {
            self.dom.remove(&name)?;
        }

        let placeholder = self.dom.create_element("div", &[BLOCKED_PLACEHOLDER])?;
        let avatar = self.dom.create_element("img", &[])?;
        self.dom.set_attr(&avatar, "src", DEFAULT_PROFILE_IMAGE)?;
        self.dom.set_attr(&avatar, "width", "36")?;
        self.dom.set_attr(&avatar, "height", "36")?;
        self.dom.append_child(&placeholder, &avatar)?;
        let text = self.dom.create_element("div", &[])?;
        let label = self.config.labels.native_blocked_comment.clone();
        self.dom.set_text(&text, &label)?;
        self.dom.append_child(&placeholder, &text)?;
        self.dom.append_child(container, &placeholder)
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    /// Logical location change: forget the page and strip injected UI.
    pub fn on_navigation(&mut self) {
        log::info!("engine: navigation to {}", self.dom.location());
        self.identity.clear();
        self.pending_target = None;
        self.reveals.clear();
        self.page.menu_author = None;
        self.page.menu_layer = None;
        self.scheduler
            .retain(|task| !matches!(task, Task::Reblur { .. } | Task::ScrollIntoView(_)));

        // Undo capture layouts now so a late completion has nothing left to
        // restore onto the stripped page.
        for capture in &mut self.captures {
            capture.prepared.restore(&mut self.dom);
        }

        if let Err(e) = self.strip_injected_ui() {
            log::warn!("engine: cleanup after navigation incomplete: {}", e);
        }

        let visible = shows_export_controls(&self.dom.location());
        self.emit(Effect::ExportControls { visible });

        let now = self.clock.now_ms();
        self.scheduler
            .schedule(now, self.config.navigation_grace_ms, Task::RecheckTarget);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactData;
    use crate::dom::{CAPTURE_BTN, HIGHLIGHT};
    use crate::testing::{Harness, VIDEO};
    use serde_json::json;

    #[test]
    fn test_toggle_block_while_loading_rejected() {
        let mut h = Harness::new(VIDEO);
        let container = h.comment("c1", "u1", "nick", "hello");
        h.engine.reconcile_now();
        let block = h.button(container, crate::dom::BLOCK_BTN);
        let writes = h.storage.borrow().writes;
        h.engine.drain_effects();

        assert_eq!(h.click(block), ActionOutcome::Handled);
        assert!(!h.engine.store().is_blocked("u1"));
        assert_eq!(h.storage.borrow().writes, writes);
        assert_eq!(h.toasts(), vec![Config::default().labels.not_ready]);
    }

    #[test]
    fn test_block_records_metadata() {
        let mut h = Harness::loaded(VIDEO);
        {
            let dom = h.engine.dom_mut();
            let root = dom.root();
            let info = dom.element("div", &["video_information_name__a"]);
            let name = dom.element("span", &["name_text__b"]);
            dom.set_host_text(name, "streamer");
            dom.append(info, name);
            dom.append(root, info);
            let title = dom.element("h2", &["video_information_title__c"]);
            dom.set_host_text(title, "replay title");
            dom.append(root, title);
        }
        let container = h.comment("c1", "u1", "troll", "bad words");
        h.engine.reconcile_now();
        let block = h.button(container, crate::dom::BLOCK_BTN);
        h.click(block);

        let record = h.engine.store().block_record("u1").unwrap().clone();
        assert_eq!(record.display_name, "troll");
        assert_eq!(record.streamer_name, "streamer");
        assert_eq!(record.title, "replay title");
        assert_eq!(record.comment_id, "c1");
        assert_eq!(record.comment_text, "bad words");
        assert_eq!(record.url, VIDEO);
        assert_eq!(record.created_at, 1_700_000_000_000);
    }

    #[test]
    fn test_blocked_ids_follow_store() {
        let mut h = Harness::new(VIDEO);
        h.engine.load_store().unwrap();
        assert!(h.engine.drain_effects().contains(&Effect::BlockedIds { ids: vec![] }));

        h.engine.toggle_block("u1", None);
        h.engine.toggle_block("u2", None);
        let effects = h.engine.drain_effects();
        assert_eq!(
            effects.iter().rev().find(|e| matches!(e, Effect::BlockedIds { .. })),
            Some(&Effect::BlockedIds {
                ids: vec!["u1".into(), "u2".into()]
            })
        );

        h.engine.unblock("u1");
        assert!(h.engine.drain_effects().contains(&Effect::BlockedIds { ids: vec!["u2".into()] }));
    }

    #[test]
    fn test_collect_then_remove() {
        let mut h = Harness::loaded(VIDEO);
        let container = h.comment("c42", "u9", "nick", "evidence");
        h.engine.reconcile_now();
        let collect = h.button(container, COLLECT_BTN);

        let ActionOutcome::Render(request) = h.click(collect) else {
            panic!("expected render request");
        };
        assert_eq!(request.node, container);
        assert_eq!(h.engine.capture_phase("c42"), CapturePhase::Rendering);
        // Refused while in flight
        assert_eq!(h.click(collect), ActionOutcome::Handled);

        h.engine
            .complete_capture(request.ticket, Ok("data:image/png;base64,AA==".into()))
            .unwrap();
        assert_eq!(h.engine.capture_phase("c42"), CapturePhase::Idle);
        let record = h.engine.store().capture("c42").unwrap();
        assert_eq!(record.comment_id, "c42");
        assert_eq!(record.author_id, "u9");
        assert_eq!(record.comment_text, "evidence");
        assert!(h.engine.dom().has_class(&collect, IS_CAPTURED));
        let label = h.button(collect, LABEL);
        assert_eq!(h.engine.dom().text(&label), "📥 담기 완료");
        assert_eq!(h.engine.dom().style(&container, "padding"), "");

        assert_eq!(h.click(collect), ActionOutcome::Handled);
        assert_eq!(h.engine.store().capture_count(), 0);
        assert!(!h.engine.dom().has_class(&collect, IS_CAPTURED));
        assert_eq!(h.engine.dom().text(&label), "📥");
    }

    #[test]
    fn test_download_capture_delivers_image() {
        let mut h = Harness::loaded(VIDEO);
        let container = h.comment("c5", "u5", "nick", "text");
        h.engine.reconcile_now();
        let capture = h.button(container, CAPTURE_BTN);

        let ActionOutcome::Render(request) = h.click(capture) else {
            panic!("expected render request");
        };
        h.engine
            .complete_capture(request.ticket, Ok("data:image/png;base64,AA==".into()))
            .unwrap();

        {
            let delivered = &h.delivery.borrow().delivered;
            assert_eq!(delivered.len(), 1);
            assert_eq!(delivered[0].filename, "chzzk_알 수 없음_comment_nick_u5_c5_2023-11-14.png");
            assert_eq!(delivered[0].data, ArtifactData::DataUri("data:image/png;base64,AA==".into()));
        }

        let label = h.button(capture, LABEL);
        assert_eq!(h.engine.dom().text(&label), "✅");
        h.settle();
        assert_eq!(h.engine.dom().text(&label), "📷");
    }

    #[test]
    fn test_failed_capture_restores() {
        let mut h = Harness::loaded(VIDEO);
        let container = h.comment("c6", "u6", "nick", "text");
        h.engine.toggle_block("u6", None);
        h.engine.reconcile_now();
        let content = h.engine.dom().find_part(&container, HostPart::Content).unwrap();
        assert!(h.engine.dom().has_class(&content, BLUR));
        let capture = h.button(container, CAPTURE_BTN);

        let ActionOutcome::Render(request) = h.click(capture) else {
            panic!("expected render request");
        };
        assert!(!h.engine.dom().has_class(&content, BLUR));
        h.engine.drain_effects();

        h.engine
            .complete_capture(request.ticket, Err(RenderError::Failed("tainted canvas".into())))
            .unwrap();
        assert!(h.engine.dom().has_class(&content, BLUR));
        assert_eq!(h.engine.dom().style(&capture, "cursor"), "");
        assert_eq!(h.engine.dom().text(&h.button(capture, LABEL)), "📷");
        assert_eq!(h.toasts(), vec![Config::default().labels.capture_failed]);
        assert!(h.delivery.borrow().delivered.is_empty());
        assert!(matches!(
            h.engine.complete_capture(request.ticket, Ok("data:,".into())),
            Err(CaptureError::UnknownTicket(_))
        ));
    }

    #[test]
    fn test_reveal_then_reblur() {
        let mut h = Harness::loaded(VIDEO);
        let container = h.comment("c1", "u1", "nick", "text");
        h.engine.toggle_block("u1", None);
        h.engine.reconcile_now();
        let content = h.engine.dom().find_part(&container, HostPart::Content).unwrap();

        assert_eq!(h.click(content), ActionOutcome::Handled);
        assert!(!h.engine.dom().has_class(&content, BLUR));
        // A pass during the reveal keeps it readable
        h.engine.reconcile_now();
        assert!(!h.engine.dom().has_class(&content, BLUR));

        h.clock.advance(3000);
        h.engine.run_due();
        assert!(h.engine.dom().has_class(&content, BLUR));
        assert!(!h.engine.dom().markers(&content).contains(Markers::TEMP_UNBLUR));
    }

    #[test]
    fn test_unblock_during_reveal_cancels_reblur() {
        let mut h = Harness::loaded(VIDEO);
        let container = h.comment("c1", "u1", "nick", "text");
        h.engine.toggle_block("u1", None);
        h.engine.reconcile_now();
        let content = h.engine.dom().find_part(&container, HostPart::Content).unwrap();
        h.click(content);

        h.engine.toggle_block("u1", None);
        h.settle();
        assert!(!h.engine.dom().has_class(&content, BLUR));
        assert!(h.engine.dom().markers(&content).is_empty());
        assert_eq!(h.engine.dom().click(content), None);
    }

    #[test]
    fn test_copy_author_feedback() {
        let mut h = Harness::loaded(VIDEO);
        let container = h.comment("c1", "u1", "nick", "text");
        h.engine.reconcile_now();
        let copy = h.button(container, crate::dom::COPY_BTN);
        h.engine.drain_effects();

        h.click(copy);
        let effects = h.engine.drain_effects();
        assert!(effects.contains(&Effect::Clipboard { text: "u1".into() }));
        let label = h.button(copy, LABEL);
        assert_eq!(h.engine.dom().text(&label), "복사됨");
        h.settle();
        assert_eq!(h.engine.dom().text(&label), "u1");
    }

    #[test]
    fn test_deep_link_highlight_and_scroll() {
        let mut h = Harness::loaded("https://chzzk.naver.com/video/123?chzzk_target=c7");
        let container = h.comment("c7", "u7", "nick", "text");
        h.engine.start();
        h.settle();

        assert!(h.engine.dom().has_class(&container, HIGHLIGHT));
        assert_eq!(h.engine.dom().scrolled(), &[container]);
        assert_eq!(h.engine.pending_target(), Some("c7"));
        assert!(h.toasts().contains(&Config::default().labels.target_found));

        // Already highlighted: nothing happens again
        h.engine.reconcile_now();
        assert_eq!(h.engine.dom().scrolled().len(), 1);
    }

    #[test]
    fn test_navigation_clears_page_state() {
        let mut h = Harness::loaded(VIDEO);
        let container = h.comment("c1", "u1", "nick", "text");
        h.engine.toggle_block("u1", None);
        h.engine.reconcile_now();
        assert!(h.engine.dom().find_class(&container, GROUP).is_some());

        h.engine.dom_mut().set_location("https://chzzk.naver.com/live/abc");
        h.engine.handle_message(&json!({"type": "CHZZK_URL_CHANGED"}));

        assert!(h.engine.identity().is_empty());
        assert!(h.engine.dom().find_class(&container, GROUP).is_none());
        assert!(h.engine.dom().find_class(&container, TOOLTIP).is_none());
        let content = h.engine.dom().find_part(&container, HostPart::Content).unwrap();
        assert!(!h.engine.dom().has_class(&content, BLUR));
        assert!(h.engine.dom().markers(&container).is_empty());
        assert!(h
            .engine
            .drain_effects()
            .contains(&Effect::ExportControls { visible: false }));

        h.settle();
        h.engine.reconcile_now();
        assert!(h.engine.dom().find_class(&container, GROUP).is_none());
    }

    #[test]
    fn test_navigation_during_capture_leaves_no_blur() {
        let mut h = Harness::loaded(VIDEO);
        let container = h.comment("c1", "u1", "nick", "text");
        h.engine.toggle_block("u1", None);
        h.engine.reconcile_now();
        let content = h.engine.dom().find_part(&container, HostPart::Content).unwrap();
        let capture = h.button(container, CAPTURE_BTN);
        let ActionOutcome::Render(request) = h.click(capture) else {
            panic!("expected render request");
        };

        h.engine.handle_message(&json!({"type": "CHZZK_URL_CHANGED"}));
        assert!(!h.engine.dom().has_class(&content, BLUR));
        assert_eq!(h.engine.dom().style(&container, "padding"), "");

        h.engine
            .complete_capture(request.ticket, Ok("data:image/png;base64,AA==".into()))
            .unwrap();
        h.settle();
        h.engine.reconcile_now();
        assert!(h.engine.identity().is_empty());
        assert!(!h.engine.dom().has_class(&content, BLUR));
        assert!(h.engine.dom().find_class(&container, GROUP).is_none());
        assert_eq!(h.engine.capture_phase("c1"), CapturePhase::Idle);
    }

    #[test]
    fn test_comment_feed_message_indexes() {
        let mut h = Harness::loaded(VIDEO);
        let list = h.list;
        let container = h.engine.dom_mut().comment(list, "c1", "nick", "text");
        h.engine.handle_message(&json!({
            "type": "CHZZK_XHR_DATA",
            "payload": {"content": {"comments": {"data": [
                {"comment": {"commentId": 100}, "user": {"userIdHash": "u0"},
                 "replyComments": [{"comment": {"commentId": "c1"}, "user": {"userIdHash": "u1"}}]}
            ]}}}
        }));
        assert_eq!(h.engine.identity().author_of("c1"), Some("u1"));
        h.settle();
        let group = h.engine.dom().find_class(&container, GROUP).unwrap();
        assert_eq!(h.engine.dom().attr(&group, crate::dom::OWNER_ATTR).as_deref(), Some("u1"));
    }

    #[test]
    fn test_native_block_flow() {
        let mut h = Harness::loaded("https://chzzk.naver.com/abc123/community/detail/7");
        let first = h.comment("c1", "u1", "nick", "text");
        let second = h.comment("c2", "u1", "nick", "again");
        let other = h.comment("c3", "u2", "other", "fine");
        h.engine.reconcile_now();
        h.engine.note_menu_opened("c1");

        let layer = {
            let dom = h.engine.dom_mut();
            let root = dom.root();
            let layer = dom.element("div", &["comment_item_layer__m"]);
            let item = dom.element("li", &[]);
            let button = dom.element("button", &["comment_item_option__o"]);
            dom.set_host_text(button, "신고");
            dom.append(item, button);
            dom.append(layer, item);
            dom.append(root, layer);
            layer
        };
        h.engine.on_menu_layer(&layer);
        h.engine.on_menu_layer(&layer);
        let entries = h.engine.dom().find_classes(&layer, NATIVE_BLOCK_BTN);
        assert_eq!(entries.len(), 1);
        assert!(h.engine.dom().has_class(&entries[0], "comment_item_option__o"));

        let ActionOutcome::NativeBlock(request) = h.click(entries[0]) else {
            panic!("expected native block request");
        };
        assert_eq!(
            request.url,
            "https://comm-api.game.naver.com/nng_main/v1/privateUserBlocks/u1?loungeId=abc123"
        );
        assert_eq!(h.engine.dom().style(&layer, "display"), "none");

        h.engine.complete_native_block("u1", true);
        assert!(h.engine.store().is_blocked("u1"));
        h.settle();
        let placeholder = Config::default().labels.native_blocked_comment;
        for container in [first, second] {
            let dom = h.engine.dom();
            assert_eq!(dom.text(&container), placeholder);
            assert!(dom.find_class(&container, BLOCKED_PLACEHOLDER).is_some());
            assert!(dom.find_class(&container, GROUP).is_none());
            assert!(dom.find_classes(&container, TOOLTIP).is_empty());
            assert!(!dom.markers(&container).contains(Markers::UI_INJECTED));
        }
        assert!(h.engine.dom().find_class(&other, GROUP).is_some());
        assert!(h.engine.dom().text(&other).contains("fine"));

        h.engine.complete_native_block("u1", true);
        assert!(h.engine.store().is_blocked("u1"));
        assert_eq!(h.engine.dom().find_classes(&first, BLOCKED_PLACEHOLDER).len(), 1);
    }

    #[test]
    fn test_clear_captures_refuses_when_empty() {
        let mut h = Harness::loaded(VIDEO);
        assert_eq!(h.engine.clear_captures(), 0);
        assert_eq!(h.toasts(), vec![Config::default().labels.nothing_to_clear]);
    }

    #[test]
    fn test_clip_metadata_fallback() {
        let mut h = Harness::loaded("https://chzzk.naver.com/clips/xyz");
        h.engine.handle_message(&json!({
            "type": "CHZZK_CLIP_METADATA",
            "payload": {"streamerName": "clipper", "title": "clip title", "clipId": "xyz"}
        }));
        h.comment("c1", "u1", "nick", "text");
        let metadata = h.engine.block_metadata("c1");
        h.engine.toggle_block("u1", Some(metadata));
        let record = h.engine.store().block_record("u1").unwrap();
        assert_eq!(record.streamer_name, "clipper");
        assert_eq!(record.title, "clip title");
    }
}
