//! WebAssembly bindings for Cheese Grinder
//!
//! One module serves all three extension worlds:
//! - page world: `tap_response`, `tap_navigation`, `watch_blocked_ids` and
//!   `filter_live_chat`, called from the request, JSON and socket hooks
//! - content world: `start` plus the ledger and export entry points
//! - background worker: `background_dispatch`

pub mod dom;
pub mod host;

use std::cell::{Cell, RefCell};
use std::collections::HashSet;

use cg_core::dom::{container_key, CONTAINER_SELECTOR};
use cg_core::{
    filter_chat_text, ActionOutcome, BlockedIdsMessage, Clock, Config, DownloadMessage, Effect, Engine,
    NativeBlockRequest, Navigation, RenderError, RenderRequest, SystemClock, Tap,
};
use cg_export::{CaptureOrder, PdfOptions, TextMode};
use serde_json::Value;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{spawn_local, JsFuture};
use web_sys::{Element, Event, Headers, MessageEvent, MutationObserver, MutationObserverInit, MutationRecord};
use web_sys::{RequestCredentials, RequestInit, Response, Window};

use crate::dom::{bound_action, elements, WebDom};
use crate::host::{js_error, load_storage, render_png, to_js, CanvasRasterizer, ChromeStorage, RuntimeDelivery};

const MORE_BUTTON_SELECTOR: &str = "button[class*=\"comment_item_button_more\"]";
const MENU_LAYER_CLASS: &str = "comment_item_layer";

thread_local! {
    static ENGINE: RefCell<Option<Engine<WebDom>>> = const { RefCell::new(None) };
    static ON_EFFECT: RefCell<Option<js_sys::Function>> = const { RefCell::new(None) };
    static TIMER: Cell<Option<i32>> = const { Cell::new(None) };
    static TIMER_CALLBACK: RefCell<Option<Closure<dyn FnMut()>>> = const { RefCell::new(None) };
    // Page world copy of the blocked author set
    static BLOCKED: RefCell<HashSet<String>> = RefCell::new(HashSet::new());
}

#[wasm_bindgen(start)]
pub fn main() {
    console_error_panic_hook::set_once();
    wasm_logger::init(wasm_logger::Config::new(log::Level::Info));
}

// =============================================================================
// Engine Access
// =============================================================================

/// Run `f` against the engine, then flush effects and re-arm the timer.
fn with_engine<R>(f: impl FnOnce(&mut Engine<WebDom>) -> R) -> Option<R> {
    let result = ENGINE.with(|cell| match cell.try_borrow_mut() {
        Ok(mut engine) => engine.as_mut().map(f),
        Err(_) => {
            log::warn!("wasm: engine busy, event dropped");
            None
        }
    });
    flush();
    result
}

fn flush() {
    let state = ENGINE.with(|cell| {
        let mut engine = cell.try_borrow_mut().ok()?;
        let engine = engine.as_mut()?;
        Some((engine.drain_effects(), engine.next_deadline(), engine.clock().now_ms()))
    });
    let Some((effects, deadline, now)) = state else {
        return;
    };

    ON_EFFECT.with(|callback| {
        let callback = callback.borrow();
        let Some(callback) = callback.as_ref() else {
            return;
        };
        for effect in &effects {
            let delivered = to_js(effect).and_then(|value| callback.call1(&JsValue::NULL, &value));
            if let Err(e) = delivered {
                log::warn!("wasm: effect callback failed: {}", js_error(e));
            }
        }
    });

    for effect in &effects {
        if let Effect::BlockedIds { ids } = effect {
            let posted = serde_json::to_value(BlockedIdsMessage::new(ids.clone()))
                .map_err(|e| JsValue::from_str(&e.to_string()))
                .and_then(|message| post_to_page(&message));
            if let Err(e) = posted {
                log::warn!("wasm: blocked ids not posted: {}", js_error(e));
            }
        }
    }

    rearm_timer(deadline, now);
}

fn rearm_timer(deadline: Option<u64>, now: u64) {
    let Some(window) = web_sys::window() else {
        return;
    };
    if let Some(handle) = TIMER.take() {
        window.clear_timeout_with_handle(handle);
    }
    let Some(deadline) = deadline else {
        return;
    };
    let delay = deadline.saturating_sub(now).min(i32::MAX as u64) as i32;
    TIMER_CALLBACK.with(|callback| {
        let callback = callback.borrow();
        let Some(callback) = callback.as_ref() else {
            return;
        };
        match window.set_timeout_with_callback_and_timeout_and_arguments_0(callback.as_ref().unchecked_ref(), delay) {
            Ok(handle) => TIMER.set(Some(handle)),
            Err(e) => log::warn!("wasm: timer not armed: {}", js_error(e)),
        }
    });
}

/// Follow up on an action outcome; returns whether the click was consumed.
fn dispatch(outcome: ActionOutcome<Element>) -> bool {
    match outcome {
        ActionOutcome::Handled => true,
        ActionOutcome::Ignored => false,
        ActionOutcome::Render(request) => {
            spawn_local(render(request));
            true
        }
        ActionOutcome::NativeBlock(request) => {
            spawn_local(async move {
                let ok = native_block(&request).await.unwrap_or_else(|e| {
                    log::warn!("wasm: native block request failed: {}", js_error(e));
                    false
                });
                with_engine(|engine| engine.complete_native_block(&request.author_id, ok));
            });
            true
        }
    }
}

async fn render(request: RenderRequest<Element>) {
    let result = match render_options(&request) {
        Ok((options, filter)) => {
            let result = render_png(&request.node, &options).await;
            drop(filter);
            result
        }
        Err(e) => Err(js_error(e)),
    };
    let result = result.map_err(RenderError::Failed);
    with_engine(|engine| {
        if let Err(e) = engine.complete_capture(request.ticket, result) {
            log::warn!("wasm: {}", e);
        }
    });
}

type NodeFilter = Closure<dyn Fn(JsValue) -> bool>;

/// Raster options plus the node filter closure, which must outlive the render.
fn render_options(request: &RenderRequest<Element>) -> Result<(JsValue, Option<NodeFilter>), JsValue> {
    let options = to_js(&request.options)?;
    if !request.options.skip_stylesheets {
        return Ok((options, None));
    }
    let filter = NodeFilter::new(|node: JsValue| {
        let field = |name: &str| {
            js_sys::Reflect::get(&node, &JsValue::from_str(name))
                .ok()
                .and_then(|value| value.as_string())
        };
        !(field("tagName").as_deref() == Some("LINK") && field("rel").as_deref() == Some("stylesheet"))
    });
    js_sys::Reflect::set(&options, &"filter".into(), filter.as_ref())?;
    Ok((options, Some(filter)))
}

async fn native_block(request: &NativeBlockRequest) -> Result<bool, JsValue> {
    let window = web_sys::window().ok_or_else(|| JsValue::from_str("no window"))?;
    let headers = Headers::new()?;
    headers.set("Content-Type", "application/json")?;
    let init = RequestInit::new();
    init.set_method(&request.method);
    init.set_credentials(RequestCredentials::Include);
    init.set_headers(&headers);
    let response: Response = JsFuture::from(window.fetch_with_str_and_init(&request.url, &init))
        .await?
        .dyn_into()?;
    Ok(response.ok())
}

// =============================================================================
// Content World
// =============================================================================

/// Mount the engine on the current page.
///
/// `config` may be `undefined` for defaults. `on_effect` receives every UI
/// effect (toasts, clipboard writes, export counters).
#[wasm_bindgen]
pub fn start(config: JsValue, on_effect: js_sys::Function) -> Result<(), JsValue> {
    if ENGINE.with(|cell| cell.borrow().is_some()) {
        return Err(JsValue::from_str("Already started. Reload the page to restart."));
    }
    let config: Config = if config.is_undefined() || config.is_null() {
        Config::default()
    } else {
        serde_wasm_bindgen::from_value(config)?
    };
    let window = web_sys::window().ok_or_else(|| JsValue::from_str("no window"))?;
    let dom = WebDom::new(window.clone()).ok_or_else(|| JsValue::from_str("document has no root element"))?;
    let keys: Vec<String> = config.storage.all().iter().map(|key| key.to_string()).collect();

    let engine = Engine::new(
        dom,
        Box::new(ChromeStorage),
        config,
        Box::new(SystemClock),
        Box::new(RuntimeDelivery),
    );
    ENGINE.with(|cell| *cell.borrow_mut() = Some(engine));
    ON_EFFECT.with(|cell| *cell.borrow_mut() = Some(on_effect));
    TIMER_CALLBACK.with(|cell| {
        *cell.borrow_mut() = Some(Closure::new(|| {
            TIMER.set(None);
            with_engine(|engine| engine.run_due());
        }))
    });

    install_listeners(&window)?;
    with_engine(|engine| engine.start());

    spawn_local(async move {
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        match load_storage(&keys).await {
            Ok(values) => {
                with_engine(|engine| {
                    if let Err(e) = engine.apply_loaded(&values) {
                        log::error!("wasm: moderation state not loaded: {}", e);
                    }
                });
            }
            Err(e) => log::error!("wasm: storage read failed: {}", e),
        }
    });
    Ok(())
}

fn install_listeners(window: &Window) -> Result<(), JsValue> {
    let document = window.document().ok_or_else(|| JsValue::from_str("no document"))?;
    let root = document
        .document_element()
        .ok_or_else(|| JsValue::from_str("document has no root element"))?;

    // Clicks on injected controls
    let on_click = Closure::<dyn FnMut(Event)>::new(|event: Event| {
        let Some(target) = event.target().and_then(|target| target.dyn_into::<Element>().ok()) else {
            return;
        };
        let Some((node, action)) = bound_action(&target) else {
            return;
        };
        let outcome = with_engine(|engine| engine.handle_action(&node, action));
        if outcome.is_some_and(dispatch) {
            event.prevent_default();
            event.stop_propagation();
        }
    });
    document.add_event_listener_with_callback("click", on_click.as_ref().unchecked_ref())?;
    on_click.forget();

    // Remember whose "more" menu opens, before the host renders it
    let on_menu = Closure::<dyn FnMut(Event)>::new(|event: Event| {
        let container = event
            .target()
            .and_then(|target| target.dyn_into::<Element>().ok())
            .and_then(|target| target.closest(MORE_BUTTON_SELECTOR).ok().flatten())
            .and_then(|button| button.closest(CONTAINER_SELECTOR).ok().flatten());
        if let Some(container) = container {
            let id = container.id();
            if let Some(key) = container_key(&id) {
                with_engine(|engine| engine.note_menu_opened(key));
            }
        }
    });
    document.add_event_listener_with_callback_and_bool("click", on_menu.as_ref().unchecked_ref(), true)?;
    on_menu.forget();

    // Host DOM rewrites
    let on_mutation = Closure::<dyn FnMut(js_sys::Array, MutationObserver)>::new(
        |records: js_sys::Array, _observer: MutationObserver| {
            let layers: Vec<Element> = records
                .iter()
                .filter_map(|record| record.dyn_into::<MutationRecord>().ok())
                .flat_map(|record| elements(record.added_nodes()))
                .filter(|node| {
                    node.get_attribute("class")
                        .is_some_and(|class| class.contains(MENU_LAYER_CLASS))
                })
                .collect();
            with_engine(|engine| {
                for layer in &layers {
                    engine.on_menu_layer(layer);
                }
                engine.on_mutation();
            });
        },
    );
    let observer = MutationObserver::new(on_mutation.as_ref().unchecked_ref())?;
    let init = MutationObserverInit::new();
    init.set_child_list(true);
    init.set_subtree(true);
    observer.observe_with_options(&root, &init)?;
    on_mutation.forget();

    // Tap messages from the page world
    let source: JsValue = window.clone().into();
    let on_message = Closure::<dyn FnMut(MessageEvent)>::new(move |event: MessageEvent| {
        let same_window = event
            .source()
            .is_some_and(|origin| js_sys::Object::is(&origin, &source));
        if !same_window {
            return;
        }
        match serde_wasm_bindgen::from_value::<Value>(event.data()) {
            Ok(message) => {
                with_engine(|engine| engine.handle_message(&message));
            }
            Err(e) => log::debug!("wasm: unreadable message: {}", e),
        }
    });
    window.add_event_listener_with_callback("message", on_message.as_ref().unchecked_ref())?;
    on_message.forget();
    Ok(())
}

fn not_started() -> JsValue {
    JsValue::from_str("Not started. Call start() first.")
}

/// Combined block/capture ledger, newest first.
#[wasm_bindgen]
pub fn ledger() -> Result<JsValue, JsValue> {
    let entries = with_engine(|engine| engine.ledger()).ok_or_else(not_started)?;
    to_js(&entries)
}

/// Export control counters.
#[wasm_bindgen]
pub fn summary() -> Result<JsValue, JsValue> {
    let summary = with_engine(|engine| engine.export_summary()).ok_or_else(not_started)?;
    to_js(&summary)
}

#[wasm_bindgen]
pub fn unblock(author_id: &str) -> bool {
    with_engine(|engine| engine.unblock(author_id)).unwrap_or(false)
}

#[wasm_bindgen]
pub fn delete_capture(comment_id: &str) -> bool {
    with_engine(|engine| engine.remove_capture(comment_id)).unwrap_or(false)
}

#[wasm_bindgen]
pub fn clear_captures() -> u32 {
    with_engine(|engine| engine.clear_captures() as u32).unwrap_or(0)
}

/// Deliver the CSV log.
#[wasm_bindgen]
pub fn export_csv() -> Result<(), JsValue> {
    with_engine(|engine| {
        let date = engine.clock().date_stamp();
        let artifact = cg_export::export_csv(engine.store(), &date).map_err(|e| JsValue::from_str(&e.to_string()))?;
        engine.deliver(artifact);
        Ok(())
    })
    .ok_or_else(not_started)?
}

/// Deliver the PDF report.
///
/// `order` is `"newest"` or `"oldest"`; `ids` optionally restricts the report
/// to an array of comment ids.
#[wasm_bindgen]
pub fn export_pdf(order: &str, ids: JsValue) -> Result<(), JsValue> {
    let ids: Option<Vec<String>> = if ids.is_undefined() || ids.is_null() {
        None
    } else {
        Some(serde_wasm_bindgen::from_value(ids)?)
    };
    let order = match order {
        "oldest" => CaptureOrder::OldestFirst,
        _ => CaptureOrder::NewestFirst,
    };
    let document = web_sys::window()
        .and_then(|window| window.document())
        .ok_or_else(|| JsValue::from_str("no document"))?;
    let rasterizer = CanvasRasterizer::new(document);

    with_engine(|engine| {
        let options = PdfOptions {
            order,
            ids,
            text: TextMode::Raster(&rasterizer),
            labels: engine.config().labels.clone(),
        };
        let date = engine.clock().date_stamp();
        let artifact =
            cg_export::export_pdf(engine.store(), &options, &date).map_err(|e| JsValue::from_str(&e.to_string()))?;
        engine.deliver(artifact);
        Ok(())
    })
    .ok_or_else(not_started)?
}

// =============================================================================
// Page World
// =============================================================================

fn post_to_page(message: &Value) -> Result<(), JsValue> {
    let window = web_sys::window().ok_or_else(|| JsValue::from_str("no window"))?;
    window.post_message(&to_js(message)?, "*")
}

/// Inspect a completed host request and forward what the engine needs.
#[wasm_bindgen]
pub fn tap_response(url: &str, body: &str) {
    let Some(message) = Tap::default().observe(url, body) else {
        return;
    };
    if let Err(e) = post_to_page(&message.to_value()) {
        log::debug!("wasm: tap message not posted: {}", js_error(e));
    }
}

/// Report a history change (`push`, `replace` or `pop`).
#[wasm_bindgen]
pub fn tap_navigation(kind: &str) {
    let how = match kind {
        "replace" => Navigation::Replace,
        "pop" => Navigation::Pop,
        _ => Navigation::Push,
    };
    let message = Tap::default().navigated(how);
    if let Err(e) = post_to_page(&message.to_value()) {
        log::debug!("wasm: navigation message not posted: {}", js_error(e));
    }
}

/// Filter a raw chat frame against blocked author ids.
///
/// Returns the rewritten frame, or `undefined` to keep the original text.
#[wasm_bindgen]
pub fn filter_chat(text: &str, blocked: js_sys::Array) -> Option<String> {
    if blocked.length() == 0 {
        return None;
    }
    let blocked: HashSet<String> = blocked.iter().filter_map(|id| id.as_string()).collect();
    filter_chat_text(text, &|author: &str| blocked.contains(author))
}

/// Keep the page world's blocked set in step with the content world.
#[wasm_bindgen]
pub fn watch_blocked_ids() -> Result<(), JsValue> {
    let window = web_sys::window().ok_or_else(|| JsValue::from_str("no window"))?;
    let on_message = Closure::<dyn FnMut(MessageEvent)>::new(|event: MessageEvent| {
        let Ok(message) = serde_wasm_bindgen::from_value::<Value>(event.data()) else {
            return;
        };
        if let Some(ids) = BlockedIdsMessage::parse(&message) {
            log::debug!("wasm: chat filter now blocks {} authors", ids.len());
            BLOCKED.with(|blocked| *blocked.borrow_mut() = ids.into_iter().collect());
        }
    });
    window.add_event_listener_with_callback("message", on_message.as_ref().unchecked_ref())?;
    on_message.forget();
    Ok(())
}

/// Filter a live chat frame against the set `watch_blocked_ids` keeps.
#[wasm_bindgen]
pub fn filter_live_chat(text: &str) -> Option<String> {
    BLOCKED.with(|blocked| {
        let blocked = blocked.borrow();
        if blocked.is_empty() {
            return None;
        }
        filter_chat_text(text, &|author: &str| blocked.contains(author))
    })
}

// =============================================================================
// Background Worker
// =============================================================================

/// Turn a download request message into a download. Returns whether the
/// message was one.
#[wasm_bindgen]
pub fn background_dispatch(message: JsValue) -> Result<bool, JsValue> {
    let Ok(message) = serde_wasm_bindgen::from_value::<DownloadMessage>(message) else {
        return Ok(false);
    };
    if !message.is_download() {
        return Ok(false);
    }
    host::download(&message.data_url, &message.filename)?;
    Ok(true)
}
