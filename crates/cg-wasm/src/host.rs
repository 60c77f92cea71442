//! Extension and page capabilities: `chrome.*` APIs, the raster library and a
//! canvas text rasterizer for PDF captions.

use cg_core::{Artifact, Delivery, StorageError, Storage};
use cg_export::{ExportError, TextRasterizer};
use serde::Serialize;
use serde_json::{Map, Value};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{spawn_local, JsFuture};
use web_sys::{CanvasRenderingContext2d, Document, Element, HtmlCanvasElement};

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = ["chrome", "storage", "local"], js_name = get, catch)]
    fn storage_get(keys: &JsValue) -> Result<js_sys::Promise, JsValue>;

    #[wasm_bindgen(js_namespace = ["chrome", "storage", "local"], js_name = set, catch)]
    fn storage_set(items: &JsValue) -> Result<js_sys::Promise, JsValue>;

    #[wasm_bindgen(js_namespace = ["chrome", "storage", "local"], js_name = remove, catch)]
    fn storage_remove(keys: &JsValue) -> Result<js_sys::Promise, JsValue>;

    #[wasm_bindgen(js_namespace = ["chrome", "runtime"], js_name = sendMessage, catch)]
    fn runtime_send_message(message: &JsValue) -> Result<js_sys::Promise, JsValue>;

    #[wasm_bindgen(js_namespace = ["chrome", "downloads"], js_name = download, catch)]
    fn downloads_download(options: &JsValue) -> Result<js_sys::Promise, JsValue>;

    #[wasm_bindgen(js_namespace = htmlToImage, js_name = toPng, catch)]
    fn html_to_png(node: &Element, options: &JsValue) -> Result<js_sys::Promise, JsValue>;
}

pub fn js_error(e: JsValue) -> String {
    e.as_string().unwrap_or_else(|| format!("{:?}", e))
}

/// Serialize into a plain JS object (maps become objects, not `Map`s).
pub fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<JsValue, JsValue> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(JsValue::from)
}

/// Await a promise in the background, logging a rejection.
fn settle(what: &'static str, promise: Result<js_sys::Promise, JsValue>) {
    spawn_local(async move {
        let result = match promise {
            Ok(promise) => JsFuture::from(promise).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            log::warn!("host: {} failed: {}", what, js_error(e));
        }
    });
}

// =============================================================================
// Storage
// =============================================================================

/// `chrome.storage.local`. Reads are asynchronous, see [`load_storage`].
pub struct ChromeStorage;

impl Storage for ChromeStorage {
    fn get(&self, _keys: &[&str]) -> Result<Map<String, Value>, StorageError> {
        Err(StorageError::Unsupported("synchronous read of chrome.storage"))
    }

    fn set(&mut self, entries: Map<String, Value>) -> Result<(), StorageError> {
        let items = to_js(&entries).map_err(|e| StorageError::Backend(js_error(e)))?;
        settle("storage write", storage_set(&items));
        Ok(())
    }

    fn remove(&mut self, keys: &[&str]) -> Result<(), StorageError> {
        let keys = to_js(keys).map_err(|e| StorageError::Backend(js_error(e)))?;
        settle("storage remove", storage_remove(&keys));
        Ok(())
    }
}

/// Read the persisted collections.
pub async fn load_storage(keys: &[&str]) -> Result<Map<String, Value>, String> {
    let keys = to_js(keys).map_err(js_error)?;
    let promise = storage_get(&keys).map_err(js_error)?;
    let values = JsFuture::from(promise).await.map_err(js_error)?;
    match serde_wasm_bindgen::from_value::<Value>(values).map_err(|e| e.to_string())? {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

// =============================================================================
// Delivery
// =============================================================================

/// Hands artifacts to the background worker, which owns the downloads API.
pub struct RuntimeDelivery;

impl Delivery for RuntimeDelivery {
    fn deliver(&mut self, artifact: Artifact) {
        match to_js(&artifact.to_message()) {
            Ok(message) => settle("download request", runtime_send_message(&message)),
            Err(e) => log::warn!("host: download request not sent: {}", js_error(e)),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DownloadOptions<'a> {
    url: &'a str,
    filename: &'a str,
    save_as: bool,
}

/// Start a download from the background worker.
pub fn download(url: &str, filename: &str) -> Result<(), JsValue> {
    let options = to_js(&DownloadOptions {
        url,
        filename,
        save_as: true,
    })?;
    settle("download", downloads_download(&options));
    Ok(())
}

// =============================================================================
// Rendering
// =============================================================================

/// Rasterize `node` to a PNG data URI with the page's raster library.
pub async fn render_png(node: &Element, options: &JsValue) -> Result<String, String> {
    let promise = html_to_png(node, options).map_err(js_error)?;
    let value = JsFuture::from(promise).await.map_err(js_error)?;
    value.as_string().ok_or_else(|| "raster result is not a string".to_string())
}

const CAPTION_FONT_PX: f64 = 12.0;
const CAPTION_FONT: &str = "12px 'Malgun Gothic', 'Noto Sans KR', sans-serif";

/// Draws caption lines on an offscreen canvas so Hangul survives in PDFs.
pub struct CanvasRasterizer {
    document: Document,
}

impl CanvasRasterizer {
    pub fn new(document: Document) -> Self {
        Self { document }
    }

    fn draw(&self, text: &str) -> Result<String, JsValue> {
        let canvas: HtmlCanvasElement = self.document.create_element("canvas")?.dyn_into()?;
        let context: CanvasRenderingContext2d = canvas
            .get_context("2d")?
            .ok_or_else(|| JsValue::from_str("2d context unavailable"))?
            .dyn_into()?;

        context.set_font(CAPTION_FONT);
        let width = context.measure_text(text)?.width();
        canvas.set_width((width + 10.0).ceil() as u32);
        canvas.set_height((CAPTION_FONT_PX * 1.5) as u32);

        // Resizing resets the context state.
        context.set_font(CAPTION_FONT);
        context.set_fill_style_str("#000000");
        context.set_text_baseline("middle");
        context.fill_text(text, 0.0, CAPTION_FONT_PX * 0.75)?;
        canvas.to_data_url()
    }
}

impl TextRasterizer for CanvasRasterizer {
    fn rasterize(&self, text: &str) -> Result<String, ExportError> {
        self.draw(text).map_err(|e| ExportError::Raster(js_error(e)))
    }
}
