//! Browser tests for the web-sys adapter. Run with `wasm-pack test --headless --chrome`.

#![cfg(target_arch = "wasm32")]

use cg_core::{Action, Dom, Markers};
use cg_wasm::dom::{bound_action, WebDom, ACTION_ATTR, MARKERS_ATTR};
use wasm_bindgen_test::*;

wasm_bindgen_test_configure!(run_in_browser);

fn web_dom() -> WebDom {
    let window = web_sys::window().unwrap();
    WebDom::new(window).unwrap()
}

#[wasm_bindgen_test]
fn test_markers_live_on_the_element() {
    let mut dom = web_dom();
    let node = dom.create_element("div", &["probe"]).unwrap();
    assert!(dom.markers(&node).is_empty());

    let flags = Markers::UI_INJECTED | Markers::TEMP_UNBLUR;
    dom.set_markers(&node, flags).unwrap();
    assert_eq!(dom.markers(&node), flags);

    dom.set_markers(&node, Markers::empty()).unwrap();
    assert!(node.get_attribute(MARKERS_ATTR).is_none());
}

#[wasm_bindgen_test]
fn test_click_target_resolves_bound_action() {
    let mut dom = web_dom();
    let button = dom.create_element("button", &["cg-btn"]).unwrap();
    let label = dom.create_element("span", &[]).unwrap();
    dom.append_child(&button, &label).unwrap();

    let action = Action::Collect {
        comment_id: "42".to_string(),
    };
    dom.bind_action(&button, &action).unwrap();

    let (node, found) = bound_action(&label).unwrap();
    assert_eq!(node, button);
    assert_eq!(found, action);

    dom.unbind_action(&button).unwrap();
    assert!(button.get_attribute(ACTION_ATTR).is_none());
    assert!(bound_action(&label).is_none());
}

#[wasm_bindgen_test]
fn test_styles_set_and_clear() {
    let mut dom = web_dom();
    let node = dom.create_element("div", &[]).unwrap();
    dom.set_style(&node, "filter", "blur(5px)").unwrap();
    assert_eq!(dom.style(&node, "filter"), "blur(5px)");
    dom.set_style(&node, "filter", "").unwrap();
    assert_eq!(dom.style(&node, "filter"), "");
}

#[wasm_bindgen_test]
fn test_filter_chat_drops_blocked_author() {
    let frame = r#"{"cmd":93101,"bdy":[{"uid":"bad","msg":"x"},{"uid":"ok","msg":"y"}]}"#;
    let blocked = js_sys::Array::of1(&"bad".into());
    let filtered = cg_wasm::filter_chat(frame, blocked).unwrap();
    assert!(!filtered.contains("\"bad\""));
    assert!(filtered.contains("\"ok\""));

    assert!(cg_wasm::filter_chat(frame, js_sys::Array::new()).is_none());
}
