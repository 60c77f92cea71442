//! `web-sys` implementation of the engine's DOM access.
//!
//! Marker flags and bound actions live on the elements themselves as data
//! attributes, so they vanish together with host-recycled markup.

use cg_core::dom::CONTAINER_SELECTOR;
use cg_core::{Action, Dom, DomError, HostPart, Markers};
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{
    Document, Element, HtmlElement, NodeList, ScrollBehavior, ScrollIntoViewOptions, ScrollLogicalPosition, Window,
};

pub const ACTION_ATTR: &str = "data-cg-action";
pub const MARKERS_ATTR: &str = "data-cg-markers";
const DARK_THEME_CLASS: &str = "theme_dark";

fn host_error(e: JsValue) -> DomError {
    DomError::Host(format!("{:?}", e))
}

pub(crate) fn elements(list: NodeList) -> Vec<Element> {
    (0..list.length())
        .filter_map(|i| list.get(i))
        .filter_map(|node| node.dyn_into::<Element>().ok())
        .collect()
}

fn html(node: &Element) -> Result<&HtmlElement, DomError> {
    node.dyn_ref::<HtmlElement>()
        .ok_or_else(|| DomError::Host("not an HTML element".to_string()))
}

pub struct WebDom {
    window: Window,
    document: Document,
    root: Element,
}

impl WebDom {
    /// `None` until the document has a root element.
    pub fn new(window: Window) -> Option<Self> {
        let document = window.document()?;
        let root = document.document_element()?;
        Some(Self { window, document, root })
    }

    pub fn raw_document(&self) -> &Document {
        &self.document
    }

    fn select_all(&self, scope: &Element, selector: &str) -> Vec<Element> {
        scope.query_selector_all(selector).map(elements).unwrap_or_default()
    }

    fn select(&self, scope: &Element, selector: &str) -> Option<Element> {
        scope.query_selector(selector).ok().flatten()
    }
}

impl Dom for WebDom {
    type Node = Element;

    fn document(&self) -> Element {
        self.root.clone()
    }

    fn location(&self) -> String {
        self.window.location().href().unwrap_or_default()
    }

    fn comment_containers(&self) -> Vec<Element> {
        self.document
            .query_selector_all(CONTAINER_SELECTOR)
            .map(elements)
            .unwrap_or_default()
    }

    fn container_by_key(&self, key: &str) -> Option<Element> {
        self.document
            .get_element_by_id(&format!("{}{}", cg_core::dom::CONTAINER_PREFIX, key))
    }

    fn id(&self, node: &Element) -> Option<String> {
        Some(node.id()).filter(|id| !id.is_empty())
    }

    fn parent(&self, node: &Element) -> Option<Element> {
        node.parent_element()
    }

    fn find_part(&self, scope: &Element, part: HostPart) -> Option<Element> {
        self.select(scope, part.selector())
    }

    fn find_parts(&self, scope: &Element, part: HostPart) -> Vec<Element> {
        self.select_all(scope, part.selector())
    }

    fn find_class(&self, scope: &Element, class: &str) -> Option<Element> {
        self.select(scope, &format!(".{}", class))
    }

    fn find_classes(&self, scope: &Element, class: &str) -> Vec<Element> {
        self.select_all(scope, &format!(".{}", class))
    }

    fn has_class(&self, node: &Element, class: &str) -> bool {
        node.class_list().contains(class)
    }

    fn text(&self, node: &Element) -> String {
        node.text_content().unwrap_or_default()
    }

    fn last_child_text(&self, node: &Element) -> Option<String> {
        node.last_child()?.text_content()
    }

    fn attr(&self, node: &Element, name: &str) -> Option<String> {
        node.get_attribute(name)
    }

    fn style(&self, node: &Element, property: &str) -> String {
        node.dyn_ref::<HtmlElement>()
            .and_then(|element| element.style().get_property_value(property).ok())
            .unwrap_or_default()
    }

    fn markers(&self, node: &Element) -> Markers {
        node.get_attribute(MARKERS_ATTR)
            .and_then(|bits| bits.parse::<u8>().ok())
            .map(Markers::from_bits_truncate)
            .unwrap_or_default()
    }

    fn is_dark_theme(&self) -> bool {
        self.root.class_name() == DARK_THEME_CLASS
    }

    fn add_class(&mut self, node: &Element, class: &str) -> Result<(), DomError> {
        node.class_list().add_1(class).map_err(host_error)
    }

    fn remove_class(&mut self, node: &Element, class: &str) -> Result<(), DomError> {
        node.class_list().remove_1(class).map_err(host_error)
    }

    fn set_text(&mut self, node: &Element, text: &str) -> Result<(), DomError> {
        node.set_text_content(Some(text));
        Ok(())
    }

    fn create_element(&mut self, tag: &str, classes: &[&str]) -> Result<Element, DomError> {
        let element = self
            .document
            .create_element(tag)
            .map_err(|_| DomError::Create(tag.to_string()))?;
        if !classes.is_empty() {
            element.set_class_name(&classes.join(" "));
        }
        Ok(element)
    }

    fn append_child(&mut self, parent: &Element, child: &Element) -> Result<(), DomError> {
        parent.append_child(child).map(|_| ()).map_err(host_error)
    }

    fn insert_after(&mut self, anchor: &Element, node: &Element) -> Result<(), DomError> {
        if anchor.parent_node().is_none() {
            return Err(DomError::Detached);
        }
        anchor.after_with_node_1(node).map_err(host_error)
    }

    fn remove(&mut self, node: &Element) -> Result<(), DomError> {
        node.remove();
        Ok(())
    }

    fn set_attr(&mut self, node: &Element, name: &str, value: &str) -> Result<(), DomError> {
        node.set_attribute(name, value).map_err(host_error)
    }

    fn remove_attr(&mut self, node: &Element, name: &str) -> Result<(), DomError> {
        node.remove_attribute(name).map_err(host_error)
    }

    fn set_style(&mut self, node: &Element, property: &str, value: &str) -> Result<(), DomError> {
        let style = html(node)?.style();
        if value.is_empty() {
            style.remove_property(property).map(|_| ()).map_err(host_error)
        } else {
            style.set_property(property, value).map_err(host_error)
        }
    }

    fn set_markers(&mut self, node: &Element, markers: Markers) -> Result<(), DomError> {
        if markers.is_empty() {
            node.remove_attribute(MARKERS_ATTR).map_err(host_error)
        } else {
            node.set_attribute(MARKERS_ATTR, &markers.bits().to_string())
                .map_err(host_error)
        }
    }

    fn bind_action(&mut self, node: &Element, action: &Action) -> Result<(), DomError> {
        let encoded = serde_json::to_string(action).map_err(|e| DomError::Host(e.to_string()))?;
        node.set_attribute(ACTION_ATTR, &encoded).map_err(host_error)
    }

    fn unbind_action(&mut self, node: &Element) -> Result<(), DomError> {
        node.remove_attribute(ACTION_ATTR).map_err(host_error)
    }

    fn scroll_into_view(&mut self, node: &Element) -> Result<(), DomError> {
        if !node.is_connected() {
            return Err(DomError::Detached);
        }
        let options = ScrollIntoViewOptions::new();
        options.set_behavior(ScrollBehavior::Smooth);
        options.set_block(ScrollLogicalPosition::Center);
        node.scroll_into_view_with_scroll_into_view_options(&options);
        Ok(())
    }
}

/// The action bound to the nearest ancestor of a click target, if any.
pub fn bound_action(target: &Element) -> Option<(Element, Action)> {
    let node = target.closest(&format!("[{}]", ACTION_ATTR)).ok().flatten()?;
    let encoded = node.get_attribute(ACTION_ATTR)?;
    match serde_json::from_str(&encoded) {
        Ok(action) => Some((node, action)),
        Err(e) => {
            log::debug!("dom: ignored malformed action: {}", e);
            None
        }
    }
}
