//! In-memory arena DOM
//!
//! Backs the engine in tests, benches and offline replays. Host-side builders
//! (`element`, `append`, `comment`, `detach`) are not counted as mutations;
//! every successful call through [`Dom`] is, so a pass that changes nothing
//! leaves [`MemDom::mutations`] untouched.

use std::collections::{BTreeMap, HashSet};

use super::{Dom, DomError, HostPart, CONTAINER_PREFIX};
use crate::types::{Action, Markers};

/// Handle to an arena element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemNode(usize);

#[derive(Debug, Clone, Default)]
struct Element {
    tag: String,
    id: Option<String>,
    classes: Vec<String>,
    attrs: BTreeMap<String, String>,
    style: BTreeMap<String, String>,
    text: String,
    children: Vec<MemNode>,
    parent: Option<MemNode>,
    markers: Markers,
    action: Option<Action>,
}

impl Element {
    fn new(tag: &str, classes: &[&str]) -> Self {
        Self {
            tag: tag.to_string(),
            classes: classes.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    fn class_contains(&self, needle: &str) -> bool {
        self.classes.iter().any(|class| class.contains(needle))
    }
}

#[derive(Debug, Clone)]
pub struct MemDom {
    nodes: Vec<Element>,
    root: MemNode,
    location: String,
    mutations: usize,
    scrolled: Vec<MemNode>,
    rejecting: HashSet<MemNode>,
}

impl Default for MemDom {
    fn default() -> Self {
        Self::new()
    }
}

impl MemDom {
    pub fn new() -> Self {
        Self {
            nodes: vec![Element::new("html", &[])],
            root: MemNode(0),
            location: String::new(),
            mutations: 0,
            scrolled: Vec::new(),
            rejecting: HashSet::new(),
        }
    }

    pub fn root(&self) -> MemNode {
        self.root
    }

    /// Page navigation as the host would do it.
    pub fn set_location(&mut self, url: &str) {
        self.location = url.to_string();
    }

    /// Mutations performed through [`Dom`] so far.
    pub fn mutations(&self) -> usize {
        self.mutations
    }

    pub fn reset_mutations(&mut self) {
        self.mutations = 0;
    }

    /// Nodes scrolled into view, in call order.
    pub fn scrolled(&self) -> &[MemNode] {
        &self.scrolled
    }

    pub fn set_dark_theme(&mut self, dark: bool) {
        let root = &mut self.nodes[self.root.0];
        root.classes.retain(|class| class != "theme_dark");
        if dark {
            root.classes.push("theme_dark".to_string());
        }
    }

    /// Make every later mutation of `node` fail.
    pub fn reject_mutations(&mut self, node: MemNode) {
        self.rejecting.insert(node);
    }

    /// Action bound to `node`, as a click would dispatch it.
    pub fn click(&self, node: MemNode) -> Option<Action> {
        self.get(node).and_then(|element| element.action.clone())
    }

    pub fn tag(&self, node: MemNode) -> Option<&str> {
        self.get(node).map(|element| element.tag.as_str())
    }

    pub fn children(&self, node: MemNode) -> Vec<MemNode> {
        self.get(node).map(|element| element.children.clone()).unwrap_or_default()
    }

    pub fn is_attached(&self, node: MemNode) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == self.root {
                return true;
            }
            current = self.get(id).and_then(|element| element.parent);
        }
        false
    }

    // -------------------------------------------------------------------------
    // Host-side builders
    // -------------------------------------------------------------------------

    /// Create a detached host element.
    pub fn element(&mut self, tag: &str, classes: &[&str]) -> MemNode {
        self.nodes.push(Element::new(tag, classes));
        MemNode(self.nodes.len() - 1)
    }

    pub fn set_host_id(&mut self, node: MemNode, id: &str) {
        if let Some(element) = self.get_mut(node) {
            element.id = Some(id.to_string());
        }
    }

    pub fn set_host_text(&mut self, node: MemNode, text: &str) {
        if let Some(element) = self.get_mut(node) {
            element.text = text.to_string();
        }
    }

    /// Append as the host would, without counting a mutation.
    pub fn append(&mut self, parent: MemNode, child: MemNode) {
        self.link(parent, child, None);
    }

    /// Remove a subtree as the host would.
    pub fn detach(&mut self, node: MemNode) {
        self.unlink(node);
    }

    /// Build a host comment container under `parent`:
    ///
    /// ```text
    /// div#commentBox-<key>
    ///   div.comment_item_name   > span.comment_item_name_text (nickname)
    ///   div.comment_item_content > div.comment_item_text (text)
    /// ```
    pub fn comment(&mut self, parent: MemNode, key: &str, nickname: &str, text: &str) -> MemNode {
        let container = self.element("div", &["comment_item_container__x1"]);
        self.set_host_id(container, &format!("{}{}", CONTAINER_PREFIX, key));

        let name_wrap = self.element("div", &["comment_item_name__x2"]);
        let name = self.element("span", &["comment_item_name_text__x3"]);
        self.set_host_text(name, nickname);
        self.append(name_wrap, name);
        self.append(container, name_wrap);

        let content = self.element("div", &["comment_item_content__x4"]);
        let body = self.element("div", &["comment_item_text__x5"]);
        self.set_host_text(body, text);
        self.append(content, body);
        self.append(container, content);

        self.append(parent, container);
        container
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn get(&self, node: MemNode) -> Option<&Element> {
        self.nodes.get(node.0)
    }

    fn get_mut(&mut self, node: MemNode) -> Option<&mut Element> {
        self.nodes.get_mut(node.0)
    }

    /// Resolve a node for mutation and count it.
    fn mutate(&mut self, node: &MemNode) -> Result<&mut Element, DomError> {
        if self.rejecting.contains(node) {
            return Err(DomError::Host(format!("node {} rejects writes", node.0)));
        }
        let element = self.nodes.get_mut(node.0).ok_or(DomError::Detached)?;
        self.mutations += 1;
        Ok(element)
    }

    fn unlink(&mut self, node: MemNode) {
        let parent = self.get(node).and_then(|element| element.parent);
        if let Some(parent) = parent {
            if let Some(element) = self.get_mut(parent) {
                element.children.retain(|child| *child != node);
            }
        }
        if let Some(element) = self.get_mut(node) {
            element.parent = None;
        }
    }

    fn link(&mut self, parent: MemNode, child: MemNode, position: Option<usize>) {
        self.unlink(child);
        if let Some(element) = self.get_mut(parent) {
            match position {
                Some(index) if index <= element.children.len() => element.children.insert(index, child),
                _ => element.children.push(child),
            }
        }
        if let Some(element) = self.get_mut(child) {
            element.parent = Some(parent);
        }
    }

    /// Descendants of `scope` in document order, `scope` excluded.
    fn descendants(&self, scope: MemNode) -> Vec<MemNode> {
        let mut out = Vec::new();
        let mut stack: Vec<MemNode> = self.children(scope).into_iter().rev().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(self.children(node).into_iter().rev());
        }
        out
    }

    fn has_ancestor(&self, node: MemNode, tag: &str, needle: &str) -> bool {
        let mut current = self.get(node).and_then(|element| element.parent);
        while let Some(id) = current {
            let Some(element) = self.get(id) else {
                return false;
            };
            if element.tag == tag && element.class_contains(needle) {
                return true;
            }
            current = element.parent;
        }
        false
    }

    fn matches(&self, node: MemNode, part: HostPart) -> bool {
        let Some(element) = self.get(node) else {
            return false;
        };
        let tagged = |tag: &str, needle: &str| element.tag == tag && element.class_contains(needle);
        match part {
            HostPart::NameText => tagged("span", "name_text"),
            HostPart::Content => tagged("div", "comment_item_content"),
            HostPart::ContentText => element.class_contains("comment_item_text"),
            HostPart::AttachmentImage => {
                element.tag == "img" && self.has_ancestor(node, "div", "comment_item_attachment")
            }
            HostPart::RepliedItem => element.class_contains("comment_item_is_replied"),
            HostPart::VideoChannelName => {
                tagged("span", "name_text") && self.has_ancestor(node, "div", "video_information_name")
            }
            HostPart::CommunityName => {
                tagged("span", "name_text") && self.has_ancestor(node, "div", "community_detail_name")
            }
            HostPart::VideoTitle => tagged("h2", "video_information_title"),
            HostPart::MenuItem => element.tag == "li",
            HostPart::MenuButton => element.tag == "button",
        }
    }
}

impl Dom for MemDom {
    type Node = MemNode;

    fn document(&self) -> MemNode {
        self.root
    }

    fn location(&self) -> String {
        self.location.clone()
    }

    fn comment_containers(&self) -> Vec<MemNode> {
        self.descendants(self.root)
            .into_iter()
            .filter(|node| {
                self.get(*node)
                    .and_then(|element| element.id.as_deref())
                    .is_some_and(|id| id.starts_with(CONTAINER_PREFIX))
            })
            .collect()
    }

    fn container_by_key(&self, key: &str) -> Option<MemNode> {
        let id = format!("{}{}", CONTAINER_PREFIX, key);
        self.descendants(self.root)
            .into_iter()
            .find(|node| self.get(*node).and_then(|element| element.id.as_deref()) == Some(id.as_str()))
    }

    fn id(&self, node: &MemNode) -> Option<String> {
        self.get(*node)?.id.clone()
    }

    fn parent(&self, node: &MemNode) -> Option<MemNode> {
        self.get(*node)?.parent
    }

    fn find_part(&self, scope: &MemNode, part: HostPart) -> Option<MemNode> {
        self.descendants(*scope).into_iter().find(|node| self.matches(*node, part))
    }

    fn find_parts(&self, scope: &MemNode, part: HostPart) -> Vec<MemNode> {
        self.descendants(*scope)
            .into_iter()
            .filter(|node| self.matches(*node, part))
            .collect()
    }

    fn find_class(&self, scope: &MemNode, class: &str) -> Option<MemNode> {
        self.descendants(*scope).into_iter().find(|node| self.has_class(node, class))
    }

    fn find_classes(&self, scope: &MemNode, class: &str) -> Vec<MemNode> {
        self.descendants(*scope)
            .into_iter()
            .filter(|node| self.has_class(node, class))
            .collect()
    }

    fn has_class(&self, node: &MemNode, class: &str) -> bool {
        self.get(*node).is_some_and(|element| element.classes.iter().any(|c| c == class))
    }

    fn text(&self, node: &MemNode) -> String {
        let Some(element) = self.get(*node) else {
            return String::new();
        };
        let mut text = element.text.clone();
        for child in &element.children {
            text.push_str(&self.text(child));
        }
        text
    }

    fn last_child_text(&self, node: &MemNode) -> Option<String> {
        let element = self.get(*node)?;
        match element.children.last() {
            Some(child) => Some(self.text(child)),
            None if !element.text.is_empty() => Some(element.text.clone()),
            None => None,
        }
    }

    fn attr(&self, node: &MemNode, name: &str) -> Option<String> {
        let element = self.get(*node)?;
        match name {
            "id" => element.id.clone(),
            "class" => Some(element.classes.join(" ")),
            _ => element.attrs.get(name).cloned(),
        }
    }

    fn style(&self, node: &MemNode, property: &str) -> String {
        self.get(*node)
            .and_then(|element| element.style.get(property).cloned())
            .unwrap_or_default()
    }

    fn markers(&self, node: &MemNode) -> Markers {
        self.get(*node).map(|element| element.markers).unwrap_or_default()
    }

    fn is_dark_theme(&self) -> bool {
        self.has_class(&self.root, "theme_dark")
    }

    fn add_class(&mut self, node: &MemNode, class: &str) -> Result<(), DomError> {
        let element = self.mutate(node)?;
        if !element.classes.iter().any(|c| c == class) {
            element.classes.push(class.to_string());
        }
        Ok(())
    }

    fn remove_class(&mut self, node: &MemNode, class: &str) -> Result<(), DomError> {
        self.mutate(node)?.classes.retain(|c| c != class);
        Ok(())
    }

    fn set_text(&mut self, node: &MemNode, text: &str) -> Result<(), DomError> {
        let children = {
            let element = self.mutate(node)?;
            element.text = text.to_string();
            std::mem::take(&mut element.children)
        };
        for child in children {
            if let Some(element) = self.get_mut(child) {
                element.parent = None;
            }
        }
        Ok(())
    }

    fn create_element(&mut self, tag: &str, classes: &[&str]) -> Result<MemNode, DomError> {
        if tag.is_empty() {
            return Err(DomError::Create(tag.to_string()));
        }
        self.mutations += 1;
        Ok(self.element(tag, classes))
    }

    fn append_child(&mut self, parent: &MemNode, child: &MemNode) -> Result<(), DomError> {
        self.mutate(parent)?;
        self.link(*parent, *child, None);
        Ok(())
    }

    fn insert_after(&mut self, anchor: &MemNode, node: &MemNode) -> Result<(), DomError> {
        self.mutate(anchor)?;
        let parent = self.parent(anchor).ok_or(DomError::Detached)?;
        let index = self
            .children(parent)
            .iter()
            .position(|child| child == anchor)
            .ok_or(DomError::Detached)?;
        self.link(parent, *node, Some(index + 1));
        Ok(())
    }

    fn remove(&mut self, node: &MemNode) -> Result<(), DomError> {
        self.mutate(node)?;
        self.unlink(*node);
        Ok(())
    }

    fn set_attr(&mut self, node: &MemNode, name: &str, value: &str) -> Result<(), DomError> {
        self.mutate(node)?.attrs.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn remove_attr(&mut self, node: &MemNode, name: &str) -> Result<(), DomError> {
        self.mutate(node)?.attrs.remove(name);
        Ok(())
    }

    fn set_style(&mut self, node: &MemNode, property: &str, value: &str) -> Result<(), DomError> {
        let element = self.mutate(node)?;
        if value.is_empty() {
            element.style.remove(property);
        } else {
            element.style.insert(property.to_string(), value.to_string());
        }
        Ok(())
    }

    fn set_markers(&mut self, node: &MemNode, markers: Markers) -> Result<(), DomError> {
        self.mutate(node)?.markers = markers;
        Ok(())
    }

    fn bind_action(&mut self, node: &MemNode, action: &Action) -> Result<(), DomError> {
        self.mutate(node)?.action = Some(action.clone());
        Ok(())
    }

    fn unbind_action(&mut self, node: &MemNode) -> Result<(), DomError> {
        self.mutate(node)?.action = None;
        Ok(())
    }

    fn scroll_into_view(&mut self, node: &MemNode) -> Result<(), DomError> {
        self.mutate(node)?;
        self.scrolled.push(*node);
        Ok(())
    }
}
