//! In-memory page backed by parsed HTML.
//!
//! Documents are parsed with `scraper` and copied into a small mutable arena
//! so the controller can toggle classes and inline display, append fragments
//! and render the result back to markup.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use scraper::{ElementRef, Html, Node};
use thiserror::Error;

use super::{
    AddedElement, ElementTree, MutationCallback, MutationFeed, NodeId, Page, SERVICE_ATTR,
    SubscriptionId,
};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "noscript"];

#[derive(Debug, Error)]
pub enum PageError {
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    #[error("node {0} is not an element")]
    NotAnElement(NodeId),
}

/// Read-only view of one element, used for inspection and assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementSnapshot {
    pub node: NodeId,
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub hidden: bool,
}

impl ElementSnapshot {
    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }
}

#[derive(Debug, Clone)]
struct ElementData {
    tag: String,
    attrs: Vec<(String, String)>,
    classes: Vec<String>,
    style: Vec<(String, String)>,
}

impl ElementData {
    fn from_scraper(element: &scraper::node::Element) -> Self {
        let mut attrs = Vec::new();
        let mut classes = Vec::new();
        let mut style = Vec::new();
        for (name, value) in element.attrs() {
            match name {
                "class" => classes = value.split_whitespace().map(str::to_string).collect(),
                "style" => style = parse_style(value),
                _ => attrs.push((name.to_string(), value.to_string())),
            }
        }
        Self {
            tag: element.name().to_string(),
            attrs,
            classes,
            style,
        }
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn hidden(&self) -> bool {
        self.style
            .iter()
            .any(|(prop, value)| prop == "display" && value.eq_ignore_ascii_case("none"))
    }

    fn summary(&self) -> AddedElement {
        AddedElement {
            tag: self.tag.clone(),
            id: self.attr("id").map(str::to_string),
            classes: self.classes.clone(),
            service: self.attr(SERVICE_ATTR).map(str::to_string),
        }
    }
}

#[derive(Debug, Clone)]
enum Content {
    Element(ElementData),
    Text(String),
    Comment(String),
    Doctype {
        name: String,
        public_id: String,
        system_id: String,
    },
}

#[derive(Debug, Clone)]
struct PageNode {
    content: Content,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Arena holding the document. Node ids are stable for the page lifetime.
#[derive(Debug, Clone)]
struct PageTree {
    nodes: Vec<PageNode>,
    /// Document-level nodes in order: doctype, comments and `<html>`.
    top: Vec<NodeId>,
    root: NodeId,
    body: NodeId,
}

impl PageTree {
    fn from_document(html: &Html) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            top: Vec::new(),
            root: 0,
            body: 0,
        };
        for child in html.tree.root().children() {
            let id = match child.value() {
                Node::Element(_) => match ElementRef::wrap(child) {
                    Some(element) => {
                        tree.root = tree.import(element, None);
                        tree.root
                    }
                    None => continue,
                },
                Node::Doctype(doctype) => tree.push(
                    Content::Doctype {
                        name: doctype.name().to_string(),
                        public_id: doctype.public_id().to_string(),
                        system_id: doctype.system_id().to_string(),
                    },
                    None,
                ),
                Node::Comment(comment) => {
                    tree.push(Content::Comment(String::from(&**comment)), None)
                }
                _ => continue,
            };
            tree.top.push(id);
        }
        let body = tree
            .preorder()
            .into_iter()
            .find(|&id| tree.element(id).is_some_and(|el| el.tag == "body"))
            .unwrap_or(tree.root);
        tree.body = body;
        tree
    }

    fn import(&mut self, element: ElementRef<'_>, parent: Option<NodeId>) -> NodeId {
        let id = self.push(Content::Element(ElementData::from_scraper(element.value())), parent);
        self.import_children(element, id);
        id
    }

    fn import_children(&mut self, element: ElementRef<'_>, parent: NodeId) -> Vec<NodeId> {
        let mut added = Vec::new();
        for child in element.children() {
            match child.value() {
                Node::Element(_) => {
                    if let Some(child_el) = ElementRef::wrap(child) {
                        added.push(self.import(child_el, Some(parent)));
                    }
                }
                Node::Text(text) => {
                    added.push(self.push(Content::Text(String::from(&**text)), Some(parent)));
                }
                Node::Comment(comment) => {
                    added.push(self.push(Content::Comment(String::from(&**comment)), Some(parent)));
                }
                _ => {}
            }
        }
        added
    }

    fn push(&mut self, content: Content, parent: Option<NodeId>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(PageNode {
            content,
            parent,
            children: Vec::new(),
        });
        if let Some(parent) = parent {
            self.nodes[parent].children.push(id);
        }
        id
    }

    fn element(&self, id: NodeId) -> Option<&ElementData> {
        match self.nodes.get(id).map(|node| &node.content) {
            Some(Content::Element(data)) => Some(data),
            _ => None,
        }
    }

    fn element_mut(&mut self, id: NodeId) -> Option<&mut ElementData> {
        match self.nodes.get_mut(id).map(|node| &mut node.content) {
            Some(Content::Element(data)) => Some(data),
            _ => None,
        }
    }

    /// Node ids in document order.
    fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id].children.iter().rev());
        }
        order
    }

    fn find_elements<F>(&self, predicate: F) -> Vec<NodeId>
    where
        F: Fn(&ElementData) -> bool,
    {
        self.preorder()
            .into_iter()
            .filter(|&id| self.element(id).is_some_and(&predicate))
            .collect()
    }

    fn within_body(&self, mut id: NodeId) -> bool {
        loop {
            if id == self.body {
                return true;
            }
            match self.nodes[id].parent {
                Some(parent) => id = parent,
                None => return false,
            }
        }
    }

    fn snapshot(&self, id: NodeId) -> Option<ElementSnapshot> {
        self.element(id).map(|data| ElementSnapshot {
            node: id,
            tag: data.tag.clone(),
            id: data.attr("id").map(str::to_string),
            classes: data.classes.clone(),
            hidden: data.hidden(),
        })
    }

    fn render(&self, id: NodeId, raw_text: bool, out: &mut String) {
        match &self.nodes[id].content {
            Content::Text(text) if raw_text => out.push_str(text),
            Content::Text(text) => out.push_str(&html_escape::encode_text(text)),
            Content::Comment(text) => {
                out.push_str("<!--");
                out.push_str(text);
                out.push_str("-->");
            }
            Content::Doctype {
                name,
                public_id,
                system_id,
            } => {
                out.push_str("<!DOCTYPE ");
                out.push_str(name);
                if !public_id.is_empty() {
                    out.push_str(&format!(" PUBLIC \"{public_id}\""));
                    if !system_id.is_empty() {
                        out.push_str(&format!(" \"{system_id}\""));
                    }
                } else if !system_id.is_empty() {
                    out.push_str(&format!(" SYSTEM \"{system_id}\""));
                }
                out.push('>');
            }
            Content::Element(data) => {
                out.push('<');
                out.push_str(&data.tag);
                for (name, value) in &data.attrs {
                    push_attr(out, name, value);
                }
                if !data.classes.is_empty() {
                    push_attr(out, "class", &data.classes.join(" "));
                }
                if !data.style.is_empty() {
                    push_attr(out, "style", &render_style(&data.style));
                }
                out.push('>');

                if VOID_ELEMENTS.contains(&data.tag.as_str()) {
                    return;
                }
                let raw = RAW_TEXT_ELEMENTS.contains(&data.tag.as_str());
                for &child in &self.nodes[id].children {
                    self.render(child, raw, out);
                }
                out.push_str("</");
                out.push_str(&data.tag);
                out.push('>');
            }
        }
    }
}

impl ElementTree for PageTree {
    fn elements_with_service(&self, service: &str) -> Vec<NodeId> {
        self.find_elements(|el| el.attr(SERVICE_ATTR) == Some(service))
    }

    fn element_by_id(&self, id: &str) -> Option<NodeId> {
        self.preorder()
            .into_iter()
            .find(|&node| self.element(node).is_some_and(|el| el.attr("id") == Some(id)))
    }

    fn elements_with_class(&self, class: &str) -> Vec<NodeId> {
        self.find_elements(|el| el.classes.iter().any(|c| c == class))
    }

    fn set_hidden(&mut self, node: NodeId, hidden: bool) {
        let Some(data) = self.element_mut(node) else {
            return;
        };
        data.style.retain(|(prop, _)| prop != "display");
        if hidden {
            data.style.push(("display".to_string(), "none".to_string()));
        }
    }

    fn add_class(&mut self, node: NodeId, class: &str) {
        if let Some(data) = self.element_mut(node)
            && !data.classes.iter().any(|c| c == class)
        {
            data.classes.push(class.to_string());
        }
    }

    fn remove_class(&mut self, node: NodeId, class: &str) {
        if let Some(data) = self.element_mut(node) {
            data.classes.retain(|c| c != class);
        }
    }
}

/// Mutable HTML document with body mutation notifications.
pub struct HtmlPage {
    tree: RwLock<PageTree>,
    subscribers: Mutex<Vec<(SubscriptionId, MutationCallback)>>,
    next_subscription: AtomicU64,
}

impl HtmlPage {
    /// Parse a full document; missing `html`/`body` wrappers are synthesized.
    pub fn parse(document: &str) -> Self {
        let html = Html::parse_document(document);
        Self {
            tree: RwLock::new(PageTree::from_document(&html)),
            subscribers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    pub fn body(&self) -> NodeId {
        self.read().body
    }

    /// Append a markup fragment at the end of `<body>`.
    pub fn append_to_body(&self, fragment: &str) -> Vec<NodeId> {
        let body = self.body();
        // The body is always an element.
        self.append_child(body, fragment).unwrap_or_default()
    }

    /// Append a markup fragment as the last children of `parent`. Subscribers
    /// are notified when `parent` sits inside the body subtree.
    pub fn append_child(&self, parent: NodeId, fragment: &str) -> Result<Vec<NodeId>, PageError> {
        let parsed = Html::parse_fragment(fragment);

        let (added, observed) = {
            let mut tree = self.write();
            if parent >= tree.nodes.len() {
                return Err(PageError::UnknownNode(parent));
            }
            if tree.element(parent).is_none() {
                return Err(PageError::NotAnElement(parent));
            }
            let added = tree.import_children(parsed.root_element(), parent);
            let observed: Vec<AddedElement> = if tree.within_body(parent) {
                added
                    .iter()
                    .filter_map(|&id| tree.element(id).map(ElementData::summary))
                    .collect()
            } else {
                Vec::new()
            };
            (added, observed)
        };

        if !observed.is_empty() {
            self.notify(&observed);
        }
        Ok(added)
    }

    pub fn element_by_id(&self, id: &str) -> Option<ElementSnapshot> {
        let tree = self.read();
        tree.element_by_id(id).and_then(|node| tree.snapshot(node))
    }

    pub fn elements_with_service(&self, service: &str) -> Vec<ElementSnapshot> {
        let tree = self.read();
        tree.elements_with_service(service)
            .into_iter()
            .filter_map(|node| tree.snapshot(node))
            .collect()
    }

    pub fn elements_with_class(&self, class: &str) -> Vec<ElementSnapshot> {
        let tree = self.read();
        tree.elements_with_class(class)
            .into_iter()
            .filter_map(|node| tree.snapshot(node))
            .collect()
    }

    pub fn snapshot(&self, node: NodeId) -> Option<ElementSnapshot> {
        self.read().snapshot(node)
    }

    /// Serialize the whole document, including the doctype and any
    /// comments outside `<html>`.
    pub fn to_html(&self) -> String {
        let tree = self.read();
        let mut out = String::new();
        for &id in &tree.top {
            tree.render(id, false, &mut out);
        }
        out
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn notify(&self, added: &[AddedElement]) {
        // Callbacks run outside the subscriber lock so they may subscribe.
        let callbacks: Vec<MutationCallback> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in callbacks {
            callback(added);
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, PageTree> {
        self.tree.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, PageTree> {
        self.tree.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MutationFeed for HtmlPage {
    fn on_relevant_mutation(&self, callback: MutationCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, callback));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(sub, _)| *sub != id);
    }
}

impl Page for HtmlPage {
    fn with_tree(&self, f: &mut dyn FnMut(&mut dyn ElementTree)) {
        let mut tree = self.write();
        f(&mut *tree);
    }
}

fn parse_style(raw: &str) -> Vec<(String, String)> {
    split_declarations(raw)
        .into_iter()
        .filter_map(|decl| decl.split_once(':'))
        .map(|(prop, value)| (prop.trim().to_ascii_lowercase(), value.trim().to_string()))
        .filter(|(prop, _)| !prop.is_empty())
        .collect()
}

/// Split on `;` outside parentheses and quoted strings, so values such as
/// `url(data:image/png;base64,...)` stay whole.
fn split_declarations(raw: &str) -> Vec<&str> {
    let mut decls = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (idx, ch) in raw.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, ch) {
            (_, '\\') => escaped = true,
            (Some(open), c) if c == open => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '(') => depth += 1,
            (None, ')') => depth = depth.saturating_sub(1),
            (None, ';') if depth == 0 => {
                decls.push(&raw[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    decls.push(&raw[start..]);
    decls
}

fn render_style(style: &[(String, String)]) -> String {
    style
        .iter()
        .map(|(prop, value)| format!("{prop}: {value}"))
        .collect::<Vec<_>>()
        .join("; ")
}

fn push_attr(out: &mut String, name: &str, value: &str) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    out.push_str(&html_escape::encode_double_quoted_attribute(value));
    out.push('"');
}
