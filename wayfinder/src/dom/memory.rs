//! In-memory DOM backend
//!
//! The document is a node arena behind a mutex, with layout supplied as
//! explicit bounds. This is the backend embedding hosts and the test suite
//! run against; a browser-attached backend implements the same traits.

use crate::dom::css::SelectorList;
use crate::dom::{DomBackend, DomEvent, DomNode, DomNodeImpl, NodeId, UserEventKind};
use crate::errors::HealError;
use crate::geometry::{Point, Rect, Size};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct NodeRec {
    tag: String,
    attrs: BTreeMap<String, String>,
    styles: BTreeMap<String, String>,
    text: String,
    bounds: Rect,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    connected: bool,
}

struct DocInner {
    nodes: Vec<NodeRec>,
    root: NodeId,
    body: NodeId,
    viewport: Size,
    page: Option<Size>,
    scroll: Point,
    url: String,
    title: String,
}

struct DocShared {
    inner: Mutex<DocInner>,
    events: broadcast::Sender<DomEvent>,
}

/// An in-memory document implementing [`DomBackend`]
#[derive(Clone)]
pub struct MemoryDom {
    shared: Arc<DocShared>,
}

impl MemoryDom {
    pub fn new() -> Self {
        let mut nodes = Vec::new();
        nodes.push(NodeRec {
            tag: "html".into(),
            connected: true,
            ..Default::default()
        });
        nodes.push(NodeRec {
            tag: "body".into(),
            parent: Some(0),
            connected: true,
            ..Default::default()
        });
        let mut inner = DocInner {
            nodes,
            root: 0,
            body: 1,
            viewport: Size::new(1280.0, 800.0),
            page: None,
            scroll: Point::default(),
            url: "about:blank".into(),
            title: String::new(),
        };
        inner.nodes[0].children.push(1);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(DocShared {
                inner: Mutex::new(inner),
                events,
            }),
        }
    }

    pub fn with_viewport(width: f64, height: f64) -> Self {
        let dom = Self::new();
        dom.shared.inner.lock().unwrap().viewport = Size::new(width, height);
        dom
    }

    fn node(&self, id: NodeId) -> DomNode {
        DomNode::new(Arc::new(MemoryNode {
            shared: self.shared.clone(),
            id,
        }))
    }

    pub fn set_viewport(&self, width: f64, height: f64) {
        self.shared.inner.lock().unwrap().viewport = Size::new(width, height);
        let _ = self.shared.events.send(DomEvent::Resized);
    }

    /// Fix the reported page size instead of deriving it from content bounds
    pub fn set_page_size(&self, width: f64, height: f64) {
        self.shared.inner.lock().unwrap().page = Some(Size::new(width, height));
    }

    pub fn set_url(&self, url: &str) {
        self.shared.inner.lock().unwrap().url = url.to_string();
        let _ = self.shared.events.send(DomEvent::UrlChanged {
            url: url.to_string(),
        });
    }

    pub fn set_title(&self, title: &str) {
        self.shared.inner.lock().unwrap().title = title.to_string();
    }

    /// Create, configure, and append an element in one expression
    pub fn append(&self, parent: &DomNode, tag: &str) -> ElementBuilder {
        let node = self.create_element(tag);
        parent
            .append_child(&node)
            .expect("append to connected parent");
        ElementBuilder { node }
    }
}

impl Default for MemoryDom {
    fn default() -> Self {
        Self::new()
    }
}

/// Fluent configuration for freshly created elements
pub struct ElementBuilder {
    node: DomNode,
}

impl ElementBuilder {
    pub fn attr(self, name: &str, value: &str) -> Self {
        self.node.set_attribute(name, value);
        self
    }

    pub fn class(self, value: &str) -> Self {
        self.node.set_attribute("class", value);
        self
    }

    pub fn text(self, value: &str) -> Self {
        self.node.set_text(value);
        self
    }

    pub fn style(self, property: &str, value: &str) -> Self {
        self.node.set_style(property, value);
        self
    }

    pub fn bounds(self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.node.set_bounds(Rect::new(x, y, width, height));
        self
    }

    pub fn node(self) -> DomNode {
        self.node
    }
}

impl DomBackend for MemoryDom {
    fn query_all(&self, selector: &str) -> Result<Vec<DomNode>, HealError> {
        let list = SelectorList::parse(selector)?;
        let order = {
            let inner = self.shared.inner.lock().unwrap();
            document_order(&inner)
        };
        let mut out = Vec::new();
        for id in order {
            let node = self.node(id);
            if list.matches(&node) {
                out.push(node);
            }
        }
        Ok(out)
    }

    fn query_text(&self, literal: &str) -> Result<Vec<DomNode>, HealError> {
        let needle = crate::sanitize::decode_text_literal(literal).ok_or_else(|| {
            HealError::InvalidSelector(format!("malformed text literal {literal:?}"))
        })?;
        let needle = needle.split_whitespace().collect::<Vec<_>>().join(" ");
        let order = {
            let inner = self.shared.inner.lock().unwrap();
            document_order(&inner)
        };
        let mut out = Vec::new();
        for id in order {
            let node = self.node(id);
            if !needle.is_empty() && node.inner_text() == needle {
                out.push(node);
            }
        }
        Ok(out)
    }

    fn node_by_id(&self, id: NodeId) -> Option<DomNode> {
        let known = (id as usize) < self.shared.inner.lock().unwrap().nodes.len();
        known.then(|| self.node(id))
    }

    fn create_element(&self, tag: &str) -> DomNode {
        let id = {
            let mut inner = self.shared.inner.lock().unwrap();
            inner.nodes.push(NodeRec {
                tag: tag.to_ascii_lowercase(),
                ..Default::default()
            });
            (inner.nodes.len() - 1) as NodeId
        };
        self.node(id)
    }

    fn body(&self) -> DomNode {
        let body = self.shared.inner.lock().unwrap().body;
        self.node(body)
    }

    fn viewport(&self) -> Size {
        self.shared.inner.lock().unwrap().viewport
    }

    fn page_size(&self) -> Size {
        let inner = self.shared.inner.lock().unwrap();
        if let Some(page) = inner.page {
            return page;
        }
        // Derive from content extents, never smaller than the viewport
        let mut width = inner.viewport.width;
        let mut height = inner.viewport.height;
        for (idx, rec) in inner.nodes.iter().enumerate() {
            if rec.connected && idx != inner.root as usize {
                width = width.max(rec.bounds.right());
                height = height.max(rec.bounds.bottom());
            }
        }
        Size::new(width, height)
    }

    fn scroll_offset(&self) -> Point {
        self.shared.inner.lock().unwrap().scroll
    }

    fn scroll_to(&self, x: f64, y: f64) {
        {
            let mut inner = self.shared.inner.lock().unwrap();
            inner.scroll = Point::new(x.max(0.0), y.max(0.0));
        }
        let _ = self.shared.events.send(DomEvent::Scrolled);
    }

    fn scroll_into_view(&self, node: &DomNode) {
        let center = node.bounds().center();
        let (viewport, page) = {
            let inner = self.shared.inner.lock().unwrap();
            (inner.viewport, inner.page)
        };
        let page = page.unwrap_or_else(|| self.page_size());
        let x = (center.x - viewport.width / 2.0)
            .clamp(0.0, (page.width - viewport.width).max(0.0));
        let y = (center.y - viewport.height / 2.0)
            .clamp(0.0, (page.height - viewport.height).max(0.0));
        self.scroll_to(x, y);
    }

    fn url(&self) -> String {
        self.shared.inner.lock().unwrap().url.clone()
    }

    fn title(&self) -> String {
        self.shared.inner.lock().unwrap().title.clone()
    }

    fn events(&self) -> broadcast::Receiver<DomEvent> {
        self.shared.events.subscribe()
    }

    fn dispatch(&self, target: &DomNode, kind: UserEventKind) {
        let _ = self.shared.events.send(DomEvent::User {
            kind,
            target: target.node_id(),
            position: Some(target.bounds().center()),
        });
    }
}

/// DFS pre-order ids of connected elements, body subtree first
fn document_order(inner: &DocInner) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack = vec![inner.root];
    while let Some(id) = stack.pop() {
        let rec = &inner.nodes[id as usize];
        if !rec.connected {
            continue;
        }
        if id != inner.root {
            out.push(id);
        }
        for child in rec.children.iter().rev() {
            stack.push(*child);
        }
    }
    out
}

#[derive(Clone)]
struct MemoryNode {
    shared: Arc<DocShared>,
    id: NodeId,
}

impl MemoryNode {
    fn with_rec<T>(&self, f: impl FnOnce(&NodeRec) -> T) -> T {
        let inner = self.shared.inner.lock().unwrap();
        f(&inner.nodes[self.id as usize])
    }

    fn with_rec_mut<T>(&self, f: impl FnOnce(&mut NodeRec) -> T) -> T {
        let mut inner = self.shared.inner.lock().unwrap();
        f(&mut inner.nodes[self.id as usize])
    }

    fn handle(&self, id: NodeId) -> DomNode {
        DomNode::new(Arc::new(MemoryNode {
            shared: self.shared.clone(),
            id,
        }))
    }
}

impl fmt::Debug for MemoryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.with_rec(|rec| write!(f, "MemoryNode(<{}> @{})", rec.tag, self.id))
    }
}

impl DomNodeImpl for MemoryNode {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn tag_name(&self) -> String {
        self.with_rec(|rec| rec.tag.clone())
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.with_rec(|rec| rec.attrs.get(&name.to_ascii_lowercase()).cloned())
    }

    fn set_attribute(&self, name: &str, value: &str) {
        self.with_rec_mut(|rec| {
            rec.attrs
                .insert(name.to_ascii_lowercase(), value.to_string());
        });
    }

    fn remove_attribute(&self, name: &str) {
        self.with_rec_mut(|rec| {
            rec.attrs.remove(&name.to_ascii_lowercase());
        });
    }

    fn own_text(&self) -> String {
        self.with_rec(|rec| rec.text.clone())
    }

    fn inner_text(&self) -> String {
        let inner = self.shared.inner.lock().unwrap();
        let mut pieces = Vec::new();
        collect_text(&inner, self.id, &mut pieces);
        pieces.join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn set_text(&self, text: &str) {
        self.with_rec_mut(|rec| rec.text = text.to_string());
    }

    fn style(&self, property: &str) -> Option<String> {
        self.with_rec(|rec| rec.styles.get(property).cloned())
    }

    fn set_style(&self, property: &str, value: &str) {
        self.with_rec_mut(|rec| {
            rec.styles.insert(property.to_string(), value.to_string());
        });
    }

    fn bounds(&self) -> Rect {
        self.with_rec(|rec| rec.bounds)
    }

    fn set_bounds(&self, bounds: Rect) {
        let changed = self.with_rec_mut(|rec| {
            let changed = rec.bounds != bounds;
            rec.bounds = bounds;
            changed
        });
        // Only a real change notifies observers, so repositioning overlay
        // nodes to their current bounds cannot feed back into itself
        if changed {
            let _ = self
                .shared
                .events
                .send(DomEvent::BoundsChanged { target: self.id });
        }
    }

    fn parent(&self) -> Option<DomNode> {
        self.with_rec(|rec| rec.parent).map(|id| self.handle(id))
    }

    fn children(&self) -> Vec<DomNode> {
        self.with_rec(|rec| rec.children.clone())
            .into_iter()
            .map(|id| self.handle(id))
            .collect()
    }

    fn append_child(&self, child: &DomNode) -> Result<(), HealError> {
        let child_id = child.node_id();
        let mut inner = self.shared.inner.lock().unwrap();
        if child_id as usize >= inner.nodes.len() {
            return Err(HealError::Backend(format!(
                "foreign node {child_id} appended to memory document"
            )));
        }
        // Guard against cycles: the child must not be an ancestor of self
        let mut cursor = Some(self.id);
        while let Some(id) = cursor {
            if id == child_id {
                return Err(HealError::Backend(
                    "cannot append a node inside its own subtree".into(),
                ));
            }
            cursor = inner.nodes[id as usize].parent;
        }
        if let Some(old_parent) = inner.nodes[child_id as usize].parent {
            let siblings = &mut inner.nodes[old_parent as usize].children;
            siblings.retain(|c| *c != child_id);
        }
        inner.nodes[child_id as usize].parent = Some(self.id);
        inner.nodes[self.id as usize].children.push(child_id);
        let connected = inner.nodes[self.id as usize].connected;
        set_connected(&mut inner, child_id, connected);
        Ok(())
    }

    fn remove(&self) {
        let mut inner = self.shared.inner.lock().unwrap();
        if let Some(parent) = inner.nodes[self.id as usize].parent {
            let siblings = &mut inner.nodes[parent as usize].children;
            siblings.retain(|c| *c != self.id);
        }
        inner.nodes[self.id as usize].parent = None;
        set_connected(&mut inner, self.id, false);
    }

    fn is_connected(&self) -> bool {
        self.with_rec(|rec| rec.connected)
    }

    fn matches(&self, selector: &str) -> Result<bool, HealError> {
        let list = SelectorList::parse(selector)?;
        Ok(list.matches(&self.handle(self.id)))
    }
}

fn set_connected(inner: &mut DocInner, id: NodeId, connected: bool) {
    let mut stack = vec![id];
    while let Some(current) = stack.pop() {
        inner.nodes[current as usize].connected = connected;
        stack.extend(inner.nodes[current as usize].children.iter().copied());
    }
}

/// Collect own text of `id` and its rendered descendants, pre-order
fn collect_text(inner: &DocInner, id: NodeId, out: &mut Vec<String>) {
    let rec = &inner.nodes[id as usize];
    if rec.styles.get("display").map(String::as_str) == Some("none")
        || rec.styles.get("visibility").map(String::as_str) == Some("hidden")
    {
        return;
    }
    if !rec.text.trim().is_empty() {
        out.push(rec.text.trim().to_string());
    }
    for child in &rec.children {
        collect_text(inner, *child, out);
    }
}
