//! DOM abstraction the healing and walkthrough layers run against
//!
//! Mirrors the browser surface the system needs: element handles, document
//! queries, scroll state, and an event stream. Backends implement
//! [`DomNodeImpl`] and [`DomBackend`]; the crate ships an in-memory backend
//! in [`memory`] used for embedding and tests.

use crate::errors::HealError;
use crate::geometry::{Point, Rect, Size};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

pub mod css;
pub mod memory;

pub use memory::MemoryDom;

/// Stable identity of a node for the lifetime of its document
pub type NodeId = u64;

/// User-originated DOM event kinds the core reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserEventKind {
    Click,
    Input,
    Change,
    Blur,
    Submit,
    PointerDown,
    PointerMove,
    PointerUp,
}

/// An event observed on the document
#[derive(Debug, Clone)]
pub enum DomEvent {
    /// A user action on a specific element
    User {
        kind: UserEventKind,
        target: NodeId,
        position: Option<Point>,
    },
    /// The viewport scrolled
    Scrolled,
    /// The viewport resized
    Resized,
    /// An element's bounds changed (ResizeObserver analog)
    BoundsChanged { target: NodeId },
    /// The document URL changed
    UrlChanged { url: String },
}

/// Backend-implemented element operations
///
/// Handles stay valid after the node is detached; `is_connected` reports
/// whether the node is still reachable from the document root.
pub trait DomNodeImpl: Send + Sync + fmt::Debug {
    fn node_id(&self) -> NodeId;
    /// Lowercase tag name
    fn tag_name(&self) -> String;
    fn attribute(&self, name: &str) -> Option<String>;
    fn set_attribute(&self, name: &str, value: &str);
    fn remove_attribute(&self, name: &str);
    /// Text directly inside this node, excluding descendants
    fn own_text(&self) -> String;
    /// Rendered text of this node and its visible descendants
    fn inner_text(&self) -> String;
    fn set_text(&self, text: &str);
    /// Inline style property value
    fn style(&self, property: &str) -> Option<String>;
    fn set_style(&self, property: &str, value: &str);
    /// Bounding box in page coordinates
    fn bounds(&self) -> Rect;
    fn set_bounds(&self, bounds: Rect);
    fn parent(&self) -> Option<DomNode>;
    fn children(&self) -> Vec<DomNode>;
    fn append_child(&self, child: &DomNode) -> Result<(), HealError>;
    /// Detach this node (and its subtree) from the document
    fn remove(&self);
    fn is_connected(&self) -> bool;
    fn matches(&self, selector: &str) -> Result<bool, HealError>;
}

/// Cheap cloneable handle to a DOM element
#[derive(Clone)]
pub struct DomNode {
    inner: Arc<dyn DomNodeImpl>,
}

impl DomNode {
    pub fn new(inner: Arc<dyn DomNodeImpl>) -> Self {
        Self { inner }
    }

    pub fn node_id(&self) -> NodeId {
        self.inner.node_id()
    }

    pub fn tag_name(&self) -> String {
        self.inner.tag_name()
    }

    pub fn attribute(&self, name: &str) -> Option<String> {
        self.inner.attribute(name)
    }

    pub fn set_attribute(&self, name: &str, value: &str) {
        self.inner.set_attribute(name, value)
    }

    pub fn remove_attribute(&self, name: &str) {
        self.inner.remove_attribute(name)
    }

    /// Non-empty `id` attribute
    pub fn id(&self) -> Option<String> {
        self.inner.attribute("id").filter(|id| !id.is_empty())
    }

    /// Class list split on whitespace
    pub fn classes(&self) -> Vec<String> {
        self.inner
            .attribute("class")
            .map(|c| c.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Explicit ARIA role, when present
    pub fn role(&self) -> Option<String> {
        self.inner.attribute("role").filter(|r| !r.is_empty())
    }

    pub fn own_text(&self) -> String {
        self.inner.own_text()
    }

    pub fn inner_text(&self) -> String {
        self.inner.inner_text()
    }

    pub fn set_text(&self, text: &str) {
        self.inner.set_text(text)
    }

    pub fn style(&self, property: &str) -> Option<String> {
        self.inner.style(property)
    }

    pub fn set_style(&self, property: &str, value: &str) {
        self.inner.set_style(property, value)
    }

    pub fn bounds(&self) -> Rect {
        self.inner.bounds()
    }

    pub fn set_bounds(&self, bounds: Rect) {
        self.inner.set_bounds(bounds)
    }

    pub fn parent(&self) -> Option<DomNode> {
        self.inner.parent()
    }

    pub fn children(&self) -> Vec<DomNode> {
        self.inner.children()
    }

    pub fn append_child(&self, child: &DomNode) -> Result<(), HealError> {
        self.inner.append_child(child)
    }

    pub fn remove(&self) {
        self.inner.remove()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    pub fn matches(&self, selector: &str) -> Result<bool, HealError> {
        self.inner.matches(selector)
    }

    /// Nearest ancestor (including self) matching `selector`
    pub fn closest(&self, selector: &str) -> Result<Option<DomNode>, HealError> {
        let mut current = Some(self.clone());
        while let Some(node) = current {
            if node.matches(selector)? {
                return Ok(Some(node));
            }
            current = node.parent();
        }
        Ok(None)
    }

    /// Ancestors from the closest parent upward
    pub fn ancestors(&self) -> Vec<DomNode> {
        let mut out = Vec::new();
        let mut current = self.parent();
        while let Some(node) = current {
            current = node.parent();
            out.push(node);
        }
        out
    }

    /// Depth-first descendants of this node
    pub fn descendants(&self) -> Vec<DomNode> {
        let mut out = Vec::new();
        let mut stack: Vec<DomNode> = self.children();
        stack.reverse();
        while let Some(node) = stack.pop() {
            out.push(node.clone());
            let mut kids = node.children();
            kids.reverse();
            stack.extend(kids);
        }
        out
    }
}

impl PartialEq for DomNode {
    fn eq(&self, other: &Self) -> bool {
        self.node_id() == other.node_id()
    }
}

impl Eq for DomNode {}

impl fmt::Debug for DomNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.tag_name())?;
        if let Some(id) = self.id() {
            write!(f, " #{id}")?;
        }
        write!(f, " @{}>", self.node_id())
    }
}

/// Backend-implemented document operations
pub trait DomBackend: Send + Sync {
    /// All connected elements matching `selector`, in document order
    fn query_all(&self, selector: &str) -> Result<Vec<DomNode>, HealError>;
    /// All connected elements whose rendered text equals the encoded
    /// literal (see [`crate::sanitize::escape_text_literal`]). A malformed
    /// literal is an invalid-selector error.
    fn query_text(&self, literal: &str) -> Result<Vec<DomNode>, HealError>;
    /// Resolve an event target back into a handle
    fn node_by_id(&self, id: NodeId) -> Option<DomNode>;
    /// Create a detached element
    fn create_element(&self, tag: &str) -> DomNode;
    fn body(&self) -> DomNode;
    fn viewport(&self) -> Size;
    fn page_size(&self) -> Size;
    fn scroll_offset(&self) -> Point;
    fn scroll_to(&self, x: f64, y: f64);
    /// Scroll so the node's center lands inside the viewport
    fn scroll_into_view(&self, node: &DomNode);
    fn url(&self) -> String;
    fn title(&self) -> String;
    /// Subscribe to document events
    fn events(&self) -> broadcast::Receiver<DomEvent>;
    /// Dispatch a synthetic user event on a target element
    fn dispatch(&self, target: &DomNode, kind: UserEventKind);
}

/// First match for `selector`, if any
pub fn query_first(
    backend: &dyn DomBackend,
    selector: &str,
) -> Result<Option<DomNode>, HealError> {
    Ok(backend.query_all(selector)?.into_iter().next())
}

/// Shared visibility predicate: not display:none, not visibility:hidden,
/// opacity above zero, and a non-empty bounding box.
pub fn is_visible(node: &DomNode) -> bool {
    if node.style("display").as_deref() == Some("none") {
        return false;
    }
    if node.style("visibility").as_deref() == Some("hidden") {
        return false;
    }
    if let Some(opacity) = node.style("opacity") {
        if opacity.trim().parse::<f64>().map(|o| o == 0.0).unwrap_or(false) {
            return false;
        }
    }
    !node.bounds().is_empty()
}
