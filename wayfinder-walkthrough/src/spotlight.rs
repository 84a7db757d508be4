//! Spotlight rendering around the current target

use crate::overlay::OVERLAY_MARKER_ATTR;
use std::sync::Arc;
use tracing::debug;
use wayfinder::{DomBackend, DomNode, Rect};

const SPOTLIGHT_PADDING: f64 = 8.0;

/// Draws a box-shadow cutout around the target element.
///
/// The dimming comes from an oversized shadow on the cutout box, so only
/// one positioned node is needed and the page stays interactive inside
/// the hole.
pub struct SpotlightRenderer {
    backend: Arc<dyn DomBackend>,
    node: Option<DomNode>,
    target: Option<DomNode>,
}

impl SpotlightRenderer {
    pub fn new(backend: Arc<dyn DomBackend>) -> Self {
        Self {
            backend,
            node: None,
            target: None,
        }
    }

    /// Spotlight `target`, scrolling it into view first
    pub fn show(&mut self, container: &DomNode, target: &DomNode) {
        if !target.is_connected() || target.bounds().is_empty() {
            debug!("spotlight target is gone or zero-size, hiding");
            self.hide();
            return;
        }
        self.backend.scroll_into_view(target);
        self.ensure_node(container);
        self.target = Some(target.clone());
        self.reposition();
    }

    /// Re-derive the cutout position from the target's current bounds.
    /// Hides when the target has disconnected or collapsed since.
    pub fn reposition(&mut self) {
        let Some(target) = self.target.clone() else {
            return;
        };
        if !target.is_connected() || target.bounds().is_empty() {
            self.hide();
            return;
        }
        let Some(node) = &self.node else { return };

        let scroll = self.backend.scroll_offset();
        let rect = target.bounds().expanded(SPOTLIGHT_PADDING);
        let viewport_rect = Rect::new(rect.x - scroll.x, rect.y - scroll.y, rect.width, rect.height);
        node.set_style("display", "block");
        node.set_style("left", &format!("{:.0}px", viewport_rect.x));
        node.set_style("top", &format!("{:.0}px", viewport_rect.y));
        node.set_style("width", &format!("{:.0}px", viewport_rect.width));
        node.set_style("height", &format!("{:.0}px", viewport_rect.height));
        node.set_bounds(rect);
    }

    pub fn hide(&mut self) {
        self.target = None;
        if let Some(node) = &self.node {
            node.set_style("display", "none");
        }
    }

    pub fn target(&self) -> Option<&DomNode> {
        self.target.as_ref()
    }

    pub fn destroy(&mut self) {
        self.target = None;
        if let Some(node) = self.node.take() {
            node.remove();
        }
    }

    fn ensure_node(&mut self, container: &DomNode) {
        let connected = self.node.as_ref().map(|n| n.is_connected()).unwrap_or(false);
        if connected {
            return;
        }
        let node = self.backend.create_element("div");
        node.set_attribute(OVERLAY_MARKER_ATTR, "true");
        node.set_attribute("class", "wf-spotlight");
        node.set_style("position", "absolute");
        node.set_style("pointer-events", "none");
        node.set_style("border-radius", "6px");
        node.set_style("box-shadow", "0 0 0 9999px rgba(15, 23, 42, 0.55)");
        node.set_style("transition", "all 120ms ease-out");
        if container.append_child(&node).is_ok() {
            self.node = Some(node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::OverlayManager;
    use wayfinder::MemoryDom;

    fn setup() -> (MemoryDom, DomNode, SpotlightRenderer) {
        let dom = MemoryDom::new();
        let mut overlay = OverlayManager::new(Arc::new(dom.clone()));
        let container = overlay.create().unwrap();
        let spotlight = SpotlightRenderer::new(Arc::new(dom.clone()));
        (dom, container, spotlight)
    }

    #[test]
    fn spotlight_wraps_target_with_padding() {
        let (dom, container, mut spotlight) = setup();
        let target = dom
            .append(&dom.body(), "button")
            .bounds(100.0, 200.0, 120.0, 40.0)
            .node();
        spotlight.show(&container, &target);

        let node = dom.query_all(".wf-spotlight").unwrap().remove(0);
        assert_eq!(node.bounds(), Rect::new(92.0, 192.0, 136.0, 56.0));
        assert_eq!(node.style("display").as_deref(), Some("block"));
    }

    #[test]
    fn zero_size_target_hides_the_spotlight() {
        let (dom, container, mut spotlight) = setup();
        let visible = dom
            .append(&dom.body(), "button")
            .bounds(10.0, 10.0, 50.0, 20.0)
            .node();
        spotlight.show(&container, &visible);
        let empty = dom.append(&dom.body(), "button").node();
        spotlight.show(&container, &empty);
        let node = dom.query_all(".wf-spotlight").unwrap().remove(0);
        assert_eq!(node.style("display").as_deref(), Some("none"));
    }

    #[test]
    fn reposition_follows_target_resize() {
        let (dom, container, mut spotlight) = setup();
        let target = dom
            .append(&dom.body(), "button")
            .bounds(100.0, 200.0, 120.0, 40.0)
            .node();
        spotlight.show(&container, &target);
        target.set_bounds(Rect::new(100.0, 200.0, 200.0, 60.0));
        spotlight.reposition();
        let node = dom.query_all(".wf-spotlight").unwrap().remove(0);
        assert_eq!(node.bounds(), Rect::new(92.0, 192.0, 216.0, 76.0));
    }

    #[test]
    fn disconnected_target_hides_on_reposition() {
        let (dom, container, mut spotlight) = setup();
        let target = dom
            .append(&dom.body(), "button")
            .bounds(100.0, 200.0, 120.0, 40.0)
            .node();
        spotlight.show(&container, &target);
        target.remove();
        spotlight.reposition();
        let node = dom.query_all(".wf-spotlight").unwrap().remove(0);
        assert_eq!(node.style("display").as_deref(), Some("none"));
    }
}
