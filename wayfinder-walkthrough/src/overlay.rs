//! Overlay container lifecycle
//!
//! One top-layer container per tab, owned exclusively by this manager.
//! Creation is idempotent, destruction is cheap and idempotent, and any
//! stale container from a previous session is removed first.

use crate::error::WalkthroughError;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;
use wayfinder::{DomBackend, DomNode};

/// Document id of the overlay root
pub const OVERLAY_ROOT_ID: &str = "wayfinder-overlay-root";
/// Marker attribute on every overlay-owned node, so capture skips our UI
pub const OVERLAY_MARKER_ATTR: &str = "data-wayfinder-overlay";

pub struct OverlayManager {
    backend: Arc<dyn DomBackend>,
    container: Option<DomNode>,
    mask_id: String,
    cutout_id: String,
}

impl OverlayManager {
    pub fn new(backend: Arc<dyn DomBackend>) -> Self {
        // Randomized so page SVG defs can never collide with ours
        let nonce = Uuid::new_v4().simple().to_string();
        Self {
            backend,
            container: None,
            mask_id: format!("wf-mask-{nonce}"),
            cutout_id: format!("wf-cutout-{nonce}"),
        }
    }

    pub fn mask_id(&self) -> &str {
        &self.mask_id
    }

    pub fn cutout_id(&self) -> &str {
        &self.cutout_id
    }

    pub fn is_created(&self) -> bool {
        self.container
            .as_ref()
            .map(|c| c.is_connected())
            .unwrap_or(false)
    }

    /// Create the overlay container, reusing it when already mounted
    pub fn create(&mut self) -> Result<DomNode, WalkthroughError> {
        if let Some(container) = &self.container {
            if container.is_connected() {
                return Ok(container.clone());
            }
        }

        // A crashed prior session may have left its container behind
        if let Ok(stale) = self.backend.query_all(&format!("#{OVERLAY_ROOT_ID}")) {
            for node in stale {
                debug!("removing stale overlay container {node:?}");
                node.remove();
            }
        }

        let container = self.backend.create_element("div");
        container.set_attribute("id", OVERLAY_ROOT_ID);
        container.set_attribute(OVERLAY_MARKER_ATTR, "true");
        container.set_style("position", "fixed");
        container.set_style("inset", "0");
        container.set_style("pointer-events", "none");
        container.set_style("z-index", "2147483646");

        let svg = self.backend.create_element("svg");
        svg.set_attribute(OVERLAY_MARKER_ATTR, "true");
        svg.set_attribute("aria-hidden", "true");
        svg.set_style("position", "absolute");
        svg.set_style("width", "0");
        svg.set_style("height", "0");
        let defs = self.backend.create_element("defs");
        let mask = self.backend.create_element("mask");
        mask.set_attribute("id", &self.mask_id);
        let backdrop = self.backend.create_element("rect");
        backdrop.set_attribute("fill", "white");
        backdrop.set_attribute("width", "100%");
        backdrop.set_attribute("height", "100%");
        let cutout = self.backend.create_element("rect");
        cutout.set_attribute("id", &self.cutout_id);
        cutout.set_attribute("fill", "black");
        cutout.set_attribute("rx", "6");
        mask.append_child(&backdrop)
            .and_then(|_| mask.append_child(&cutout))
            .and_then(|_| defs.append_child(&mask))
            .and_then(|_| svg.append_child(&defs))
            .and_then(|_| container.append_child(&svg))
            .map_err(|e| WalkthroughError::Overlay(e.to_string()))?;

        self.backend
            .body()
            .append_child(&container)
            .map_err(|e| WalkthroughError::Overlay(e.to_string()))?;
        self.container = Some(container.clone());
        Ok(container)
    }

    /// Tear down the overlay DOM. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        if let Some(container) = self.container.take() {
            container.remove();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayfinder::MemoryDom;

    #[test]
    fn create_is_idempotent() {
        let dom = MemoryDom::new();
        let mut overlay = OverlayManager::new(Arc::new(dom.clone()));
        let first = overlay.create().unwrap();
        let second = overlay.create().unwrap();
        assert_eq!(first.node_id(), second.node_id());
        assert_eq!(
            dom.query_all(&format!("#{OVERLAY_ROOT_ID}")).unwrap().len(),
            1
        );
    }

    #[test]
    fn create_destroy_round_trip_leaves_no_residue() {
        let dom = MemoryDom::new();
        let before = dom.body().children().len();
        let mut overlay = OverlayManager::new(Arc::new(dom.clone()));
        overlay.create().unwrap();
        assert!(overlay.is_created());
        overlay.destroy();
        overlay.destroy();
        assert!(!overlay.is_created());
        assert_eq!(dom.body().children().len(), before);
        assert!(dom
            .query_all(&format!("#{OVERLAY_ROOT_ID}"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn stale_container_is_replaced() {
        let dom = MemoryDom::new();
        let body = dom.body();
        // A leftover from a previous session
        dom.append(&body, "div").attr("id", OVERLAY_ROOT_ID);

        let mut overlay = OverlayManager::new(Arc::new(dom.clone()));
        overlay.create().unwrap();
        assert_eq!(
            dom.query_all(&format!("#{OVERLAY_ROOT_ID}")).unwrap().len(),
            1
        );
    }

    #[test]
    fn mask_ids_differ_per_manager() {
        let dom = MemoryDom::new();
        let a = OverlayManager::new(Arc::new(dom.clone()));
        let b = OverlayManager::new(Arc::new(dom));
        assert_ne!(a.mask_id(), b.mask_id());
    }
}
