//! Candidate discovery on the live DOM

use crate::config::CandidateConfig;
use crate::context::ElementContext;
use crate::dom::{is_visible, DomBackend, DomNode};
use crate::geometry::Rect;
use crate::metadata::MetadataExtractor;
use crate::sanitize::escape_text_literal;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Interactive elements likely to be step targets
pub const INTERACTIVE_UNION: &str = "a[href], button, input:not([type=\"hidden\"]), select, \
     textarea, [role=\"button\"], [role=\"link\"], [role=\"checkbox\"], [role=\"radio\"], \
     [role=\"menuitem\"], [role=\"tab\"], [role=\"switch\"], [onclick], [data-action], \
     [data-testid]";

/// Elements that can never be healing targets
const EXCLUSION_SELECTOR: &str =
    "[aria-hidden=\"true\"], [disabled], .hidden, .invisible";

/// Containers whose contents are transient render noise
const SPINNER_CONTAINER_SELECTOR: &str = ".loading, .spinner, [aria-busy=\"true\"]";

/// A live node plus its freshly extracted metadata.
///
/// The `element` handle is transient: it is only meaningful until the next
/// DOM mutation or render.
#[derive(Debug, Clone)]
pub struct CandidateElement {
    pub element: DomNode,
    pub context: ElementContext,
    /// Euclidean distance from the recorded center, in px
    pub distance: f64,
}

/// Enumerates, filters, and distance-prunes candidate elements
pub struct CandidateFinder {
    backend: Arc<dyn DomBackend>,
    extractor: MetadataExtractor,
    config: CandidateConfig,
}

impl CandidateFinder {
    pub fn new(backend: Arc<dyn DomBackend>, config: CandidateConfig) -> Self {
        let extractor = MetadataExtractor::new(backend.clone());
        Self {
            backend,
            extractor,
            config,
        }
    }

    /// Find plausible candidates for the recorded element.
    ///
    /// Selector failures are swallowed: a backend that rejects part of the
    /// union still yields whatever the remaining queries produce.
    pub fn find(&self, original: &ElementContext) -> Vec<CandidateElement> {
        let mut seen = HashSet::new();
        let mut pool = Vec::new();

        for selector in [INTERACTIVE_UNION, original.tag_name.as_str()] {
            match self.backend.query_all(selector) {
                Ok(nodes) => {
                    for node in nodes {
                        if seen.insert(node.node_id()) {
                            pool.push(node);
                        }
                    }
                }
                Err(e) => debug!("candidate query {selector:?} failed: {e}"),
            }
        }

        // Text match catches targets whose tag and attributes all churned.
        // The recorded text goes through the literal encoder so a quote in
        // page content can never break out of the query.
        if let Some(text) = original.text.as_deref().filter(|t| !t.is_empty()) {
            match self.backend.query_text(&escape_text_literal(text)) {
                Ok(nodes) => {
                    for node in nodes {
                        if seen.insert(node.node_id()) {
                            pool.push(node);
                        }
                    }
                }
                Err(e) => debug!("text query failed, continuing without it: {e}"),
            }
        }

        let recorded_center = original.bounding_box.center();
        let viewport = self.viewport_rect().expanded(self.config.viewport_margin);

        let mut candidates: Vec<CandidateElement> = pool
            .into_iter()
            .filter(|node| !self.is_excluded(node))
            .filter(|node| is_visible(node) && node.bounds().intersects(&viewport))
            .filter_map(|node| {
                let distance = node.bounds().center().distance_to(recorded_center);
                if distance > self.config.max_position_distance {
                    return None;
                }
                Some((node, distance))
            })
            .map(|(node, distance)| CandidateElement {
                context: self.extractor.extract(&node),
                element: node,
                distance,
            })
            .collect();

        candidates.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        candidates.truncate(self.config.max_candidates);
        debug!(
            candidate_count = candidates.len(),
            "candidate discovery for <{}>", original.tag_name
        );
        candidates
    }

    fn is_excluded(&self, node: &DomNode) -> bool {
        if node.matches(EXCLUSION_SELECTOR).unwrap_or(false) {
            return true;
        }
        if node.style("display").as_deref() == Some("none")
            || node.style("visibility").as_deref() == Some("hidden")
        {
            return true;
        }
        // Inside an SVG or a loading-spinner container
        if node
            .ancestors()
            .iter()
            .any(|ancestor| ancestor.tag_name() == "svg")
        {
            return true;
        }
        node.closest(SPINNER_CONTAINER_SELECTOR)
            .map(|hit| hit.is_some())
            .unwrap_or(false)
    }

    fn viewport_rect(&self) -> Rect {
        let scroll = self.backend.scroll_offset();
        let viewport = self.backend.viewport();
        Rect::new(scroll.x, scroll.y, viewport.width, viewport.height)
    }
}
