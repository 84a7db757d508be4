//! Live-element metadata extraction
//!
//! Builds an [`ElementContext`]-shaped record from a live DOM node. Every
//! stage is fault-tolerant: an extraction failure degrades that stage (or
//! the whole record) instead of propagating into the healing pipeline.

use crate::context::{
    ElementContext, FormContext, HeadingLandmark, LabelLandmark, NearbyLandmarks, ParentLink,
    VisualRegion,
};
use crate::dom::{is_visible, DomBackend, DomNode};
use crate::errors::HealError;
use crate::stable_id::stable_id;
use std::sync::Arc;
use tracing::debug;

const MAX_TEXT_LEN: usize = 100;
const MAX_PARENT_CHAIN: usize = 5;
const MAX_HEADING_DISTANCE: f64 = 500.0;
const MAX_LABEL_DISTANCE: f64 = 200.0;
const MAX_SIBLING_TEXTS_PER_SIDE: usize = 3;
const SIBLING_SNIPPET_LEN: usize = 50;

const INTERACTIVE_FIELD_SELECTOR: &str = "input, button, select, textarea, \
     [role=\"button\"], [role=\"checkbox\"], [role=\"radio\"]";

const HEADING_SELECTOR: &str = "h1, h2, h3, h4, h5, h6";

/// Extracts `ElementContext` records from live DOM nodes
#[derive(Clone)]
pub struct MetadataExtractor {
    backend: Arc<dyn DomBackend>,
}

impl MetadataExtractor {
    pub fn new(backend: Arc<dyn DomBackend>) -> Self {
        Self { backend }
    }

    /// Extract everything we can about `node`. Never fails: on error the
    /// record degrades to tag-only with `visible = false`.
    pub fn extract(&self, node: &DomNode) -> ElementContext {
        match self.try_extract(node) {
            Ok(context) => context,
            Err(e) => {
                debug!("metadata extraction degraded to minimal record: {e}");
                ElementContext::minimal(&node.tag_name())
            }
        }
    }

    fn try_extract(&self, node: &DomNode) -> Result<ElementContext, HealError> {
        if !node.is_connected() {
            return Err(HealError::ElementDetached(format!("{node:?}")));
        }

        let tag_name = node.tag_name();
        let bounding_box = node.bounds();

        let form_context = self
            .form_context(node)
            .unwrap_or_else(|e| {
                debug!("form context extraction failed: {e}");
                None
            });
        let visual_region = self
            .visual_region(node)
            .unwrap_or_else(|e| {
                debug!("visual region extraction failed: {e}");
                VisualRegion::Unknown
            });
        let landmarks = self
            .landmarks(node)
            .unwrap_or_else(|e| {
                debug!("landmark extraction failed: {e}");
                NearbyLandmarks::default()
            });

        Ok(ElementContext {
            tag_name,
            role: node.role(),
            input_type: node.attribute("type").filter(|t| !t.is_empty()),
            name: node.attribute("name").filter(|n| !n.is_empty()),
            id: node.id(),
            data_testid: node.attribute("data-testid").filter(|t| !t.is_empty()),
            text: extract_text(node),
            classes: node.classes(),
            bounding_box,
            selectors: Default::default(),
            parent_chain: parent_chain(node),
            form_context,
            visual_region,
            landmarks,
            field_label: None,
            instruction: None,
            visible: is_visible(node),
        })
    }

    fn form_context(&self, node: &DomNode) -> Result<Option<FormContext>, HealError> {
        let Some(form) = node.closest("form")? else {
            return Ok(None);
        };

        let mut field_index = 0;
        let mut total_fields = 0;
        for descendant in form.descendants() {
            let interactive = descendant
                .matches(INTERACTIVE_FIELD_SELECTOR)
                .unwrap_or(false);
            if !interactive {
                continue;
            }
            if descendant == *node {
                field_index = total_fields;
            }
            total_fields += 1;
        }

        Ok(Some(FormContext {
            form_id: form.id(),
            form_action: form.attribute("action").filter(|a| !a.is_empty()),
            form_name: form.attribute("name").filter(|n| !n.is_empty()),
            form_classes: form.classes(),
            field_index,
            total_fields,
        }))
    }

    /// Landmark ancestry first, positional fallback second
    fn visual_region(&self, node: &DomNode) -> Result<VisualRegion, HealError> {
        if node
            .closest("[role=\"dialog\"], [aria-modal=\"true\"], .modal")?
            .is_some()
        {
            return Ok(VisualRegion::Modal);
        }
        if node.closest("header, [role=\"banner\"]")?.is_some() {
            return Ok(VisualRegion::Header);
        }
        if node.closest("footer, [role=\"contentinfo\"]")?.is_some() {
            return Ok(VisualRegion::Footer);
        }
        if node.closest("aside, [role=\"complementary\"]")?.is_some() {
            return Ok(VisualRegion::Sidebar);
        }
        // A nav outside any header reads as sidebar navigation
        if node.closest("nav")?.is_some() {
            return Ok(VisualRegion::Sidebar);
        }
        if node.closest("main, article, [role=\"main\"]")?.is_some() {
            return Ok(VisualRegion::Main);
        }

        let bounds = node.bounds();
        let center = bounds.center();
        let viewport = self.backend.viewport();
        let page = self.backend.page_size();
        if center.y < viewport.height * 0.15 {
            return Ok(VisualRegion::Header);
        }
        if page.height > 0.0 && center.y > page.height * 0.85 {
            return Ok(VisualRegion::Footer);
        }
        let narrow = bounds.width < viewport.width * 0.25;
        let far_edge = bounds.right() < page.width * 0.15 || bounds.x > page.width * 0.85;
        if narrow && far_edge {
            return Ok(VisualRegion::Sidebar);
        }
        Ok(VisualRegion::Unknown)
    }

    fn landmarks(&self, node: &DomNode) -> Result<NearbyLandmarks, HealError> {
        let center = node.bounds().center();

        // Nearest heading above, within range
        let mut closest_heading: Option<HeadingLandmark> = None;
        for heading in self.backend.query_all(HEADING_SELECTOR)? {
            let h_center = heading.bounds().center();
            if h_center.y >= center.y {
                continue;
            }
            let distance = h_center.distance_to(center);
            if distance > MAX_HEADING_DISTANCE {
                continue;
            }
            let text = heading.inner_text();
            if text.is_empty() {
                continue;
            }
            let level = heading
                .tag_name()
                .strip_prefix('h')
                .and_then(|l| l.parse().ok())
                .unwrap_or(2);
            if closest_heading
                .as_ref()
                .map(|best| distance < best.distance)
                .unwrap_or(true)
            {
                closest_heading = Some(HeadingLandmark {
                    text: truncate(&text, MAX_TEXT_LEN),
                    level,
                    distance,
                });
            }
        }

        // Nearest label, within range
        let mut closest_label: Option<(f64, LabelLandmark)> = None;
        for label in self.backend.query_all("label")? {
            let distance = label.bounds().center().distance_to(center);
            if distance > MAX_LABEL_DISTANCE {
                continue;
            }
            let text = label.inner_text();
            if text.is_empty() {
                continue;
            }
            if closest_label
                .as_ref()
                .map(|(best, _)| distance < *best)
                .unwrap_or(true)
            {
                closest_label = Some((
                    distance,
                    LabelLandmark {
                        text: truncate(&text, MAX_TEXT_LEN),
                        for_id: label.attribute("for").filter(|f| !f.is_empty()),
                    },
                ));
            }
        }

        Ok(NearbyLandmarks {
            closest_heading,
            closest_label: closest_label.map(|(_, label)| label),
            sibling_texts: sibling_texts(node),
            container_text: self.container_text(node)?,
        })
    }

    /// First heading or legend of the nearest semantic container that has one
    fn container_text(&self, node: &DomNode) -> Result<Option<String>, HealError> {
        const CONTAINER_SELECTOR: &str =
            "form, section, fieldset, article, main, [role=\"region\"], [role=\"group\"]";
        let mut cursor = node.closest(CONTAINER_SELECTOR)?;
        while let Some(container) = cursor {
            for descendant in container.descendants() {
                if descendant.matches("h1, h2, h3, h4, h5, h6, legend")? {
                    let text = descendant.inner_text();
                    if !text.is_empty() {
                        return Ok(Some(truncate(&text, MAX_TEXT_LEN)));
                    }
                }
            }
            cursor = match container.parent() {
                Some(parent) => parent.closest(CONTAINER_SELECTOR)?,
                None => None,
            };
        }
        Ok(None)
    }
}

/// innerText-preferred, whitespace-collapsed, truncated with an ellipsis
pub fn extract_text(node: &DomNode) -> Option<String> {
    let text = node.inner_text();
    let text = if text.is_empty() {
        node.attribute("value").unwrap_or_default()
    } else {
        text
    };
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(truncate(&collapsed, MAX_TEXT_LEN))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

/// Ascend up to 5 levels, stopping after the first ancestor with a stable id
fn parent_chain(node: &DomNode) -> Vec<ParentLink> {
    let mut chain = Vec::new();
    for ancestor in node.ancestors() {
        if chain.len() >= MAX_PARENT_CHAIN {
            break;
        }
        let tag = ancestor.tag_name();
        if tag == "html" {
            break;
        }
        let id = ancestor.id();
        let stable = stable_id(id.as_deref()).is_some();
        chain.push(ParentLink {
            tag,
            id,
            classes: ancestor.classes(),
            role: ancestor.role(),
        });
        if stable {
            break;
        }
    }
    chain
}

fn sibling_texts(node: &DomNode) -> Vec<String> {
    let Some(parent) = node.parent() else {
        return Vec::new();
    };
    let siblings = parent.children();
    let Some(position) = siblings.iter().position(|s| s == node) else {
        return Vec::new();
    };

    let mut before: Vec<String> = siblings[..position]
        .iter()
        .rev()
        .filter_map(snippet)
        .take(MAX_SIBLING_TEXTS_PER_SIDE)
        .collect();
    before.reverse();
    let after = siblings[position + 1..]
        .iter()
        .filter_map(snippet)
        .take(MAX_SIBLING_TEXTS_PER_SIDE);
    before.into_iter().chain(after).collect()
}

fn snippet(node: &DomNode) -> Option<String> {
    let text = node.inner_text();
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(truncate(&collapsed, SIBLING_SNIPPET_LEN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::MemoryDom;
    use crate::geometry::Rect;

    fn extractor(dom: &MemoryDom) -> MetadataExtractor {
        MetadataExtractor::new(Arc::new(dom.clone()))
    }

    fn checkout_page() -> (MemoryDom, DomNode) {
        let dom = MemoryDom::with_viewport(1200.0, 800.0);
        dom.set_page_size(1200.0, 2000.0);
        let body = dom.body();
        let main = dom.append(&body, "main").bounds(0.0, 120.0, 1200.0, 1600.0).node();
        dom.append(&main, "h2")
            .text("Payment Information")
            .bounds(100.0, 150.0, 300.0, 30.0);
        let form = dom
            .append(&main, "form")
            .attr("id", "checkout")
            .attr("action", "/checkout")
            .class("checkout-form")
            .bounds(100.0, 200.0, 600.0, 400.0)
            .node();
        dom.append(&form, "label")
            .attr("for", "card-number")
            .text("Card number")
            .bounds(100.0, 220.0, 120.0, 20.0);
        dom.append(&form, "input")
            .attr("id", "card-number")
            .attr("type", "text")
            .attr("name", "card")
            .bounds(100.0, 250.0, 300.0, 32.0);
        let button = dom
            .append(&form, "button")
            .attr("id", "submit-btn")
            .attr("type", "submit")
            .text("Submit Order")
            .bounds(100.0, 320.0, 140.0, 40.0)
            .node();
        (dom, button)
    }

    #[test]
    fn extracts_identity_and_geometry() {
        let (dom, button) = checkout_page();
        let ctx = extractor(&dom).extract(&button);
        assert_eq!(ctx.tag_name, "button");
        assert_eq!(ctx.id.as_deref(), Some("submit-btn"));
        assert_eq!(ctx.text.as_deref(), Some("Submit Order"));
        assert_eq!(ctx.bounding_box, Rect::new(100.0, 320.0, 140.0, 40.0));
        assert!(ctx.visible);
    }

    #[test]
    fn form_context_counts_interactive_fields() {
        let (dom, button) = checkout_page();
        let ctx = extractor(&dom).extract(&button);
        let form = ctx.form_context.expect("inside a form");
        assert_eq!(form.form_id.as_deref(), Some("checkout"));
        assert_eq!(form.form_action.as_deref(), Some("/checkout"));
        assert_eq!(form.total_fields, 2);
        assert_eq!(form.field_index, 1);
    }

    #[test]
    fn region_resolves_from_landmark_ancestry() {
        let (dom, button) = checkout_page();
        let ctx = extractor(&dom).extract(&button);
        assert_eq!(ctx.visual_region, VisualRegion::Main);
    }

    #[test]
    fn modal_wins_over_other_regions() {
        let dom = MemoryDom::new();
        let body = dom.body();
        let main = dom.append(&body, "main").node();
        let modal = dom
            .append(&main, "div")
            .attr("role", "dialog")
            .bounds(300.0, 200.0, 400.0, 300.0)
            .node();
        let button = dom
            .append(&modal, "button")
            .text("Confirm")
            .bounds(350.0, 400.0, 100.0, 36.0)
            .node();
        let ctx = extractor(&dom).extract(&button);
        assert_eq!(ctx.visual_region, VisualRegion::Modal);
    }

    #[test]
    fn positional_fallback_reads_header() {
        let dom = MemoryDom::with_viewport(1200.0, 800.0);
        dom.set_page_size(1200.0, 3000.0);
        let body = dom.body();
        let button = dom
            .append(&body, "button")
            .text("Logo")
            .bounds(20.0, 10.0, 80.0, 30.0)
            .node();
        let ctx = extractor(&dom).extract(&button);
        assert_eq!(ctx.visual_region, VisualRegion::Header);
    }

    #[test]
    fn landmarks_pick_heading_above_and_nearby_label() {
        let (dom, button) = checkout_page();
        let ctx = extractor(&dom).extract(&button);
        let heading = ctx.landmarks.closest_heading.expect("heading above");
        assert_eq!(heading.text, "Payment Information");
        assert_eq!(heading.level, 2);
        let label = ctx.landmarks.closest_label.expect("label nearby");
        assert_eq!(label.text, "Card number");
        assert_eq!(label.for_id.as_deref(), Some("card-number"));
        assert_eq!(ctx.landmarks.container_text.as_deref(), Some("Payment Information"));
    }

    #[test]
    fn parent_chain_stops_at_stable_id() {
        let dom = MemoryDom::new();
        let body = dom.body();
        let outer = dom.append(&body, "div").attr("id", "app-shell").node();
        let middle = dom.append(&outer, "div").attr("id", "react-4f8a21c93b").node();
        let inner = dom.append(&middle, "div").node();
        let button = dom.append(&inner, "button").text("Go").node();
        let ctx = extractor(&dom).extract(&button);
        let tags: Vec<_> = ctx.parent_chain.iter().map(|p| p.tag.as_str()).collect();
        // Ascends through the generated-id div, stops at the stable one
        assert_eq!(tags, vec!["div", "div", "div"]);
        assert_eq!(ctx.parent_chain[2].id.as_deref(), Some("app-shell"));
    }

    #[test]
    fn detached_node_degrades_to_minimal() {
        let (dom, button) = checkout_page();
        button.remove();
        let ctx = extractor(&dom).extract(&button);
        assert_eq!(ctx.tag_name, "button");
        assert!(!ctx.visible);
        assert!(ctx.form_context.is_none());
    }

    #[test]
    fn long_text_is_truncated_with_ellipsis() {
        let dom = MemoryDom::new();
        let body = dom.body();
        let long = "word ".repeat(40);
        let div = dom.append(&body, "div").text(&long).bounds(0.0, 0.0, 10.0, 10.0).node();
        let text = extract_text(&div).unwrap();
        assert_eq!(text.chars().count(), 101);
        assert!(text.ends_with('…'));
    }
}
