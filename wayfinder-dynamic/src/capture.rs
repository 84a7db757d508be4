//! Page-context capture for the AI planner
//!
//! Builds a compact numbered inventory of interactive elements plus a map
//! from index to live node. The map is rebuilt on every capture and any
//! stored indices are invalid the moment the next capture runs.

use crate::error::DynamicError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;
use wayfinder::candidates::INTERACTIVE_UNION;
use wayfinder::dom::is_visible;
use wayfinder::redact::{redact_field_value, redact_value};
use wayfinder::scoring::effective_role;
use wayfinder::stable_id::stable_id;
use wayfinder::{DomBackend, DomNode, ElementContext, Rect};
use wayfinder_walkthrough::OVERLAY_MARKER_ATTR;

const MAX_ELEMENTS: usize = 100;
const MAX_NAME_LEN: usize = 100;
const MAX_OPTIONS: usize = 10;

/// One numbered interactive element as presented to the planner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractiveElement {
    pub index: usize,
    pub tag_name: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    pub selector: String,
    pub is_visible: bool,
    pub rect: Rect,
}

/// One capture of the page, valid until the next capture
pub struct PageContext {
    pub url: String,
    pub title: String,
    /// Human-readable numbered inventory handed to the planner
    pub text: String,
    pub elements: Vec<InteractiveElement>,
    /// Index -> live node. Keys are exactly `0..elements.len()`.
    pub element_map: HashMap<usize, DomNode>,
    /// Live-region text, when the page announces status
    pub status_text: Option<String>,
}

impl PageContext {
    pub fn element_count(&self) -> usize {
        self.elements.len()
    }
}

/// Walks the live DOM and produces planner-ready context
pub struct PageContextCapture {
    backend: Arc<dyn DomBackend>,
    max_elements: usize,
}

impl PageContextCapture {
    pub fn new(backend: Arc<dyn DomBackend>) -> Self {
        Self {
            backend,
            max_elements: MAX_ELEMENTS,
        }
    }

    /// Capture the current page. The previous capture's indices are dead
    /// after this returns.
    pub fn capture(&self) -> Result<PageContext, DynamicError> {
        let nodes = self
            .backend
            .query_all(INTERACTIVE_UNION)
            .map_err(DynamicError::from)?;

        let mut elements = Vec::new();
        let mut element_map = HashMap::new();
        for node in nodes {
            // Never inventory our own overlay
            let in_overlay = node
                .closest(&format!("[{OVERLAY_MARKER_ATTR}]"))
                .ok()
                .flatten()
                .is_some();
            if in_overlay {
                continue;
            }
            if elements.len() >= self.max_elements {
                debug!("capture cap reached at {} elements", self.max_elements);
                break;
            }
            let index = elements.len();
            element_map.insert(index, node.clone());
            elements.push(self.describe(index, &node));
        }

        let text = render_inventory(&elements);
        Ok(PageContext {
            url: self.backend.url(),
            title: self.backend.title(),
            text,
            elements,
            element_map,
            status_text: self.status_text(),
        })
    }

    fn describe(&self, index: usize, node: &DomNode) -> InteractiveElement {
        let tag_name = node.tag_name();
        let input_type = node.attribute("type").filter(|t| !t.is_empty());
        let role_context = ElementContext {
            tag_name: tag_name.clone(),
            role: node.role(),
            input_type: input_type.clone(),
            ..Default::default()
        };
        InteractiveElement {
            index,
            role: effective_role(&role_context),
            name: accessible_name(self.backend.as_ref(), node),
            value: extract_value(node, input_type.as_deref()),
            placeholder: node.attribute("placeholder").filter(|p| !p.is_empty()),
            options: option_labels(node),
            selector: suggested_selector(node),
            is_visible: is_visible(node),
            rect: node.bounds(),
            tag_name,
            input_type,
        }
    }

    fn status_text(&self) -> Option<String> {
        let nodes = self
            .backend
            .query_all("[role=\"status\"], [aria-live=\"polite\"], [aria-live=\"assertive\"]")
            .ok()?;
        let texts: Vec<String> = nodes
            .iter()
            .map(|n| n.inner_text())
            .filter(|t| !t.is_empty())
            .collect();
        if texts.is_empty() {
            None
        } else {
            Some(redact_value(&texts.join(" | ")))
        }
    }
}

/// Accessible-name computation, in priority order
pub fn accessible_name(backend: &dyn DomBackend, node: &DomNode) -> Option<String> {
    if let Some(label) = node.attribute("aria-label").filter(|l| !l.trim().is_empty()) {
        return Some(trim_name(&label));
    }

    if let Some(labelledby) = node.attribute("aria-labelledby") {
        let mut pieces = Vec::new();
        for id in labelledby.split_whitespace() {
            if let Ok(nodes) = backend.query_all(&format!("#{id}")) {
                for hit in nodes {
                    let text = hit.inner_text();
                    if !text.is_empty() {
                        pieces.push(text);
                    }
                }
            }
        }
        if !pieces.is_empty() {
            return Some(trim_name(&pieces.join(" ")));
        }
    }

    if let Some(id) = node.id() {
        if let Ok(labels) = backend.query_all(&format!("label[for=\"{id}\"]")) {
            if let Some(label) = labels.first() {
                let text = label.inner_text();
                if !text.is_empty() {
                    return Some(trim_name(&text));
                }
            }
        }
    }

    if let Ok(Some(label)) = node.closest("label") {
        let text = label_text_without_inputs(&label);
        if !text.is_empty() {
            return Some(trim_name(&text));
        }
    }

    let text = node.inner_text();
    if !text.is_empty() && text.chars().count() < MAX_NAME_LEN {
        return Some(trim_name(&text));
    }

    for attr in ["title", "placeholder", "name"] {
        if let Some(value) = node.attribute(attr).filter(|v| !v.trim().is_empty()) {
            return Some(trim_name(&value));
        }
    }
    None
}

/// The label's rendered text with any nested form controls stripped out
fn label_text_without_inputs(label: &DomNode) -> String {
    let mut pieces = Vec::new();
    collect_label_text(label, &mut pieces);
    pieces.join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn collect_label_text(node: &DomNode, out: &mut Vec<String>) {
    let own = node.own_text();
    if !own.trim().is_empty() {
        out.push(own.trim().to_string());
    }
    for child in node.children() {
        if matches!(
            child.tag_name().as_str(),
            "input" | "select" | "textarea" | "button"
        ) {
            continue;
        }
        collect_label_text(&child, out);
    }
}

/// Redaction-aware value extraction
fn extract_value(node: &DomNode, input_type: Option<&str>) -> Option<String> {
    let value = node.attribute("value").filter(|v| !v.is_empty())?;
    let name = node.attribute("name");
    let placeholder = node.attribute("placeholder");
    redact_field_value(&value, input_type, name.as_deref(), placeholder.as_deref())
}

fn option_labels(node: &DomNode) -> Vec<String> {
    if node.tag_name() != "select" {
        return Vec::new();
    }
    node.children()
        .into_iter()
        .filter(|c| c.tag_name() == "option")
        .map(|c| trim_name(&c.inner_text()))
        .filter(|t| !t.is_empty())
        .take(MAX_OPTIONS)
        .collect()
}

fn suggested_selector(node: &DomNode) -> String {
    if let Some(id) = stable_id(node.id().as_deref()) {
        return format!("#{id}");
    }
    if let Some(testid) = node.attribute("data-testid").filter(|t| !t.is_empty()) {
        return format!("[data-testid=\"{testid}\"]");
    }
    node.tag_name()
}

fn trim_name(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= MAX_NAME_LEN {
        collapsed
    } else {
        collapsed.chars().take(MAX_NAME_LEN).collect()
    }
}

/// The numbered text block the planner reads
fn render_inventory(elements: &[InteractiveElement]) -> String {
    let mut out = String::new();
    for element in elements {
        let _ = write!(out, "[{}] [{}]", element.index, element.role.to_uppercase());
        if let Some(name) = &element.name {
            let _ = write!(out, " {name}");
        }
        let mut context = Vec::new();
        context.push(format!("tag: {}", element.tag_name));
        if let Some(input_type) = &element.input_type {
            context.push(format!("type: {input_type}"));
        }
        if let Some(value) = &element.value {
            context.push(format!("value: \"{value}\""));
        }
        if let Some(placeholder) = &element.placeholder {
            context.push(format!("placeholder: \"{placeholder}\""));
        }
        if !element.options.is_empty() {
            context.push(format!("options: {}", element.options.join("/")));
        }
        if !element.is_visible {
            context.push("hidden".to_string());
        }
        let _ = writeln!(out, " ({})", context.join(", "));
    }
    out
}
