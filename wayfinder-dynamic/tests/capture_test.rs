//! Page-context capture: numbering, naming, and redaction

use std::sync::Arc;
use wayfinder::{DomBackend, MemoryDom};
use wayfinder_dynamic::PageContextCapture;
use wayfinder_walkthrough::OVERLAY_MARKER_ATTR;

fn capture_for(dom: &MemoryDom) -> PageContextCapture {
    PageContextCapture::new(Arc::new(dom.clone()))
}

fn three_element_page() -> MemoryDom {
    let dom = MemoryDom::new();
    dom.set_url("https://app.example/form");
    dom.set_title("Expense form");
    let body = dom.body();
    dom.append(&body, "button")
        .attr("id", "save")
        .text("Save")
        .bounds(100.0, 100.0, 80.0, 30.0);
    dom.append(&body, "input")
        .attr("id", "amount")
        .attr("type", "text")
        .attr("name", "amount")
        .bounds(100.0, 150.0, 160.0, 30.0);
    dom.append(&body, "a")
        .attr("href", "/help")
        .text("Help")
        .bounds(100.0, 200.0, 60.0, 20.0);
    dom
}

#[test]
fn map_keys_are_exactly_the_element_range() {
    let dom = three_element_page();
    let context = capture_for(&dom).capture().unwrap();
    assert_eq!(context.element_count(), 3);
    let mut keys: Vec<_> = context.element_map.keys().copied().collect();
    keys.sort_unstable();
    assert_eq!(keys, vec![0, 1, 2]);
    assert_eq!(context.url, "https://app.example/form");
    assert_eq!(context.title, "Expense form");
}

#[test]
fn indexing_is_deterministic_and_dies_with_the_capture() {
    let dom = three_element_page();
    let capturer = capture_for(&dom);

    let first = capturer.capture().unwrap();
    let second_element = first.element_map.get(&1).unwrap().clone();
    assert_eq!(second_element.attribute("id").as_deref(), Some("amount"));

    // The page grows a new control ahead of the old ones
    let body = dom.body();
    let inserted = dom.backend_insert_first(&body);
    let refreshed = capturer.capture().unwrap();
    assert_eq!(refreshed.element_count(), 4);

    // Index 1 now resolves against the NEW map, not the old ordering
    let new_at_one = refreshed.element_map.get(&1).unwrap();
    assert_ne!(new_at_one.node_id(), second_element.node_id());
    let _ = inserted;
}

/// Test helper: MemoryDom appends in document order, so "insert ahead"
/// means rebuilding body children with a leading element.
trait InsertFirst {
    fn backend_insert_first(&self, body: &wayfinder::DomNode) -> wayfinder::DomNode;
}

impl InsertFirst for MemoryDom {
    fn backend_insert_first(&self, body: &wayfinder::DomNode) -> wayfinder::DomNode {
        let existing = body.children();
        let newcomer = self
            .append(body, "button")
            .attr("id", "new-first")
            .text("New")
            .bounds(10.0, 10.0, 40.0, 20.0)
            .node();
        // Re-append the previous children so the newcomer sits first
        for child in existing {
            let _ = body.append_child(&child);
        }
        newcomer
    }
}

#[test]
fn overlay_elements_are_never_inventoried() {
    let dom = three_element_page();
    let body = dom.body();
    let overlay = dom
        .append(&body, "div")
        .attr(OVERLAY_MARKER_ATTR, "true")
        .node();
    dom.append(&overlay, "button")
        .attr("data-wf-action", "next")
        .text("Next")
        .bounds(500.0, 500.0, 60.0, 24.0);

    let context = capture_for(&dom).capture().unwrap();
    assert_eq!(context.element_count(), 3);
    assert!(!context.text.contains("wf-action"));
}

#[test]
fn capture_caps_at_one_hundred_elements() {
    let dom = MemoryDom::new();
    let body = dom.body();
    for i in 0..120 {
        dom.append(&body, "button")
            .text(&format!("b{i}"))
            .bounds(10.0, 10.0 + i as f64, 40.0, 10.0);
    }
    let context = capture_for(&dom).capture().unwrap();
    assert_eq!(context.element_count(), 100);
    let mut keys: Vec<_> = context.element_map.keys().copied().collect();
    keys.sort_unstable();
    assert_eq!(keys, (0..100).collect::<Vec<_>>());
}

#[test]
fn accessible_names_follow_priority() {
    let dom = MemoryDom::new();
    let body = dom.body();
    dom.append(&body, "button")
        .attr("aria-label", "Save draft")
        .text("Save")
        .bounds(0.0, 0.0, 10.0, 10.0);
    dom.append(&body, "label")
        .attr("for", "amount")
        .text("Amount in USD")
        .bounds(0.0, 20.0, 10.0, 10.0);
    dom.append(&body, "input")
        .attr("id", "amount")
        .attr("type", "text")
        .bounds(0.0, 30.0, 10.0, 10.0);
    dom.append(&body, "input")
        .attr("type", "text")
        .attr("placeholder", "Search invoices")
        .bounds(0.0, 40.0, 10.0, 10.0);

    let context = capture_for(&dom).capture().unwrap();
    let names: Vec<_> = context
        .elements
        .iter()
        .map(|e| e.name.clone().unwrap_or_default())
        .collect();
    assert_eq!(names[0], "Save draft");
    assert_eq!(names[1], "Amount in USD");
    assert_eq!(names[2], "Search invoices");
}

#[test]
fn enclosing_label_text_strips_the_input() {
    let dom = MemoryDom::new();
    let body = dom.body();
    let label = dom
        .append(&body, "label")
        .text("Remember me")
        .bounds(0.0, 0.0, 100.0, 20.0)
        .node();
    dom.append(&label, "input")
        .attr("type", "checkbox")
        .attr("value", "yes")
        .bounds(0.0, 0.0, 12.0, 12.0);

    let context = capture_for(&dom).capture().unwrap();
    let checkbox = context
        .elements
        .iter()
        .find(|e| e.input_type.as_deref() == Some("checkbox"))
        .unwrap();
    assert_eq!(checkbox.name.as_deref(), Some("Remember me"));
}

#[test]
fn values_are_redacted_by_type_and_field_name() {
    let dom = MemoryDom::new();
    let body = dom.body();
    dom.append(&body, "input")
        .attr("type", "password")
        .attr("name", "pw")
        .attr("value", "hunter2")
        .bounds(0.0, 0.0, 10.0, 10.0);
    dom.append(&body, "input")
        .attr("type", "email")
        .attr("name", "contact")
        .attr("value", "jo@example.com")
        .bounds(0.0, 10.0, 10.0, 10.0);
    dom.append(&body, "input")
        .attr("type", "tel")
        .attr("name", "mobile")
        .attr("value", "555-867-5309")
        .bounds(0.0, 20.0, 10.0, 10.0);
    dom.append(&body, "input")
        .attr("type", "text")
        .attr("name", "card_number")
        .attr("value", "4242424242424242")
        .bounds(0.0, 30.0, 10.0, 10.0);
    dom.append(&body, "input")
        .attr("type", "text")
        .attr("name", "note")
        .attr("value", "paid 4242-4242-4242-4242 by card")
        .bounds(0.0, 40.0, 10.0, 10.0);

    let context = capture_for(&dom).capture().unwrap();
    let values: Vec<_> = context.elements.iter().map(|e| e.value.clone()).collect();
    assert_eq!(values[0], None);
    assert_eq!(values[1].as_deref(), Some("***@***.***"));
    assert_eq!(values[2].as_deref(), Some("***-***-5309"));
    assert_eq!(values[3].as_deref(), Some("[REDACTED]"));
    assert_eq!(
        values[4].as_deref(),
        Some("paid ####-####-####-#### by card")
    );
    assert!(!context.text.contains("hunter2"));
    assert!(!context.text.contains("jo@example.com"));
}

#[test]
fn inventory_text_numbers_every_element() {
    let dom = three_element_page();
    let context = capture_for(&dom).capture().unwrap();
    assert!(context.text.contains("[0] [BUTTON] Save"));
    assert!(context.text.contains("[1] [TEXTBOX]"));
    assert!(context.text.contains("[2] [LINK] Help"));
}

#[test]
fn select_options_are_listed_up_to_the_cap() {
    let dom = MemoryDom::new();
    let body = dom.body();
    let select = dom
        .append(&body, "select")
        .attr("name", "category")
        .bounds(0.0, 0.0, 120.0, 24.0)
        .node();
    for i in 0..14 {
        dom.append(&select, "option").text(&format!("Option {i}"));
    }
    let context = capture_for(&dom).capture().unwrap();
    let element = &context.elements[0];
    assert_eq!(element.options.len(), 10);
    assert_eq!(element.role, "listbox");
}
