//! Tooltip rendering: instructions, errors, prompts, progress
//!
//! One positioned card with mode-specific content. Every interpolated
//! string passes through `escape_html` before it reaches the DOM. The
//! header doubles as a drag handle; drag state is reset on every mode
//! switch and teardown so handlers never leak across renders.

use crate::overlay::OVERLAY_MARKER_ATTR;
use std::sync::Arc;
use wayfinder::sanitize::escape_html;
use wayfinder::{DomBackend, DomNode, Point, Rect, Size, UserEventKind};

pub const TOOLTIP_WIDTH: f64 = 340.0;
pub const TOOLTIP_HEIGHT: f64 = 180.0;
const EDGE_PADDING: f64 = 16.0;

/// What the tooltip is currently showing
#[derive(Debug, Clone, PartialEq)]
pub enum TooltipMode {
    Step {
        instruction: String,
        step_number: usize,
        total_steps: usize,
    },
    Error {
        message: String,
        retry_count: u32,
    },
    Completion {
        workflow_name: String,
    },
    /// Page navigation in flight
    Navigation,
    /// A navigate step awaiting its URL change
    NavigateStep {
        target_url: String,
    },
    /// Healing in flight (spinner) or awaiting user confirmation
    Healing {
        confirm: Option<HealPrompt>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealPrompt {
    pub summary: String,
    pub score: f64,
}

#[derive(Debug, Default)]
struct DragState {
    dragging: bool,
    grab_offset: Point,
}

pub struct TooltipRenderer {
    backend: Arc<dyn DomBackend>,
    node: Option<DomNode>,
    mode: Option<TooltipMode>,
    drag: DragState,
    position_override: Option<Point>,
}

impl TooltipRenderer {
    pub fn new(backend: Arc<dyn DomBackend>) -> Self {
        Self {
            backend,
            node: None,
            mode: None,
            drag: DragState::default(),
            position_override: None,
        }
    }

    pub fn mode(&self) -> Option<&TooltipMode> {
        self.mode.as_ref()
    }

    /// Render `mode`, positioned relative to the target when one exists
    pub fn show(&mut self, container: &DomNode, mode: TooltipMode, target: Option<Rect>) {
        let node = self.ensure_node(container);
        if self.mode.as_ref() != Some(&mode) {
            // Mode switch: drag handlers and any dragged position are gone
            self.drag = DragState::default();
            self.position_override = None;
        }

        for child in node.children() {
            child.remove();
        }
        self.render_header(&node, &mode);
        self.render_body(&node, &mode);
        self.render_footer(&node, &mode);
        self.mode = Some(mode);
        self.apply_position(self.resolve_position(target));
    }

    /// Recompute position after scroll or resize. A dragged tooltip stays
    /// where the user put it.
    pub fn reposition(&mut self, target: Option<Rect>) {
        if self.node.is_none() {
            return;
        }
        self.apply_position(self.resolve_position(target));
    }

    pub fn hide(&mut self) {
        if let Some(node) = &self.node {
            node.set_style("display", "none");
        }
    }

    pub fn destroy(&mut self) {
        self.drag = DragState::default();
        self.position_override = None;
        self.mode = None;
        if let Some(node) = self.node.take() {
            node.remove();
        }
    }

    /// Route a pointer event into the drag lifecycle. Returns true when
    /// the event was consumed by a drag.
    pub fn handle_pointer(&mut self, kind: UserEventKind, target: &DomNode, position: Point) -> bool {
        match kind {
            UserEventKind::PointerDown => {
                let on_header = target
                    .closest(".wf-tooltip-header")
                    .ok()
                    .flatten()
                    .is_some();
                if !on_header {
                    return false;
                }
                self.drag.dragging = true;
                let current = self.current_position();
                self.drag.grab_offset =
                    Point::new(position.x - current.x, position.y - current.y);
                true
            }
            UserEventKind::PointerMove => {
                if !self.drag.dragging {
                    return false;
                }
                let next = Point::new(
                    position.x - self.drag.grab_offset.x,
                    position.y - self.drag.grab_offset.y,
                );
                self.position_override = Some(next);
                self.apply_position(next);
                true
            }
            UserEventKind::PointerUp => {
                let was_dragging = self.drag.dragging;
                self.drag.dragging = false;
                was_dragging
            }
            _ => false,
        }
    }

    fn ensure_node(&mut self, container: &DomNode) -> DomNode {
        if let Some(node) = &self.node {
            if node.is_connected() {
                return node.clone();
            }
        }
        let node = self.backend.create_element("div");
        node.set_attribute(OVERLAY_MARKER_ATTR, "true");
        node.set_attribute("class", "wf-tooltip");
        node.set_attribute("role", "dialog");
        node.set_style("position", "absolute");
        node.set_style("pointer-events", "auto");
        node.set_style("width", &format!("{TOOLTIP_WIDTH:.0}px"));
        let _ = container.append_child(&node);
        self.node = Some(node.clone());
        node
    }

    fn render_header(&self, node: &DomNode, mode: &TooltipMode) {
        let header = self.backend.create_element("div");
        header.set_attribute(OVERLAY_MARKER_ATTR, "true");
        header.set_attribute("class", "wf-tooltip-header");

        let title = self.backend.create_element("span");
        title.set_attribute(OVERLAY_MARKER_ATTR, "true");
        let label = match mode {
            TooltipMode::Step {
                step_number,
                total_steps,
                ..
            } => format!("Step {step_number} of {total_steps}"),
            TooltipMode::Error { .. } => "Something went wrong".to_string(),
            TooltipMode::Completion { .. } => "All done".to_string(),
            TooltipMode::Navigation => "Navigating".to_string(),
            TooltipMode::NavigateStep { .. } => "Go to page".to_string(),
            TooltipMode::Healing { confirm: None } => "Finding your element".to_string(),
            TooltipMode::Healing { confirm: Some(_) } => "Is this the right element?".to_string(),
        };
        title.set_text(&escape_html(Some(&label)));

        // The close control stays enabled no matter what is in flight
        let close = self.button("×", "exit", true);
        close.set_attribute("class", "wf-tooltip-close");

        let _ = header.append_child(&title);
        let _ = header.append_child(&close);
        let _ = node.append_child(&header);
    }

    fn render_body(&self, node: &DomNode, mode: &TooltipMode) {
        let body = self.backend.create_element("div");
        body.set_attribute(OVERLAY_MARKER_ATTR, "true");
        body.set_attribute("class", "wf-tooltip-body");
        match mode {
            TooltipMode::Step { instruction, .. } => {
                body.set_text(&escape_html(Some(instruction)));
            }
            TooltipMode::Error {
                message,
                retry_count,
            } => {
                let text = if *retry_count > 0 {
                    format!("{message} (attempt {retry_count})")
                } else {
                    message.clone()
                };
                body.set_text(&escape_html(Some(&text)));
            }
            TooltipMode::Completion { workflow_name } => {
                body.set_text(&escape_html(Some(&format!(
                    "You finished \"{workflow_name}\"."
                ))));
            }
            TooltipMode::Navigation => {
                let spinner = self.spinner();
                let _ = body.append_child(&spinner);
                body.set_text("Waiting for the page to settle…");
            }
            TooltipMode::NavigateStep { target_url } => {
                body.set_text(&escape_html(Some(&format!(
                    "Navigate to {target_url} to continue."
                ))));
            }
            TooltipMode::Healing { confirm: None } => {
                let spinner = self.spinner();
                let _ = body.append_child(&spinner);
                body.set_text("The page changed. Locating the matching element…");
            }
            TooltipMode::Healing {
                confirm: Some(prompt),
            } => {
                body.set_text(&escape_html(Some(&format!(
                    "{} (match confidence {:.0}%)",
                    prompt.summary,
                    prompt.score * 100.0
                ))));
            }
        }
        let _ = node.append_child(&body);
    }

    fn render_footer(&self, node: &DomNode, mode: &TooltipMode) {
        let footer = self.backend.create_element("div");
        footer.set_attribute(OVERLAY_MARKER_ATTR, "true");
        footer.set_attribute("class", "wf-tooltip-footer");
        let buttons: Vec<DomNode> = match mode {
            TooltipMode::Step { step_number, .. } => {
                let mut out = Vec::new();
                out.push(self.button("Back", "back", *step_number > 1));
                out.push(self.button("Skip", "skip", true));
                out.push(self.button("Next", "next", true));
                out
            }
            TooltipMode::Error { retry_count, .. } => vec![
                self.button("Retry", "retry", *retry_count < crate::machine::MAX_RETRIES),
                self.button("Skip", "skip", true),
                self.button("Exit", "exit", true),
            ],
            TooltipMode::Completion { .. } => vec![self.button("Done", "exit", true)],
            TooltipMode::Navigation => vec![],
            TooltipMode::NavigateStep { .. } => vec![self.button("Exit", "exit", true)],
            TooltipMode::Healing { confirm: None } => vec![],
            TooltipMode::Healing { confirm: Some(_) } => vec![
                self.button("Yes, continue", "confirm-heal", true),
                self.button("No", "reject-heal", true),
            ],
        };
        for button in buttons {
            let _ = footer.append_child(&button);
        }
        let _ = node.append_child(&footer);
    }

    fn button(&self, label: &str, action: &str, enabled: bool) -> DomNode {
        let button = self.backend.create_element("button");
        button.set_attribute(OVERLAY_MARKER_ATTR, "true");
        button.set_attribute("data-wf-action", action);
        button.set_text(&escape_html(Some(label)));
        if !enabled {
            button.set_attribute("disabled", "");
        }
        button
    }

    fn spinner(&self) -> DomNode {
        let spinner = self.backend.create_element("div");
        spinner.set_attribute(OVERLAY_MARKER_ATTR, "true");
        spinner.set_attribute("class", "wf-spinner");
        spinner
    }

    fn current_position(&self) -> Point {
        self.position_override.unwrap_or_else(|| {
            self.node
                .as_ref()
                .map(|n| {
                    let scroll = self.backend.scroll_offset();
                    let bounds = n.bounds();
                    Point::new(bounds.x - scroll.x, bounds.y - scroll.y)
                })
                .unwrap_or_default()
        })
    }

    fn resolve_position(&self, target: Option<Rect>) -> Point {
        if let Some(position) = self.position_override {
            return position;
        }
        smart_position(target, self.backend.viewport())
    }

    /// Apply a viewport-coordinate position to the DOM
    fn apply_position(&self, position: Point) {
        let Some(node) = &self.node else { return };
        let scroll = self.backend.scroll_offset();
        node.set_style("display", "block");
        node.set_style("left", &format!("{:.0}px", position.x));
        node.set_style("top", &format!("{:.0}px", position.y));
        node.set_bounds(Rect::new(
            position.x + scroll.x,
            position.y + scroll.y,
            TOOLTIP_WIDTH,
            TOOLTIP_HEIGHT,
        ));
    }
}

/// Pick a placement: below, above, right, left, then the bottom-right
/// corner when nothing fits. `target` is in viewport coordinates.
pub fn smart_position(target: Option<Rect>, viewport: Size) -> Point {
    let corner = Point::new(
        viewport.width - TOOLTIP_WIDTH - EDGE_PADDING,
        viewport.height - TOOLTIP_HEIGHT - EDGE_PADDING,
    );
    let Some(target) = target else { return corner };

    let centered_x = (target.center().x - TOOLTIP_WIDTH / 2.0)
        .clamp(EDGE_PADDING, (viewport.width - TOOLTIP_WIDTH - EDGE_PADDING).max(EDGE_PADDING));
    let centered_y = (target.center().y - TOOLTIP_HEIGHT / 2.0).clamp(
        EDGE_PADDING,
        (viewport.height - TOOLTIP_HEIGHT - EDGE_PADDING).max(EDGE_PADDING),
    );

    let candidates = [
        // Below
        Point::new(centered_x, target.bottom() + EDGE_PADDING),
        // Above
        Point::new(centered_x, target.y - EDGE_PADDING - TOOLTIP_HEIGHT),
        // Right
        Point::new(target.right() + EDGE_PADDING, centered_y),
        // Left
        Point::new(target.x - EDGE_PADDING - TOOLTIP_WIDTH, centered_y),
    ];
    for candidate in candidates {
        let fits = candidate.x >= 0.0
            && candidate.y >= 0.0
            && candidate.x + TOOLTIP_WIDTH <= viewport.width
            && candidate.y + TOOLTIP_HEIGHT <= viewport.height;
        if fits {
            return candidate;
        }
    }
    corner
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::OverlayManager;
    use wayfinder::MemoryDom;

    fn setup() -> (MemoryDom, DomNode, TooltipRenderer) {
        let dom = MemoryDom::new();
        let mut overlay = OverlayManager::new(Arc::new(dom.clone()));
        let container = overlay.create().unwrap();
        let tooltip = TooltipRenderer::new(Arc::new(dom.clone()));
        (dom, container, tooltip)
    }

    fn step_mode() -> TooltipMode {
        TooltipMode::Step {
            instruction: "Click the <b>Submit</b> button".into(),
            step_number: 2,
            total_steps: 5,
        }
    }

    #[test]
    fn step_mode_renders_escaped_instruction_and_buttons() {
        let (dom, container, mut tooltip) = setup();
        tooltip.show(&container, step_mode(), Some(Rect::new(100.0, 100.0, 80.0, 30.0)));

        let body = dom.query_all(".wf-tooltip-body").unwrap().remove(0);
        assert!(body.own_text().contains("&lt;b&gt;Submit&lt;/b&gt;"));
        assert!(!body.own_text().contains("<b>"));

        let actions: Vec<_> = dom
            .query_all("[data-wf-action]")
            .unwrap()
            .iter()
            .map(|b| b.attribute("data-wf-action").unwrap())
            .collect();
        assert_eq!(actions, vec!["exit", "back", "skip", "next"]);
    }

    #[test]
    fn showing_twice_keeps_a_single_tooltip() {
        let (dom, container, mut tooltip) = setup();
        tooltip.show(&container, step_mode(), None);
        tooltip.show(&container, step_mode(), None);
        assert_eq!(dom.query_all(".wf-tooltip").unwrap().len(), 1);
        assert_eq!(dom.query_all(".wf-tooltip-header").unwrap().len(), 1);
    }

    #[test]
    fn healing_confirm_mode_offers_only_decision_and_exit() {
        let (dom, container, mut tooltip) = setup();
        tooltip.show(
            &container,
            TooltipMode::Healing {
                confirm: Some(HealPrompt {
                    summary: "button \"Submit Order\"".into(),
                    score: 0.64,
                }),
            },
            None,
        );
        let actions: Vec<_> = dom
            .query_all("[data-wf-action]")
            .unwrap()
            .iter()
            .map(|b| b.attribute("data-wf-action").unwrap())
            .collect();
        assert_eq!(actions, vec!["exit", "confirm-heal", "reject-heal"]);
        let body = dom.query_all(".wf-tooltip-body").unwrap().remove(0);
        assert!(body.own_text().contains("64%"));
    }

    #[test]
    fn healing_spinner_keeps_close_enabled() {
        let (dom, container, mut tooltip) = setup();
        tooltip.show(&container, TooltipMode::Healing { confirm: None }, None);
        let close = dom.query_all(".wf-tooltip-close").unwrap().remove(0);
        assert!(close.attribute("disabled").is_none());
        assert_eq!(dom.query_all(".wf-spinner").unwrap().len(), 1);
    }

    #[test]
    fn placement_prefers_below_then_flips_above() {
        let viewport = Size::new(1280.0, 800.0);
        let below = smart_position(Some(Rect::new(500.0, 100.0, 100.0, 40.0)), viewport);
        assert_eq!(below.y, 156.0);

        let above = smart_position(Some(Rect::new(500.0, 700.0, 100.0, 40.0)), viewport);
        assert_eq!(above.y, 700.0 - 16.0 - TOOLTIP_HEIGHT);
    }

    #[test]
    fn cornered_target_falls_back_to_corner() {
        let viewport = Size::new(360.0, 200.0);
        let position = smart_position(Some(Rect::new(0.0, 0.0, 360.0, 200.0)), viewport);
        assert_eq!(
            position,
            Point::new(360.0 - TOOLTIP_WIDTH - 16.0, 200.0 - TOOLTIP_HEIGHT - 16.0)
        );
    }

    #[test]
    fn dragging_moves_and_pins_the_tooltip() {
        let (dom, container, mut tooltip) = setup();
        tooltip.show(&container, step_mode(), Some(Rect::new(100.0, 100.0, 80.0, 30.0)));
        let header = dom.query_all(".wf-tooltip-header").unwrap().remove(0);
        let start = tooltip.current_position();

        assert!(tooltip.handle_pointer(
            UserEventKind::PointerDown,
            &header,
            Point::new(start.x + 10.0, start.y + 5.0)
        ));
        assert!(tooltip.handle_pointer(
            UserEventKind::PointerMove,
            &header,
            Point::new(start.x + 110.0, start.y + 45.0)
        ));
        assert!(tooltip.handle_pointer(
            UserEventKind::PointerUp,
            &header,
            Point::new(start.x + 110.0, start.y + 45.0)
        ));

        let node = dom.query_all(".wf-tooltip").unwrap().remove(0);
        assert_eq!(node.style("left").as_deref(), Some(&*format!("{:.0}px", start.x + 100.0)));

        // Scroll reposition keeps the dragged position
        tooltip.reposition(Some(Rect::new(100.0, 100.0, 80.0, 30.0)));
        let node = dom.query_all(".wf-tooltip").unwrap().remove(0);
        assert_eq!(node.style("left").as_deref(), Some(&*format!("{:.0}px", start.x + 100.0)));
    }

    #[test]
    fn mode_switch_resets_drag_state() {
        let (dom, container, mut tooltip) = setup();
        tooltip.show(&container, step_mode(), None);
        let header = dom.query_all(".wf-tooltip-header").unwrap().remove(0);
        tooltip.handle_pointer(UserEventKind::PointerDown, &header, Point::new(10.0, 10.0));
        tooltip.show(
            &container,
            TooltipMode::Error {
                message: "missing".into(),
                retry_count: 1,
            },
            None,
        );
        // The old drag no longer tracks pointer movement
        assert!(!tooltip.handle_pointer(
            UserEventKind::PointerMove,
            &header,
            Point::new(300.0, 300.0)
        ));
    }
}
