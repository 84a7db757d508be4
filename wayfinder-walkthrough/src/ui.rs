//! Walkthrough UI facade
//!
//! The only holder of the overlay, both renderers, and the current target.
//! Renderers never reach sideways: every viewport change flows through
//! here and repositions the spotlight first, then the tooltip, in one
//! pass so they cannot drift apart. Render methods surface overlay
//! breakage to the caller; the session converts it into the fatal path.

use crate::error::WalkthroughError;
use crate::overlay::OverlayManager;
use crate::spotlight::SpotlightRenderer;
use crate::tooltip::{HealPrompt, TooltipMode, TooltipRenderer};
use std::sync::Arc;
use tracing::debug;
use wayfinder::{DomBackend, DomNode, Point, Rect, RecordedStep, UserEventKind};

pub struct WalkthroughUI {
    backend: Arc<dyn DomBackend>,
    overlay: OverlayManager,
    spotlight: SpotlightRenderer,
    tooltip: TooltipRenderer,
    target: Option<DomNode>,
}

impl WalkthroughUI {
    pub fn new(backend: Arc<dyn DomBackend>) -> Self {
        Self {
            overlay: OverlayManager::new(backend.clone()),
            spotlight: SpotlightRenderer::new(backend.clone()),
            tooltip: TooltipRenderer::new(backend.clone()),
            backend,
            target: None,
        }
    }

    pub fn is_created(&self) -> bool {
        self.overlay.is_created()
    }

    pub fn target(&self) -> Option<&DomNode> {
        self.target.as_ref()
    }

    /// Spotlight the step's element and show its instruction
    pub fn show_step(
        &mut self,
        step: &RecordedStep,
        target: &DomNode,
        index: usize,
        total: usize,
    ) -> Result<(), WalkthroughError> {
        let container = self.overlay.create()?;
        self.target = Some(target.clone());
        self.spotlight.show(&container, target);
        let instruction = step
            .instruction
            .clone()
            .or_else(|| step.field_label.clone())
            .unwrap_or_else(|| "Perform the highlighted action".to_string());
        self.tooltip.show(
            &container,
            TooltipMode::Step {
                instruction,
                step_number: index + 1,
                total_steps: total,
            },
            self.target_viewport_rect(),
        );
        Ok(())
    }

    /// A navigate step: no spotlight, instruction to follow the link
    pub fn show_navigate_step(&mut self, target_url: &str) -> Result<(), WalkthroughError> {
        let container = self.overlay.create()?;
        self.target = None;
        self.spotlight.hide();
        self.tooltip.show(
            &container,
            TooltipMode::NavigateStep {
                target_url: target_url.to_string(),
            },
            None,
        );
        Ok(())
    }

    pub fn show_healing(&mut self) -> Result<(), WalkthroughError> {
        let container = self.overlay.create()?;
        self.spotlight.hide();
        self.tooltip
            .show(&container, TooltipMode::Healing { confirm: None }, None);
        Ok(())
    }

    /// Healing found a candidate that needs the user's blessing
    pub fn show_heal_confirm(
        &mut self,
        candidate: &DomNode,
        summary: String,
        score: f64,
    ) -> Result<(), WalkthroughError> {
        let container = self.overlay.create()?;
        self.target = Some(candidate.clone());
        self.spotlight.show(&container, candidate);
        self.tooltip.show(
            &container,
            TooltipMode::Healing {
                confirm: Some(HealPrompt { summary, score }),
            },
            self.target_viewport_rect(),
        );
        Ok(())
    }

    pub fn show_error(&mut self, message: &str, retry_count: u32) -> Result<(), WalkthroughError> {
        let container = self.overlay.create()?;
        self.spotlight.hide();
        self.tooltip.show(
            &container,
            TooltipMode::Error {
                message: message.to_string(),
                retry_count,
            },
            None,
        );
        Ok(())
    }

    pub fn show_completion(&mut self, workflow_name: &str) -> Result<(), WalkthroughError> {
        let container = self.overlay.create()?;
        self.target = None;
        self.spotlight.hide();
        self.tooltip.show(
            &container,
            TooltipMode::Completion {
                workflow_name: workflow_name.to_string(),
            },
            None,
        );
        Ok(())
    }

    pub fn show_navigating(&mut self) -> Result<(), WalkthroughError> {
        let container = self.overlay.create()?;
        self.spotlight.hide();
        self.tooltip.show(&container, TooltipMode::Navigation, None);
        Ok(())
    }

    /// One atomic pass: spotlight, then tooltip
    pub fn reposition(&mut self) {
        if !self.overlay.is_created() {
            return;
        }
        self.spotlight.reposition();
        self.tooltip.reposition(self.target_viewport_rect());
    }

    /// Route a pointer event to the tooltip drag lifecycle
    pub fn handle_pointer(&mut self, kind: UserEventKind, target: &DomNode, position: Point) {
        self.tooltip.handle_pointer(kind, target, position);
    }

    /// Full teardown. Idempotent, and leaves no overlay DOM behind.
    pub fn destroy(&mut self) {
        debug!("destroying walkthrough UI");
        self.target = None;
        self.spotlight.destroy();
        self.tooltip.destroy();
        self.overlay.destroy();
    }

    fn target_viewport_rect(&self) -> Option<Rect> {
        let target = self.target.as_ref()?;
        if !target.is_connected() {
            return None;
        }
        let bounds = target.bounds();
        let scroll = self.backend.scroll_offset();
        Some(Rect::new(
            bounds.x - scroll.x,
            bounds.y - scroll.y,
            bounds.width,
            bounds.height,
        ))
    }
}
