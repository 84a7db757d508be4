//! End-to-end healing scenarios on drifted documents
//!
//! Each test builds the recording-time document, extracts the recorded
//! context from it, rebuilds the page the way a deploy would have changed
//! it, and heals against the live version.

use crate::context::{ActionData, ActionType, RecordedStep, SelectorHints};
use crate::dom::{DomBackend, DomNode, MemoryDom};
use crate::healing::{AiValidator, AiVerdict, HealOptions, HealResolution, UserPrompter};
use crate::metadata::MetadataExtractor;
use crate::{ElementContext, HealConfig, HealError, Healer};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

fn recorded_step(dom: &MemoryDom, node: &DomNode) -> RecordedStep {
    let extractor = MetadataExtractor::new(Arc::new(dom.clone()));
    let element_meta = extractor.extract(node);
    RecordedStep {
        id: "step-1".into(),
        workflow_id: "wf-1".into(),
        step_number: 1,
        action_type: ActionType::Click,
        instruction: Some("Click the button".into()),
        field_label: None,
        selectors: SelectorHints {
            primary: node.id().map(|id| format!("#{id}")),
            ..Default::default()
        },
        element_meta,
        action_data: ActionData::default(),
        ai_confidence: None,
        screenshot_id: None,
    }
}

/// AI validator stub that records invocations
struct ScriptedValidator {
    verdict: Result<AiVerdict, ()>,
    called: AtomicBool,
}

impl ScriptedValidator {
    fn accepting(confidence: f64) -> Arc<Self> {
        Arc::new(Self {
            verdict: Ok(AiVerdict {
                is_match: true,
                confidence,
            }),
            called: AtomicBool::new(false),
        })
    }

    fn rejecting(confidence: f64) -> Arc<Self> {
        Arc::new(Self {
            verdict: Ok(AiVerdict {
                is_match: false,
                confidence,
            }),
            called: AtomicBool::new(false),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            verdict: Err(()),
            called: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl AiValidator for ScriptedValidator {
    async fn validate(
        &self,
        _original: &ElementContext,
        _candidate: &ElementContext,
        _score: f64,
    ) -> Result<AiVerdict, HealError> {
        self.called.store(true, Ordering::SeqCst);
        self.verdict
            .clone()
            .map_err(|_| HealError::AiValidation("planner offline".into()))
    }
}

/// User prompter stub with a scripted answer
struct ScriptedPrompter {
    confirm: bool,
    calls: AtomicUsize,
}

impl ScriptedPrompter {
    fn confirming() -> Arc<Self> {
        Arc::new(Self {
            confirm: true,
            calls: AtomicUsize::new(0),
        })
    }

    fn rejecting() -> Arc<Self> {
        Arc::new(Self {
            confirm: false,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl UserPrompter for ScriptedPrompter {
    async fn confirm(
        &self,
        _element: &DomNode,
        _context: &ElementContext,
        _score: f64,
    ) -> Result<bool, HealError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.confirm)
    }
}

fn options(
    validator: Option<Arc<ScriptedValidator>>,
    prompter: Option<Arc<ScriptedPrompter>>,
) -> HealOptions {
    HealOptions {
        ai_validator: validator.map(|v| v as Arc<dyn AiValidator>),
        user_prompter: prompter.map(|p| p as Arc<dyn UserPrompter>),
    }
}

/// Checkout page: main region, payment heading, one form with a field and
/// a submit button.
fn checkout_page(button_id: &str) -> (MemoryDom, DomNode) {
    let dom = MemoryDom::new();
    let body = dom.body();
    let main = dom
        .append(&body, "main")
        .bounds(0.0, 100.0, 1280.0, 700.0)
        .node();
    dom.append(&main, "h2")
        .text("Payment Information")
        .bounds(100.0, 140.0, 300.0, 32.0);
    let form = dom
        .append(&main, "form")
        .attr("id", "checkout")
        .attr("action", "/checkout")
        .class("checkout-form")
        .bounds(100.0, 190.0, 600.0, 300.0)
        .node();
    dom.append(&form, "input")
        .attr("type", "text")
        .attr("name", "card")
        .bounds(100.0, 220.0, 300.0, 32.0);
    let button = dom
        .append(&form, "button")
        .attr("id", button_id)
        .attr("type", "submit")
        .class("btn btn-primary")
        .text("Submit Order")
        .bounds(100.0, 300.0, 140.0, 40.0)
        .node();
    (dom, button)
}

#[tokio::test]
async fn renamed_id_in_same_form_heals_automatically() {
    let (recording_dom, recorded_button) = checkout_page("submit-btn");
    let step = recorded_step(&recording_dom, &recorded_button);

    // The deploy renamed the id, everything else held
    let (live_dom, live_button) = checkout_page("submitButton");
    let healer = Healer::new_default(Arc::new(live_dom)).unwrap();
    let result = healer.heal(&step, &options(None, None)).await.unwrap();

    assert_eq!(result.resolution, HealResolution::HealedAuto);
    assert!(result.confidence >= 0.85, "got {}", result.confidence);
    assert_eq!(
        result.element.as_ref().unwrap().node_id(),
        live_button.node_id()
    );
    assert!(result.log.vetoes_applied.iter().all(|v| !v.contains("hard")));
}

#[tokio::test]
async fn same_text_button_in_wrong_form_is_refused() {
    // Recorded: "Submit" inside the checkout form
    let recording_dom = MemoryDom::new();
    let body = recording_dom.body();
    let checkout = recording_dom
        .append(&body, "form")
        .attr("id", "checkout-form")
        .bounds(100.0, 100.0, 500.0, 300.0)
        .node();
    let recorded_button = recording_dom
        .append(&checkout, "button")
        .text("Submit")
        .bounds(120.0, 300.0, 100.0, 36.0)
        .node();
    let step = recorded_step(&recording_dom, &recorded_button);

    // Live: the checkout form is gone; a newsletter form offers the
    // same-text button at the same spot
    let live_dom = MemoryDom::new();
    let live_body = live_dom.body();
    let newsletter = live_dom
        .append(&live_body, "form")
        .attr("id", "newsletter-form")
        .bounds(100.0, 100.0, 500.0, 300.0)
        .node();
    live_dom
        .append(&newsletter, "button")
        .text("Submit")
        .bounds(120.0, 300.0, 100.0, 36.0);

    let healer = Healer::new_default(Arc::new(live_dom)).unwrap();
    let result = healer.heal(&step, &options(None, None)).await.unwrap();

    assert_eq!(result.resolution, HealResolution::Failed);
    assert!(result.element.is_none());
    assert_eq!(result.log.top_score, 0.0);
    assert!(result
        .log
        .vetoes_applied
        .iter()
        .any(|v| v.contains("form")));
}

#[tokio::test]
async fn modal_recorded_element_never_heals_outside_a_modal() {
    let recording_dom = MemoryDom::new();
    let body = recording_dom.body();
    let modal = recording_dom
        .append(&body, "div")
        .attr("role", "dialog")
        .bounds(400.0, 200.0, 480.0, 320.0)
        .node();
    let recorded_button = recording_dom
        .append(&modal, "button")
        .text("Confirm")
        .bounds(420.0, 440.0, 110.0, 36.0)
        .node();
    let step = recorded_step(&recording_dom, &recorded_button);

    // The modal is gone; an identical button sits in the main content
    let live_dom = MemoryDom::new();
    let live_body = live_dom.body();
    let main = live_dom.append(&live_body, "main").node();
    live_dom
        .append(&main, "button")
        .text("Confirm")
        .bounds(420.0, 440.0, 110.0, 36.0);

    let healer = Healer::new_default(Arc::new(live_dom)).unwrap();
    let result = healer.heal(&step, &options(None, None)).await.unwrap();

    assert_eq!(result.resolution, HealResolution::Failed);
    assert!(result
        .log
        .vetoes_applied
        .iter()
        .any(|v| v.contains("modal")));
}

fn banner_page(container_tag: &str, y: f64) -> (MemoryDom, DomNode) {
    let dom = MemoryDom::new();
    let body = dom.body();
    let container = dom
        .append(&body, container_tag)
        .bounds(0.0, y - 10.0, 1280.0, 60.0)
        .node();
    let button = dom
        .append(&container, "button")
        .attr("id", "site-search")
        .class("icon-btn")
        .text("Search")
        .bounds(600.0, y, 80.0, 30.0)
        .node();
    (dom, button)
}

#[tokio::test]
async fn region_drift_soft_veto_lands_in_the_user_prompt_band() {
    let (recording_dom, recorded_button) = banner_page("header", 20.0);
    let step = recorded_step(&recording_dom, &recorded_button);

    // Same control moved into the footer, close enough positionally
    let (live_dom, _) = banner_page("footer", 230.0);
    let prompter = ScriptedPrompter::confirming();
    let healer = Healer::new_default(Arc::new(live_dom)).unwrap();
    let result = healer
        .heal(&step, &options(None, Some(prompter.clone())))
        .await
        .unwrap();

    assert_eq!(result.resolution, HealResolution::HealedUser);
    assert_eq!(prompter.calls.load(Ordering::SeqCst), 1);
    assert!(
        result.confidence >= 0.60 && result.confidence < 0.70,
        "expected the user-prompt band, got {}",
        result.confidence
    );
    let region_vetoes: Vec<_> = result
        .log
        .vetoes_applied
        .iter()
        .filter(|v| v.contains("region"))
        .collect();
    assert_eq!(region_vetoes.len(), 1);
}

#[tokio::test]
async fn soft_vetoed_match_fails_when_the_user_rejects() {
    let (recording_dom, recorded_button) = banner_page("header", 20.0);
    let step = recorded_step(&recording_dom, &recorded_button);

    let (live_dom, _) = banner_page("footer", 230.0);
    let prompter = ScriptedPrompter::rejecting();
    let healer = Healer::new_default(Arc::new(live_dom)).unwrap();
    let result = healer
        .heal(&step, &options(None, Some(prompter)))
        .await
        .unwrap();
    assert_eq!(result.resolution, HealResolution::Failed);
}

fn signup_page(button_id: &str) -> (MemoryDom, DomNode) {
    let dom = MemoryDom::new();
    let body = dom.body();
    let main = dom
        .append(&body, "main")
        .bounds(0.0, 100.0, 1280.0, 700.0)
        .node();
    let form = dom
        .append(&main, "form")
        .attr("id", "signup")
        .bounds(200.0, 160.0, 500.0, 280.0)
        .node();
    dom.append(&form, "input")
        .attr("type", "email")
        .attr("name", "email")
        .bounds(220.0, 200.0, 280.0, 32.0);
    let button = dom
        .append(&form, "button")
        .attr("id", button_id)
        .class("btn primary-action")
        .text("Create account")
        .bounds(220.0, 260.0, 150.0, 40.0)
        .node();
    (dom, button)
}

#[tokio::test]
async fn generated_ids_neither_help_nor_hurt() {
    let (recording_dom, recorded_button) = signup_page(":r0:");
    let step = recorded_step(&recording_dom, &recorded_button);

    let (live_dom, live_button) = signup_page(":r5:");
    let healer = Healer::new_default(Arc::new(live_dom)).unwrap();
    let result = healer.heal(&step, &options(None, None)).await.unwrap();

    assert_eq!(result.resolution, HealResolution::HealedAuto);
    assert!(result.confidence >= 0.80, "got {}", result.confidence);
    assert_eq!(
        result.element.as_ref().unwrap().node_id(),
        live_button.node_id()
    );
}

/// Payment page whose button text drifts enough to land mid-band
fn payment_page(button_id: &str, button_text: &str) -> (MemoryDom, DomNode) {
    let dom = MemoryDom::new();
    let body = dom.body();
    let main = dom
        .append(&body, "main")
        .bounds(0.0, 100.0, 1280.0, 700.0)
        .node();
    let form = dom
        .append(&main, "form")
        .attr("id", "payment")
        .bounds(100.0, 180.0, 500.0, 260.0)
        .node();
    dom.append(&form, "label")
        .attr("for", "pay-now")
        .text("Payment")
        .bounds(100.0, 220.0, 120.0, 20.0);
    let button = dom
        .append(&form, "button")
        .attr("id", button_id)
        .class("btn")
        .text(button_text)
        .bounds(100.0, 260.0, 120.0, 40.0)
        .node();
    (dom, button)
}

#[tokio::test]
async fn ambiguous_match_is_blessed_by_ai_validation() {
    let (recording_dom, recorded_button) = payment_page("pay-now", "Pay now");
    let step = recorded_step(&recording_dom, &recorded_button);

    let (live_dom, live_button) = payment_page("payNowBtn", "Proceed to payment");
    let validator = ScriptedValidator::accepting(0.9);
    let healer = Healer::new_default(Arc::new(live_dom)).unwrap();
    let result = healer
        .heal(&step, &options(Some(validator.clone()), None))
        .await
        .unwrap();

    assert!(validator.called.load(Ordering::SeqCst));
    assert_eq!(result.resolution, HealResolution::HealedAi);
    assert_eq!(result.log.ai_score, Some(0.9));
    assert_eq!(
        result.element.as_ref().unwrap().node_id(),
        live_button.node_id()
    );
    // Blended: 0.6 deterministic + 0.4 ai
    let det = result.log.deterministic_score;
    assert!((result.confidence - (0.6 * det + 0.4 * 0.9)).abs() < 1e-9);
}

#[tokio::test]
async fn confident_ai_rejection_fails_the_heal() {
    let (recording_dom, recorded_button) = payment_page("pay-now", "Pay now");
    let step = recorded_step(&recording_dom, &recorded_button);

    let (live_dom, _) = payment_page("payNowBtn", "Proceed to payment");
    let validator = ScriptedValidator::rejecting(0.2);
    let healer = Healer::new_default(Arc::new(live_dom)).unwrap();
    let result = healer
        .heal(&step, &options(Some(validator), None))
        .await
        .unwrap();
    assert_eq!(result.resolution, HealResolution::Failed);
}

#[tokio::test]
async fn ai_failure_falls_back_to_the_user_prompt() {
    let (recording_dom, recorded_button) = payment_page("pay-now", "Pay now");
    let step = recorded_step(&recording_dom, &recorded_button);

    let (live_dom, _) = payment_page("payNowBtn", "Proceed to payment");
    let validator = ScriptedValidator::failing();
    let prompter = ScriptedPrompter::confirming();
    let healer = Healer::new_default(Arc::new(live_dom)).unwrap();
    let result = healer
        .heal(&step, &options(Some(validator), Some(prompter.clone())))
        .await
        .unwrap();

    assert_eq!(result.resolution, HealResolution::HealedUser);
    assert_eq!(prompter.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn without_ai_the_fallback_thresholds_demand_more() {
    let (recording_dom, recorded_button) = payment_page("pay-now", "Pay now");
    let step = recorded_step(&recording_dom, &recorded_button);

    // Mid-band score, no AI wired: falls through to the user prompt
    let (live_dom, _) = payment_page("payNowBtn", "Proceed to payment");
    let prompter = ScriptedPrompter::confirming();
    let healer = Healer::new_default(Arc::new(live_dom)).unwrap();
    let result = healer
        .heal(&step, &options(None, Some(prompter.clone())))
        .await
        .unwrap();
    assert_eq!(result.resolution, HealResolution::HealedUser);
    assert_eq!(prompter.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn slow_ai_is_bounded_by_the_timeout() {
    struct SleepyValidator;
    #[async_trait]
    impl AiValidator for SleepyValidator {
        async fn validate(
            &self,
            _: &ElementContext,
            _: &ElementContext,
            _: f64,
        ) -> Result<AiVerdict, HealError> {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            Ok(AiVerdict {
                is_match: true,
                confidence: 0.9,
            })
        }
    }

    let (recording_dom, recorded_button) = payment_page("pay-now", "Pay now");
    let step = recorded_step(&recording_dom, &recorded_button);
    let (live_dom, _) = payment_page("payNowBtn", "Proceed to payment");

    let mut config = HealConfig::default();
    config.ai.timeout_ms = 20;
    let prompter = ScriptedPrompter::confirming();
    let healer = Healer::new(Arc::new(live_dom), config).unwrap();
    let result = healer
        .heal(
            &step,
            &HealOptions {
                ai_validator: Some(Arc::new(SleepyValidator)),
                user_prompter: Some(prompter.clone() as Arc<dyn UserPrompter>),
            },
        )
        .await
        .unwrap();

    // Timed-out AI falls through to the fallback path
    assert_eq!(result.resolution, HealResolution::HealedUser);
    assert_eq!(prompter.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unanswered_prompt_times_out_into_failure() {
    struct SilentPrompter;
    #[async_trait]
    impl UserPrompter for SilentPrompter {
        async fn confirm(
            &self,
            _: &DomNode,
            _: &ElementContext,
            _: f64,
        ) -> Result<bool, HealError> {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            Ok(true)
        }
    }

    let (recording_dom, recorded_button) = payment_page("pay-now", "Pay now");
    let step = recorded_step(&recording_dom, &recorded_button);
    let (live_dom, _) = payment_page("payNowBtn", "Proceed to payment");

    let mut config = HealConfig::default();
    config.user_prompt_timeout_ms = 20;
    let healer = Healer::new(Arc::new(live_dom), config).unwrap();
    let result = healer
        .heal(
            &step,
            &HealOptions {
                ai_validator: None,
                user_prompter: Some(Arc::new(SilentPrompter)),
            },
        )
        .await
        .unwrap();
    assert_eq!(result.resolution, HealResolution::Failed);
}

#[tokio::test]
async fn healing_an_unchanged_dom_is_deterministic() {
    let (recording_dom, recorded_button) = checkout_page("submit-btn");
    let step = recorded_step(&recording_dom, &recorded_button);

    let (live_dom, _) = checkout_page("submitButton");
    let healer = Healer::new_default(Arc::new(live_dom)).unwrap();
    let first = healer.heal(&step, &options(None, None)).await.unwrap();
    let second = healer.heal(&step, &options(None, None)).await.unwrap();

    assert_eq!(
        first.element.as_ref().unwrap().node_id(),
        second.element.as_ref().unwrap().node_id()
    );
    assert!((first.confidence - second.confidence).abs() < 1e-9);
}

#[tokio::test]
async fn empty_page_yields_a_principled_failure() {
    let (recording_dom, recorded_button) = checkout_page("submit-btn");
    let step = recorded_step(&recording_dom, &recorded_button);

    let live_dom = MemoryDom::new();
    let healer = Healer::new_default(Arc::new(live_dom)).unwrap();
    let result = healer.heal(&step, &options(None, None)).await.unwrap();
    assert_eq!(result.resolution, HealResolution::Failed);
    assert_eq!(result.log.candidates_evaluated, 0);
}
