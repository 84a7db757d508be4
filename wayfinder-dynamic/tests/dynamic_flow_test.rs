//! Dynamic-mode controller flows with a scripted planner

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wayfinder::{ActionType, DomBackend, FeatureFlags, MemoryDom, UserEventKind};
use wayfinder_dynamic::{
    CompletedDynamicStep, DynamicCommand, DynamicConfig, DynamicController, DynamicError,
    DynamicState, PlannedStep, Planner, PlannerContext, PlannerDecision, StepOutcome, TabMessage,
};

struct ScriptedPlanner {
    decisions: Mutex<VecDeque<PlannerDecision>>,
    seen_histories: Mutex<Vec<Vec<CompletedDynamicStep>>>,
}

impl ScriptedPlanner {
    fn new(decisions: Vec<PlannerDecision>) -> Arc<Self> {
        Arc::new(Self {
            decisions: Mutex::new(decisions.into()),
            seen_histories: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn next_step(
        &self,
        _context: &PlannerContext,
        history: &[CompletedDynamicStep],
    ) -> Result<PlannerDecision, DynamicError> {
        self.seen_histories.lock().unwrap().push(history.to_vec());
        Ok(self
            .decisions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(PlannerDecision::Done {
                message: "nothing left".into(),
            }))
    }
}

fn click_step(index: usize, instruction: &str) -> PlannerDecision {
    PlannerDecision::Step(PlannedStep {
        instruction: instruction.into(),
        element_index: Some(index),
        selector_hint: None,
        action_type: ActionType::Click,
        value: None,
    })
}

fn enabled_flags() -> FeatureFlags {
    FeatureFlags {
        dynamic_workflow_enabled: true,
    }
}

fn page() -> MemoryDom {
    let dom = MemoryDom::new();
    dom.set_url("https://app.example/expenses");
    dom.set_title("Expenses");
    let body = dom.body();
    dom.append(&body, "button")
        .attr("id", "new-expense")
        .text("New expense")
        .bounds(100.0, 100.0, 120.0, 32.0);
    dom.append(&body, "button")
        .attr("id", "save")
        .text("Save")
        .bounds(100.0, 160.0, 80.0, 32.0);
    dom
}

fn controller(dom: &MemoryDom, planner: Arc<ScriptedPlanner>) -> DynamicController {
    DynamicController::new(
        Arc::new(dom.clone()),
        planner,
        "file an expense".into(),
        &enabled_flags(),
        DynamicConfig {
            planner_timeout_ms: 500,
            url_stability_window_ms: 50,
            max_consecutive_misses: 3,
        },
    )
    .unwrap()
}

async fn wait_for(controller: &DynamicController, state: DynamicState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        if controller.snapshot().machine_state == state {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!(
                "timed out waiting for {state:?}, last {:?}",
                controller.snapshot().machine_state
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn disabled_flag_refuses_the_session() {
    let dom = page();
    let planner = ScriptedPlanner::new(vec![]);
    let result = DynamicController::new(
        Arc::new(dom),
        planner,
        "goal".into(),
        &FeatureFlags::default(),
        DynamicConfig::default(),
    );
    assert!(matches!(result, Err(DynamicError::FeatureDisabled)));
}

#[tokio::test]
async fn planner_guides_two_steps_to_completion() {
    let dom = page();
    let planner = ScriptedPlanner::new(vec![
        click_step(0, "Click New expense"),
        click_step(1, "Click Save"),
        PlannerDecision::Done {
            message: "expense filed".into(),
        },
    ]);
    let controller = controller(&dom, planner.clone());
    controller.start().await.unwrap();

    wait_for(&controller, DynamicState::WaitingAction).await;
    assert_eq!(
        controller.snapshot().current_instruction.as_deref(),
        Some("Click New expense")
    );
    // The overlay spotlights the planner's pick
    assert_eq!(dom.query_all("#wayfinder-overlay-root").unwrap().len(), 1);

    let first = dom.query_all("#new-expense").unwrap().remove(0);
    dom.dispatch(&first, UserEventKind::Click);

    wait_for(&controller, DynamicState::WaitingAction).await;
    let save = dom.query_all("#save").unwrap().remove(0);
    dom.dispatch(&save, UserEventKind::Click);

    wait_for(&controller, DynamicState::Completed).await;
    assert_eq!(controller.snapshot().step_count, 2);

    // The planner saw the history grow
    let histories = planner.seen_histories.lock().unwrap();
    assert_eq!(histories.len(), 3);
    assert!(histories[2]
        .iter()
        .all(|s| s.outcome == StepOutcome::Completed));
}

#[tokio::test]
async fn planner_failure_surfaces_as_a_session_error() {
    struct BrokenPlanner;
    #[async_trait]
    impl Planner for BrokenPlanner {
        async fn next_step(
            &self,
            _: &PlannerContext,
            _: &[CompletedDynamicStep],
        ) -> Result<PlannerDecision, DynamicError> {
            Err(DynamicError::Planner("model endpoint unreachable".into()))
        }
    }

    let dom = page();
    let controller = DynamicController::new(
        Arc::new(dom),
        Arc::new(BrokenPlanner),
        "goal".into(),
        &enabled_flags(),
        DynamicConfig::default(),
    )
    .unwrap();
    controller.start().await.unwrap();

    wait_for(&controller, DynamicState::Error).await;
    let snapshot = controller.snapshot();
    assert!(snapshot
        .last_error
        .unwrap()
        .contains("model endpoint unreachable"));
}

#[tokio::test]
async fn missing_elements_are_reported_and_bounded() {
    let dom = page();
    let planner = ScriptedPlanner::new(vec![
        click_step(50, "Click the phantom"),
        click_step(60, "Click the phantom again"),
        click_step(70, "Click the phantom a third time"),
    ]);
    let controller = controller(&dom, planner.clone());
    controller.start().await.unwrap();

    wait_for(&controller, DynamicState::Error).await;
    let histories = planner.seen_histories.lock().unwrap();
    let last = histories.last().unwrap();
    assert!(last
        .iter()
        .all(|s| s.outcome == StepOutcome::ElementNotFound));
}

#[tokio::test]
async fn selector_hint_rescues_a_stale_index() {
    let dom = page();
    let planner = ScriptedPlanner::new(vec![
        PlannerDecision::Step(PlannedStep {
            instruction: "Click Save".into(),
            element_index: Some(99),
            selector_hint: Some("#save".into()),
            action_type: ActionType::Click,
            value: None,
        }),
        PlannerDecision::Done {
            message: "done".into(),
        },
    ]);
    let controller = controller(&dom, planner);
    controller.start().await.unwrap();

    wait_for(&controller, DynamicState::WaitingAction).await;
    let save = dom.query_all("#save").unwrap().remove(0);
    dom.dispatch(&save, UserEventKind::Click);
    wait_for(&controller, DynamicState::Completed).await;
}

#[tokio::test]
async fn skip_command_moves_on_without_completing() {
    let dom = page();
    let planner = ScriptedPlanner::new(vec![
        click_step(0, "Click New expense"),
        PlannerDecision::Done {
            message: "done".into(),
        },
    ]);
    let controller = controller(&dom, planner.clone());
    controller.start().await.unwrap();

    wait_for(&controller, DynamicState::WaitingAction).await;
    controller.command(DynamicCommand::Skip);
    wait_for(&controller, DynamicState::Completed).await;

    assert_eq!(controller.snapshot().step_count, 0);
    let histories = planner.seen_histories.lock().unwrap();
    assert_eq!(histories[1][0].outcome, StepOutcome::Skipped);
}

#[tokio::test]
async fn exit_command_tears_down_mid_step() {
    let dom = page();
    let planner = ScriptedPlanner::new(vec![click_step(0, "Click New expense")]);
    let controller = controller(&dom, planner);
    controller.start().await.unwrap();

    wait_for(&controller, DynamicState::WaitingAction).await;
    controller.command(DynamicCommand::Exit);
    wait_for(&controller, DynamicState::Idle).await;
    assert!(!controller.is_running());
    assert!(dom.query_all("#wayfinder-overlay-root").unwrap().is_empty());
}

#[tokio::test]
async fn navigation_recaptures_before_replanning() {
    let dom = page();
    let planner = ScriptedPlanner::new(vec![
        click_step(0, "Click New expense"),
        PlannerDecision::Done {
            message: "done".into(),
        },
    ]);
    let controller = controller(&dom, planner.clone());
    controller.start().await.unwrap();

    wait_for(&controller, DynamicState::WaitingAction).await;
    dom.set_url("https://app.example/expenses/new");
    wait_for(&controller, DynamicState::Completed).await;

    // The step never completed; the planner was consulted again after
    // navigation with the original step unresolved
    assert_eq!(controller.snapshot().step_count, 0);
    assert_eq!(planner.seen_histories.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn tab_ready_reports_session_state() {
    let dom = page();
    let planner = ScriptedPlanner::new(vec![click_step(0, "Click New expense")]);
    let controller = controller(&dom, planner);

    let reply = controller
        .handle_message(TabMessage::TabReady {
            tab_id: 7,
            url: "https://app.example".into(),
        })
        .unwrap();
    assert!(!reply.has_active_session);

    controller.start().await.unwrap();
    wait_for(&controller, DynamicState::WaitingAction).await;
    let reply = controller
        .handle_message(TabMessage::TabReady {
            tab_id: 7,
            url: "https://app.example".into(),
        })
        .unwrap();
    assert!(reply.has_active_session);
    assert_eq!(
        reply.state.unwrap().machine_state,
        DynamicState::WaitingAction
    );

    controller.command(DynamicCommand::Exit);
    wait_for(&controller, DynamicState::Idle).await;
}

#[tokio::test]
async fn report_context_message_mirrors_the_capture() {
    let dom = page();
    let planner = ScriptedPlanner::new(vec![click_step(0, "Click New expense")]);
    let controller = controller(&dom, planner);
    controller.start().await.unwrap();
    wait_for(&controller, DynamicState::WaitingAction).await;

    let message = controller.report_context_message().unwrap();
    match message {
        TabMessage::ReportContext {
            element_count,
            url,
            page_context_text,
            ..
        } => {
            assert_eq!(element_count, 2);
            assert_eq!(url, "https://app.example/expenses");
            assert!(page_context_text.contains("[0]"));
        }
        other => panic!("unexpected message {other:?}"),
    }

    controller.command(DynamicCommand::Exit);
    wait_for(&controller, DynamicState::Idle).await;
}
