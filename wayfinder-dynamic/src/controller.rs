//! Dynamic-mode controller
//!
//! Drives the overlay from an AI planner instead of recorded steps:
//! capture the page, ask the planner for the next step, spotlight the
//! element it picked, wait for the user, repeat. Element indices are only
//! honored against the capture they came from.

use crate::capture::{PageContext, PageContextCapture};
use crate::error::DynamicError;
use crate::messages::{CommandKind, TabMessage, TabReadyReply};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use wayfinder::dom::is_visible;
use wayfinder::redact::redact_value;
use wayfinder::{
    ActionData, ActionType, DomBackend, DomEvent, DomNode, ElementContext, FeatureFlags,
    RecordedStep, SelectorHints, UserEventKind,
};
use wayfinder_walkthrough::{action_events, WalkthroughUI};

const STATE_CHANNEL_CAPACITY: usize = 64;

/// Dynamic-mode machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DynamicState {
    Initializing,
    Capturing,
    Thinking,
    ShowingStep,
    WaitingAction,
    Navigating,
    Error,
    Completed,
    ConfirmingEntities,
    AutoExecuting,
    #[default]
    Idle,
}

/// Snapshot broadcast to subscribers and mirrored over the tab channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicWorkflowState {
    pub machine_state: DynamicState,
    pub goal: String,
    pub step_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_instruction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub url: String,
}

/// A step the planner wants the user to perform. Elements are referenced
/// by index into the latest capture; the selector hint is a fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedStep {
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector_hint: Option<String>,
    pub action_type: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// What the planner decided after reading the page
#[derive(Debug, Clone)]
pub enum PlannerDecision {
    Step(PlannedStep),
    Done { message: String },
    ConfirmEntities { entities: Vec<String> },
}

/// What the planner is told about already-attempted steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedDynamicStep {
    pub instruction: String,
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepOutcome {
    Completed,
    Skipped,
    ElementNotFound,
}

/// The page context as the planner sees it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerContext {
    pub page_context_text: String,
    pub url: String,
    pub title: String,
    pub element_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
}

impl PlannerContext {
    fn from_capture(capture: &PageContext) -> Self {
        Self {
            page_context_text: capture.text.clone(),
            url: capture.url.clone(),
            title: capture.title.clone(),
            element_count: capture.element_count(),
            status_text: capture.status_text.clone(),
        }
    }
}

/// The AI planner collaborator
#[async_trait]
pub trait Planner: Send + Sync {
    async fn next_step(
        &self,
        context: &PlannerContext,
        history: &[CompletedDynamicStep],
    ) -> Result<PlannerDecision, DynamicError>;
}

/// Commands accepted mid-session
#[derive(Debug, Clone)]
pub enum DynamicCommand {
    Exit,
    Skip,
    Feedback(String),
    /// The user reports they performed the step outside our detection
    ReportAction,
    ConfirmEntities(bool),
}

#[derive(Debug, Clone)]
pub struct DynamicConfig {
    pub planner_timeout_ms: u64,
    pub url_stability_window_ms: u64,
    /// Consecutive planner steps whose element cannot be found before the
    /// session gives up
    pub max_consecutive_misses: u32,
}

impl Default for DynamicConfig {
    fn default() -> Self {
        Self {
            planner_timeout_ms: 10_000,
            url_stability_window_ms: 1000,
            max_consecutive_misses: 3,
        }
    }
}

enum ActionOutcome {
    Completed,
    Skipped,
    Navigated,
    Exit,
}

struct ControllerInner {
    backend: Arc<dyn DomBackend>,
    capture: PageContextCapture,
    planner: Arc<dyn Planner>,
    config: DynamicConfig,
    ui: Mutex<WalkthroughUI>,
    state: Mutex<DynamicWorkflowState>,
    state_tx: broadcast::Sender<DynamicWorkflowState>,
    commands_tx: mpsc::UnboundedSender<DynamicCommand>,
    commands_rx: Mutex<Option<mpsc::UnboundedReceiver<DynamicCommand>>>,
    last_capture: Mutex<Option<PageContext>>,
    history: Mutex<Vec<CompletedDynamicStep>>,
    running: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// A planner-driven walkthrough over one document
pub struct DynamicController {
    inner: Arc<ControllerInner>,
}

impl DynamicController {
    /// Feature flags are loaded once here; a disabled flag refuses the
    /// whole session.
    pub fn new(
        backend: Arc<dyn DomBackend>,
        planner: Arc<dyn Planner>,
        goal: String,
        flags: &FeatureFlags,
        config: DynamicConfig,
    ) -> Result<Self, DynamicError> {
        if !flags.dynamic_workflow_enabled {
            return Err(DynamicError::FeatureDisabled);
        }
        let (state_tx, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let url = backend.url();
        Ok(Self {
            inner: Arc::new(ControllerInner {
                capture: PageContextCapture::new(backend.clone()),
                ui: Mutex::new(WalkthroughUI::new(backend.clone())),
                backend,
                planner,
                config,
                state: Mutex::new(DynamicWorkflowState {
                    machine_state: DynamicState::Idle,
                    goal,
                    step_count: 0,
                    current_instruction: None,
                    last_error: None,
                    url,
                }),
                state_tx,
                commands_tx,
                commands_rx: Mutex::new(Some(commands_rx)),
                last_capture: Mutex::new(None),
                history: Mutex::new(Vec::new()),
                running: AtomicBool::new(false),
                task: Mutex::new(None),
            }),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DynamicWorkflowState> {
        self.inner.state_tx.subscribe()
    }

    pub fn snapshot(&self) -> DynamicWorkflowState {
        self.inner.state.lock().unwrap().clone()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Start the capture/plan/guide loop
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<(), DynamicError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            warn!("dynamic session already running");
            return Ok(());
        }
        let Some(commands) = self.inner.commands_rx.lock().unwrap().take() else {
            // A finished session cannot be restarted; its command channel is gone
            self.inner.running.store(false, Ordering::SeqCst);
            return Err(DynamicError::NotRunning);
        };
        info!("starting dynamic session");
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            ControllerInner::run_loop(inner, commands).await;
        });
        *self.inner.task.lock().unwrap() = Some(task);
        Ok(())
    }

    /// Enqueue a user command
    pub fn command(&self, command: DynamicCommand) {
        let _ = self.inner.commands_tx.send(command);
    }

    /// Handle an inbound tab message; returns a reply when one is due
    pub fn handle_message(&self, message: TabMessage) -> Option<TabReadyReply> {
        match message {
            TabMessage::TabReady { tab_id, url } => {
                debug!("tab {tab_id} ready at {url}");
                let active = self.is_running();
                Some(TabReadyReply {
                    has_active_session: active,
                    state: active.then(|| self.snapshot()),
                })
            }
            TabMessage::Command { command, payload } => {
                let mapped = match command {
                    CommandKind::Exit => DynamicCommand::Exit,
                    CommandKind::Skip => DynamicCommand::Skip,
                    CommandKind::ReportAction => DynamicCommand::ReportAction,
                    CommandKind::Feedback => DynamicCommand::Feedback(
                        payload
                            .and_then(|p| p.as_str().map(str::to_string))
                            .unwrap_or_default(),
                    ),
                };
                self.command(mapped);
                None
            }
            // Emissions from our side; nothing to do inbound
            TabMessage::DynamicStateChanged { .. } | TabMessage::ReportContext { .. } => None,
        }
    }

    /// The `REPORT_CONTEXT` message for the latest capture
    pub fn report_context_message(&self) -> Option<TabMessage> {
        let capture = self.inner.last_capture.lock().unwrap();
        let capture = capture.as_ref()?;
        Some(TabMessage::ReportContext {
            page_context_text: capture.text.clone(),
            url: capture.url.clone(),
            title: capture.title.clone(),
            element_count: capture.element_count(),
        })
    }
}

impl ControllerInner {
    fn set_state(&self, machine_state: DynamicState, trigger: &str) {
        let snapshot = {
            let mut state = self.state.lock().unwrap();
            state.machine_state = machine_state;
            state.url = self.backend.url();
            state.clone()
        };
        debug!("dynamic state -> {machine_state:?} ({trigger})");
        let _ = self.state_tx.send(snapshot);
    }

    fn set_error(&self, message: String) {
        {
            let mut state = self.state.lock().unwrap();
            state.last_error = Some(message);
        }
        self.set_state(DynamicState::Error, "error");
    }

    async fn run_loop(
        self: Arc<Self>,
        mut commands: mpsc::UnboundedReceiver<DynamicCommand>,
    ) {
        self.set_state(DynamicState::Initializing, "start");
        // One subscription for the whole session so transitions never miss
        // events that fire between phases
        let mut events = self.backend.events();
        let mut misses = 0u32;

        'session: loop {
            self.set_state(DynamicState::Capturing, "loop");
            let capture = match self.capture.capture() {
                Ok(capture) => capture,
                Err(e) => {
                    self.set_error(format!("capture failed: {e}"));
                    break 'session;
                }
            };
            let planner_context = PlannerContext::from_capture(&capture);
            *self.last_capture.lock().unwrap() = Some(capture);

            self.set_state(DynamicState::Thinking, "captured");
            let history = self.history.lock().unwrap().clone();
            let decision = tokio::time::timeout(
                Duration::from_millis(self.config.planner_timeout_ms),
                self.planner.next_step(&planner_context, &history),
            )
            .await;

            let decision = match decision {
                Err(_) => {
                    self.set_error(
                        DynamicError::PlannerTimeout(self.config.planner_timeout_ms).to_string(),
                    );
                    break 'session;
                }
                Ok(Err(e)) => {
                    self.set_error(e.to_string());
                    break 'session;
                }
                Ok(Ok(decision)) => decision,
            };

            match decision {
                PlannerDecision::Done { message } => {
                    info!("dynamic session complete: {message}");
                    let rendered = {
                        let goal = self.state.lock().unwrap().goal.clone();
                        self.ui.lock().unwrap().show_completion(&goal)
                    };
                    if let Err(e) = rendered {
                        // Still a completion; the snapshot is the record
                        warn!("overlay unavailable for the completion card: {e}");
                    }
                    self.set_state(DynamicState::Completed, "planner_done");
                    self.wait_for_exit(&mut commands, &mut events).await;
                    break 'session;
                }
                PlannerDecision::ConfirmEntities { entities } => {
                    debug!("planner wants entity confirmation: {entities:?}");
                    self.set_state(DynamicState::ConfirmingEntities, "planner");
                    match self.wait_for_confirmation(&mut commands).await {
                        Some(true) => continue 'session,
                        Some(false) | None => break 'session,
                    }
                }
                PlannerDecision::Step(step) => {
                    let Some(element) = self.resolve(&step) else {
                        warn!("ELEMENT_NOT_FOUND for {:?}", step.instruction);
                        self.history.lock().unwrap().push(CompletedDynamicStep {
                            instruction: step.instruction.clone(),
                            outcome: StepOutcome::ElementNotFound,
                        });
                        misses += 1;
                        if misses >= self.config.max_consecutive_misses {
                            self.set_error("planner kept picking missing elements".into());
                            break 'session;
                        }
                        continue 'session;
                    };
                    misses = 0;

                    let step_number = self.state.lock().unwrap().step_count + 1;
                    {
                        let mut state = self.state.lock().unwrap();
                        state.current_instruction = Some(step.instruction.clone());
                    }
                    self.set_state(DynamicState::ShowingStep, "resolved");
                    let rendered = {
                        let synthetic = self.synthetic_step(&step, step_number);
                        self.ui.lock().unwrap().show_step(
                            &synthetic,
                            &element,
                            step_number - 1,
                            step_number,
                        )
                    };
                    if let Err(e) = rendered {
                        self.set_error(format!("overlay unusable: {e}"));
                        break 'session;
                    }
                    // Anything buffered before this render is stale input
                    drain_events(&mut events);
                    self.set_state(DynamicState::WaitingAction, "shown");

                    match self
                        .wait_for_action(&step, &element, &mut commands, &mut events)
                        .await
                    {
                        ActionOutcome::Completed => {
                            self.history.lock().unwrap().push(CompletedDynamicStep {
                                instruction: step.instruction.clone(),
                                outcome: StepOutcome::Completed,
                            });
                            self.state.lock().unwrap().step_count += 1;
                        }
                        ActionOutcome::Skipped => {
                            self.history.lock().unwrap().push(CompletedDynamicStep {
                                instruction: step.instruction.clone(),
                                outcome: StepOutcome::Skipped,
                            });
                        }
                        ActionOutcome::Navigated => {
                            self.set_state(DynamicState::Navigating, "url_change");
                            self.wait_url_stable(&mut events).await;
                        }
                        ActionOutcome::Exit => break 'session,
                    }
                }
            }
        }

        self.teardown();
    }

    /// Resolve the planner's pick: index into the latest capture first,
    /// CSS hint second, then verify the node is connected and has size.
    fn resolve(&self, step: &PlannedStep) -> Option<DomNode> {
        let verify =
            |node: DomNode| (node.is_connected() && !node.bounds().is_empty()).then_some(node);

        if let Some(index) = step.element_index {
            let by_index = self
                .last_capture
                .lock()
                .unwrap()
                .as_ref()
                .and_then(|capture| capture.element_map.get(&index).cloned());
            if let Some(node) = by_index.and_then(verify) {
                return Some(node);
            }
        }
        if let Some(selector) = &step.selector_hint {
            match self.backend.query_all(selector) {
                Ok(nodes) => {
                    if let Some(node) = nodes.into_iter().find(is_visible).and_then(verify) {
                        return Some(node);
                    }
                }
                Err(e) => debug!("selector hint {selector:?} rejected: {e}"),
            }
        }
        None
    }

    fn synthetic_step(&self, step: &PlannedStep, number: usize) -> RecordedStep {
        RecordedStep {
            id: format!("dyn-{number}"),
            workflow_id: "dynamic".into(),
            step_number: number,
            action_type: step.action_type,
            instruction: Some(step.instruction.clone()),
            field_label: None,
            selectors: SelectorHints {
                css: step.selector_hint.clone(),
                ..Default::default()
            },
            element_meta: ElementContext::minimal("div"),
            action_data: ActionData {
                value: step.value.as_deref().map(redact_value),
                target_url: None,
            },
            ai_confidence: None,
            screenshot_id: None,
        }
    }

    async fn wait_for_action(
        &self,
        step: &PlannedStep,
        element: &DomNode,
        commands: &mut mpsc::UnboundedReceiver<DynamicCommand>,
        events: &mut broadcast::Receiver<DomEvent>,
    ) -> ActionOutcome {
        let kinds = action_events(step.action_type);
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(DynamicCommand::Exit) | None => return ActionOutcome::Exit,
                    Some(DynamicCommand::Skip) => return ActionOutcome::Skipped,
                    Some(DynamicCommand::ReportAction) => return ActionOutcome::Completed,
                    Some(DynamicCommand::Feedback(note)) => {
                        debug!("user feedback mid-step: {note}");
                    }
                    Some(DynamicCommand::ConfirmEntities(_)) => {}
                },
                event = events.recv() => match event {
                    Ok(DomEvent::User { kind, target, .. }) => {
                        if kind == UserEventKind::Click {
                            if let Some(control) = self.overlay_action(target) {
                                match control.as_str() {
                                    "exit" => return ActionOutcome::Exit,
                                    "skip" => return ActionOutcome::Skipped,
                                    "next" => return ActionOutcome::Completed,
                                    _ => {}
                                }
                                continue;
                            }
                        }
                        if kinds.contains(&kind) && target == element.node_id() {
                            return ActionOutcome::Completed;
                        }
                    }
                    Ok(DomEvent::UrlChanged { .. }) => return ActionOutcome::Navigated,
                    Ok(
                        DomEvent::Scrolled
                        | DomEvent::Resized
                        | DomEvent::BoundsChanged { .. },
                    ) => {
                        self.ui.lock().unwrap().reposition();
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return ActionOutcome::Exit,
                },
            }
        }
    }

    async fn wait_for_confirmation(
        &self,
        commands: &mut mpsc::UnboundedReceiver<DynamicCommand>,
    ) -> Option<bool> {
        loop {
            match commands.recv().await {
                Some(DynamicCommand::ConfirmEntities(answer)) => return Some(answer),
                Some(DynamicCommand::Exit) | None => return None,
                Some(other) => debug!("ignoring {other:?} while confirming entities"),
            }
        }
    }

    async fn wait_for_exit(
        &self,
        commands: &mut mpsc::UnboundedReceiver<DynamicCommand>,
        events: &mut broadcast::Receiver<DomEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(DynamicCommand::Exit) | None => return,
                    _ => {}
                },
                event = events.recv() => match event {
                    Ok(DomEvent::User { kind: UserEventKind::Click, target, .. }) => {
                        if self.overlay_action(target).as_deref() == Some("exit") {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                    _ => {}
                },
            }
        }
    }

    /// Wait for the URL to stop changing for the configured window
    async fn wait_url_stable(&self, events: &mut broadcast::Receiver<DomEvent>) {
        let window = Duration::from_millis(self.config.url_stability_window_ms);
        let mut deadline = Instant::now() + window;
        loop {
            match tokio::time::timeout_at(deadline, events.recv()).await {
                Err(_) => return,
                Ok(Ok(DomEvent::UrlChanged { .. })) => {
                    deadline = Instant::now() + window;
                }
                Ok(Ok(_)) => {}
                Ok(Err(broadcast::error::RecvError::Closed)) => return,
                Ok(Err(_)) => {}
            }
        }
    }

    fn overlay_action(&self, target: wayfinder::NodeId) -> Option<String> {
        let node = self.backend.node_by_id(target)?;
        let action = node.attribute("data-wf-action")?;
        node.attribute("disabled").is_none().then_some(action)
    }

    fn teardown(&self) {
        info!("dynamic session finished");
        self.ui.lock().unwrap().destroy();
        self.running.store(false, Ordering::SeqCst);
        let final_state = self.state.lock().unwrap().machine_state;
        if !matches!(final_state, DynamicState::Completed | DynamicState::Error) {
            self.set_state(DynamicState::Idle, "teardown");
        }
    }
}

/// Discard everything buffered on the receiver
fn drain_events(events: &mut broadcast::Receiver<DomEvent>) {
    while events.try_recv().is_ok() {}
}
