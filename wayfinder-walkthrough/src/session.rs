//! Walkthrough session orchestration
//!
//! The session owns the state machine, the UI facade, and a monitor task
//! that turns DOM events into machine events. All async completions carry
//! the render id they were started under and are discarded when stale, so
//! a slow heal can never mutate the overlay after the user moved on.

use crate::actions::{action_events, ActionWatch};
use crate::error::WalkthroughError;
use crate::events::{MachineState, StepSummary, WalkthroughEvent, WalkthroughState};
use crate::machine::{Effect, StateMachine, Transition};
use crate::ui::WalkthroughUI;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, instrument, warn};
use wayfinder::dom::is_visible;
use wayfinder::healing::{AiValidator, UserPrompter};
use wayfinder::{
    ActionType, DomBackend, DomEvent, DomNode, ElementContext, FeatureFlags, HealConfig,
    HealError, HealOptions, HealResolution, HealingEngine, RecordedStep, UserEventKind, Workflow,
};

const STATE_CHANNEL_CAPACITY: usize = 64;

/// Session timing knobs
#[derive(Debug, Clone)]
pub struct WalkthroughConfig {
    /// How long to poll native selectors before declaring the element missing
    pub element_wait_ms: u64,
    pub poll_interval_ms: u64,
    /// Idle window after the last URL change before navigation counts as settled
    pub url_stability_window_ms: u64,
    /// Scroll/resize debounce, roughly one frame
    pub debounce_ms: u64,
}

impl Default for WalkthroughConfig {
    fn default() -> Self {
        Self {
            element_wait_ms: 2000,
            poll_interval_ms: 100,
            url_stability_window_ms: 1000,
            debounce_ms: 16,
        }
    }
}

struct PendingPrompt {
    element: DomNode,
    summary: String,
    score: f64,
}

struct SessionInner {
    backend: Arc<dyn DomBackend>,
    healer: HealingEngine,
    ai_validator: Option<Arc<dyn AiValidator>>,
    workflow: Workflow,
    flags: FeatureFlags,
    config: WalkthroughConfig,
    machine: Mutex<StateMachine>,
    ui: Mutex<WalkthroughUI>,
    completed: Mutex<Vec<bool>>,
    current_target: Mutex<Option<DomNode>>,
    watch: Mutex<Option<ActionWatch>>,
    pending_prompt: Mutex<Option<PendingPrompt>>,
    pending_confirm: Mutex<Option<oneshot::Sender<bool>>>,
    render_id: AtomicU64,
    state_tx: broadcast::Sender<WalkthroughState>,
    shutdown: Notify,
    running: AtomicBool,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

/// An interactive walkthrough over one workflow and one document
pub struct WalkthroughSession {
    inner: Arc<SessionInner>,
}

impl WalkthroughSession {
    pub fn new(
        workflow: Workflow,
        backend: Arc<dyn DomBackend>,
        heal_config: HealConfig,
        config: WalkthroughConfig,
        flags: FeatureFlags,
        ai_validator: Option<Arc<dyn AiValidator>>,
    ) -> Result<Self, WalkthroughError> {
        let healer = HealingEngine::new(backend.clone(), heal_config)?;
        let (state_tx, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        let total = workflow.steps.len();
        Ok(Self {
            inner: Arc::new(SessionInner {
                ui: Mutex::new(WalkthroughUI::new(backend.clone())),
                backend,
                healer,
                ai_validator,
                completed: Mutex::new(vec![false; total]),
                machine: Mutex::new(StateMachine::new(total)),
                workflow,
                flags,
                config,
                current_target: Mutex::new(None),
                watch: Mutex::new(None),
                pending_prompt: Mutex::new(None),
                pending_confirm: Mutex::new(None),
                render_id: AtomicU64::new(0),
                state_tx,
                shutdown: Notify::new(),
                running: AtomicBool::new(false),
                monitor: Mutex::new(None),
            }),
        })
    }

    pub fn feature_flags(&self) -> &FeatureFlags {
        &self.inner.flags
    }

    /// Subscribe to state snapshots
    pub fn subscribe(&self) -> broadcast::Receiver<WalkthroughState> {
        self.inner.state_tx.subscribe()
    }

    /// The snapshot channel as a stream
    pub fn state_stream(&self) -> impl futures::Stream<Item = WalkthroughState> {
        BroadcastStream::new(self.subscribe()).filter_map(|item| async move { item.ok() })
    }

    /// Current snapshot, for late joiners
    pub fn snapshot(&self) -> WalkthroughState {
        self.inner.snapshot()
    }

    /// Start the walkthrough: spawns the DOM monitor and shows step one
    #[instrument(skip(self), fields(workflow = %self.inner.workflow.name))]
    pub async fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            warn!("walkthrough session already running");
            return;
        }
        info!(
            steps = self.inner.workflow.steps.len(),
            "starting walkthrough"
        );
        let monitor = tokio::spawn(self.inner.clone().monitor_loop());
        *self.inner.monitor.lock().unwrap() = Some(monitor);
        self.inner.clone().dispatch(WalkthroughEvent::Start).await;
        self.inner.clone().dispatch(WalkthroughEvent::Ready).await;
    }

    /// Feed a user command or external event into the machine
    pub async fn dispatch(&self, event: WalkthroughEvent) {
        self.inner.clone().dispatch(event).await;
    }

    /// Exit from any state and tear the overlay down
    pub async fn exit(&self) {
        self.inner.clone().dispatch(WalkthroughEvent::Exit).await;
    }
}

impl SessionInner {
    fn render_current(&self, render_id: u64) -> bool {
        self.render_id.load(Ordering::SeqCst) == render_id
    }

    fn snapshot(&self) -> WalkthroughState {
        let machine = self.machine.lock().unwrap();
        let completed = self.completed.lock().unwrap();
        let steps = self
            .workflow
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| {
                StepSummary::from_step(step, completed.get(i).copied().unwrap_or(false))
            })
            .collect();
        WalkthroughState {
            machine_state: machine.state(),
            current_step_index: machine.step_index(),
            total_steps: machine.total_steps(),
            steps,
            error_info: machine.error().cloned(),
            navigation: machine.navigation().cloned(),
            workflow_name: self.workflow.name.clone(),
        }
    }

    fn broadcast(&self) {
        let _ = self.state_tx.send(self.snapshot());
    }

    fn dispatch_boxed(self: Arc<Self>, event: WalkthroughEvent) -> BoxFuture<'static, ()> {
        Box::pin(self.dispatch(event))
    }

    async fn dispatch(self: Arc<Self>, event: WalkthroughEvent) {
        let (prev_state, prev_index) = {
            let machine = self.machine.lock().unwrap();
            (machine.state(), machine.step_index())
        };
        let transition = {
            let mut machine = self.machine.lock().unwrap();
            machine.handle(&event)
        };
        let Transition::Changed { from, to, effects } = transition else {
            return;
        };

        // A completed action marks its step before the cursor moves on
        if prev_state == MachineState::WaitingAction
            && matches!(
                event,
                WalkthroughEvent::ActionDetected | WalkthroughEvent::Next
            )
        {
            if let Some(done) = self.completed.lock().unwrap().get_mut(prev_index) {
                *done = true;
            }
        }

        // Action listeners never survive leaving WaitingAction
        if from == MachineState::WaitingAction && to != MachineState::WaitingAction {
            self.watch.lock().unwrap().take();
        }

        for effect in effects {
            self.clone().run_effect(effect).await;
        }
        self.broadcast();
    }

    async fn run_effect(self: Arc<Self>, effect: Effect) {
        match effect {
            Effect::ShowStep(index) => self.show_step(index).await,
            Effect::StartHealing(index) => {
                let rendered = self.ui.lock().unwrap().show_healing();
                if let Err(e) = rendered {
                    self.clone().dispatch_boxed(fatal_event(e)).await;
                    return;
                }
                let render_id = self.render_id.load(Ordering::SeqCst);
                let session = self.clone();
                tokio::spawn(async move {
                    session.run_heal(index, render_id).await;
                });
            }
            Effect::PromptHealConfirm => {
                let prompt = self.pending_prompt.lock().unwrap().take();
                let Some(prompt) = prompt else { return };
                let rendered = self.ui.lock().unwrap().show_heal_confirm(
                    &prompt.element,
                    prompt.summary,
                    prompt.score,
                );
                if let Err(e) = rendered {
                    // Nothing to click anymore; resolve the prompt as a no
                    self.pending_confirm.lock().unwrap().take();
                    self.clone().dispatch_boxed(fatal_event(e)).await;
                }
            }
            Effect::ArmActionWatch(index) => self.arm_action_watch(index).await,
            Effect::ShowError => {
                let error = self
                    .machine
                    .lock()
                    .unwrap()
                    .error()
                    .cloned()
                    .unwrap_or_default();
                let rendered = self
                    .ui
                    .lock()
                    .unwrap()
                    .show_error(&error.message, error.retry_count);
                if let Err(e) = rendered {
                    // The error surface itself is gone; exit with the final
                    // Error snapshot instead of bouncing through Fatal again
                    warn!("overlay unusable while reporting an error: {e}");
                    self.teardown();
                }
            }
            Effect::ShowCompletion => {
                let name = self.workflow.name.clone();
                let rendered = self.ui.lock().unwrap().show_completion(&name);
                if let Err(e) = rendered {
                    warn!("overlay unusable for the completion card: {e}");
                    self.teardown();
                }
            }
            Effect::ShowNavigating => {
                let rendered = self.ui.lock().unwrap().show_navigating();
                if let Err(e) = rendered {
                    self.clone().dispatch_boxed(fatal_event(e)).await;
                }
            }
            Effect::Teardown => self.teardown(),
        }
    }

    async fn show_step(self: Arc<Self>, index: usize) {
        let render_id = self.render_id.fetch_add(1, Ordering::SeqCst) + 1;
        let Some(step) = self.workflow.steps.get(index).cloned() else {
            let error = WalkthroughError::StepOutOfRange(index);
            self.clone().dispatch_boxed(fatal_event(error)).await;
            return;
        };

        if step.action_type == ActionType::Navigate {
            let url = step.action_data.target_url.clone().unwrap_or_default();
            let rendered = self.ui.lock().unwrap().show_navigate_step(&url);
            if let Err(e) = rendered {
                self.clone().dispatch_boxed(fatal_event(e)).await;
                return;
            }
            self.clone()
                .dispatch_boxed(WalkthroughEvent::ElementReady)
                .await;
            return;
        }

        match self.resolve_native(&step).await {
            Some(element) => {
                if !self.render_current(render_id) {
                    debug!("discarding stale step render");
                    return;
                }
                *self.current_target.lock().unwrap() = Some(element.clone());
                let rendered = self.ui.lock().unwrap().show_step(
                    &step,
                    &element,
                    index,
                    self.workflow.steps.len(),
                );
                if let Err(e) = rendered {
                    self.clone().dispatch_boxed(fatal_event(e)).await;
                    return;
                }
                self.clone()
                    .dispatch_boxed(WalkthroughEvent::ElementReady)
                    .await;
            }
            None => {
                if !self.render_current(render_id) {
                    return;
                }
                debug!("native selectors missed, entering healing");
                self.clone()
                    .dispatch_boxed(WalkthroughEvent::ElementMissing)
                    .await;
            }
        }
    }

    /// Try the recorded selector hints with a short poll before healing
    async fn resolve_native(&self, step: &RecordedStep) -> Option<DomNode> {
        let deadline = Instant::now() + Duration::from_millis(self.config.element_wait_ms);
        let mut selectors: Vec<String> = Vec::new();
        if let Some(primary) = &step.selectors.primary {
            selectors.push(primary.clone());
        }
        if let Some(css) = &step.selectors.css {
            selectors.push(css.clone());
        }
        if let Some(testid) = &step.selectors.data_testid {
            selectors.push(format!("[data-testid=\"{testid}\"]"));
        }
        if selectors.is_empty() {
            return None;
        }

        loop {
            for selector in &selectors {
                match self.backend.query_all(selector) {
                    Ok(nodes) => {
                        if let Some(node) = nodes.into_iter().find(is_visible) {
                            return Some(node);
                        }
                    }
                    // Bad recorded selectors are logged and skipped
                    Err(e) => debug!("native selector {selector:?} rejected: {e}"),
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
        }
    }

    async fn run_heal(self: Arc<Self>, index: usize, render_id: u64) {
        let Some(step) = self.workflow.steps.get(index).cloned() else {
            return;
        };
        let prompter = Arc::new(SessionPrompter {
            session: self.clone(),
            prompted: AtomicBool::new(false),
        });
        let options = HealOptions {
            ai_validator: self.ai_validator.clone(),
            user_prompter: Some(prompter.clone() as Arc<dyn UserPrompter>),
        };

        let outcome = self.healer.heal(&step, &options).await;
        if !self.render_current(render_id) {
            debug!("discarding stale heal completion for step {}", step.id);
            return;
        }
        match outcome {
            Ok(result) => match result.resolution {
                HealResolution::HealedAuto | HealResolution::HealedAi => {
                    match self.render_healed_step(&step, result.element, index) {
                        Ok(()) => self.dispatch_boxed(WalkthroughEvent::HealSucceeded).await,
                        Err(e) => self.dispatch_boxed(fatal_event(e)).await,
                    }
                }
                HealResolution::HealedUser => {
                    match self.render_healed_step(&step, result.element, index) {
                        Ok(()) => self.dispatch_boxed(WalkthroughEvent::HealConfirmed).await,
                        Err(e) => self.dispatch_boxed(fatal_event(e)).await,
                    }
                }
                HealResolution::Failed => {
                    if prompter.prompted.load(Ordering::SeqCst) {
                        self.dispatch_boxed(WalkthroughEvent::HealRejected).await;
                    } else {
                        let error = WalkthroughError::HealingFailed(
                            "no trustworthy match on the current page".into(),
                        );
                        self.dispatch_boxed(WalkthroughEvent::HealFailed {
                            message: error.to_string(),
                        })
                        .await;
                    }
                }
            },
            Err(e) => {
                self.dispatch_boxed(WalkthroughEvent::HealFailed {
                    message: e.to_string(),
                })
                .await;
            }
        }
    }

    /// Spotlight a freshly healed element and remember it as the target
    fn render_healed_step(
        &self,
        step: &RecordedStep,
        element: Option<DomNode>,
        index: usize,
    ) -> Result<(), WalkthroughError> {
        let Some(element) = element else {
            return Ok(());
        };
        *self.current_target.lock().unwrap() = Some(element.clone());
        self.ui
            .lock()
            .unwrap()
            .show_step(step, &element, index, self.workflow.steps.len())
    }

    async fn arm_action_watch(self: Arc<Self>, index: usize) {
        let Some(step) = self.workflow.steps.get(index) else {
            return;
        };
        if step.action_type == ActionType::Navigate {
            // The URL change is the action; it may already have happened
            if self.navigate_target_reached(step) {
                self.clone()
                    .dispatch_boxed(WalkthroughEvent::ActionDetected)
                    .await;
            }
            return;
        }
        let kinds = action_events(step.action_type);
        let target = self.current_target.lock().unwrap().clone();
        let Some(target) = target else {
            warn!("no target to watch for step {}", step.id);
            return;
        };
        *self.watch.lock().unwrap() = Some(ActionWatch {
            target: target.node_id(),
            kinds,
            render_id: self.render_id.load(Ordering::SeqCst),
        });
    }

    fn navigate_target_reached(&self, step: &RecordedStep) -> bool {
        let Some(target) = step.action_data.target_url.as_deref() else {
            return false;
        };
        let url = self.backend.url();
        url == target || url.starts_with(target)
    }

    fn current_step_is_navigate_and_reached(&self) -> bool {
        let index = self.machine.lock().unwrap().step_index();
        self.workflow
            .steps
            .get(index)
            .map(|step| {
                step.action_type == ActionType::Navigate && self.navigate_target_reached(step)
            })
            .unwrap_or(false)
    }

    fn teardown(&self) {
        info!("tearing down walkthrough session");
        self.render_id.fetch_add(1, Ordering::SeqCst);
        self.watch.lock().unwrap().take();
        self.pending_prompt.lock().unwrap().take();
        // Dropping the reply sender resolves any in-flight prompt as a no
        self.pending_confirm.lock().unwrap().take();
        self.ui.lock().unwrap().destroy();
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    async fn monitor_loop(self: Arc<Self>) {
        let mut events = self.backend.events();
        let mut nav_deadline: Option<Instant> = None;

        loop {
            let pending_deadline = nav_deadline;
            let nav_sleep = async move {
                match pending_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                _ = self.shutdown.notified() => break,
                _ = nav_sleep => {
                    nav_deadline = None;
                    let matched = self.current_step_is_navigate_and_reached();
                    self.clone()
                        .dispatch(WalkthroughEvent::UrlStable {
                            matches_navigate_target: matched,
                        })
                        .await;
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        nav_deadline = self.clone().handle_dom_event(event, nav_deadline).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("monitor lagged {skipped} DOM events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
        }
        debug!("walkthrough monitor stopped");
    }

    async fn handle_dom_event(
        self: Arc<Self>,
        event: DomEvent,
        nav_deadline: Option<Instant>,
    ) -> Option<Instant> {
        match event {
            DomEvent::UrlChanged { url } => {
                self.clone()
                    .dispatch(WalkthroughEvent::UrlChanged { url })
                    .await;
                if self.machine.lock().unwrap().state() == MachineState::Navigating {
                    Some(
                        Instant::now()
                            + Duration::from_millis(self.config.url_stability_window_ms),
                    )
                } else {
                    None
                }
            }
            DomEvent::User {
                kind,
                target,
                position,
            } => {
                if matches!(
                    kind,
                    UserEventKind::PointerDown
                        | UserEventKind::PointerMove
                        | UserEventKind::PointerUp
                ) {
                    if let Some(node) = self.backend.node_by_id(target) {
                        self.ui.lock().unwrap().handle_pointer(
                            kind,
                            &node,
                            position.unwrap_or_default(),
                        );
                    }
                    return nav_deadline;
                }

                // Overlay controls first: their clicks are commands, not actions
                if kind == UserEventKind::Click {
                    if let Some(node) = self.backend.node_by_id(target) {
                        if let Some(action) = node.attribute("data-wf-action") {
                            if node.attribute("disabled").is_none() {
                                self.clone().handle_ui_action(&action).await;
                            }
                            return nav_deadline;
                        }
                    }
                }

                let fired = {
                    let mut watch = self.watch.lock().unwrap();
                    let hit = watch
                        .as_ref()
                        .map(|w| w.matches(kind, target) && self.render_current(w.render_id))
                        .unwrap_or(false);
                    if hit {
                        watch.take();
                    }
                    hit
                };
                if fired {
                    self.dispatch(WalkthroughEvent::ActionDetected).await;
                }
                nav_deadline
            }
            DomEvent::Scrolled | DomEvent::Resized | DomEvent::BoundsChanged { .. } => {
                // One-frame debounce, then spotlight and tooltip in one pass
                tokio::time::sleep(Duration::from_millis(self.config.debounce_ms)).await;
                self.ui.lock().unwrap().reposition();
                nav_deadline
            }
        }
    }

    async fn handle_ui_action(self: Arc<Self>, action: &str) {
        debug!("overlay control pressed: {action}");
        match action {
            "next" => self.clone().dispatch(WalkthroughEvent::Next).await,
            "back" => self.clone().dispatch(WalkthroughEvent::Back).await,
            "skip" => self.clone().dispatch(WalkthroughEvent::Skip).await,
            "retry" => self.clone().dispatch(WalkthroughEvent::Retry).await,
            "exit" => self.clone().dispatch(WalkthroughEvent::Exit).await,
            "confirm-heal" => {
                if let Some(reply) = self.pending_confirm.lock().unwrap().take() {
                    let _ = reply.send(true);
                }
            }
            "reject-heal" => {
                if let Some(reply) = self.pending_confirm.lock().unwrap().take() {
                    let _ = reply.send(false);
                }
            }
            other => warn!("unknown overlay action {other:?}"),
        }
    }
}

/// Bridges the healing engine's user-prompt band into the walkthrough's
/// HealingConfirm state and tooltip buttons.
struct SessionPrompter {
    session: Arc<SessionInner>,
    prompted: AtomicBool,
}

#[async_trait]
impl UserPrompter for SessionPrompter {
    async fn confirm(
        &self,
        element: &DomNode,
        context: &ElementContext,
        score: f64,
    ) -> Result<bool, HealError> {
        self.prompted.store(true, Ordering::SeqCst);
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            *self.session.pending_prompt.lock().unwrap() = Some(PendingPrompt {
                element: element.clone(),
                summary: describe_candidate(context),
                score,
            });
            *self.session.pending_confirm.lock().unwrap() = Some(reply_tx);
        }
        self.session
            .clone()
            .dispatch(WalkthroughEvent::HealNeedsConfirm)
            .await;
        // A dropped sender (teardown, stale prompt) reads as a rejection
        Ok(reply_rx.await.unwrap_or(false))
    }
}

fn describe_candidate(context: &ElementContext) -> String {
    match &context.text {
        Some(text) => format!("{} \"{}\"", context.tag_name, text),
        None => context.tag_name.clone(),
    }
}

/// A broken overlay (or an impossible cursor) ends the session through
/// the machine's fatal path: Error state, final snapshot, teardown on exit
fn fatal_event(error: WalkthroughError) -> WalkthroughEvent {
    WalkthroughEvent::Fatal {
        message: error.to_string(),
    }
}
