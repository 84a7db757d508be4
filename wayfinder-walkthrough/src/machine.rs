//! The deterministic walkthrough state machine
//!
//! Transitions are a total function on (state, event): anything not in the
//! table is ignored without side effects. The machine never touches the
//! DOM; it emits effects the session executes.

use crate::events::{ErrorInfo, MachineState, NavigationInfo, WalkthroughEvent};
use tracing::debug;

/// Retries allowed per step before an error becomes terminal for it
pub const MAX_RETRIES: u32 = 3;

/// Work the session must perform after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    ShowStep(usize),
    StartHealing(usize),
    PromptHealConfirm,
    ArmActionWatch(usize),
    ShowError,
    ShowCompletion,
    ShowNavigating,
    Teardown,
}

/// Outcome of feeding one event to the machine
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Changed {
        from: MachineState,
        to: MachineState,
        effects: Vec<Effect>,
    },
    Ignored,
}

impl Transition {
    pub fn effects(&self) -> &[Effect] {
        match self {
            Transition::Changed { effects, .. } => effects,
            Transition::Ignored => &[],
        }
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Transition::Ignored)
    }
}

/// Authoritative walkthrough state. UI layers only ever see snapshots.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: MachineState,
    step_index: usize,
    total_steps: usize,
    retry_count: u32,
    error: Option<ErrorInfo>,
    navigation: Option<NavigationInfo>,
}

impl StateMachine {
    pub fn new(total_steps: usize) -> Self {
        Self {
            state: MachineState::Idle,
            step_index: 0,
            total_steps,
            retry_count: 0,
            error: None,
            navigation: None,
        }
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn step_index(&self) -> usize {
        self.step_index
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        self.error.as_ref()
    }

    pub fn navigation(&self) -> Option<&NavigationInfo> {
        self.navigation.as_ref()
    }

    /// Feed one event. Guards reject invalid transitions as no-ops.
    pub fn handle(&mut self, event: &WalkthroughEvent) -> Transition {
        use MachineState::*;
        use WalkthroughEvent as Ev;

        let from = self.state;
        let transition: Option<(MachineState, Vec<Effect>)> = match (from, event) {
            // Exit is accepted from any state and tears the session down
            (Idle, Ev::Exit) => None,
            (_, Ev::Exit) => {
                self.error = None;
                self.navigation = None;
                Some((Idle, vec![Effect::Teardown]))
            }

            (Idle, Ev::Start) => Some((Initializing, vec![])),
            (Initializing, Ev::Ready) => {
                if self.total_steps == 0 {
                    Some((Completed, vec![Effect::ShowCompletion]))
                } else {
                    self.step_index = 0;
                    Some((ShowingStep, vec![Effect::ShowStep(0)]))
                }
            }

            (ShowingStep, Ev::ElementReady) => {
                Some((WaitingAction, vec![Effect::ArmActionWatch(self.step_index)]))
            }
            (ShowingStep, Ev::ElementMissing) => {
                Some((Healing, vec![Effect::StartHealing(self.step_index)]))
            }

            (Healing, Ev::HealSucceeded) => {
                Some((WaitingAction, vec![Effect::ArmActionWatch(self.step_index)]))
            }
            (Healing, Ev::HealNeedsConfirm) => {
                Some((HealingConfirm, vec![Effect::PromptHealConfirm]))
            }
            (Healing, Ev::HealFailed { message }) => Some(self.to_error(message.clone())),
            (HealingConfirm, Ev::HealConfirmed) => {
                Some((WaitingAction, vec![Effect::ArmActionWatch(self.step_index)]))
            }
            (HealingConfirm, Ev::HealRejected) => {
                Some(self.to_error("match rejected".to_string()))
            }

            (WaitingAction, Ev::ActionDetected | Ev::Next) => Some(self.advance()),
            (WaitingAction | Error, Ev::Skip) => Some(self.advance()),
            (WaitingAction, Ev::Back) => {
                if self.step_index == 0 {
                    return Transition::Ignored;
                }
                self.step_index -= 1;
                self.retry_count = 0;
                self.error = None;
                Some((ShowingStep, vec![Effect::ShowStep(self.step_index)]))
            }

            (Error, Ev::Retry) => {
                if self.retry_count >= MAX_RETRIES {
                    return Transition::Ignored;
                }
                self.retry_count += 1;
                self.error = None;
                Some((ShowingStep, vec![Effect::ShowStep(self.step_index)]))
            }

            // Navigation interrupts whatever was in flight
            (Idle | Completed, Ev::UrlChanged { .. }) => None,
            (_, Ev::UrlChanged { url }) => {
                self.navigation = Some(NavigationInfo {
                    target_url: Some(url.clone()),
                });
                Some((Navigating, vec![Effect::ShowNavigating]))
            }
            (Navigating, Ev::UrlStable { matches_navigate_target }) => {
                self.navigation = None;
                if *matches_navigate_target {
                    Some((WaitingAction, vec![Effect::ArmActionWatch(self.step_index)]))
                } else {
                    Some((ShowingStep, vec![Effect::ShowStep(self.step_index)]))
                }
            }

            (Idle | Completed, Ev::Fatal { .. }) => None,
            (_, Ev::Fatal { message }) => Some(self.to_error(message.clone())),

            _ => None,
        };

        match transition {
            Some((to, effects)) => {
                debug!("walkthrough {from:?} -> {to:?} on {event:?}");
                self.state = to;
                Transition::Changed { from, to, effects }
            }
            None => Transition::Ignored,
        }
    }

    fn advance(&mut self) -> (MachineState, Vec<Effect>) {
        self.error = None;
        self.retry_count = 0;
        if self.step_index + 1 >= self.total_steps {
            (MachineState::Completed, vec![Effect::ShowCompletion])
        } else {
            self.step_index += 1;
            (
                MachineState::ShowingStep,
                vec![Effect::ShowStep(self.step_index)],
            )
        }
    }

    fn to_error(&mut self, message: String) -> (MachineState, Vec<Effect>) {
        self.error = Some(ErrorInfo {
            message,
            retry_count: self.retry_count,
        });
        (MachineState::Error, vec![Effect::ShowError])
    }
}
