//! Walkthrough events and the broadcast state snapshot

use serde::{Deserialize, Serialize};
use wayfinder::redact::redact_field_value;
use wayfinder::{ActionType, RecordedStep};

/// Canonical machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    Idle,
    Initializing,
    ShowingStep,
    WaitingAction,
    Navigating,
    Healing,
    HealingConfirm,
    Error,
    Completed,
}

/// Everything that can drive the machine, from the UI, the DOM, or the
/// healing engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WalkthroughEvent {
    Start,
    Ready,
    ElementReady,
    ElementMissing,
    HealSucceeded,
    HealNeedsConfirm,
    HealConfirmed,
    HealRejected,
    HealFailed { message: String },
    ActionDetected,
    Next,
    Back,
    Skip,
    Retry,
    UrlChanged { url: String },
    UrlStable { matches_navigate_target: bool },
    Fatal { message: String },
    Exit,
}

/// Error surfaced to the UI, with the retry budget consumed so far
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    pub retry_count: u32,
}

/// Pending-navigation details
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NavigationInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
}

/// Step description safe to show and persist: entered values are redacted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSummary {
    pub id: String,
    pub step_number: usize,
    pub action_type: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_label: Option<String>,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entered_value: Option<String>,
}

impl StepSummary {
    pub fn from_step(step: &RecordedStep, completed: bool) -> Self {
        // The same field-aware pass the planner capture uses: the recorded
        // element's input type and name decide how the value is masked
        // before the blanket pattern rewrite
        let entered_value = step.action_data.value.as_deref().and_then(|value| {
            redact_field_value(
                value,
                step.element_meta.input_type.as_deref(),
                step.element_meta.name.as_deref(),
                step.field_label.as_deref(),
            )
        });
        Self {
            id: step.id.clone(),
            step_number: step.step_number,
            action_type: step.action_type,
            instruction: step.instruction.clone(),
            field_label: step.field_label.clone(),
            completed,
            entered_value,
        }
    }
}

/// The state-machine snapshot broadcast to UI subscribers.
///
/// The machine owns the authoritative state; consumers hold these
/// read-only copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkthroughState {
    pub machine_state: MachineState,
    pub current_step_index: usize,
    pub total_steps: usize,
    pub steps: Vec<StepSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_info: Option<ErrorInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub navigation: Option<NavigationInfo>,
    pub workflow_name: String,
}
