//! Planner-driven dynamic walkthroughs
//!
//! Instead of replaying recorded steps, dynamic mode hands the planner a
//! compact numbered snapshot of the page's interactive elements and
//! renders whatever step it picks next, with the same overlay stack the
//! recorded walkthrough uses. Captured values are redacted before they
//! leave the page.

pub mod capture;
pub mod controller;
pub mod error;
pub mod messages;

pub use capture::{accessible_name, InteractiveElement, PageContext, PageContextCapture};
pub use controller::{
    CompletedDynamicStep, DynamicCommand, DynamicConfig, DynamicController, DynamicState,
    DynamicWorkflowState, PlannedStep, Planner, PlannerContext, PlannerDecision, StepOutcome,
};
pub use error::DynamicError;
pub use messages::{CommandKind, TabMessage, TabReadyReply};
