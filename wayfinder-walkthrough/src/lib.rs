//! Interactive walkthrough engine
//!
//! Drives a recorded workflow as a guided overlay on the live page: a
//! deterministic state machine, a spotlight + tooltip UI behind a single
//! facade, action detection on the target element, and healing when the
//! recorded selectors miss. The walkthrough guides a human; it never
//! performs the actions itself.

pub mod actions;
pub mod error;
pub mod events;
pub mod machine;
pub mod overlay;
pub mod session;
pub mod spotlight;
pub mod tooltip;
pub mod ui;

pub use actions::{action_events, ActionWatch};
pub use error::WalkthroughError;
pub use events::{
    ErrorInfo, MachineState, NavigationInfo, StepSummary, WalkthroughEvent, WalkthroughState,
};
pub use machine::{Effect, StateMachine, Transition, MAX_RETRIES};
pub use overlay::{OverlayManager, OVERLAY_MARKER_ATTR, OVERLAY_ROOT_ID};
pub use session::{WalkthroughConfig, WalkthroughSession};
pub use spotlight::SpotlightRenderer;
pub use tooltip::{smart_position, HealPrompt, TooltipMode, TooltipRenderer};
pub use ui::WalkthroughUI;
