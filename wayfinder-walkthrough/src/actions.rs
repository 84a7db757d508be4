//! Action detection: which DOM events complete which step kinds

use wayfinder::{ActionType, NodeId, UserEventKind};

/// DOM events whose firing on the target constitutes step completion.
///
/// Navigate steps complete on URL change, not on a DOM event.
pub fn action_events(action: ActionType) -> &'static [UserEventKind] {
    match action {
        ActionType::Click => &[UserEventKind::Click],
        ActionType::InputCommit => &[UserEventKind::Change, UserEventKind::Blur],
        ActionType::SelectChange => &[UserEventKind::Change],
        ActionType::Submit => &[UserEventKind::Submit, UserEventKind::Click],
        ActionType::Navigate => &[],
    }
}

/// An armed once-only watch on the current step's target element.
///
/// Dropped (disarmed) on any exit out of `WaitingAction`, and stamped with
/// the render id it was armed under so stale fires are discarded.
#[derive(Debug, Clone)]
pub struct ActionWatch {
    pub target: NodeId,
    pub kinds: &'static [UserEventKind],
    pub render_id: u64,
}

impl ActionWatch {
    pub fn matches(&self, kind: UserEventKind, target: NodeId) -> bool {
        self.target == target && self.kinds.contains(&kind)
    }
}
