//! Tab-addressed message wiring for dynamic mode
//!
//! JSON payloads exchanged between the page side and the background
//! planner host. Message names stay wire-stable.

use crate::controller::DynamicWorkflowState;
use serde::{Deserialize, Serialize};

/// Commands the user (or host) can issue mid-session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    #[serde(rename = "EXIT")]
    Exit,
    #[serde(rename = "SKIP")]
    Skip,
    #[serde(rename = "FEEDBACK")]
    Feedback,
    #[serde(rename = "REPORT_ACTION")]
    ReportAction,
}

/// Messages over the tab channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TabMessage {
    #[serde(rename = "TAB_READY")]
    TabReady { tab_id: u32, url: String },
    #[serde(rename = "DYNAMIC_STATE_CHANGED")]
    DynamicStateChanged {
        state: DynamicWorkflowState,
        trigger: String,
    },
    #[serde(rename = "REPORT_CONTEXT")]
    ReportContext {
        page_context_text: String,
        url: String,
        title: String,
        element_count: usize,
    },
    #[serde(rename = "COMMAND")]
    Command {
        command: CommandKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
    },
}

/// Reply to `TAB_READY`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabReadyReply {
    pub has_active_session: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<DynamicWorkflowState>,
}
