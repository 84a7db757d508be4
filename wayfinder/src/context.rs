//! Recorded-element context and workflow step types
//!
//! `ElementContext` is everything the recorder knew about an element at
//! recording time and everything the healer re-extracts from live
//! candidates. It is produced once per recorded step and consumed
//! read-only.

use crate::geometry::Rect;
use serde::{Deserialize, Serialize};

/// Helper for clean serialization
fn is_empty_string(opt: &Option<String>) -> bool {
    match opt {
        Some(s) => s.trim().is_empty(),
        None => true,
    }
}

/// Selector hints captured at recording time. Hints, never authoritative:
/// replay tries them first and falls back to healing when they miss.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectorHints {
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub primary: Option<String>,
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub css: Option<String>,
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub xpath: Option<String>,
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub data_testid: Option<String>,
}

/// One ancestor in the recorded parent chain
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParentLink {
    pub tag: String,
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub role: Option<String>,
}

/// Context of the enclosing form, when there is one
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormContext {
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub form_id: Option<String>,
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub form_action: Option<String>,
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub form_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub form_classes: Vec<String>,
    /// 0-based position among the form's interactive descendants
    pub field_index: usize,
    pub total_fields: usize,
}

/// Coarse page region the element sits in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualRegion {
    Header,
    Main,
    Footer,
    Sidebar,
    Modal,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadingLandmark {
    pub text: String,
    pub level: u8,
    /// Euclidean center distance from the element, in px
    pub distance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelLandmark {
    pub text: String,
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub for_id: Option<String>,
}

/// Text anchors near the element, used to disambiguate lookalikes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NearbyLandmarks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closest_heading: Option<HeadingLandmark>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closest_label: Option<LabelLandmark>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sibling_texts: Vec<String>,
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub container_text: Option<String>,
}

/// Everything known about a recorded element
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElementContext {
    pub tag_name: String,
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub role: Option<String>,
    /// The `type` attribute for inputs and buttons
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub input_type: Option<String>,
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub data_testid: Option<String>,
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,
    pub bounding_box: Rect,
    #[serde(default)]
    pub selectors: SelectorHints,
    /// Up to 5 ancestors, capped early at the first stable id
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parent_chain: Vec<ParentLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_context: Option<FormContext>,
    #[serde(default)]
    pub visual_region: VisualRegion,
    #[serde(default)]
    pub landmarks: NearbyLandmarks,
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub field_label: Option<String>,
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub instruction: Option<String>,
    pub visible: bool,
}

impl ElementContext {
    /// Minimal fallback record used when extraction fails
    pub fn minimal(tag_name: &str) -> Self {
        Self {
            tag_name: tag_name.to_ascii_lowercase(),
            visible: false,
            ..Default::default()
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Create from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// The user interaction a step records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Click,
    InputCommit,
    SelectChange,
    Submit,
    Navigate,
}

/// Extra data captured with the action
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionData {
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub target_url: Option<String>,
}

/// One recorded step of a workflow, as delivered by the workflow API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedStep {
    pub id: String,
    pub workflow_id: String,
    pub step_number: usize,
    pub action_type: ActionType,
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub instruction: Option<String>,
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub field_label: Option<String>,
    #[serde(default)]
    pub selectors: SelectorHints,
    pub element_meta: ElementContext,
    #[serde(default)]
    pub action_data: ActionData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub screenshot_id: Option<String>,
}

/// A recorded workflow: ordered steps under one name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub steps: Vec<RecordedStep>,
}
