//! Weight, threshold, and feature tables for the healing pipeline

use crate::errors::HealError;
use serde::{Deserialize, Serialize};

/// Per-factor weights. Must sum to exactly 1.0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FactorWeights {
    pub contextual_proximity: f64,
    pub text_similarity: f64,
    pub role_match: f64,
    pub attribute_match: f64,
    pub position_similarity: f64,
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            contextual_proximity: 0.35,
            text_similarity: 0.20,
            role_match: 0.15,
            attribute_match: 0.15,
            position_similarity: 0.15,
        }
    }
}

impl FactorWeights {
    pub fn as_array(&self) -> [f64; 5] {
        [
            self.contextual_proximity,
            self.text_similarity,
            self.role_match,
            self.attribute_match,
            self.position_similarity,
        ]
    }

    pub fn validate(&self) -> Result<(), HealError> {
        let weights = self.as_array();
        if weights.iter().any(|w| *w <= 0.0 || *w > 1.0) {
            return Err(HealError::InvalidConfig(
                "every factor weight must be in (0, 1]".into(),
            ));
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > 1e-9 {
            return Err(HealError::InvalidConfig(format!(
                "factor weights must sum to 1.0, got {sum}"
            )));
        }
        Ok(())
    }
}

/// Confidence bands selecting what happens with the top candidate
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DecisionThresholds {
    pub auto_accept: f64,
    pub ai_validation: f64,
    pub user_prompt: f64,
    pub reject: f64,
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self {
            auto_accept: 0.85,
            ai_validation: 0.70,
            user_prompt: 0.60,
            reject: 0.50,
        }
    }
}

impl DecisionThresholds {
    /// Stricter table used when AI validation is unavailable. The AI band
    /// collapses into auto-accept; scores below 0.90 fall to user prompt.
    pub fn fallback() -> Self {
        Self {
            auto_accept: 0.90,
            ai_validation: 0.90,
            user_prompt: 0.60,
            reject: 0.50,
        }
    }
}

/// AI validation collaborator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    pub enabled: bool,
    /// Share of the blended score the AI verdict contributes
    pub weight: f64,
    pub timeout_ms: u64,
    /// AI confidence below this plus a rejection verdict fails the heal
    pub veto_threshold: f64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            weight: 0.40,
            timeout_ms: 10_000,
            veto_threshold: 0.50,
        }
    }
}

/// Candidate discovery limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateConfig {
    pub max_candidates: usize,
    /// Candidates farther than this from the recorded center are dropped
    pub max_position_distance: f64,
    /// Off-viewport tolerance during discovery
    pub viewport_margin: f64,
}

impl Default for CandidateConfig {
    fn default() -> Self {
        Self {
            max_candidates: 30,
            max_position_distance: 500.0,
            viewport_margin: 100.0,
        }
    }
}

/// Veto policy knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VetoConfig {
    pub require_same_form: bool,
    pub require_same_modal_context: bool,
    pub soft_veto_distance_px: f64,
    /// Effective-role pairs that can never heal into each other
    pub incompatible_role_pairs: Vec<(String, String)>,
}

impl Default for VetoConfig {
    fn default() -> Self {
        Self {
            require_same_form: true,
            require_same_modal_context: true,
            soft_veto_distance_px: 300.0,
            incompatible_role_pairs: vec![
                ("button".into(), "textbox".into()),
                ("textbox".into(), "checkbox".into()),
                ("listbox".into(), "menu".into()),
            ],
        }
    }
}

/// Workflow-health thresholds consumed by the dashboard collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    pub min_runs_for_status: u32,
    pub success_rate_healthy: f64,
    pub success_rate_review: f64,
    pub consecutive_failures_broken: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            min_runs_for_status: 5,
            success_rate_healthy: 0.9,
            success_rate_review: 0.6,
            consecutive_failures_broken: 3,
        }
    }
}

/// Feature flags consumed by the core, loaded once per session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default)]
    pub dynamic_workflow_enabled: bool,
}

/// Everything the healing engine needs in one place
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealConfig {
    #[serde(default)]
    pub weights: FactorWeights,
    #[serde(default)]
    pub thresholds: DecisionThresholds,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub candidates: CandidateConfig,
    #[serde(default)]
    pub veto: VetoConfig,
    /// Bound on the user-confirm collaborator
    #[serde(default = "default_user_prompt_timeout")]
    pub user_prompt_timeout_ms: u64,
}

impl Default for HealConfig {
    fn default() -> Self {
        Self {
            weights: FactorWeights::default(),
            thresholds: DecisionThresholds::default(),
            ai: AiConfig::default(),
            candidates: CandidateConfig::default(),
            veto: VetoConfig::default(),
            user_prompt_timeout_ms: default_user_prompt_timeout(),
        }
    }
}

fn default_user_prompt_timeout() -> u64 {
    30_000
}

impl HealConfig {
    pub fn validate(&self) -> Result<(), HealError> {
        self.weights.validate()
    }
}
