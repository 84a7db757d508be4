//! The healing engine: bands, validation, and the structured heal log

use crate::candidates::CandidateFinder;
use crate::config::{DecisionThresholds, HealConfig};
use crate::context::{ElementContext, RecordedStep, VisualRegion};
use crate::dom::{DomBackend, DomNode};
use crate::errors::HealError;
use crate::scorer::{best_candidate, Scorer, ScoringResult};
use crate::scoring::{all_factors_with, FactorScore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, instrument, warn};

/// Verdict returned by the AI validation collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiVerdict {
    pub is_match: bool,
    pub confidence: f64,
}

/// Validates an ambiguous healing candidate against the recorded context
#[async_trait]
pub trait AiValidator: Send + Sync {
    async fn validate(
        &self,
        original: &ElementContext,
        candidate: &ElementContext,
        deterministic_score: f64,
    ) -> Result<AiVerdict, HealError>;
}

/// Asks the user to confirm an uncertain match
#[async_trait]
pub trait UserPrompter: Send + Sync {
    /// Returns whether the user confirmed the highlighted candidate
    async fn confirm(
        &self,
        element: &DomNode,
        context: &ElementContext,
        score: f64,
    ) -> Result<bool, HealError>;
}

/// How a heal concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealResolution {
    HealedAuto,
    HealedAi,
    HealedUser,
    Failed,
}

impl HealResolution {
    pub fn is_healed(&self) -> bool {
        !matches!(self, HealResolution::Failed)
    }
}

/// Minimal element description embedded in log entries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextSummary {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub region: VisualRegion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_id: Option<String>,
}

impl From<&ElementContext> for ContextSummary {
    fn from(context: &ElementContext) -> Self {
        Self {
            tag: context.tag_name.clone(),
            id: context.id.clone(),
            text: context.text.clone(),
            region: context.visual_region,
            form_id: context
                .form_context
                .as_ref()
                .and_then(|f| f.form_id.clone()),
        }
    }
}

/// Structured record of one healing attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingLogEntry {
    pub timestamp_ms: u64,
    pub step_id: String,
    pub workflow_id: String,
    pub resolution: HealResolution,
    pub deterministic_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_score: Option<f64>,
    pub final_score: f64,
    pub candidates_evaluated: usize,
    pub top_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner_up_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vetoes_applied: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub factor_scores: Vec<FactorScore>,
    pub original: ContextSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<ContextSummary>,
}

impl HealingLogEntry {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Result of healing one recorded step
#[derive(Debug, Clone)]
pub struct HealingResult {
    pub element: Option<DomNode>,
    pub context: Option<ElementContext>,
    pub confidence: f64,
    pub resolution: HealResolution,
    pub log: HealingLogEntry,
}

impl HealingResult {
    pub fn is_healed(&self) -> bool {
        self.resolution.is_healed()
    }
}

/// Collaborators the engine may call while healing
#[derive(Default, Clone)]
pub struct HealOptions {
    pub ai_validator: Option<Arc<dyn AiValidator>>,
    pub user_prompter: Option<Arc<dyn UserPrompter>>,
}

/// Multi-factor, veto-capable element healer
pub struct HealingEngine {
    backend: Arc<dyn DomBackend>,
    config: HealConfig,
}

impl HealingEngine {
    pub fn new(backend: Arc<dyn DomBackend>, config: HealConfig) -> Result<Self, HealError> {
        config.validate()?;
        Ok(Self { backend, config })
    }

    pub fn config(&self) -> &HealConfig {
        &self.config
    }

    /// Locate the best live match for the step's recorded element.
    ///
    /// Returns `Ok` with a `Failed` resolution for principled refusals;
    /// `Err` only on configuration or backend breakage.
    #[instrument(skip(self, step, options), fields(step_id = %step.id))]
    pub async fn heal(
        &self,
        step: &RecordedStep,
        options: &HealOptions,
    ) -> Result<HealingResult, HealError> {
        let original = &step.element_meta;
        let finder = CandidateFinder::new(self.backend.clone(), self.config.candidates.clone());
        let candidates = finder.find(original);
        let candidates_evaluated = candidates.len();

        let scorer = Scorer::new(all_factors_with(&self.config.weights, &self.config.veto))?;
        let ranked = scorer.rank(candidates, original);

        let Some(top) = best_candidate(&ranked) else {
            info!("healing failed: no non-vetoed candidate");
            return Ok(self.failed_result(step, &ranked, candidates_evaluated, None));
        };
        let top = top.clone();

        let ai_available =
            self.config.ai.enabled && options.ai_validator.is_some();
        let thresholds = if ai_available {
            self.config.thresholds
        } else {
            DecisionThresholds::fallback()
        };

        let score = top.total_score;
        if score >= thresholds.auto_accept {
            return Ok(self.healed_result(
                step,
                &ranked,
                &top,
                candidates_evaluated,
                score,
                None,
                HealResolution::HealedAuto,
            ));
        }

        if score >= thresholds.ai_validation {
            if let Some(validator) = options.ai_validator.as_ref().filter(|_| ai_available) {
                match self.validate_with_ai(validator.as_ref(), original, &top).await {
                    Ok(verdict) => {
                        if verdict.confidence < self.config.ai.veto_threshold && !verdict.is_match {
                            info!(
                                ai_confidence = verdict.confidence,
                                "healing failed: AI rejected the candidate"
                            );
                            return Ok(self.failed_result(
                                step,
                                &ranked,
                                candidates_evaluated,
                                Some(verdict.confidence),
                            ));
                        }
                        let blended = (1.0 - self.config.ai.weight) * score
                            + self.config.ai.weight * verdict.confidence;
                        return Ok(self.healed_result(
                            step,
                            &ranked,
                            &top,
                            candidates_evaluated,
                            blended,
                            Some(verdict.confidence),
                            HealResolution::HealedAi,
                        ));
                    }
                    Err(e) => {
                        warn!("AI validation unavailable, falling back: {e}");
                        let fallback = DecisionThresholds::fallback();
                        if score >= fallback.auto_accept {
                            return Ok(self.healed_result(
                                step,
                                &ranked,
                                &top,
                                candidates_evaluated,
                                score,
                                None,
                                HealResolution::HealedAuto,
                            ));
                        }
                        return self
                            .prompt_user(step, &ranked, &top, candidates_evaluated, options)
                            .await;
                    }
                }
            }
        }

        if score >= thresholds.user_prompt {
            return self
                .prompt_user(step, &ranked, &top, candidates_evaluated, options)
                .await;
        }

        info!(score, "healing failed: below the user-prompt band");
        Ok(self.failed_result(step, &ranked, candidates_evaluated, None))
    }

    async fn validate_with_ai(
        &self,
        validator: &dyn AiValidator,
        original: &ElementContext,
        top: &ScoringResult,
    ) -> Result<AiVerdict, HealError> {
        let timeout = Duration::from_millis(self.config.ai.timeout_ms);
        match tokio::time::timeout(
            timeout,
            validator.validate(original, &top.candidate.context, top.total_score),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(HealError::Timeout(format!(
                "AI validation exceeded {}ms",
                self.config.ai.timeout_ms
            ))),
        }
    }

    async fn prompt_user(
        &self,
        step: &RecordedStep,
        ranked: &[ScoringResult],
        top: &ScoringResult,
        candidates_evaluated: usize,
        options: &HealOptions,
    ) -> Result<HealingResult, HealError> {
        let Some(prompter) = options.user_prompter.as_ref() else {
            info!("healing failed: user confirmation needed but no prompter wired");
            return Ok(self.failed_result(step, ranked, candidates_evaluated, None));
        };
        let timeout = Duration::from_millis(self.config.user_prompt_timeout_ms);
        let confirmed = match tokio::time::timeout(
            timeout,
            prompter.confirm(
                &top.candidate.element,
                &top.candidate.context,
                top.total_score,
            ),
        )
        .await
        {
            Ok(Ok(confirmed)) => confirmed,
            Ok(Err(e)) => {
                warn!("user prompt failed: {e}");
                false
            }
            Err(_) => {
                warn!(
                    "user prompt timed out after {}ms",
                    self.config.user_prompt_timeout_ms
                );
                false
            }
        };
        if confirmed {
            Ok(self.healed_result(
                step,
                ranked,
                top,
                candidates_evaluated,
                top.total_score,
                None,
                HealResolution::HealedUser,
            ))
        } else {
            Ok(self.failed_result(step, ranked, candidates_evaluated, None))
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn healed_result(
        &self,
        step: &RecordedStep,
        ranked: &[ScoringResult],
        top: &ScoringResult,
        candidates_evaluated: usize,
        final_score: f64,
        ai_score: Option<f64>,
        resolution: HealResolution,
    ) -> HealingResult {
        let log = self.log_entry(
            step,
            ranked,
            candidates_evaluated,
            resolution,
            top.total_score,
            ai_score,
            final_score,
            Some(top),
        );
        info!(
            resolution = ?resolution,
            final_score,
            "healed step {} onto {:?}",
            step.id,
            top.candidate.element
        );
        HealingResult {
            element: Some(top.candidate.element.clone()),
            context: Some(top.candidate.context.clone()),
            confidence: final_score,
            resolution,
            log,
        }
    }

    fn failed_result(
        &self,
        step: &RecordedStep,
        ranked: &[ScoringResult],
        candidates_evaluated: usize,
        ai_score: Option<f64>,
    ) -> HealingResult {
        let top_score = ranked.first().map(|r| r.total_score).unwrap_or(0.0);
        let log = self.log_entry(
            step,
            ranked,
            candidates_evaluated,
            HealResolution::Failed,
            top_score,
            ai_score,
            0.0,
            None,
        );
        HealingResult {
            element: None,
            context: None,
            confidence: 0.0,
            resolution: HealResolution::Failed,
            log,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn log_entry(
        &self,
        step: &RecordedStep,
        ranked: &[ScoringResult],
        candidates_evaluated: usize,
        resolution: HealResolution,
        deterministic_score: f64,
        ai_score: Option<f64>,
        final_score: f64,
        selected: Option<&ScoringResult>,
    ) -> HealingLogEntry {
        let vetoes_applied = ranked
            .iter()
            .flat_map(|r| r.vetoes.iter())
            .map(|v| format!("{}: {}", v.factor, v.veto.reason()))
            .collect();
        let entry = HealingLogEntry {
            timestamp_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            step_id: step.id.clone(),
            workflow_id: step.workflow_id.clone(),
            resolution,
            deterministic_score,
            ai_score,
            final_score,
            candidates_evaluated,
            top_score: ranked.first().map(|r| r.total_score).unwrap_or(0.0),
            runner_up_score: ranked.get(1).map(|r| r.total_score),
            vetoes_applied,
            factor_scores: selected
                .map(|s| s.factor_scores.clone())
                .unwrap_or_default(),
            original: ContextSummary::from(&step.element_meta),
            selected: selected.map(|s| ContextSummary::from(&s.candidate.context)),
        };
        debug!("heal log: {}", entry.to_json().unwrap_or_default());
        entry
    }
}
