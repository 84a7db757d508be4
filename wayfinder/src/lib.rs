//! Self-healing element location for recorded web-UI workflows
//!
//! A user once recorded a sequence of interactions; at replay time the UI
//! may have drifted. This crate locates the element that best matches each
//! recorded one on the live DOM through a multi-factor, veto-capable
//! scoring system, with decision bands that escalate ambiguous matches to
//! AI validation or user confirmation rather than guessing.

use std::sync::Arc;
use tracing::instrument;

pub mod candidates;
pub mod config;
pub mod context;
pub mod dom;
pub mod errors;
pub mod geometry;
pub mod healing;
pub mod health;
pub mod metadata;
pub mod redact;
pub mod sanitize;
pub mod scorer;
pub mod scoring;
pub mod stable_id;
#[cfg(test)]
mod tests;

pub use candidates::{CandidateElement, CandidateFinder};
pub use config::{
    AiConfig, CandidateConfig, DecisionThresholds, FactorWeights, FeatureFlags, HealConfig,
    HealthConfig, VetoConfig,
};
pub use context::{
    ActionData, ActionType, ElementContext, FormContext, NearbyLandmarks, ParentLink,
    RecordedStep, SelectorHints, VisualRegion, Workflow,
};
pub use dom::{DomBackend, DomEvent, DomNode, MemoryDom, NodeId, UserEventKind};
pub use errors::HealError;
pub use geometry::{Point, Rect, Size};
pub use healing::{
    AiValidator, AiVerdict, HealOptions, HealResolution, HealingEngine, HealingLogEntry,
    HealingResult, UserPrompter,
};
pub use health::{compare_by_health, derive_health, HealthLevel, StoredStatus, WorkflowStats};
pub use metadata::MetadataExtractor;
pub use scorer::{best_candidate, has_clear_winner, Scorer, ScoringResult};
pub use scoring::{all_factors, all_factors_with, FactorScore, ScoringFactor, Veto};

/// The main entry point for healing against a live document
pub struct Healer {
    backend: Arc<dyn DomBackend>,
    engine: HealingEngine,
    extractor: MetadataExtractor,
}

impl Healer {
    pub fn new(backend: Arc<dyn DomBackend>, config: HealConfig) -> Result<Self, HealError> {
        let engine = HealingEngine::new(backend.clone(), config)?;
        let extractor = MetadataExtractor::new(backend.clone());
        Ok(Self {
            backend,
            engine,
            extractor,
        })
    }

    /// Healing with the default configuration
    pub fn new_default(backend: Arc<dyn DomBackend>) -> Result<Self, HealError> {
        Self::new(backend, HealConfig::default())
    }

    pub fn backend(&self) -> Arc<dyn DomBackend> {
        self.backend.clone()
    }

    /// Locate the live element best matching the step's recorded one
    #[instrument(skip(self, step, options), fields(step_id = %step.id))]
    pub async fn heal(
        &self,
        step: &RecordedStep,
        options: &HealOptions,
    ) -> Result<HealingResult, HealError> {
        self.engine.heal(step, options).await
    }

    /// Extract `ElementContext`-shaped metadata from a live element
    pub fn extract_context(&self, element: &DomNode) -> ElementContext {
        self.extractor.extract(element)
    }
}
