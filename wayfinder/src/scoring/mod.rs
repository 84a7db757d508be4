//! Multi-factor candidate scoring
//!
//! Factors are first-class values conforming to a small capability set:
//! a weighted `score` in [0, 1] and an optional veto. The registry owns
//! the canonical order; the scorer takes a factor list as a parameter so
//! tests can run reduced sets.

use crate::config::{FactorWeights, VetoConfig};
use crate::context::ElementContext;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

mod attributes;
mod contextual;
mod position;
mod role;
mod text;

pub use attributes::AttributeMatch;
pub use contextual::ContextualProximity;
pub use position::PositionSimilarity;
pub use role::{effective_role, RoleMatch};
pub use text::{normalized_similarity, TextSimilarity};

/// A factor's authority to reject or penalize a candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Veto {
    /// Disqualifies the candidate outright
    Hard { reason: String },
    /// Penalizes the combined score
    Soft { reason: String },
}

impl Veto {
    pub fn is_hard(&self) -> bool {
        matches!(self, Veto::Hard { .. })
    }

    pub fn reason(&self) -> &str {
        match self {
            Veto::Hard { reason } | Veto::Soft { reason } => reason,
        }
    }
}

/// One scoring dimension comparing a candidate against the original
pub trait ScoringFactor: Send + Sync {
    fn name(&self) -> &'static str;
    fn weight(&self) -> f64;
    /// Similarity in [0, 1]
    fn score(&self, candidate: &ElementContext, original: &ElementContext) -> f64;
    /// Veto check, evaluated before scoring
    fn can_veto(&self, _candidate: &ElementContext, _original: &ElementContext) -> Option<Veto> {
        None
    }
}

/// A factor's contribution to one candidate's total
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorScore {
    pub name: String,
    pub weight: f64,
    pub score: f64,
    pub weighted: f64,
}

/// A veto fired by a named factor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VetoRecord {
    pub factor: String,
    #[serde(flatten)]
    pub veto: Veto,
}

/// The canonical factor list with default weights and veto policy
pub fn all_factors() -> Vec<Arc<dyn ScoringFactor>> {
    all_factors_with(&FactorWeights::default(), &VetoConfig::default())
}

/// The canonical factor list with explicit weights and veto policy
pub fn all_factors_with(
    weights: &FactorWeights,
    veto: &VetoConfig,
) -> Vec<Arc<dyn ScoringFactor>> {
    vec![
        Arc::new(ContextualProximity::new(
            weights.contextual_proximity,
            veto.clone(),
        )),
        Arc::new(TextSimilarity::new(weights.text_similarity)),
        Arc::new(RoleMatch::new(weights.role_match, veto.clone())),
        Arc::new(AttributeMatch::new(weights.attribute_match)),
        Arc::new(PositionSimilarity::new(
            weights.position_similarity,
            veto.soft_veto_distance_px,
        )),
    ]
}
