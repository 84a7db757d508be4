//! Runs the factor set over candidates, applies veto policy, and ranks

use crate::candidates::CandidateElement;
use crate::context::ElementContext;
use crate::errors::HealError;
use crate::scoring::{FactorScore, ScoringFactor, VetoRecord};
use std::sync::Arc;
use tracing::debug;

/// Soft vetoes shave 10% each, capped at 30%
const SOFT_VETO_PENALTY: f64 = 0.1;
const SOFT_VETO_PENALTY_CAP: f64 = 0.3;

/// Margin the top candidate must hold over the runner-up to be unambiguous
const CLEAR_WINNER_MARGIN: f64 = 0.1;

/// One candidate's full scoring outcome
#[derive(Debug, Clone)]
pub struct ScoringResult {
    pub candidate: CandidateElement,
    pub total_score: f64,
    pub factor_scores: Vec<FactorScore>,
    pub vetoes: Vec<VetoRecord>,
    pub is_vetoed: bool,
    pub soft_veto_count: usize,
}

pub struct Scorer {
    factors: Vec<Arc<dyn ScoringFactor>>,
}

impl Scorer {
    /// Build a scorer over `factors`, validating the weight table
    pub fn new(factors: Vec<Arc<dyn ScoringFactor>>) -> Result<Self, HealError> {
        if factors.is_empty() {
            return Err(HealError::InvalidConfig("empty factor list".into()));
        }
        if factors.iter().any(|f| f.weight() <= 0.0 || f.weight() > 1.0) {
            return Err(HealError::InvalidConfig(
                "every factor weight must be in (0, 1]".into(),
            ));
        }
        let sum: f64 = factors.iter().map(|f| f.weight()).sum();
        if (sum - 1.0).abs() > 1e-9 {
            return Err(HealError::InvalidConfig(format!(
                "factor weights must sum to 1.0, got {sum}"
            )));
        }
        Ok(Self { factors })
    }

    /// Score and rank all candidates. Hard-vetoed entries score zero and
    /// sort after every non-vetoed entry.
    pub fn rank(
        &self,
        candidates: Vec<CandidateElement>,
        original: &ElementContext,
    ) -> Vec<ScoringResult> {
        let mut results: Vec<ScoringResult> = candidates
            .into_iter()
            .map(|candidate| self.score_one(candidate, original))
            .collect();

        results.sort_by(|a, b| {
            a.is_vetoed
                .cmp(&b.is_vetoed)
                .then_with(|| b.total_score.total_cmp(&a.total_score))
        });
        results
    }

    fn score_one(&self, candidate: CandidateElement, original: &ElementContext) -> ScoringResult {
        let mut factor_scores = Vec::with_capacity(self.factors.len());
        let mut vetoes = Vec::new();
        let mut hard_vetoed = false;
        let mut soft_veto_count = 0;
        let mut weighted_total = 0.0;

        for factor in &self.factors {
            if let Some(veto) = factor.can_veto(&candidate.context, original) {
                if veto.is_hard() {
                    hard_vetoed = true;
                } else {
                    soft_veto_count += 1;
                }
                vetoes.push(VetoRecord {
                    factor: factor.name().to_string(),
                    veto,
                });
            }
            let score = factor.score(&candidate.context, original).clamp(0.0, 1.0);
            let weighted = factor.weight() * score;
            weighted_total += weighted;
            factor_scores.push(FactorScore {
                name: factor.name().to_string(),
                weight: factor.weight(),
                score,
                weighted,
            });
        }

        let total_score = if hard_vetoed {
            0.0
        } else {
            let penalty =
                (SOFT_VETO_PENALTY * soft_veto_count as f64).min(SOFT_VETO_PENALTY_CAP);
            weighted_total * (1.0 - penalty)
        };

        debug!(
            total_score,
            hard_vetoed, soft_veto_count, "scored candidate {:?}", candidate.element
        );

        ScoringResult {
            candidate,
            total_score,
            factor_scores,
            vetoes,
            is_vetoed: hard_vetoed,
            soft_veto_count,
        }
    }
}

/// First non-vetoed entry of a ranked list
pub fn best_candidate(results: &[ScoringResult]) -> Option<&ScoringResult> {
    results.iter().find(|r| !r.is_vetoed)
}

/// True when the best non-vetoed candidate leads the runner-up by a
/// comfortable margin (or stands alone).
pub fn has_clear_winner(results: &[ScoringResult]) -> bool {
    let mut non_vetoed = results.iter().filter(|r| !r.is_vetoed);
    let Some(top) = non_vetoed.next() else {
        return false;
    };
    match non_vetoed.next() {
        None => true,
        Some(runner_up) => top.total_score - runner_up.total_score >= CLEAR_WINNER_MARGIN,
    }
}
