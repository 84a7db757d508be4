//! Contextual proximity: form, region, and landmark agreement
//!
//! The heaviest factor, and the one that defeats the "same text in a
//! different form" trap. Internally weighted 50% form, 20% region,
//! 30% landmarks.

use crate::config::VetoConfig;
use crate::context::{ElementContext, FormContext, NearbyLandmarks, VisualRegion};
use crate::scoring::{ScoringFactor, Veto};
use crate::stable_id::stable_id;
use std::collections::HashSet;

const FORM_WEIGHT: f64 = 0.5;
const REGION_WEIGHT: f64 = 0.2;
const LANDMARK_WEIGHT: f64 = 0.3;

pub struct ContextualProximity {
    weight: f64,
    veto: VetoConfig,
}

impl ContextualProximity {
    pub fn new(weight: f64, veto: VetoConfig) -> Self {
        Self { weight, veto }
    }
}

impl ScoringFactor for ContextualProximity {
    fn name(&self) -> &'static str {
        "contextual_proximity"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn score(&self, candidate: &ElementContext, original: &ElementContext) -> f64 {
        let form = form_score(original.form_context.as_ref(), candidate.form_context.as_ref());
        let region = region_score(original.visual_region, candidate.visual_region);
        let landmarks = landmark_score(&original.landmarks, &candidate.landmarks);
        FORM_WEIGHT * form + REGION_WEIGHT * region + LANDMARK_WEIGHT * landmarks
    }

    fn can_veto(&self, candidate: &ElementContext, original: &ElementContext) -> Option<Veto> {
        if self.veto.require_same_form {
            if let Some(original_form_id) =
                original.form_context.as_ref().and_then(|f| stable_id(f.form_id.as_deref()))
            {
                let candidate_form_id = candidate
                    .form_context
                    .as_ref()
                    .and_then(|f| stable_id(f.form_id.as_deref()));
                if candidate_form_id != Some(original_form_id) {
                    return Some(Veto::Hard {
                        reason: format!(
                            "recorded element lived in form #{original_form_id}, candidate does not"
                        ),
                    });
                }
            }
        }

        if self.veto.require_same_modal_context
            && original.visual_region == VisualRegion::Modal
            && candidate.visual_region != VisualRegion::Modal
        {
            return Some(Veto::Hard {
                reason: "recorded element was inside a modal, candidate is not".into(),
            });
        }

        // Known-but-different regions, neither modal: penalize, don't reject
        let original_region = original.visual_region;
        let candidate_region = candidate.visual_region;
        if original_region != VisualRegion::Unknown
            && candidate_region != VisualRegion::Unknown
            && original_region != candidate_region
            && original_region != VisualRegion::Modal
            && candidate_region != VisualRegion::Modal
        {
            return Some(Veto::Soft {
                reason: format!("region drifted {original_region:?} -> {candidate_region:?}"),
            });
        }

        None
    }
}

fn form_score(original: Option<&FormContext>, candidate: Option<&FormContext>) -> f64 {
    match (original, candidate) {
        // Neither in a form: neutral
        (None, None) => 0.5,
        // Recorded in a form, candidate outside one: strong mismatch
        (Some(_), None) => 0.0,
        // Candidate gained a form the recording didn't have
        (None, Some(_)) => 0.2,
        (Some(orig), Some(cand)) => {
            let orig_id = stable_id(orig.form_id.as_deref());
            let cand_id = stable_id(cand.form_id.as_deref());
            if orig_id.is_some() && orig_id == cand_id {
                return 1.0;
            }
            if orig.form_name.is_some() && orig.form_name == cand.form_name {
                return 0.9;
            }
            if orig.form_action.is_some() && orig.form_action == cand.form_action {
                return 0.85;
            }

            let class_score = 0.7 * class_overlap(&orig.form_classes, &cand.form_classes);
            let index_score = if relative_index_close(orig, cand) { 0.6 } else { 0.0 };
            class_score.max(index_score)
        }
    }
}

/// Relative field position within 20% of each other
fn relative_index_close(a: &FormContext, b: &FormContext) -> bool {
    if a.total_fields == 0 || b.total_fields == 0 {
        return false;
    }
    let ra = a.field_index as f64 / a.total_fields as f64;
    let rb = b.field_index as f64 / b.total_fields as f64;
    (ra - rb).abs() <= 0.2
}

fn class_overlap(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let sa: HashSet<&str> = a.iter().map(String::as_str).collect();
    let sb: HashSet<&str> = b.iter().map(String::as_str).collect();
    let intersection = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();
    intersection as f64 / union as f64
}

fn region_score(original: VisualRegion, candidate: VisualRegion) -> f64 {
    if original == candidate {
        return 1.0;
    }
    if original == VisualRegion::Modal && candidate != VisualRegion::Modal {
        return 0.0;
    }
    if original == VisualRegion::Unknown || candidate == VisualRegion::Unknown {
        return 0.5;
    }
    0.1
}

fn landmark_score(original: &NearbyLandmarks, candidate: &NearbyLandmarks) -> f64 {
    let mut scores = Vec::new();

    if let Some(orig) = &original.closest_heading {
        let cand_text = candidate.closest_heading.as_ref().map(|h| h.text.as_str());
        scores.push(text_signal(&orig.text, cand_text));
    }
    if let Some(orig) = &original.closest_label {
        let cand_text = candidate.closest_label.as_ref().map(|l| l.text.as_str());
        scores.push(text_signal(&orig.text, cand_text));
    }
    if let Some(orig) = &original.container_text {
        scores.push(text_signal(orig, candidate.container_text.as_deref()));
    }
    if !original.sibling_texts.is_empty() || !candidate.sibling_texts.is_empty() {
        scores.push(sibling_overlap(
            &original.sibling_texts,
            &candidate.sibling_texts,
        ));
    }

    if scores.is_empty() {
        return 0.5;
    }
    scores.iter().sum::<f64>() / scores.len() as f64
}

/// Exact 1.0, substring either way 0.7, different 0.0
fn text_signal(original: &str, candidate: Option<&str>) -> f64 {
    let Some(candidate) = candidate else { return 0.0 };
    let a = original.trim().to_lowercase();
    let b = candidate.trim().to_lowercase();
    if a == b {
        1.0
    } else if !a.is_empty() && !b.is_empty() && (a.contains(&b) || b.contains(&a)) {
        0.7
    } else {
        0.0
    }
}

/// Intersection over the larger side's count
fn sibling_overlap(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.5;
    }
    let sa: HashSet<String> = a.iter().map(|s| s.trim().to_lowercase()).collect();
    let sb: HashSet<String> = b.iter().map(|s| s.trim().to_lowercase()).collect();
    let max = sa.len().max(sb.len());
    if max == 0 {
        return 0.5;
    }
    sa.intersection(&sb).count() as f64 / max as f64
}
