//! Position similarity: where the element sits and how big it is

use crate::context::ElementContext;
use crate::scoring::{ScoringFactor, Veto};
use crate::geometry::Rect;

const POSITION_BLEND: f64 = 0.7;
const SIZE_BLEND: f64 = 0.3;
const MAX_DISTANCE: f64 = 500.0;

pub struct PositionSimilarity {
    weight: f64,
    soft_veto_distance: f64,
}

impl PositionSimilarity {
    pub fn new(weight: f64, soft_veto_distance: f64) -> Self {
        Self {
            weight,
            soft_veto_distance,
        }
    }
}

impl ScoringFactor for PositionSimilarity {
    fn name(&self) -> &'static str {
        "position_similarity"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn score(&self, candidate: &ElementContext, original: &ElementContext) -> f64 {
        let a = original.bounding_box;
        let b = candidate.bounding_box;
        if a.is_empty() || b.is_empty() {
            return 0.3;
        }
        let position = distance_to_score(effective_distance(&a, &b), self.soft_veto_distance);
        POSITION_BLEND * position + SIZE_BLEND * size_similarity(&a, &b)
    }

    fn can_veto(&self, candidate: &ElementContext, original: &ElementContext) -> Option<Veto> {
        let a = original.bounding_box;
        let b = candidate.bounding_box;
        if a.is_empty() || b.is_empty() {
            return None;
        }
        let distance = effective_distance(&a, &b);
        if distance >= self.soft_veto_distance {
            return Some(Veto::Soft {
                reason: format!("moved {distance:.0}px from the recorded position"),
            });
        }
        None
    }
}

/// The smaller of top-left and center distance, so a same-size element
/// that moved and a same-center element that resized both score well.
fn effective_distance(a: &Rect, b: &Rect) -> f64 {
    let top_left = a.top_left().distance_to(b.top_left());
    let center = a.center().distance_to(b.center());
    top_left.min(center)
}

fn distance_to_score(distance: f64, soft_veto_distance: f64) -> f64 {
    if distance <= 0.0 {
        return 1.0;
    }
    if distance < 50.0 {
        return 0.9;
    }
    if distance < 100.0 {
        return 0.8;
    }
    if distance < 200.0 {
        return 0.6;
    }
    if distance < soft_veto_distance {
        // Linear decay 0.6 -> 0.2 between 200px and the soft-veto threshold
        let span = soft_veto_distance - 200.0;
        return 0.6 - 0.4 * (distance - 200.0) / span;
    }
    if distance < MAX_DISTANCE {
        // Linear decay 0.2 -> 0.0 out to the discovery cutoff
        let span = MAX_DISTANCE - soft_veto_distance;
        return 0.2 - 0.2 * (distance - soft_veto_distance) / span;
    }
    0.0
}

/// Mean of the width and height min/max ratios
fn size_similarity(a: &Rect, b: &Rect) -> f64 {
    let width_ratio = a.width.min(b.width) / a.width.max(b.width);
    let height_ratio = a.height.min(b.height) / a.height.max(b.height);
    0.5 * width_ratio + 0.5 * height_ratio
}
