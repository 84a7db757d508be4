//! Attribute match: ids, names, test ids, classes, and parent chains

use crate::context::{ElementContext, ParentLink};
use crate::scoring::ScoringFactor;
use crate::stable_id::stable_id;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// css-module / build-hash class suffixes, e.g. `btn_x7f3a92`
static HASHED_CLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|[_-])[0-9a-zA-Z]*\d[0-9a-zA-Z]{5,}$").unwrap());

/// Utility-framework prefixes whose churn carries no identity
const UTILITY_PREFIXES: [&str; 14] = [
    "p-", "px-", "py-", "pt-", "pb-", "m-", "mx-", "my-", "mt-", "mb-", "w-", "h-", "text-",
    "bg-",
];

pub struct AttributeMatch {
    weight: f64,
}

impl AttributeMatch {
    pub fn new(weight: f64) -> Self {
        Self { weight }
    }
}

impl ScoringFactor for AttributeMatch {
    fn name(&self) -> &'static str {
        "attribute_match"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn score(&self, candidate: &ElementContext, original: &ElementContext) -> f64 {
        let mut scores = Vec::new();

        let orig_id = stable_id(original.id.as_deref());
        let cand_id = stable_id(candidate.id.as_deref());
        if let Some(id_score) = presence_score(orig_id, cand_id, 0.1, 0.3, 0.35) {
            scores.push(id_score);
        }

        let name_match =
            original.name.is_some() && original.name == candidate.name;
        if let Some(name_score) = presence_score(
            original.name.as_deref(),
            candidate.name.as_deref(),
            0.2,
            0.35,
            0.35,
        ) {
            scores.push(name_score);
        }

        let testid_match =
            original.data_testid.is_some() && original.data_testid == candidate.data_testid;
        if let Some(testid_score) = presence_score(
            original.data_testid.as_deref(),
            candidate.data_testid.as_deref(),
            0.1,
            0.3,
            0.3,
        ) {
            scores.push(testid_score);
        }

        if let Some(class_score) = class_similarity(&original.classes, &candidate.classes) {
            scores.push(class_score);
        }

        if !original.parent_chain.is_empty() && !candidate.parent_chain.is_empty() {
            scores.push(chain_similarity(
                &original.parent_chain,
                &candidate.parent_chain,
            ));
        }

        if scores.is_empty() {
            return 0.5;
        }
        let mut factor = scores.iter().sum::<f64>() / scores.len() as f64;

        // Conflicting stable ids put a hard ceiling on everything else
        if orig_id.is_some() && cand_id.is_some() && orig_id != cand_id {
            factor = factor.min(0.4);
        } else if name_match || testid_match {
            factor = factor.max((factor + 0.15).min(0.85));
        }
        factor.min(1.0)
    }
}

/// Exact 1.0, both-present-but-different, or asymmetric presence.
/// `None` when neither side carries the attribute.
fn presence_score(
    original: Option<&str>,
    candidate: Option<&str>,
    mismatch: f64,
    original_only: f64,
    candidate_only: f64,
) -> Option<f64> {
    match (original, candidate) {
        (None, None) => None,
        (Some(a), Some(b)) if a == b => Some(1.0),
        (Some(_), Some(_)) => Some(mismatch),
        (Some(_), None) => Some(original_only),
        (None, Some(_)) => Some(candidate_only),
    }
}

/// True for classes that carry no identity: utility spacing/color classes
/// and build-hashed css-module names.
fn is_noise_class(class: &str) -> bool {
    let lower = class.to_lowercase();
    if UTILITY_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return true;
    }
    if lower == "flex" || lower == "grid" || lower == "block" || lower == "inline" {
        return true;
    }
    HASHED_CLASS.is_match(class)
}

/// Jaccard over meaningful classes with a small overlap boost
fn class_similarity(original: &[String], candidate: &[String]) -> Option<f64> {
    let orig: HashSet<&str> = original
        .iter()
        .map(String::as_str)
        .filter(|c| !is_noise_class(c))
        .collect();
    let cand: HashSet<&str> = candidate
        .iter()
        .map(String::as_str)
        .filter(|c| !is_noise_class(c))
        .collect();
    if orig.is_empty() && cand.is_empty() {
        return None;
    }
    let intersection = orig.intersection(&cand).count();
    if intersection == 0 {
        return Some(0.0);
    }
    let union = orig.union(&cand).count();
    let jaccard = intersection as f64 / union as f64;
    Some((jaccard + 0.3).min(1.0))
}

/// Per-level agreement from the closest parent upward, normalized by the
/// compared depth.
fn chain_similarity(original: &[ParentLink], candidate: &[ParentLink]) -> f64 {
    let depth = original.len().min(candidate.len());
    if depth == 0 {
        return 0.0;
    }
    let mut total = 0.0;
    for level in 0..depth {
        let a = &original[level];
        let b = &candidate[level];
        let mut level_score: f64 = 0.0;
        let tag_eq = a.tag == b.tag;
        if tag_eq {
            level_score += 0.3;
        }
        let a_id = stable_id(a.id.as_deref());
        let b_id = stable_id(b.id.as_deref());
        match (a_id, b_id) {
            (Some(x), Some(y)) if x == y => level_score += 0.5,
            (Some(_), Some(_)) => {}
            _ => {
                // No id information on this level: a tag match carries more
                if tag_eq && a.role.is_none() && b.role.is_none() {
                    level_score += 0.25;
                }
            }
        }
        if a.role.is_some() && a.role == b.role {
            level_score += 0.2;
        }
        total += level_score.min(1.0);
    }
    total / depth as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factor() -> AttributeMatch {
        AttributeMatch::new(0.15)
    }

    fn with_id(id: &str) -> ElementContext {
        ElementContext {
            tag_name: "button".into(),
            id: Some(id.into()),
            ..Default::default()
        }
    }

    #[test]
    fn exact_id_match_is_strong() {
        let a = with_id("submit-btn");
        let b = with_id("submit-btn");
        assert_eq!(factor().score(&b, &a), 1.0);
    }

    #[test]
    fn conflicting_stable_ids_cap_the_factor() {
        let mut a = with_id("submit-btn");
        let mut b = with_id("newsletter-btn");
        a.name = Some("order".into());
        b.name = Some("order".into());
        let score = factor().score(&b, &a);
        assert!(score <= 0.4, "got {score}");
    }

    #[test]
    fn generated_ids_are_invisible() {
        let mut a = with_id(":r0:");
        let mut b = with_id(":r5:");
        a.classes = vec!["btn".into(), "btn-primary".into()];
        b.classes = vec!["btn".into(), "btn-primary".into()];
        let score = factor().score(&b, &a);
        // Only the class subfactor is present: full Jaccard plus boost
        assert_eq!(score, 1.0);
    }

    #[test]
    fn name_match_boosts_toward_ceiling() {
        let mut a = ElementContext::default();
        let mut b = ElementContext::default();
        a.name = Some("email".into());
        b.name = Some("email".into());
        a.classes = vec!["field".into()];
        b.classes = vec!["input".into()];
        // name 1.0, classes 0.0 -> avg 0.5, boosted to 0.65
        let score = factor().score(&b, &a);
        assert!((score - 0.65).abs() < 1e-9, "got {score}");
    }

    #[test]
    fn utility_and_hashed_classes_are_filtered() {
        assert!(is_noise_class("px-4"));
        assert!(is_noise_class("text-sm"));
        assert!(is_noise_class("flex"));
        assert!(is_noise_class("btn_x7f3a92"));
        assert!(!is_noise_class("checkout-form"));
        assert!(!is_noise_class("btn-primary"));
    }

    #[test]
    fn class_overlap_uses_jaccard_with_boost() {
        let a = vec!["btn".to_string(), "primary".to_string(), "px-2".to_string()];
        let b = vec!["btn".to_string(), "secondary".to_string()];
        // meaningful: {btn, primary} vs {btn, secondary}: 1/3 + 0.3
        let score = class_similarity(&a, &b).unwrap();
        assert!((score - (1.0 / 3.0 + 0.3)).abs() < 1e-9);
    }

    #[test]
    fn chain_similarity_rewards_stable_id_agreement() {
        let chain_a = vec![
            ParentLink {
                tag: "div".into(),
                id: None,
                classes: vec![],
                role: None,
            },
            ParentLink {
                tag: "form".into(),
                id: Some("checkout".into()),
                classes: vec![],
                role: None,
            },
        ];
        let chain_b = chain_a.clone();
        let score = chain_similarity(&chain_a, &chain_b);
        // level 0: tag 0.3 + no-id bonus 0.25; level 1: tag 0.3 + id 0.5
        assert!((score - (0.55 + 0.8) / 2.0).abs() < 1e-9);
    }

    #[test]
    fn no_attributes_on_either_side_is_neutral() {
        let a = ElementContext::default();
        let b = ElementContext::default();
        assert_eq!(factor().score(&b, &a), 0.5);
    }
}
