//! Generated-id detection
//!
//! Ids minted by frameworks or build tooling churn between deploys, so they
//! must be treated as absent in scoring and parent-chain comparison. An id
//! is stable only if it survives every filter here.

use once_cell::sync::Lazy;
use regex::Regex;

static HEX_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9a-fA-F]{8,}").unwrap());
static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{10,}").unwrap());
static SYNTHESIZED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^:r\d+:$|^«r\d+»$").unwrap());

const FRAMEWORK_PREFIXES: [&str; 4] = ["react-", "ember-", "vue-", "ng-"];

/// True when `id` looks machine-generated
pub fn is_generated_id(id: &str) -> bool {
    if id.is_empty() {
        return true;
    }
    if FRAMEWORK_PREFIXES
        .iter()
        .any(|prefix| id.starts_with(prefix))
    {
        return true;
    }
    if SYNTHESIZED.is_match(id) {
        return true;
    }
    // A hex run only counts when it has a digit in it, otherwise ids like
    // "accessibility-bar" would be rejected for their letter runs.
    if HEX_RUN
        .find_iter(id)
        .any(|m| m.as_str().chars().any(|c| c.is_ascii_digit()))
    {
        return true;
    }
    DIGIT_RUN.is_match(id)
}

/// The id, when it is present and stable
pub fn stable_id(id: Option<&str>) -> Option<&str> {
    id.filter(|id| !is_generated_id(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_ids_are_stable() {
        for id in ["submit-btn", "checkout", "main-nav", "email", "form_login"] {
            assert!(!is_generated_id(id), "{id} should be stable");
        }
    }

    #[test]
    fn framework_prefixes_are_generated() {
        for id in ["react-select-2-input", "ember-123", "vue-portal", "ng-star-inserted"] {
            assert!(is_generated_id(id), "{id} should be generated");
        }
    }

    #[test]
    fn synthesized_ids_are_generated() {
        assert!(is_generated_id(":r0:"));
        assert!(is_generated_id(":r15:"));
    }

    #[test]
    fn hash_and_digit_runs_are_generated() {
        assert!(is_generated_id("btn-a3f9c2d41e"));
        assert!(is_generated_id("widget-1714690500123"));
        assert!(!is_generated_id("addressee")); // letter-only "hex" run
    }

    #[test]
    fn stable_id_filters() {
        assert_eq!(stable_id(Some("checkout")), Some("checkout"));
        assert_eq!(stable_id(Some(":r0:")), None);
        assert_eq!(stable_id(None), None);
    }
}
