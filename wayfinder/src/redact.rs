//! Sensitive-value redaction
//!
//! One shared pass applied everywhere a recorded or captured value leaves
//! the page: planner context snapshots, completed-step summaries, heal
//! logs. Field-level redaction keys off input type and field naming;
//! value-level redaction rewrites recognizable secrets wherever they
//! appear.

use once_cell::sync::Lazy;
use regex::Regex;

const MAX_VALUE_LEN: usize = 100;

static CREDIT_CARD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{4}[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}\b").unwrap());
static SSN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());
static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());
static PHONE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\(?\d{3}\)?[-. ]?\d{3}[-. ]?\d{4}\b").unwrap());
// Underscores are word characters, so \b misses names like card_number;
// delimit on anything non-alphanumeric instead.
static SENSITIVE_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(^|[^a-z0-9])(ssn|social|account|routing|card|cvv|pin|dob|birth|passport)([^a-z0-9]|$)",
    )
    .unwrap()
});

/// True when a field's name or placeholder marks its value as sensitive
pub fn is_sensitive_field(name: Option<&str>, placeholder: Option<&str>) -> bool {
    name.map(|n| SENSITIVE_FIELD.is_match(n)).unwrap_or(false)
        || placeholder
            .map(|p| SENSITIVE_FIELD.is_match(p))
            .unwrap_or(false)
}

/// Mask an email address wholesale
pub fn mask_email(_value: &str) -> String {
    "***@***.***".to_string()
}

/// Mask a phone number, keeping the last four digits when present
pub fn mask_phone(value: &str) -> String {
    let digits: Vec<char> = value.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() >= 4 {
        let last4: String = digits[digits.len() - 4..].iter().collect();
        format!("***-***-{last4}")
    } else {
        "***-***-XXXX".to_string()
    }
}

/// Field-aware redaction for a captured or recorded input value.
///
/// Passwords never leave the page, not even masked. Email and tel values
/// are masked wholesale, values from sensitively-named fields are
/// replaced, and everything else goes through the pattern pass. Both the
/// planner capture and completed-step summaries route through here.
pub fn redact_field_value(
    value: &str,
    input_type: Option<&str>,
    field_name: Option<&str>,
    field_label: Option<&str>,
) -> Option<String> {
    match input_type.map(str::to_ascii_lowercase).as_deref() {
        Some("password") => None,
        Some("email") => Some(mask_email(value)),
        Some("tel") => Some(mask_phone(value)),
        _ => {
            if is_sensitive_field(field_name, field_label) {
                Some("[REDACTED]".to_string())
            } else {
                Some(redact_value(value))
            }
        }
    }
}

/// Rewrite recognizable secrets inside free text, then truncate.
///
/// Order matters: card and SSN patterns would otherwise be chewed up by
/// the phone matcher.
pub fn redact_value(value: &str) -> String {
    let pass = CREDIT_CARD.replace_all(value, "####-####-####-####");
    let pass = SSN.replace_all(&pass, "###-##-####");
    let pass = EMAIL.replace_all(&pass, "***@***.***");
    let pass = PHONE.replace_all(&pass, "***-***-XXXX");
    truncate_value(&pass)
}

/// Truncate a value to the shared cap, marking the cut
pub fn truncate_value(value: &str) -> String {
    if value.chars().count() <= MAX_VALUE_LEN {
        return value.to_string();
    }
    let mut out: String = value.chars().take(MAX_VALUE_LEN).collect();
    out.push('…');
    out
}
