//! Role match: comparing effective ARIA roles

use crate::config::VetoConfig;
use crate::context::ElementContext;
use crate::scoring::{ScoringFactor, Veto};

/// Role pairs that heal into each other without suspicion
const COMPATIBLE_PAIRS: [(&str, &str); 4] = [
    ("button", "link"),
    ("textbox", "searchbox"),
    ("checkbox", "switch"),
    ("listbox", "combobox"),
];

const ACTION_ROLES: [&str; 6] = ["button", "link", "menuitem", "tab", "switch", "checkbox"];
const INPUT_ROLES: [&str; 8] = [
    "textbox",
    "searchbox",
    "checkbox",
    "radio",
    "listbox",
    "combobox",
    "slider",
    "spinbutton",
];
const CONTAINER_ROLES: [&str; 10] = [
    "main",
    "banner",
    "contentinfo",
    "navigation",
    "complementary",
    "region",
    "form",
    "list",
    "table",
    "generic",
];

/// The role used for comparison: explicit ARIA role if present, else
/// mapped from tag and input type.
pub fn effective_role(context: &ElementContext) -> String {
    if let Some(role) = &context.role {
        return role.to_lowercase();
    }
    let tag = context.tag_name.as_str();
    match tag {
        "a" => "link".into(),
        "button" => "button".into(),
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => "heading".into(),
        "select" => "listbox".into(),
        "textarea" => "textbox".into(),
        "input" => input_type_role(context.input_type.as_deref()).into(),
        "nav" => "navigation".into(),
        "header" => "banner".into(),
        "footer" => "contentinfo".into(),
        "aside" => "complementary".into(),
        "main" => "main".into(),
        "form" => "form".into(),
        "img" => "img".into(),
        "ul" | "ol" => "list".into(),
        "li" => "listitem".into(),
        "table" => "table".into(),
        _ => "generic".into(),
    }
}

fn input_type_role(input_type: Option<&str>) -> &'static str {
    match input_type.map(|t| t.to_lowercase()).as_deref() {
        Some("checkbox") => "checkbox",
        Some("radio") => "radio",
        Some("search") => "searchbox",
        Some("range") => "slider",
        Some("number") => "spinbutton",
        Some("submit") | Some("button") | Some("reset") | Some("image") => "button",
        // text, email, password, tel, url, date, and anything novel
        _ => "textbox",
    }
}

pub struct RoleMatch {
    weight: f64,
    veto: VetoConfig,
}

impl RoleMatch {
    pub fn new(weight: f64, veto: VetoConfig) -> Self {
        Self { weight, veto }
    }

    fn incompatible(&self, a: &str, b: &str) -> bool {
        if self
            .veto
            .incompatible_role_pairs
            .iter()
            .any(|(x, y)| (x == a && y == b) || (x == b && y == a))
        {
            return true;
        }
        // An input-like role can never heal into a structural container
        let input_vs_container = (INPUT_ROLES.contains(&a) && CONTAINER_ROLES.contains(&b))
            || (INPUT_ROLES.contains(&b) && CONTAINER_ROLES.contains(&a));
        input_vs_container
    }
}

impl ScoringFactor for RoleMatch {
    fn name(&self) -> &'static str {
        "role_match"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn score(&self, candidate: &ElementContext, original: &ElementContext) -> f64 {
        let original_role = effective_role(original);
        let candidate_role = effective_role(candidate);

        if original_role == candidate_role {
            return 1.0;
        }
        let pair = (original_role.as_str(), candidate_role.as_str());
        if COMPATIBLE_PAIRS
            .iter()
            .any(|(a, b)| pair == (*a, *b) || pair == (*b, *a))
        {
            return 0.8;
        }
        if original.tag_name == candidate.tag_name {
            return 0.6;
        }
        let same_category = (ACTION_ROLES.contains(&pair.0) && ACTION_ROLES.contains(&pair.1))
            || (INPUT_ROLES.contains(&pair.0) && INPUT_ROLES.contains(&pair.1));
        if same_category {
            return 0.4;
        }
        0.1
    }

    fn can_veto(&self, candidate: &ElementContext, original: &ElementContext) -> Option<Veto> {
        let original_role = effective_role(original);
        let candidate_role = effective_role(candidate);
        if self.incompatible(&original_role, &candidate_role) {
            return Some(Veto::Hard {
                reason: format!(
                    "roles {original_role} and {candidate_role} are incompatible"
                ),
            });
        }
        None
    }
}
