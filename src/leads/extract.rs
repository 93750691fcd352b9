//! Heuristic field extraction from arbitrary form payloads.
//!
//! Form providers name their fields differently, so each logical field has an
//! ordered alias list. The first alias with a truthy value wins. Two fallbacks
//! run afterwards:
//! - email: the first string value anywhere in the payload containing `@`
//! - name: the first key containing `name` (case-insensitive) whose value is a
//!   non-empty string
//!
//! Payload key order is preserved, so "first" means first as submitted.

use serde_json::{Map, Value};

/// Name used when nothing in the payload looks like one.
pub const UNKNOWN_NAME: &str = "Unknown";

const NAME_ALIASES: &[&str] = &[
    "name",
    "full_name",
    "fullName",
    "first_name",
    "firstName",
    "contact_name",
];

const EMAIL_ALIASES: &[&str] = &["email", "email_address", "emailAddress", "contact_email"];

const PHONE_ALIASES: &[&str] = &[
    "phone",
    "phone_number",
    "phoneNumber",
    "contact_phone",
    "mobile",
];

const COMPANY_ALIASES: &[&str] = &[
    "company",
    "company_name",
    "companyName",
    "organization",
    "business_name",
];

/// Lead fields pulled out of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedLead {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company: Option<String>,
}

impl Default for ExtractedLead {
    fn default() -> Self {
        Self {
            name: UNKNOWN_NAME.to_string(),
            email: String::new(),
            phone: None,
            company: None,
        }
    }
}

/// Extract from any JSON value. Non-object payloads yield the defaults.
pub fn extract_lead_fields(payload: &Value) -> ExtractedLead {
    match payload.as_object() {
        Some(map) => extract_from_map(map),
        None => ExtractedLead::default(),
    }
}

/// Extract from a JSON object.
pub fn extract_from_map(payload: &Map<String, Value>) -> ExtractedLead {
    let email = first_alias(payload, EMAIL_ALIASES).or_else(|| {
        payload.values().find_map(|v| match v {
            Value::String(s) if s.contains('@') => Some(s.clone()),
            _ => None,
        })
    });

    let name = first_alias(payload, NAME_ALIASES).or_else(|| {
        payload.iter().find_map(|(key, v)| match v {
            Value::String(s) if !s.is_empty() && key.to_lowercase().contains("name") => {
                Some(s.clone())
            }
            _ => None,
        })
    });

    ExtractedLead {
        name: name.unwrap_or_else(|| UNKNOWN_NAME.to_string()),
        email: email.unwrap_or_default(),
        phone: first_alias(payload, PHONE_ALIASES),
        company: first_alias(payload, COMPANY_ALIASES),
    }
}

fn first_alias(payload: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    aliases
        .iter()
        .filter_map(|alias| payload.get(*alias))
        .find(|v| is_truthy(v))
        .map(render)
}

/// Falsy values are skipped during alias lookup: null, false, 0, "".
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn aliases_map_common_field_names() {
        let fields = extract_lead_fields(&json!({
            "full_name": "Jane Doe",
            "email_address": "jane@x.com",
            "phoneNumber": "+1 555 0100",
            "organization": "Acme"
        }));
        assert_eq!(fields.name, "Jane Doe");
        assert_eq!(fields.email, "jane@x.com");
        assert_eq!(fields.phone.as_deref(), Some("+1 555 0100"));
        assert_eq!(fields.company.as_deref(), Some("Acme"));
    }

    #[test]
    fn alias_order_decides_between_candidates() {
        let fields = extract_lead_fields(&json!({
            "first_name": "Jane",
            "name": "Jane Doe",
        }));
        assert_eq!(fields.name, "Jane Doe");
    }

    #[test]
    fn falsy_alias_values_are_skipped() {
        let fields = extract_lead_fields(&json!({
            "name": "",
            "fullName": "Jane Doe",
            "phone": null,
            "mobile": 5550100,
            "company": false,
        }));
        assert_eq!(fields.name, "Jane Doe");
        assert_eq!(fields.phone.as_deref(), Some("5550100"));
        assert_eq!(fields.company, None);
    }

    #[test]
    fn missing_everything_yields_defaults() {
        let fields = extract_lead_fields(&json!({
            "q1": "yes",
            "budget": 5000
        }));
        assert_eq!(fields, ExtractedLead::default());
        assert_eq!(fields.name, "Unknown");
        assert_eq!(fields.email, "");
    }

    #[test]
    fn email_fallback_scans_values_in_order() {
        let fields = extract_lead_fields(&json!({
            "message": "no address here",
            "reply_to": "first@x.com",
            "other": "second@x.com"
        }));
        assert_eq!(fields.email, "first@x.com");
    }

    #[test]
    fn email_fallback_ignores_non_strings() {
        let fields = extract_lead_fields(&json!({
            "nested": {"email": "deep@x.com"},
            "list": ["a@x.com"]
        }));
        assert_eq!(fields.email, "");
    }

    #[test]
    fn name_fallback_uses_key_substring_case_insensitively() {
        let fields = extract_lead_fields(&json!({
            "UserName": "",
            "Your Name": "Sam",
            "LastName": "Smith"
        }));
        assert_eq!(fields.name, "Sam");
    }

    #[test]
    fn name_fallback_can_pick_up_company_name() {
        // company_name is both a company alias and contains "name"
        let fields = extract_lead_fields(&json!({
            "company_name": "Acme"
        }));
        assert_eq!(fields.company.as_deref(), Some("Acme"));
        assert_eq!(fields.name, "Acme");
    }

    #[test]
    fn non_object_payload_yields_defaults() {
        assert_eq!(extract_lead_fields(&json!(["a@x.com"])), ExtractedLead::default());
        assert_eq!(extract_lead_fields(&json!("hello")), ExtractedLead::default());
    }
}
