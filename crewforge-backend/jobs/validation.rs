use serde::Serialize;
use serde_json::Value;

use crate::jobs::GenerationRequest;

const FIELDS: [&str; 3] = ["requirements", "framework", "language"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: &'static str,
    pub message: String,
}

impl FieldViolation {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check every submission rule and collect all violations, not just the first.
pub fn validate_request(
    request: &GenerationRequest,
    max_requirements_len: usize,
) -> Result<(), Vec<FieldViolation>> {
    let mut violations = Vec::new();

    let requirements = request.requirements.trim();
    if requirements.is_empty() {
        violations.push(FieldViolation::new("requirements", "requirements is required"));
    } else if requirements.chars().count() > max_requirements_len {
        violations.push(FieldViolation::new(
            "requirements",
            format!("requirements must be at most {max_requirements_len} characters"),
        ));
    }

    if request.framework.trim().is_empty() {
        violations.push(FieldViolation::new("framework", "framework is required"));
    }
    if request.language.trim().is_empty() {
        violations.push(FieldViolation::new("language", "language is required"));
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

/// Build a request from a raw JSON body and check it in one pass.
///
/// A missing or `null` field counts as empty. A field of any other non-string
/// type gets its own violation, reported alongside the rule violations of the
/// remaining fields.
pub fn decode_request(
    body: &Value,
    max_requirements_len: usize,
) -> Result<GenerationRequest, Vec<FieldViolation>> {
    let mut violations = Vec::new();
    let mut text = |field: &'static str| match body.get(field) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(_) => {
            violations.push(FieldViolation::new(field, format!("{field} must be a string")));
            String::new()
        }
    };
    let request = GenerationRequest {
        requirements: text("requirements"),
        framework: text("framework"),
        language: text("language"),
    };

    if let Err(rule_violations) = validate_request(&request, max_requirements_len) {
        let mistyped: Vec<&str> = violations.iter().map(|v| v.field).collect();
        let rest: Vec<FieldViolation> = rule_violations
            .into_iter()
            .filter(|v| !mistyped.contains(&v.field))
            .collect();
        violations.extend(rest);
    }

    if violations.is_empty() {
        Ok(request)
    } else {
        violations.sort_by_key(|v| FIELDS.iter().position(|f| *f == v.field));
        Err(violations)
    }
}
