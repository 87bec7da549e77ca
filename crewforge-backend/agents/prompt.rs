use std::collections::HashMap;

use crate::jobs::GenerationRequest;

/// Replace every `{{key}}` placeholder in `template` with its value.
/// Placeholders without a matching variable are left untouched. Substituted
/// values are never expanded again.
pub fn render_prompt(template: &str, vars: &HashMap<&str, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let key = &after[..end];
        match vars.get(key) {
            Some(value) => out.push_str(value),
            None => {
                out.push_str("{{");
                out.push_str(key);
                out.push_str("}}");
            }
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

/// Template variables derived from a submission.
pub fn request_vars(request: &GenerationRequest) -> HashMap<&'static str, String> {
    let mut vars = HashMap::new();
    vars.insert("requirements", request.requirements.trim().to_string());
    vars.insert("framework", request.framework.trim().to_string());
    vars.insert("language", request.language.trim().to_string());
    vars
}
