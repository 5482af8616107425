//! `<name>` template substitution for nextflow config presets.

use crate::error::EmitError;

/// Render a preset template, replacing every `<name>` token with the string
/// form of `config["nextflow"][name]`. `name` must be a bare alphanumeric/
/// underscore identifier; anything else between angle brackets is left
/// untouched (it isn't a template token, just a literal `<`).
pub fn render_preset(template: &str, config: &serde_json::Value) -> Result<String, EmitError> {
    let params = config.get("nextflow").and_then(|v| v.as_object());
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        rest = &rest[start + 1..];
        let token_end = rest
            .find('>')
            .filter(|&end| end > 0 && rest[..end].chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
        match token_end {
            Some(end) => {
                let name = &rest[..end];
                let value = params
                    .and_then(|p| p.get(name))
                    .ok_or_else(|| EmitError::SubstitutionFailed { name: name.to_string() })?;
                out.push_str(&scalar_token(value));
                rest = &rest[end + 1..];
            }
            None => {
                out.push('<');
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

fn scalar_token(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
