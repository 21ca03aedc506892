//! Localized message templates loaded from a JSON file.
//!
//! The file is a flat JSON object mapping template keys to strings with
//! `$name` placeholders. Operators swap the file to change language or
//! wording without touching the daemon.

use std::collections::HashMap;
use std::path::Path;

use crate::error::TemplateError;

pub struct MessageTemplates {
    templates: HashMap<String, String>,
}

impl MessageTemplates {
    /// Load and validate a template file. Every value must be a string.
    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        if !path.exists() {
            return Err(TemplateError::NotFound {
                path: path.display().to_string(),
            });
        }
        let raw = std::fs::read_to_string(path)?;
        let value: serde_json::Value =
            serde_json::from_str(&raw).map_err(|e| TemplateError::InvalidJson {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        let serde_json::Value::Object(entries) = value else {
            return Err(TemplateError::NotAnObject {
                path: path.display().to_string(),
            });
        };

        let mut templates = HashMap::with_capacity(entries.len());
        for (key, value) in entries {
            let serde_json::Value::String(text) = value else {
                return Err(TemplateError::NotAString { key });
            };
            templates.insert(key, text);
        }

        Ok(Self { templates })
    }

    /// Render the template for `key`, substituting `$name` placeholders
    /// from `vars`.
    pub fn format(&self, key: &str, vars: &[(&str, &str)]) -> Result<String, TemplateError> {
        let template = self
            .templates
            .get(key)
            .ok_or_else(|| TemplateError::UnknownKey {
                key: key.to_string(),
            })?;
        Ok(substitute(template, vars))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// `$name` and `${name}` substitution; `$$` renders a literal `$`.
///
/// A placeholder with no matching variable renders as `{name}` so a
/// stale template shows exactly which variable it expected instead of
/// aborting the send.
fn substitute(template: &str, vars: &[(&str, &str)]) -> String {
    let lookup = |name: &str| vars.iter().find(|(k, _)| *k == name).map(|(_, v)| *v);

    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + 1..];

        if let Some(after) = rest.strip_prefix('$') {
            out.push('$');
            rest = after;
            continue;
        }

        if let Some(inner) = rest.strip_prefix('{') {
            if let Some(end) = inner.find('}') {
                let name = &inner[..end];
                if is_placeholder_name(name) {
                    render_var(&mut out, name, lookup(name));
                    rest = &inner[end + 1..];
                    continue;
                }
            }
            // Unterminated or invalid ${...}: keep the '$' literally.
            out.push('$');
            continue;
        }

        let end = rest
            .char_indices()
            .find(|(_, c)| !c.is_ascii_alphanumeric() && *c != '_')
            .map(|(idx, _)| idx)
            .unwrap_or(rest.len());
        let name = &rest[..end];
        if !is_placeholder_name(name) {
            out.push('$');
            continue;
        }
        render_var(&mut out, name, lookup(name));
        rest = &rest[end..];
    }

    out.push_str(rest);
    out
}

fn render_var(out: &mut String, name: &str, value: Option<&str>) {
    match value {
        Some(value) => out.push_str(value),
        None => {
            out.push('{');
            out.push_str(name);
            out.push('}');
        }
    }
}

/// Placeholder names start with a letter or underscore.
fn is_placeholder_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn templates_from(json: &str) -> MessageTemplates {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file.flush().unwrap();
        MessageTemplates::load(file.path()).unwrap()
    }

    // ── Substitution ────────────────────────────────────────────────

    #[test]
    fn substitutes_simple_placeholders() {
        let result = substitute("From: $sender", &[("sender", "alice@example.com")]);
        assert_eq!(result, "From: alice@example.com");
    }

    #[test]
    fn substitutes_braced_placeholders() {
        let result = substitute("every ${interval}s", &[("interval", "30")]);
        assert_eq!(result, "every 30s");
    }

    #[test]
    fn placeholder_ends_at_non_identifier() {
        let result = substitute("$subject!", &[("subject", "Hello")]);
        assert_eq!(result, "Hello!");
    }

    #[test]
    fn double_dollar_is_literal() {
        let result = substitute("costs $$5", &[]);
        assert_eq!(result, "costs $5");
    }

    #[test]
    fn missing_variable_renders_its_name() {
        let result = substitute("From: $sender", &[]);
        assert_eq!(result, "From: {sender}");
    }

    #[test]
    fn bare_dollar_is_kept() {
        assert_eq!(substitute("100$ only", &[]), "100$ only");
        assert_eq!(substitute("end $", &[]), "end $");
        assert_eq!(substitute("bad ${", &[]), "bad ${");
    }

    #[test]
    fn multiple_placeholders_in_one_template() {
        let result = substitute(
            "$sender: $subject\n\n$message$ellipsis",
            &[
                ("sender", "Bob"),
                ("subject", "Hi"),
                ("message", "body"),
                ("ellipsis", "..."),
            ],
        );
        assert_eq!(result, "Bob: Hi\n\nbody...");
    }

    #[test]
    fn substitution_handles_cyrillic_templates() {
        let result = substitute("Тема: $subject", &[("subject", "Привет")]);
        assert_eq!(result, "Тема: Привет");
    }

    // ── Loading ─────────────────────────────────────────────────────

    #[test]
    fn loads_and_formats() {
        let templates = templates_from(r#"{"new_email": "From $sender"}"#);
        assert_eq!(templates.len(), 1);
        let text = templates
            .format("new_email", &[("sender", "carol")])
            .unwrap();
        assert_eq!(text, "From carol");
    }

    #[test]
    fn unknown_key_is_an_error() {
        let templates = templates_from(r#"{"new_email": "x"}"#);
        let result = templates.format("nope", &[]);
        assert!(matches!(result, Err(TemplateError::UnknownKey { .. })));
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = MessageTemplates::load(Path::new("/nonexistent/templates.json"));
        assert!(matches!(result, Err(TemplateError::NotFound { .. })));
    }

    #[test]
    fn rejects_non_object_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[1, 2, 3]").unwrap();
        file.flush().unwrap();
        let result = MessageTemplates::load(file.path());
        assert!(matches!(result, Err(TemplateError::NotAnObject { .. })));
    }

    #[test]
    fn rejects_non_string_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"new_email": 42}"#).unwrap();
        file.flush().unwrap();
        let result = MessageTemplates::load(file.path());
        assert!(matches!(result, Err(TemplateError::NotAString { .. })));
    }

    #[test]
    fn rejects_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{not json").unwrap();
        file.flush().unwrap();
        let result = MessageTemplates::load(file.path());
        assert!(matches!(result, Err(TemplateError::InvalidJson { .. })));
    }
}
