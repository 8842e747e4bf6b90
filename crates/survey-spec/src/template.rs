use handlebars::{Handlebars, RenderError, no_escape};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template render failed: {0}")]
    Render(#[from] RenderError),
}

/// Handlebars wrapper used by question text hooks. Output is plain text, so
/// HTML escaping is disabled and missing fields render as empty strings.
pub struct TemplateEngine {
    registry: Handlebars<'static>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.register_escape_fn(no_escape);
        registry.set_strict_mode(false);
        Self { registry }
    }

    pub fn render(&self, template: &str, ctx: &Value) -> Result<String, TemplateError> {
        Ok(self.registry.render_template(template, ctx)?)
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_nested_context_without_escaping() {
        let engine = TemplateEngine::new();
        let ctx = json!({ "assignments": { "condition": { "anchor": "<smart>" } } });
        let text = engine
            .render("You are in the {{assignments.condition.anchor}} condition", &ctx)
            .unwrap();
        assert_eq!(text, "You are in the <smart> condition");
    }

    #[test]
    fn missing_fields_render_empty() {
        let engine = TemplateEngine::new();
        assert_eq!(engine.render("[{{nope}}]", &json!({})).unwrap(), "[]");
    }

    #[test]
    fn malformed_template_is_an_error() {
        let engine = TemplateEngine::new();
        assert!(engine.render("{{#if}}", &json!({})).is_err());
    }
}
