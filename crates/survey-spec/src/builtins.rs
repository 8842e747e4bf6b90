//! Functions every registry built with [`FunctionRegistry::with_builtins`] knows.

use std::collections::HashMap;
use std::sync::LazyLock;

use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::model::question::Question;
use crate::registry::{ContinuationContext, FunctionRegistry, HookContext};
use crate::spec::branch::BranchSpec;
use crate::spec::question::QuestionKind;

pub(crate) fn register(registry: &mut FunctionRegistry) {
    registry
        .register_validator("require", require, "required")
        .register_validator("pattern", pattern, "does not match the expected format")
        .register_validator("min_length", min_length, "too short")
        .register_validator("max_length", max_length, "too long")
        .register_validator("integer", integer, "must be a whole number in range")
        .register_validator("number", number, "must be a number in range");

    registry
        .register_continuation("branch", branch)
        .register_continuation("select", select)
        .register_continuation("end", end);

    registry
        .register_hook("template", template)
        .register_hook("trim", trim)
        .register_hook("set_data", set_data);
}

fn answer(question: &Question) -> &str {
    question.response().unwrap_or("").trim()
}

fn require(question: &Question, _args: &Value) -> bool {
    match question.kind() {
        QuestionKind::SingleChoice => question.selected_choice().is_some(),
        QuestionKind::Free => !answer(question).is_empty(),
        QuestionKind::Text | QuestionKind::Embedded => true,
    }
}

/// Compiled validator patterns by source; `None` marks a pattern that failed
/// to compile.
static PATTERNS: LazyLock<Mutex<HashMap<String, Option<Regex>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn compiled_pattern(source: &str) -> Option<Regex> {
    let mut patterns = PATTERNS.lock();
    if let Some(cached) = patterns.get(source) {
        return cached.clone();
    }
    let compiled = Regex::new(source)
        .inspect_err(|err| warn!(pattern = source, %err, "ignoring invalid validator pattern"))
        .ok();
    patterns.insert(source.to_string(), compiled.clone());
    compiled
}

fn pattern(question: &Question, args: &Value) -> bool {
    let value = answer(question);
    if value.is_empty() {
        return true;
    }
    let Some(source) = args.get("pattern").and_then(Value::as_str) else {
        return true;
    };
    compiled_pattern(source).is_none_or(|regex| regex.is_match(value))
}

fn length_bound(args: &Value, key: &str) -> Option<usize> {
    args.get(key)
        .and_then(Value::as_u64)
        .and_then(|bound| usize::try_from(bound).ok())
}

fn min_length(question: &Question, args: &Value) -> bool {
    let min = length_bound(args, "min").unwrap_or(0);
    answer(question).chars().count() >= min
}

fn max_length(question: &Question, args: &Value) -> bool {
    match length_bound(args, "max") {
        Some(max) => answer(question).chars().count() <= max,
        None => true,
    }
}

fn integer(question: &Question, args: &Value) -> bool {
    let value = answer(question);
    if value.is_empty() {
        return true;
    }
    let Ok(parsed) = value.parse::<i64>() else {
        return false;
    };
    let above = args.get("min").and_then(Value::as_i64).is_none_or(|min| parsed >= min);
    let below = args.get("max").and_then(Value::as_i64).is_none_or(|max| parsed <= max);
    above && below
}

fn number(question: &Question, args: &Value) -> bool {
    let value = answer(question);
    if value.is_empty() {
        return true;
    }
    let parsed = match value.parse::<f64>() {
        Ok(parsed) if parsed.is_finite() => parsed,
        _ => return false,
    };
    let above = args.get("min").and_then(Value::as_f64).is_none_or(|min| parsed >= min);
    let below = args.get("max").and_then(Value::as_f64).is_none_or(|max| parsed <= max);
    above && below
}

fn instantiate(
    ctx: &ContinuationContext<'_>,
    name: &str,
    args: Option<&Value>,
) -> Result<BranchSpec, String> {
    let mut spec = ctx
        .templates
        .get(name)
        .cloned()
        .ok_or_else(|| format!("branch template '{}' is not defined", name))?;
    if let Some(args) = args {
        spec.args = args.clone();
    }
    Ok(spec)
}

/// `{"name": "<template>", "args": {..}?}`
fn branch(ctx: &ContinuationContext<'_>, args: &Value) -> Result<Option<BranchSpec>, String> {
    let name = args
        .get("name")
        .and_then(Value::as_str)
        .ok_or("branch continuation requires args.name")?;
    instantiate(ctx, name, args.get("args")).map(Some)
}

/// `{"var": "<variable>", "cases": {"<value>": "<template>"}, "default": "<template>"?}`
///
/// With no matching case and no default the survey ends.
fn select(ctx: &ContinuationContext<'_>, args: &Value) -> Result<Option<BranchSpec>, String> {
    let var = args
        .get("var")
        .and_then(Value::as_str)
        .ok_or("select continuation requires args.var")?;
    let key = match ctx.participant.data_for(var) {
        Some(Value::String(text)) => Some(text.clone()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    };
    let case = key
        .as_deref()
        .and_then(|key| args.get("cases").and_then(|cases| cases.get(key)))
        .and_then(Value::as_str);
    let target = case.or_else(|| args.get("default").and_then(Value::as_str));
    match target {
        Some(name) => instantiate(ctx, name, None).map(Some),
        None => Ok(None),
    }
}

fn end(_ctx: &ContinuationContext<'_>, _args: &Value) -> Result<Option<BranchSpec>, String> {
    Ok(None)
}

/// Renders `args.template` into the question text.
fn template(question: &mut Question, ctx: &HookContext<'_>, args: &Value) -> Result<(), String> {
    let source = args
        .get("template")
        .and_then(Value::as_str)
        .ok_or("template hook requires args.template")?;
    let text = ctx
        .templates
        .render(source, &ctx.template_context(args))
        .map_err(|err| err.to_string())?;
    question.set_text(text);
    Ok(())
}

fn trim(question: &mut Question, _ctx: &HookContext<'_>, _args: &Value) -> Result<(), String> {
    if let Some(Value::String(text)) = question.data() {
        let trimmed = text.trim().to_string();
        question.set_data(Some(Value::String(trimmed)));
    }
    Ok(())
}

fn set_data(question: &mut Question, _ctx: &HookContext<'_>, args: &Value) -> Result<(), String> {
    let value = args.get("value").cloned().ok_or("set_data hook requires args.value")?;
    question.set_data(Some(value));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::QuestionId;
    use crate::spec::question::{QuestionSpec, ValidatorSpec};
    use serde_json::json;

    fn validated(spec: QuestionSpec, raw: &str) -> Option<String> {
        let registry = FunctionRegistry::with_builtins();
        let mut next = 10;
        let mut question = Question::from_spec(QuestionId(1), &spec, &mut || {
            next += 1;
            next
        });
        question.set_response(Some(raw));
        question.validate(&registry).unwrap();
        question.error().map(String::from)
    }

    #[test]
    fn require_rejects_blank_free_text() {
        let spec = QuestionSpec::free("name", "Name?").with_validator(ValidatorSpec::new("require"));
        assert_eq!(validated(spec.clone(), "   ").as_deref(), Some("required"));
        assert_eq!(validated(spec, "Ada"), None);
    }

    #[test]
    fn require_on_choice_needs_a_selection() {
        let spec = QuestionSpec::single_choice("pick", "Pick", &["A"])
            .with_validator(ValidatorSpec::new("require"));
        assert_eq!(validated(spec, "404").as_deref(), Some("required"));
    }

    #[test]
    fn pattern_matches_and_tolerates_bad_regex() {
        let zip = QuestionSpec::free("zip", "Zip?").with_validator(
            ValidatorSpec::new("pattern").with_args(json!({"pattern": "^[0-9]{5}$"})),
        );
        assert!(validated(zip.clone(), "1234").is_some());
        assert_eq!(validated(zip, "12345"), None);

        let broken = QuestionSpec::free("zip", "Zip?")
            .with_validator(ValidatorSpec::new("pattern").with_args(json!({"pattern": "("})));
        assert_eq!(validated(broken, "anything"), None);
    }

    #[test]
    fn patterns_are_compiled_once() {
        let source = "^cached-[a-z]+$";
        assert!(compiled_pattern(source).is_some());
        assert!(PATTERNS.lock().contains_key(source));
        let regex = compiled_pattern(source).unwrap();
        assert!(regex.is_match("cached-abc"));

        assert!(compiled_pattern("[unclosed").is_none());
        assert!(matches!(PATTERNS.lock().get("[unclosed"), Some(None)));
    }

    #[test]
    fn integer_checks_bounds() {
        let age = QuestionSpec::free("age", "Age?").with_validator(
            ValidatorSpec::new("integer")
                .with_args(json!({"min": 18, "max": 99}))
                .with_message("age"),
        );
        assert_eq!(validated(age.clone(), "17").as_deref(), Some("age"));
        assert_eq!(validated(age.clone(), "x").as_deref(), Some("age"));
        assert_eq!(validated(age.clone(), "42"), None);
        assert_eq!(validated(age, ""), None);
    }

    #[test]
    fn number_accepts_decimals() {
        let spec = QuestionSpec::free("score", "Score?")
            .with_validator(ValidatorSpec::new("number").with_args(json!({"max": 1.0})));
        assert_eq!(validated(spec.clone(), "0.5"), None);
        assert!(validated(spec.clone(), "1.5").is_some());
        assert!(validated(spec, "NaN").is_some());
    }

    #[test]
    fn max_length_counts_characters() {
        let spec = QuestionSpec::free("nick", "Nick?")
            .with_validator(ValidatorSpec::new("max_length").with_args(json!({"max": 3})));
        assert_eq!(validated(spec.clone(), "äöü"), None);
        assert!(validated(spec, "abcd").is_some());
    }
}
