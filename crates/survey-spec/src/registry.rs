use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::{FunctionKind, SurveyError};
use crate::ids::ParticipantId;
use crate::model::question::Question;
use crate::participant::Participant;
use crate::spec::branch::BranchSpec;
use crate::template::TemplateEngine;

/// Predicate over the owning question; `true` accepts the response.
pub type ValidatorFn = fn(&Question, &Value) -> bool;

/// Produces the branch that follows an exhausted one, or `None` to end the survey.
pub type ContinuationFn = fn(&ContinuationContext<'_>, &Value) -> Result<Option<BranchSpec>, String>;

/// Side-effecting callback run before render (compile) or after submit (post).
pub type HookFn = fn(&mut Question, &HookContext<'_>, &Value) -> Result<(), String>;

/// What a continuation can see while deciding the next branch.
pub struct ContinuationContext<'a> {
    pub participant: &'a Participant,
    /// Arguments captured on the exhausted branch.
    pub branch_args: &'a Value,
    pub templates: &'a BTreeMap<String, BranchSpec>,
}

/// Snapshot of participant state handed to question hooks.
pub struct HookContext<'a> {
    pub participant_id: ParticipantId,
    pub assignments: &'a Map<String, Value>,
    pub responses: &'a Map<String, Value>,
    /// Arguments of the branch that owns the question.
    pub branch_args: &'a Value,
    pub templates: &'a TemplateEngine,
}

impl HookContext<'_> {
    /// JSON context used when rendering handlebars templates.
    pub fn template_context(&self, args: &Value) -> Value {
        serde_json::json!({
            "participant_id": self.participant_id.0,
            "assignments": self.assignments,
            "responses": self.responses,
            "branch": self.branch_args,
            "args": args,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ValidatorEntry {
    pub predicate: ValidatorFn,
    pub message: String,
}

/// Stable string keys mapped to registered functions.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    validators: BTreeMap<String, ValidatorEntry>,
    continuations: BTreeMap<String, ContinuationFn>,
    hooks: BTreeMap<String, HookFn>,
    templates: TemplateEngine,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in validators, continuations and hooks.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::builtins::register(&mut registry);
        registry
    }

    pub fn register_validator(
        &mut self,
        key: impl Into<String>,
        predicate: ValidatorFn,
        message: impl Into<String>,
    ) -> &mut Self {
        self.validators.insert(
            key.into(),
            ValidatorEntry {
                predicate,
                message: message.into(),
            },
        );
        self
    }

    pub fn register_continuation(
        &mut self,
        key: impl Into<String>,
        continuation: ContinuationFn,
    ) -> &mut Self {
        self.continuations.insert(key.into(), continuation);
        self
    }

    pub fn register_hook(&mut self, key: impl Into<String>, hook: HookFn) -> &mut Self {
        self.hooks.insert(key.into(), hook);
        self
    }

    pub fn validator(&self, key: &str) -> Result<&ValidatorEntry, SurveyError> {
        self.validators
            .get(key)
            .ok_or_else(|| unknown(FunctionKind::Validator, key))
    }

    pub fn continuation(&self, key: &str) -> Result<ContinuationFn, SurveyError> {
        self.continuations
            .get(key)
            .copied()
            .ok_or_else(|| unknown(FunctionKind::Continuation, key))
    }

    pub fn hook(&self, key: &str) -> Result<HookFn, SurveyError> {
        self.hooks
            .get(key)
            .copied()
            .ok_or_else(|| unknown(FunctionKind::Hook, key))
    }

    pub fn contains(&self, kind: FunctionKind, key: &str) -> bool {
        match kind {
            FunctionKind::Validator => self.validators.contains_key(key),
            FunctionKind::Continuation => self.continuations.contains_key(key),
            FunctionKind::Hook => self.hooks.contains_key(key),
        }
    }

    pub fn templates(&self) -> &TemplateEngine {
        &self.templates
    }
}

fn unknown(kind: FunctionKind, key: &str) -> SurveyError {
    SurveyError::UnknownFunction {
        kind,
        key: key.to_string(),
    }
}
