use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::spec::function::FunctionRef;

/// Supported question kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    /// Display-only text.
    #[default]
    Text,
    /// Free-text response.
    Free,
    /// Exactly one of several choices.
    SingleChoice,
    /// Data recorded without being shown.
    Embedded,
}

impl QuestionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionKind::Text => "text",
            QuestionKind::Free => "free",
            QuestionKind::SingleChoice => "single_choice",
            QuestionKind::Embedded => "embedded",
        }
    }

    /// Whether the kind collects data from the submitted form.
    pub fn takes_response(&self) -> bool {
        matches!(self, QuestionKind::Free | QuestionKind::SingleChoice)
    }
}

/// Events on which a question forgets its stored data and default.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ClearTrigger {
    InvalidSubmission,
    NavigateBack,
    NavigateForward,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChoiceSpec {
    pub text: String,
    /// Encoded value; follows `text` when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Order-data label; follows `text` when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl ChoiceSpec {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            value: None,
            label: None,
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ValidatorSpec {
    pub key: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub args: Value,
    /// Overrides the registered default message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ValidatorSpec {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            args: Value::Null,
            message: None,
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn condition(&self) -> FunctionRef {
        FunctionRef::with_args(self.key.clone(), self.args.clone())
    }
}

/// Declarative description of one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct QuestionSpec {
    #[serde(rename = "type", default)]
    pub kind: QuestionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub var: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<ChoiceSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validators: Vec<ValidatorSpec>,
    #[serde(default)]
    pub randomize: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub clear_on: BTreeSet<ClearTrigger>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compile: Vec<FunctionRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post: Vec<FunctionRef>,
}

impl QuestionSpec {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: QuestionKind::Text,
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn free(var: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: QuestionKind::Free,
            var: Some(var.into()),
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn single_choice(var: impl Into<String>, text: impl Into<String>, choices: &[&str]) -> Self {
        Self {
            kind: QuestionKind::SingleChoice,
            var: Some(var.into()),
            text: text.into(),
            choices: choices.iter().map(|text| ChoiceSpec::new(*text)).collect(),
            ..Self::default()
        }
    }

    pub fn embedded(var: impl Into<String>, data: Value) -> Self {
        Self {
            kind: QuestionKind::Embedded,
            var: Some(var.into()),
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn with_validator(mut self, validator: ValidatorSpec) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn with_clear_on(mut self, trigger: ClearTrigger) -> Self {
        self.clear_on.insert(trigger);
        self
    }

    pub fn with_compile(mut self, hook: FunctionRef) -> Self {
        self.compile.push(hook);
        self
    }

    pub fn with_post(mut self, hook: FunctionRef) -> Self {
        self.post.push(hook);
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn randomized(mut self) -> Self {
        self.randomize = true;
        self
    }
}
