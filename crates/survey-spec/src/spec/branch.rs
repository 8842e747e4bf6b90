use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::spec::function::FunctionRef;
use crate::spec::question::QuestionSpec;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct PageSpec {
    #[serde(default)]
    pub terminal: bool,
    /// Offer a back control on this page.
    #[serde(default)]
    pub back: bool,
    #[serde(default)]
    pub questions: Vec<QuestionSpec>,
}

impl PageSpec {
    pub fn new(questions: Vec<QuestionSpec>) -> Self {
        Self {
            terminal: false,
            back: false,
            questions,
        }
    }

    pub fn terminal(questions: Vec<QuestionSpec>) -> Self {
        Self {
            terminal: true,
            back: false,
            questions,
        }
    }

    pub fn with_back(mut self) -> Self {
        self.back = true;
        self
    }
}

/// Balanced random assignment performed when a branch is committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AssignmentSpec {
    pub tag: String,
    /// Factor name to its possible levels.
    pub factors: BTreeMap<String, Vec<Value>>,
}

/// Staged description of a branch. A continuation returns one of these; the
/// participant commits it into its entity store in a single step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct BranchSpec {
    #[serde(default)]
    pub pages: Vec<PageSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedded: Vec<QuestionSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<FunctionRef>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub args: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assign: Vec<AssignmentSpec>,
}

impl BranchSpec {
    pub fn new(pages: Vec<PageSpec>) -> Self {
        Self {
            pages,
            ..Self::default()
        }
    }

    pub fn with_next(mut self, next: FunctionRef) -> Self {
        self.next = Some(next);
        self
    }

    pub fn with_embedded(mut self, question: QuestionSpec) -> Self {
        self.embedded.push(question);
        self
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    pub fn with_assignment(mut self, assignment: AssignmentSpec) -> Self {
        self.assign.push(assignment);
        self
    }
}
