use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reference to a registered function plus the arguments it is invoked with.
///
/// Only the key and the JSON payload are persisted; the function itself is looked
/// up in the `FunctionRegistry` at call time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FunctionRef {
    pub key: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub args: Value,
}

impl FunctionRef {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            args: Value::Null,
        }
    }

    pub fn with_args(key: impl Into<String>, args: Value) -> Self {
        Self {
            key: key.into(),
            args,
        }
    }

    /// Continuation that instantiates the named branch template.
    pub fn branch(name: &str) -> Self {
        Self::with_args("branch", serde_json::json!({ "name": name }))
    }
}
