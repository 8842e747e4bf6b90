use std::fmt;

use thiserror::Error;

use crate::config::ConfigError;
use crate::ids::ParticipantId;
use crate::store::StoreError;
use crate::template::TemplateError;

/// Kind of registered function a key was looked up as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Validator,
    Continuation,
    Hook,
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FunctionKind::Validator => "validator",
            FunctionKind::Continuation => "continuation",
            FunctionKind::Hook => "hook",
        };
        f.write_str(label)
    }
}

/// Operator-visible failures of the survey core.
///
/// Validation failures and survey completion are not errors: they are reported
/// through `Direction::Invalid` and `advance_page() == false` respectively.
#[derive(Debug, Error)]
pub enum SurveyError {
    #[error("branch continuations resolved {limit} times without yielding a page")]
    TraversalLoop { limit: usize },
    #[error("{entity} {id} is not present in the participant store")]
    OrphanReference { entity: &'static str, id: u64 },
    #[error("no {kind} registered under key '{key}'")]
    UnknownFunction { kind: FunctionKind, key: String },
    #[error("branch template '{name}' is not defined")]
    UnknownTemplate { name: String },
    #[error("{kind} '{key}' failed: {message}")]
    Callback {
        kind: FunctionKind,
        key: String,
        message: String,
    },
    #[error("participant {0} not found")]
    ParticipantNotFound(ParticipantId),
    #[error("participant key '{key}' rejected: {reason}")]
    Screened { key: String, reason: &'static str },
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SurveyError {
    pub(crate) fn orphan(entity: &'static str, id: u64) -> Self {
        SurveyError::OrphanReference { entity, id }
    }

    /// Whether the error reflects a broken invariant rather than bad input.
    pub fn is_consistency_error(&self) -> bool {
        matches!(
            self,
            SurveyError::TraversalLoop { .. } | SurveyError::OrphanReference { .. }
        )
    }
}
