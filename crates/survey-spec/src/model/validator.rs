use serde::{Deserialize, Serialize};

use crate::error::SurveyError;
use crate::ids::ValidatorId;
use crate::model::question::Question;
use crate::registry::FunctionRegistry;
use crate::spec::function::FunctionRef;

/// Response-acceptance predicate attached to a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validator {
    id: ValidatorId,
    order: usize,
    condition: FunctionRef,
    #[serde(default)]
    message: Option<String>,
}

impl Validator {
    pub fn new(id: ValidatorId, condition: FunctionRef, message: Option<String>) -> Self {
        Self {
            id,
            order: 0,
            condition,
            message,
        }
    }

    pub fn id(&self) -> ValidatorId {
        self.id
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn condition(&self) -> &FunctionRef {
        &self.condition
    }

    pub(crate) fn set_order(&mut self, order: usize) {
        self.order = order;
    }

    /// Returns the error message when `question` fails this validator.
    pub fn error_for(
        &self,
        question: &Question,
        registry: &FunctionRegistry,
    ) -> Result<Option<String>, SurveyError> {
        let entry = registry.validator(&self.condition.key)?;
        if (entry.predicate)(question, &self.condition.args) {
            return Ok(None);
        }
        let message = self
            .message
            .clone()
            .unwrap_or_else(|| entry.message.clone());
        Ok(Some(message))
    }
}

