use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::ChoiceId;
use crate::spec::question::ChoiceSpec;

/// One selectable option of a choice question.
///
/// `value` and `label` each follow the display text until they are set
/// explicitly; resetting either to `None` makes it follow the text again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    id: ChoiceId,
    order: usize,
    text: String,
    value: Value,
    value_follows_text: bool,
    label: String,
    label_follows_text: bool,
    selected: bool,
}

impl Choice {
    pub fn new(id: ChoiceId, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id,
            order: 0,
            value: Value::String(text.clone()),
            value_follows_text: true,
            label: text.clone(),
            label_follows_text: true,
            text,
            selected: false,
        }
    }

    pub(crate) fn from_spec(id: ChoiceId, spec: &ChoiceSpec) -> Self {
        let mut choice = Self::new(id, spec.text.clone());
        choice.set_value(spec.value.clone());
        choice.set_label(spec.label.clone());
        choice
    }

    pub fn id(&self) -> ChoiceId {
        self.id
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
        if self.value_follows_text {
            self.value = Value::String(self.text.clone());
        }
        if self.label_follows_text {
            self.label = self.text.clone();
        }
    }

    pub fn set_value(&mut self, value: Option<Value>) {
        match value {
            Some(value) => {
                self.value = value;
                self.value_follows_text = false;
            }
            None => {
                self.value = Value::String(self.text.clone());
                self.value_follows_text = true;
            }
        }
    }

    pub fn set_label(&mut self, label: Option<String>) {
        match label {
            Some(label) => {
                self.label = label;
                self.label_follows_text = false;
            }
            None => {
                self.label = self.text.clone();
                self.label_follows_text = true;
            }
        }
    }

    pub(crate) fn set_selected(&mut self, selected: bool) {
        self.selected = selected;
    }

    pub(crate) fn set_order(&mut self, order: usize) {
        self.order = order;
    }
}
