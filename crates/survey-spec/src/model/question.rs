use std::collections::BTreeSet;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{FunctionKind, SurveyError};
use crate::export::OutputRow;
use crate::ids::{BranchId, ChoiceId, PageId, QuestionId, ValidatorId};
use crate::model::choice::Choice;
use crate::model::validator::Validator;
use crate::registry::{FunctionRegistry, HookContext};
use crate::spec::function::FunctionRef;
use crate::spec::question::{ClearTrigger, QuestionKind, QuestionSpec};

/// Container a question currently belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionOwner {
    Page(PageId),
    /// Embedded question of a branch, never shown on a page.
    Branch(BranchId),
}

/// Which hook list to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    Compile,
    Post,
}

/// The atomic unit of data collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    id: QuestionId,
    kind: QuestionKind,
    owner: Option<QuestionOwner>,
    order: usize,
    var: Option<String>,
    text: String,
    choices: Vec<Choice>,
    validators: Vec<Validator>,
    randomize: bool,
    default: Option<String>,
    response: Option<String>,
    data: Option<Value>,
    clear_on: BTreeSet<ClearTrigger>,
    variable_order: Option<usize>,
    error: Option<String>,
    compile: Vec<FunctionRef>,
    post: Vec<FunctionRef>,
}

impl Question {
    pub fn new(id: QuestionId, kind: QuestionKind) -> Self {
        Self {
            id,
            kind,
            owner: None,
            order: 0,
            var: None,
            text: String::new(),
            choices: Vec::new(),
            validators: Vec::new(),
            randomize: false,
            default: None,
            response: None,
            data: None,
            clear_on: BTreeSet::new(),
            variable_order: None,
            error: None,
            compile: Vec::new(),
            post: Vec::new(),
        }
    }

    /// Builds a question from its spec, drawing child ids from `next_id`.
    pub(crate) fn from_spec(
        id: QuestionId,
        spec: &QuestionSpec,
        next_id: &mut impl FnMut() -> u64,
    ) -> Self {
        let mut question = Self::new(id, spec.kind);
        question.var = spec.var.clone();
        question.text = spec.text.clone();
        question.randomize = spec.randomize;
        question.default = spec.default.clone();
        question.data = spec.data.clone();
        question.clear_on = spec.clear_on.clone();
        question.compile = spec.compile.clone();
        question.post = spec.post.clone();
        for choice in &spec.choices {
            question.add_choice(Choice::from_spec(ChoiceId(next_id()), choice), None);
        }
        for validator in &spec.validators {
            let validator = Validator::new(
                ValidatorId(next_id()),
                validator.condition(),
                validator.message.clone(),
            );
            question.add_validator(validator, None);
        }
        question
    }

    pub fn id(&self) -> QuestionId {
        self.id
    }

    pub fn kind(&self) -> QuestionKind {
        self.kind
    }

    pub fn owner(&self) -> Option<QuestionOwner> {
        self.owner
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn var(&self) -> Option<&str> {
        self.var.as_deref().filter(|var| !var.trim().is_empty())
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn choices(&self) -> &[Choice] {
        &self.choices
    }

    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    pub fn randomize(&self) -> bool {
        self.randomize
    }

    pub fn default_value(&self) -> Option<&str> {
        self.default.as_deref()
    }

    /// Raw value from the most recent submission.
    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    /// Cleaned data recorded for export.
    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn clear_on(&self) -> &BTreeSet<ClearTrigger> {
        &self.clear_on
    }

    pub fn variable_order(&self) -> Option<usize> {
        self.variable_order
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn selected_choice(&self) -> Option<&Choice> {
        self.choices.iter().find(|choice| choice.is_selected())
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn set_var(&mut self, var: Option<String>) {
        self.var = var;
    }

    pub fn set_data(&mut self, data: Option<Value>) {
        self.data = data;
    }

    pub fn set_default(&mut self, default: Option<String>) {
        self.default = default;
    }

    pub fn set_randomize(&mut self, randomize: bool) {
        self.randomize = randomize;
    }

    pub fn set_clear_on(&mut self, clear_on: BTreeSet<ClearTrigger>) {
        self.clear_on = clear_on;
    }

    pub(crate) fn set_owner(&mut self, owner: Option<QuestionOwner>) {
        self.owner = owner;
    }

    pub(crate) fn set_order(&mut self, order: usize) {
        self.order = order;
    }

    pub(crate) fn set_variable_order(&mut self, variable_order: usize) {
        self.variable_order = Some(variable_order);
    }

    /// Inserts `choice` at `order` (appended when `None` or out of range).
    pub fn add_choice(&mut self, choice: Choice, order: Option<usize>) {
        let index = order.unwrap_or(self.choices.len()).min(self.choices.len());
        self.choices.insert(index, choice);
        self.renumber_choices();
    }

    /// Detaches a choice and closes the gap in the remaining order.
    pub fn remove_choice(&mut self, id: ChoiceId) -> Option<Choice> {
        let index = self.choices.iter().position(|choice| choice.id() == id)?;
        let choice = self.choices.remove(index);
        self.renumber_choices();
        Some(choice)
    }

    pub fn add_validator(&mut self, validator: Validator, order: Option<usize>) {
        let index = order
            .unwrap_or(self.validators.len())
            .min(self.validators.len());
        self.validators.insert(index, validator);
        for (index, validator) in self.validators.iter_mut().enumerate() {
            validator.set_order(index);
        }
    }

    pub fn remove_validator(&mut self, id: ValidatorId) -> Option<Validator> {
        let index = self
            .validators
            .iter()
            .position(|validator| validator.id() == id)?;
        let validator = self.validators.remove(index);
        for (index, validator) in self.validators.iter_mut().enumerate() {
            validator.set_order(index);
        }
        Some(validator)
    }

    fn renumber_choices(&mut self) {
        for (index, choice) in self.choices.iter_mut().enumerate() {
            choice.set_order(index);
        }
    }

    pub(crate) fn shuffle_choices<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.choices.shuffle(rng);
        self.renumber_choices();
    }

    /// Records a raw submitted value.
    ///
    /// Free responses become both the data and the new default. Single-choice
    /// responses are choice ids: the matching choice is selected, its id becomes
    /// the default and its encoded value the data. Other kinds ignore the call.
    pub fn set_response(&mut self, raw: Option<&str>) {
        match self.kind {
            QuestionKind::Free => {
                self.response = raw.map(String::from);
                self.default = self.response.clone();
                self.data = raw.map(|raw| Value::String(raw.to_string()));
            }
            QuestionKind::SingleChoice => {
                self.response = raw.map(String::from);
                let wanted = raw.and_then(|raw| raw.parse::<ChoiceId>().ok());
                let mut picked = None;
                for choice in &mut self.choices {
                    let hit = picked.is_none() && Some(choice.id()) == wanted;
                    choice.set_selected(hit);
                    if hit {
                        picked = Some((choice.id(), choice.value().clone()));
                    }
                }
                self.default = picked.as_ref().map(|(id, _)| id.to_string());
                self.data = picked.map(|(_, value)| value);
            }
            QuestionKind::Text | QuestionKind::Embedded => {}
        }
    }

    /// Runs validators in order; the first failure sets `error` and stops.
    pub fn validate(&mut self, registry: &FunctionRegistry) -> Result<bool, SurveyError> {
        let mut failure = None;
        for validator in &self.validators {
            if let Some(message) = validator.error_for(self, registry)? {
                failure = Some(message);
                break;
            }
        }
        let valid = failure.is_none();
        self.error = failure;
        Ok(valid)
    }

    /// Forgets stored data, default and selection when `trigger` is configured.
    pub(crate) fn clear_for(&mut self, trigger: ClearTrigger) -> bool {
        if !self.clear_on.contains(&trigger) {
            return false;
        }
        self.data = None;
        self.default = None;
        for choice in &mut self.choices {
            choice.set_selected(false);
        }
        true
    }

    pub(crate) fn run_hooks(
        &mut self,
        stage: HookStage,
        registry: &FunctionRegistry,
        ctx: &HookContext<'_>,
    ) -> Result<(), SurveyError> {
        let hooks = match stage {
            HookStage::Compile => self.compile.clone(),
            HookStage::Post => self.post.clone(),
        };
        for hook in hooks {
            let run = registry.hook(&hook.key)?;
            run(self, ctx, &hook.args).map_err(|message| SurveyError::Callback {
                kind: FunctionKind::Hook,
                key: hook.key.clone(),
                message,
            })?;
        }
        Ok(())
    }

    /// Column name for this question's data; repeated variables get a suffix.
    pub fn output_name(&self) -> Option<String> {
        let var = self.var()?;
        match self.variable_order {
            Some(order) if order > 0 => Some(format!("{}_{}", var, order)),
            _ => Some(var.to_string()),
        }
    }

    pub fn compute_output_row(&self) -> OutputRow {
        let mut row = OutputRow::new();
        let Some(name) = self.output_name() else {
            return row;
        };
        row.insert(name.clone(), self.data.clone().unwrap_or(Value::Null));
        row.insert(format!("{}_page_order", name), json!(self.order));
        row.insert(
            format!("{}_choice_order", name),
            self.variable_order.map(|order| json!(order)).unwrap_or(Value::Null),
        );
        for choice in &self.choices {
            row.insert(
                format!("{}_{}_order", name, choice.label()),
                json!(choice.order()),
            );
        }
        row
    }
}
