use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SurveyError;
use crate::ids::{BranchId, PageId, QuestionId};
use crate::model::question::{HookStage, Question};
use crate::registry::{FunctionRegistry, HookContext};
use crate::spec::question::ClearTrigger;

/// Submitted form fields keyed by question id, plus `direction`.
pub type FormValues = BTreeMap<String, String>;

/// Form field carrying the requested navigation direction.
pub const DIRECTION_FIELD: &str = "direction";

/// Outcome of a page submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Invalid,
    Forward,
    Back,
    NoAction,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Invalid => "invalid",
            Direction::Forward => "forward",
            Direction::Back => "back",
            Direction::NoAction => "no_action",
        }
    }
}

/// Request method of a submission; only `Post` mutates state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
}

impl FromStr for Method {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            other => Err(format!("unsupported method '{}'", other)),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
        })
    }
}

/// Ordered questions presented and submitted together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    id: PageId,
    branch: Option<BranchId>,
    order: usize,
    questions: Vec<QuestionId>,
    terminal: bool,
    back: bool,
}

impl Page {
    pub fn new(id: PageId, terminal: bool, back: bool) -> Self {
        Self {
            id,
            branch: None,
            order: 0,
            questions: Vec::new(),
            terminal,
            back,
        }
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn branch(&self) -> Option<BranchId> {
        self.branch
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn questions(&self) -> &[QuestionId] {
        &self.questions
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub fn allows_back(&self) -> bool {
        self.back
    }

    pub fn set_terminal(&mut self, terminal: bool) {
        self.terminal = terminal;
    }

    pub fn set_back(&mut self, back: bool) {
        self.back = back;
    }

    pub(crate) fn set_branch(&mut self, branch: Option<BranchId>) {
        self.branch = branch;
    }

    pub(crate) fn set_order(&mut self, order: usize) {
        self.order = order;
    }

    pub(crate) fn questions_mut(&mut self) -> &mut Vec<QuestionId> {
        &mut self.questions
    }

    /// Questions sorted ascending by `order`.
    pub fn render_order<'a>(
        &self,
        questions: &'a BTreeMap<QuestionId, Question>,
    ) -> Result<Vec<&'a Question>, SurveyError> {
        let mut ordered = self
            .questions
            .iter()
            .map(|id| lookup(questions, *id))
            .collect::<Result<Vec<_>, _>>()?;
        ordered.sort_by_key(|question| question.order());
        Ok(ordered)
    }

    /// Distributes form values, validates every question and decides the
    /// direction. Non-POST requests never mutate anything.
    pub fn submit(
        &self,
        questions: &mut BTreeMap<QuestionId, Question>,
        form: &FormValues,
        method: Method,
        registry: &FunctionRegistry,
        hooks: &HookContext<'_>,
    ) -> Result<Direction, SurveyError> {
        if method != Method::Post {
            return Ok(Direction::NoAction);
        }

        for id in &self.questions {
            let question = lookup_mut(questions, *id)?;
            if question.kind().takes_response() {
                question.set_response(form.get(&id.to_string()).map(String::as_str));
            }
        }

        let mut valid = true;
        for id in &self.questions {
            valid &= lookup_mut(questions, *id)?.validate(registry)?;
        }

        if !valid {
            for id in &self.questions {
                lookup_mut(questions, *id)?.clear_for(ClearTrigger::InvalidSubmission);
            }
            return Ok(Direction::Invalid);
        }

        for id in &self.questions {
            lookup_mut(questions, *id)?.run_hooks(HookStage::Post, registry, hooks)?;
        }

        Ok(self.requested_direction(form))
    }

    /// Whether a back request on this page may move. Terminal pages have
    /// already completed the participant, so they never go back.
    pub fn offers_back(&self) -> bool {
        self.back && !self.terminal
    }

    fn requested_direction(&self, form: &FormValues) -> Direction {
        match form.get(DIRECTION_FIELD).map(|value| value.trim()) {
            _ if self.terminal => Direction::NoAction,
            Some("back") if self.back => Direction::Back,
            Some("back") => Direction::NoAction,
            _ => Direction::Forward,
        }
    }
}

fn lookup(
    questions: &BTreeMap<QuestionId, Question>,
    id: QuestionId,
) -> Result<&Question, SurveyError> {
    questions
        .get(&id)
        .ok_or_else(|| SurveyError::orphan("question", id.0))
}

fn lookup_mut(
    questions: &mut BTreeMap<QuestionId, Question>,
    id: QuestionId,
) -> Result<&mut Question, SurveyError> {
    questions
        .get_mut(&id)
        .ok_or_else(|| SurveyError::orphan("question", id.0))
}
