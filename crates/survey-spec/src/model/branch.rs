use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FunctionKind, SurveyError};
use crate::ids::{BranchId, PageId, QuestionId};
use crate::participant::Participant;
use crate::registry::{ContinuationContext, FunctionRegistry};
use crate::spec::branch::BranchSpec;
use crate::spec::function::FunctionRef;

/// Ordered run of pages plus the rule for what comes next.
///
/// `pages` holds every page the branch owns in `order`; pages before `cursor`
/// were already shown (the history), the rest form the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    id: BranchId,
    pages: Vec<PageId>,
    cursor: usize,
    embedded: Vec<QuestionId>,
    next: Option<FunctionRef>,
    #[serde(default)]
    args: Value,
}

impl Branch {
    pub fn new(id: BranchId, next: Option<FunctionRef>, args: Value) -> Self {
        Self {
            id,
            pages: Vec::new(),
            cursor: 0,
            embedded: Vec::new(),
            next,
            args,
        }
    }

    pub fn id(&self) -> BranchId {
        self.id
    }

    pub fn pages(&self) -> &[PageId] {
        &self.pages
    }

    /// Pages not yet dequeued, front first.
    pub fn page_queue(&self) -> &[PageId] {
        &self.pages[self.cursor..]
    }

    /// Pages already dequeued, oldest first.
    pub fn history(&self) -> &[PageId] {
        &self.pages[..self.cursor]
    }

    pub fn embedded(&self) -> &[QuestionId] {
        &self.embedded
    }

    pub fn continuation(&self) -> Option<&FunctionRef> {
        self.next.as_ref()
    }

    pub fn args(&self) -> &Value {
        &self.args
    }

    pub fn set_continuation(&mut self, next: Option<FunctionRef>) {
        self.next = next;
    }

    pub fn set_args(&mut self, args: Value) {
        self.args = args;
    }

    /// Removes and returns the front of the queue.
    pub fn dequeue(&mut self) -> Option<PageId> {
        let page = self.pages.get(self.cursor).copied()?;
        self.cursor += 1;
        Some(page)
    }

    /// Puts the most recently shown page back at the front of the queue and
    /// returns the page shown before it, if any.
    pub(crate) fn requeue_last(&mut self) -> Option<PageId> {
        if self.cursor < 2 {
            return None;
        }
        self.cursor -= 1;
        Some(self.pages[self.cursor - 1])
    }

    pub(crate) fn insert_page(&mut self, page: PageId, order: Option<usize>) -> usize {
        let index = order.unwrap_or(self.pages.len()).min(self.pages.len());
        if index < self.cursor {
            self.cursor += 1;
        }
        self.pages.insert(index, page);
        index
    }

    pub(crate) fn remove_page(&mut self, page: PageId) -> bool {
        let Some(index) = self.pages.iter().position(|id| *id == page) else {
            return false;
        };
        self.pages.remove(index);
        if index < self.cursor {
            self.cursor -= 1;
        }
        true
    }

    pub(crate) fn embedded_mut(&mut self) -> &mut Vec<QuestionId> {
        &mut self.embedded
    }

    /// Invokes the continuation; `None` when there is none or it ends the survey.
    pub fn resolve_next(
        &self,
        participant: &Participant,
        templates: &BTreeMap<String, BranchSpec>,
        registry: &FunctionRegistry,
    ) -> Result<Option<BranchSpec>, SurveyError> {
        let Some(next) = &self.next else {
            return Ok(None);
        };
        let continuation = registry.continuation(&next.key)?;
        let ctx = ContinuationContext {
            participant,
            branch_args: &self.args,
            templates,
        };
        continuation(&ctx, &next.args).map_err(|message| SurveyError::Callback {
            kind: FunctionKind::Continuation,
            key: next.key.clone(),
            message,
        })
    }
}
