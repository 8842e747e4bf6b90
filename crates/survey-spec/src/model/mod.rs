pub mod branch;
pub mod choice;
pub mod page;
pub mod question;
pub mod validator;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SurveyError;
use crate::ids::{BranchId, ChoiceId, PageId, QuestionId, ValidatorId};
use crate::spec::branch::BranchSpec;
use crate::spec::function::FunctionRef;
use crate::spec::question::{ChoiceSpec, QuestionSpec, ValidatorSpec};

pub use branch::Branch;
pub use choice::Choice;
pub use page::{DIRECTION_FIELD, Direction, FormValues, Method, Page};
pub use question::{HookStage, Question, QuestionOwner};
pub use validator::Validator;

/// Every branch, page and question one participant owns, addressed by id.
///
/// Parent/child links are only changed through the `assign_*` operations, which
/// detach from the old container, attach to the new one and renumber both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityStore {
    next_id: u64,
    pub(crate) branches: BTreeMap<BranchId, Branch>,
    pub(crate) pages: BTreeMap<PageId, Page>,
    pub(crate) questions: BTreeMap<QuestionId, Question>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn branch(&self, id: BranchId) -> Result<&Branch, SurveyError> {
        self.branches
            .get(&id)
            .ok_or_else(|| SurveyError::orphan("branch", id.0))
    }

    pub fn branch_mut(&mut self, id: BranchId) -> Result<&mut Branch, SurveyError> {
        self.branches
            .get_mut(&id)
            .ok_or_else(|| SurveyError::orphan("branch", id.0))
    }

    pub fn page(&self, id: PageId) -> Result<&Page, SurveyError> {
        self.pages
            .get(&id)
            .ok_or_else(|| SurveyError::orphan("page", id.0))
    }

    pub fn page_mut(&mut self, id: PageId) -> Result<&mut Page, SurveyError> {
        self.pages
            .get_mut(&id)
            .ok_or_else(|| SurveyError::orphan("page", id.0))
    }

    pub fn question(&self, id: QuestionId) -> Result<&Question, SurveyError> {
        self.questions
            .get(&id)
            .ok_or_else(|| SurveyError::orphan("question", id.0))
    }

    pub fn question_mut(&mut self, id: QuestionId) -> Result<&mut Question, SurveyError> {
        self.questions
            .get_mut(&id)
            .ok_or_else(|| SurveyError::orphan("question", id.0))
    }

    /// All questions in creation order.
    pub fn questions(&self) -> impl Iterator<Item = &Question> {
        self.questions.values()
    }

    /// Questions of `page` sorted by their order.
    pub fn render_order(&self, page: PageId) -> Result<Vec<&Question>, SurveyError> {
        self.page(page)?.render_order(&self.questions)
    }

    pub fn create_branch(&mut self, next: Option<FunctionRef>, args: Value) -> BranchId {
        let id = BranchId(self.allocate());
        self.branches.insert(id, Branch::new(id, next, args));
        id
    }

    pub fn create_page(
        &mut self,
        branch: Option<BranchId>,
        order: Option<usize>,
        terminal: bool,
    ) -> Result<PageId, SurveyError> {
        if let Some(branch) = branch {
            self.branch(branch)?;
        }
        let id = PageId(self.allocate());
        self.pages.insert(id, Page::new(id, terminal, false));
        self.assign_page(id, branch, order)?;
        Ok(id)
    }

    pub fn create_question(
        &mut self,
        spec: &QuestionSpec,
        owner: Option<QuestionOwner>,
        order: Option<usize>,
    ) -> Result<QuestionId, SurveyError> {
        self.check_owner(owner)?;
        let id = QuestionId(self.allocate());
        let question = Question::from_spec(id, spec, &mut || {
            self.next_id += 1;
            self.next_id
        });
        self.questions.insert(id, question);
        self.assign_question(id, owner, order)?;
        Ok(id)
    }

    pub fn add_choice(
        &mut self,
        question: QuestionId,
        spec: &ChoiceSpec,
        order: Option<usize>,
    ) -> Result<ChoiceId, SurveyError> {
        self.question(question)?;
        let id = ChoiceId(self.allocate());
        self.question_mut(question)?
            .add_choice(Choice::from_spec(id, spec), order);
        Ok(id)
    }

    pub fn add_validator(
        &mut self,
        question: QuestionId,
        spec: &ValidatorSpec,
        order: Option<usize>,
    ) -> Result<ValidatorId, SurveyError> {
        self.question(question)?;
        let id = ValidatorId(self.allocate());
        let validator = Validator::new(id, spec.condition(), spec.message.clone());
        self.question_mut(question)?.add_validator(validator, order);
        Ok(id)
    }

    /// Moves a choice between questions, renumbering both.
    pub fn move_choice(
        &mut self,
        choice: ChoiceId,
        from: QuestionId,
        to: QuestionId,
        order: Option<usize>,
    ) -> Result<(), SurveyError> {
        self.question(to)?;
        let moved = self
            .question_mut(from)?
            .remove_choice(choice)
            .ok_or_else(|| SurveyError::orphan("choice", choice.0))?;
        self.question_mut(to)?.add_choice(moved, order);
        Ok(())
    }

    /// Reassigns `page` to `branch` (or detaches it with `None`).
    ///
    /// Both containers are checked before anything changes, so a failed call
    /// leaves the store untouched.
    pub fn assign_page(
        &mut self,
        page: PageId,
        branch: Option<BranchId>,
        order: Option<usize>,
    ) -> Result<(), SurveyError> {
        let previous = self.page(page)?.branch();
        if let Some(previous) = previous {
            self.branch(previous)?;
        }
        if let Some(branch) = branch {
            self.branch(branch)?;
        }

        if let Some(previous) = previous {
            self.branch_mut(previous)?.remove_page(page);
            self.renumber_pages(previous)?;
        }
        if let Some(branch) = branch {
            self.branch_mut(branch)?.insert_page(page, order);
            self.renumber_pages(branch)?;
        } else {
            self.page_mut(page)?.set_order(0);
        }
        self.page_mut(page)?.set_branch(branch);
        Ok(())
    }

    /// Reassigns `question` to a page, a branch (embedded) or nothing.
    pub fn assign_question(
        &mut self,
        question: QuestionId,
        owner: Option<QuestionOwner>,
        order: Option<usize>,
    ) -> Result<(), SurveyError> {
        let previous = self.question(question)?.owner();
        self.check_owner(previous)?;
        self.check_owner(owner)?;

        if let Some(previous) = previous {
            self.children_mut(previous)?.retain(|id| *id != question);
            self.renumber_questions(previous)?;
        }
        if let Some(owner) = owner {
            let children = self.children_mut(owner)?;
            let index = order.unwrap_or(children.len()).min(children.len());
            children.insert(index, question);
            self.renumber_questions(owner)?;
        } else {
            self.question_mut(question)?.set_order(0);
        }
        self.question_mut(question)?.set_owner(owner);
        Ok(())
    }

    /// Commits a staged branch with all of its pages and questions.
    ///
    /// Everything is built aside and inserted at the end, so no partially
    /// constructed branch is ever reachable from the store.
    pub fn insert_branch(&mut self, spec: &BranchSpec) -> Result<BranchId, SurveyError> {
        let mut staged = self.clone();
        let branch = staged.create_branch(spec.next.clone(), spec.args.clone());
        for page_spec in &spec.pages {
            let page = staged.create_page(Some(branch), None, page_spec.terminal)?;
            staged.page_mut(page)?.set_back(page_spec.back);
            for question in &page_spec.questions {
                staged.create_question(question, Some(QuestionOwner::Page(page)), None)?;
            }
        }
        for question in &spec.embedded {
            staged.create_question(question, Some(QuestionOwner::Branch(branch)), None)?;
        }
        *self = staged;
        Ok(branch)
    }

    fn check_owner(&self, owner: Option<QuestionOwner>) -> Result<(), SurveyError> {
        match owner {
            Some(QuestionOwner::Page(page)) => self.page(page).map(|_| ()),
            Some(QuestionOwner::Branch(branch)) => self.branch(branch).map(|_| ()),
            None => Ok(()),
        }
    }

    fn children_mut(&mut self, owner: QuestionOwner) -> Result<&mut Vec<QuestionId>, SurveyError> {
        match owner {
            QuestionOwner::Page(page) => Ok(self.page_mut(page)?.questions_mut()),
            QuestionOwner::Branch(branch) => Ok(self.branch_mut(branch)?.embedded_mut()),
        }
    }

    fn renumber_pages(&mut self, branch: BranchId) -> Result<(), SurveyError> {
        let Self {
            branches, pages, ..
        } = self;
        let branch = branches
            .get(&branch)
            .ok_or_else(|| SurveyError::orphan("branch", branch.0))?;
        for (index, id) in branch.pages().iter().enumerate() {
            pages
                .get_mut(id)
                .ok_or_else(|| SurveyError::orphan("page", id.0))?
                .set_order(index);
        }
        Ok(())
    }

    fn renumber_questions(&mut self, owner: QuestionOwner) -> Result<(), SurveyError> {
        let children = match owner {
            QuestionOwner::Page(page) => self.page(page)?.questions().to_vec(),
            QuestionOwner::Branch(branch) => self.branch(branch)?.embedded().to_vec(),
        };
        for (index, id) in children.into_iter().enumerate() {
            self.question_mut(id)?.set_order(index);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page_orders(store: &EntityStore, page: PageId) -> Vec<(String, usize)> {
        store
            .render_order(page)
            .unwrap()
            .into_iter()
            .map(|question| (question.text().to_string(), question.order()))
            .collect()
    }

    #[test]
    fn removing_question_renumbers_page() {
        let mut store = EntityStore::new();
        let page = store.create_page(None, None, false).unwrap();
        let owner = Some(QuestionOwner::Page(page));
        let a = store.create_question(&QuestionSpec::text("a"), owner, None).unwrap();
        store.create_question(&QuestionSpec::text("b"), owner, None).unwrap();
        store.create_question(&QuestionSpec::text("c"), owner, None).unwrap();

        store.assign_question(a, None, None).unwrap();

        assert_eq!(
            page_orders(&store, page),
            vec![("b".to_string(), 0), ("c".to_string(), 1)]
        );
        assert_eq!(store.question(a).unwrap().owner(), None);
    }

    #[test]
    fn moving_question_between_pages_renumbers_both() {
        let mut store = EntityStore::new();
        let first = store.create_page(None, None, false).unwrap();
        let second = store.create_page(None, None, false).unwrap();
        let a = store
            .create_question(&QuestionSpec::text("a"), Some(QuestionOwner::Page(first)), None)
            .unwrap();
        store
            .create_question(&QuestionSpec::text("b"), Some(QuestionOwner::Page(first)), None)
            .unwrap();
        store
            .create_question(&QuestionSpec::text("x"), Some(QuestionOwner::Page(second)), None)
            .unwrap();

        store
            .assign_question(a, Some(QuestionOwner::Page(second)), Some(0))
            .unwrap();

        assert_eq!(page_orders(&store, first), vec![("b".to_string(), 0)]);
        assert_eq!(
            page_orders(&store, second),
            vec![("a".to_string(), 0), ("x".to_string(), 1)]
        );
    }

    #[test]
    fn failed_reassignment_leaves_store_untouched() {
        let mut store = EntityStore::new();
        let page = store.create_page(None, None, false).unwrap();
        let q = store
            .create_question(&QuestionSpec::text("a"), Some(QuestionOwner::Page(page)), None)
            .unwrap();
        let before = store.clone();
        let result = store.assign_question(q, Some(QuestionOwner::Page(PageId(999))), None);
        assert!(matches!(result, Err(SurveyError::OrphanReference { .. })));
        assert_eq!(store, before);
    }

    #[test]
    fn pages_append_and_renumber_within_branch() {
        let mut store = EntityStore::new();
        let branch = store.create_branch(None, json!(null));
        let p1 = store.create_page(Some(branch), None, false).unwrap();
        let p2 = store.create_page(Some(branch), None, false).unwrap();
        let p3 = store.create_page(Some(branch), None, true).unwrap();
        assert_eq!(store.page(p3).unwrap().order(), 2);

        store.assign_page(p1, None, None).unwrap();
        assert_eq!(store.branch(branch).unwrap().page_queue(), &[p2, p3]);
        assert_eq!(store.page(p2).unwrap().order(), 0);
        assert_eq!(store.page(p3).unwrap().order(), 1);
    }

    #[test]
    fn embedded_questions_belong_to_branch() {
        let mut store = EntityStore::new();
        let spec = BranchSpec::default().with_embedded(QuestionSpec::embedded("source", json!("ad")));
        let branch = store.insert_branch(&spec).unwrap();
        let embedded = store.branch(branch).unwrap().embedded().to_vec();
        assert_eq!(embedded.len(), 1);
        assert_eq!(
            store.question(embedded[0]).unwrap().owner(),
            Some(QuestionOwner::Branch(branch))
        );
    }

    #[test]
    fn move_choice_between_questions() {
        let mut store = EntityStore::new();
        let from = store
            .create_question(&QuestionSpec::single_choice("a", "A", &["x", "y"]), None, None)
            .unwrap();
        let to = store
            .create_question(&QuestionSpec::single_choice("b", "B", &["z"]), None, None)
            .unwrap();
        let moved = store.question(from).unwrap().choices()[0].id();

        store.move_choice(moved, from, to, Some(0)).unwrap();

        let target = store.question(to).unwrap();
        assert_eq!(target.choices()[0].id(), moved);
        assert_eq!(target.choices()[1].order(), 1);
        assert_eq!(store.question(from).unwrap().choices()[0].order(), 0);
    }
}
