use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use rand::Rng;
use serde_json::{Map, Value, json};
use tracing::{debug, error, info};

use crate::assignment::AssignmentCounter;
use crate::error::SurveyError;
use crate::export::OutputRow;
use crate::ids::{BranchId, PageId, ParticipantId, QuestionId};
use crate::model::{Direction, EntityStore, FormValues, HookStage, Method, Page};
use crate::registry::{FunctionRegistry, HookContext};
use crate::spec::branch::BranchSpec;
use crate::spec::question::ClearTrigger;

/// Shared collaborators a participant needs while navigating.
#[derive(Clone, Copy)]
pub struct Runtime<'a> {
    pub registry: &'a FunctionRegistry,
    pub templates: &'a BTreeMap<String, BranchSpec>,
    pub counter: &'a AssignmentCounter,
    /// Continuations resolved by one `advance_page` before giving up.
    pub max_branch_resolutions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantMeta {
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed: bool,
}

/// One participant's traversal: a stack of branches and the page on screen.
///
/// `current_page` is a plain id; the page itself is owned by its branch inside
/// `store`. While the stack is non-empty it always points at the most recently
/// shown page of the top branch; once the stack empties it is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    id: ParticipantId,
    store: EntityStore,
    branch_stack: Vec<BranchId>,
    current_page: Option<PageId>,
    /// Next `variable_order` per variable name.
    variable_counts: BTreeMap<String, usize>,
    /// Questions shown or committed so far, in recording order.
    recorded: Vec<QuestionId>,
    assignments: Map<String, Value>,
    /// Opaque caller-supplied identity used for screening.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    external_key: Option<String>,
    meta: ParticipantMeta,
}

impl Participant {
    pub fn new(id: ParticipantId) -> Self {
        let now = Utc::now();
        Self {
            id,
            store: EntityStore::new(),
            branch_stack: Vec::new(),
            current_page: None,
            variable_counts: BTreeMap::new(),
            recorded: Vec::new(),
            assignments: Map::new(),
            external_key: None,
            meta: ParticipantMeta {
                started_at: now,
                updated_at: now,
                completed: false,
            },
        }
    }

    pub fn id(&self) -> ParticipantId {
        self.id
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    /// Direct access for authors rearranging entities between transitions.
    pub fn store_mut(&mut self) -> &mut EntityStore {
        &mut self.store
    }

    pub fn branch_stack(&self) -> &[BranchId] {
        &self.branch_stack
    }

    pub fn current_page(&self) -> Option<PageId> {
        self.current_page
    }

    pub fn assignments(&self) -> &Map<String, Value> {
        &self.assignments
    }

    pub fn external_key(&self) -> Option<&str> {
        self.external_key.as_deref()
    }

    pub(crate) fn set_external_key(&mut self, key: Option<String>) {
        self.external_key = key;
    }

    pub fn meta(&self) -> &ParticipantMeta {
        &self.meta
    }

    pub fn is_complete(&self) -> bool {
        self.meta.completed
    }

    /// Pushes the root branch and shows its first page.
    pub fn begin(&mut self, root: &BranchSpec, rt: &Runtime<'_>) -> Result<bool, SurveyError> {
        info!(participant = %self.id, "participant started");
        self.push_branch(root, rt)?;
        self.advance_page(rt)
    }

    /// Commits `spec` as a new top branch in one step.
    pub fn push_branch(
        &mut self,
        spec: &BranchSpec,
        rt: &Runtime<'_>,
    ) -> Result<BranchId, SurveyError> {
        let branch = self.store.insert_branch(spec)?;
        self.branch_stack.push(branch);

        for assignment in &spec.assign {
            if self.assignments.contains_key(&assignment.tag) {
                continue;
            }
            let assigned = rt.counter.assign(&assignment.tag, &assignment.factors);
            self.assignments
                .insert(assignment.tag.clone(), Value::Object(assigned));
        }

        let embedded = self.store.branch(branch)?.embedded().to_vec();
        if !embedded.is_empty() {
            self.run_hooks(&embedded, HookStage::Compile, &spec.args, rt.registry)?;
            for question in embedded {
                self.record(question)?;
            }
        }
        debug!(participant = %self.id, branch = %branch, depth = self.branch_stack.len(), "branch pushed");
        Ok(branch)
    }

    /// Moves to the next page, expanding exhausted branches through their
    /// continuations. Returns `false` once the survey is exhausted; calling it
    /// again then changes nothing.
    pub fn advance_page(&mut self, rt: &Runtime<'_>) -> Result<bool, SurveyError> {
        let mut resolutions = 0;
        loop {
            let Some(&top) = self.branch_stack.last() else {
                return Ok(false);
            };
            if let Some(page) = self.store.branch_mut(top)?.dequeue() {
                self.show_page(page)?;
                return Ok(true);
            }
            if resolutions >= rt.max_branch_resolutions {
                error!(
                    participant = %self.id,
                    limit = rt.max_branch_resolutions,
                    "continuations never produced a page"
                );
                return Err(SurveyError::TraversalLoop {
                    limit: rt.max_branch_resolutions,
                });
            }
            resolutions += 1;
            self.terminate_branch(top, rt)?;
        }
    }

    /// Resolves `branch`'s continuation, pops it and pushes the successor.
    fn terminate_branch(&mut self, branch: BranchId, rt: &Runtime<'_>) -> Result<(), SurveyError> {
        let next = self
            .store
            .branch(branch)?
            .resolve_next(self, rt.templates, rt.registry)?;
        if let Some(position) = self.branch_stack.iter().rposition(|id| *id == branch) {
            self.branch_stack.remove(position);
        }
        match next {
            Some(spec) => {
                self.push_branch(&spec, rt)?;
            }
            None if self.branch_stack.is_empty() => {
                self.current_page = None;
                self.mark_complete();
            }
            None => {}
        }
        Ok(())
    }

    fn show_page(&mut self, page: PageId) -> Result<(), SurveyError> {
        let (questions, terminal) = {
            let page = self.store.page(page)?;
            (page.questions().to_vec(), page.is_terminal())
        };
        self.current_page = Some(page);
        for question in questions {
            self.record(question)?;
        }
        debug!(participant = %self.id, page = %page, terminal, "page shown");
        if terminal {
            self.mark_complete();
        }
        Ok(())
    }

    fn mark_complete(&mut self) {
        if !self.meta.completed {
            self.meta.completed = true;
            info!(participant = %self.id, "participant completed");
        }
    }

    /// Assigns a `variable_order` the first time a question is recorded.
    fn record(&mut self, id: QuestionId) -> Result<(), SurveyError> {
        let question = self.store.question_mut(id)?;
        if question.variable_order().is_some() {
            return Ok(());
        }
        let Some(var) = question.var().map(String::from) else {
            return Ok(());
        };
        let next = self.variable_counts.entry(var).or_insert(0);
        question.set_variable_order(*next);
        *next += 1;
        self.recorded.push(id);
        Ok(())
    }

    pub fn get_current_page(&self) -> Result<Option<&Page>, SurveyError> {
        self.current_page
            .map(|page| self.store.page(page))
            .transpose()
    }

    /// Whether `back` would move: the current page is the latest page of the
    /// top branch and an earlier one was shown before it.
    pub fn can_go_back(&self) -> Result<bool, SurveyError> {
        let Some(&top) = self.branch_stack.last() else {
            return Ok(false);
        };
        let history = self.store.branch(top)?.history();
        Ok(history.len() >= 2 && history.last().copied() == self.current_page)
    }

    /// Steps back to the previously shown page of the top branch; the page
    /// being left returns to the front of the queue.
    pub fn back(&mut self) -> Result<bool, SurveyError> {
        if !self.can_go_back()? {
            return Ok(false);
        }
        let Some(&top) = self.branch_stack.last() else {
            return Ok(false);
        };
        match self.store.branch_mut(top)?.requeue_last() {
            Some(previous) => {
                debug!(participant = %self.id, page = %previous, "navigated back");
                self.current_page = Some(previous);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Applies the clear triggers of the page being left, then moves. A back
    /// request that cannot move leaves every question untouched.
    pub fn navigate(&mut self, direction: Direction, rt: &Runtime<'_>) -> Result<bool, SurveyError> {
        let trigger = match direction {
            Direction::Forward => ClearTrigger::NavigateForward,
            Direction::Back if self.can_go_back()? => ClearTrigger::NavigateBack,
            Direction::Back | Direction::Invalid | Direction::NoAction => return Ok(false),
        };
        if let Some(page) = self.current_page {
            let questions = self.store.page(page)?.questions().to_vec();
            for question in questions {
                self.store.question_mut(question)?.clear_for(trigger);
            }
        }
        match direction {
            Direction::Back => self.back(),
            _ => self.advance_page(rt),
        }
    }

    /// Handles one form submission for the current page and navigates.
    ///
    /// Returns the direction actually taken: a back request with no page to
    /// return to comes back as `NoAction`.
    pub fn submit(
        &mut self,
        form: &FormValues,
        method: Method,
        rt: &Runtime<'_>,
    ) -> Result<Direction, SurveyError> {
        let Some(page_id) = self.current_page else {
            return Ok(Direction::NoAction);
        };
        if self.branch_stack.is_empty() {
            return Ok(Direction::NoAction);
        }

        let responses = self.responses();
        let branch_args = self.owning_branch_args(page_id)?;
        let ctx = HookContext {
            participant_id: self.id,
            assignments: &self.assignments,
            responses: &responses,
            branch_args: &branch_args,
            templates: rt.registry.templates(),
        };
        let EntityStore {
            pages, questions, ..
        } = &mut self.store;
        let page = pages
            .get(&page_id)
            .ok_or_else(|| SurveyError::orphan("page", page_id.0))?;
        let direction = page.submit(questions, form, method, rt.registry, &ctx)?;

        if method == Method::Post {
            self.meta.updated_at = Utc::now();
        }
        debug!(participant = %self.id, page = %page_id, direction = direction.as_str(), "page submitted");

        let moved = self.navigate(direction, rt)?;
        if direction == Direction::Back && !moved {
            return Ok(Direction::NoAction);
        }
        Ok(direction)
    }

    /// Shuffles randomized choices and runs compile hooks for the current page.
    pub fn compile_current_page(&mut self, rt: &Runtime<'_>) -> Result<(), SurveyError> {
        self.compile_current_page_with(rt, &mut rand::thread_rng())
    }

    pub fn compile_current_page_with<R: Rng + ?Sized>(
        &mut self,
        rt: &Runtime<'_>,
        rng: &mut R,
    ) -> Result<(), SurveyError> {
        let Some(page) = self.current_page else {
            return Ok(());
        };
        let questions = self.store.page(page)?.questions().to_vec();
        for id in &questions {
            let question = self.store.question_mut(*id)?;
            if question.randomize() {
                question.shuffle_choices(rng);
            }
        }
        let branch_args = self.owning_branch_args(page)?;
        self.run_hooks(&questions, HookStage::Compile, &branch_args, rt.registry)
    }

    fn owning_branch_args(&self, page: PageId) -> Result<Value, SurveyError> {
        match self.store.page(page)?.branch() {
            Some(branch) => Ok(self.store.branch(branch)?.args().clone()),
            None => Ok(Value::Null),
        }
    }

    fn run_hooks(
        &mut self,
        questions: &[QuestionId],
        stage: HookStage,
        branch_args: &Value,
        registry: &FunctionRegistry,
    ) -> Result<(), SurveyError> {
        let responses = self.responses();
        let ctx = HookContext {
            participant_id: self.id,
            assignments: &self.assignments,
            responses: &responses,
            branch_args,
            templates: registry.templates(),
        };
        for id in questions {
            self.store
                .questions
                .get_mut(id)
                .ok_or_else(|| SurveyError::orphan("question", id.0))?
                .run_hooks(stage, registry, &ctx)?;
        }
        Ok(())
    }

    /// Recorded data keyed by output column name.
    pub fn responses(&self) -> Map<String, Value> {
        self.recorded
            .iter()
            .filter_map(|id| self.store.question(*id).ok())
            .filter_map(|question| {
                let name = question.output_name()?;
                Some((name, question.data().cloned().unwrap_or(Value::Null)))
            })
            .collect()
    }

    /// Data of the most recently recorded question using `var`.
    pub fn data_for(&self, var: &str) -> Option<&Value> {
        self.recorded
            .iter()
            .rev()
            .filter_map(|id| self.store.question(*id).ok())
            .find(|question| question.var() == Some(var))
            .and_then(|question| question.data())
    }

    /// One flat export record: metadata, assignments, then every recorded
    /// question's cells.
    pub fn output_row(&self) -> Result<OutputRow, SurveyError> {
        let mut row = OutputRow::new();
        row.insert("participant_id", json!(self.id.0));
        row.insert("started_at", json!(self.meta.started_at.to_rfc3339()));
        row.insert("updated_at", json!(self.meta.updated_at.to_rfc3339()));
        row.insert("completed", json!(self.meta.completed));
        for (tag, assigned) in &self.assignments {
            if let Value::Object(factors) = assigned {
                for (factor, level) in factors {
                    row.insert(format!("{}_{}", tag, factor), level.clone());
                }
            }
        }
        for id in &self.recorded {
            row.extend(self.store.question(*id)?.compute_output_row());
        }
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::branch::PageSpec;
    use crate::spec::function::FunctionRef;
    use crate::spec::question::QuestionSpec;

    struct Fixture {
        registry: FunctionRegistry,
        templates: BTreeMap<String, BranchSpec>,
        counter: AssignmentCounter,
    }

    impl Fixture {
        fn new(templates: BTreeMap<String, BranchSpec>) -> Self {
            Self {
                registry: FunctionRegistry::with_builtins(),
                templates,
                counter: AssignmentCounter::new(),
            }
        }

        fn runtime(&self) -> Runtime<'_> {
            Runtime {
                registry: &self.registry,
                templates: &self.templates,
                counter: &self.counter,
                max_branch_resolutions: 8,
            }
        }
    }

    fn page(text: &str) -> PageSpec {
        PageSpec::new(vec![QuestionSpec::text(text)])
    }

    #[test]
    fn exhausted_participant_stays_exhausted() {
        let fixture = Fixture::new(BTreeMap::new());
        let rt = fixture.runtime();
        let mut participant = Participant::new(ParticipantId(1));
        assert!(participant.begin(&BranchSpec::new(vec![page("only")]), &rt).unwrap());
        assert!(!participant.advance_page(&rt).unwrap());
        let snapshot = participant.clone();
        assert!(!participant.advance_page(&rt).unwrap());
        assert!(!participant.advance_page(&rt).unwrap());
        assert_eq!(participant, snapshot);
        assert!(participant.is_complete());
        assert_eq!(participant.current_page(), None);
    }

    #[test]
    fn continuation_pushes_successor_branch() {
        let templates = BTreeMap::from([("second".to_string(), BranchSpec::new(vec![page("two")]))]);
        let fixture = Fixture::new(templates);
        let rt = fixture.runtime();
        let mut participant = Participant::new(ParticipantId(1));
        let root = BranchSpec::new(vec![page("one")]).with_next(FunctionRef::branch("second"));

        participant.begin(&root, &rt).unwrap();
        assert!(participant.advance_page(&rt).unwrap());
        let current = participant.get_current_page().unwrap().unwrap();
        let text = participant.store().render_order(current.id()).unwrap()[0].text().to_string();
        assert_eq!(text, "two");
        assert_eq!(participant.branch_stack().len(), 1);
    }

    #[test]
    fn self_referencing_empty_branch_is_a_traversal_loop() {
        let looping = BranchSpec::default().with_next(FunctionRef::branch("loop"));
        let templates = BTreeMap::from([("loop".to_string(), looping.clone())]);
        let fixture = Fixture::new(templates);
        let rt = fixture.runtime();
        let mut participant = Participant::new(ParticipantId(1));
        let err = participant.begin(&looping, &rt).unwrap_err();
        assert!(matches!(err, SurveyError::TraversalLoop { limit: 8 }));
    }

    #[test]
    fn back_returns_to_previous_page_and_requeues_current() {
        let fixture = Fixture::new(BTreeMap::new());
        let rt = fixture.runtime();
        let mut participant = Participant::new(ParticipantId(1));
        participant
            .begin(&BranchSpec::new(vec![page("one"), page("two").with_back()]), &rt)
            .unwrap();
        let first = participant.current_page();
        participant.advance_page(&rt).unwrap();
        let second = participant.current_page();

        assert!(participant.back().unwrap());
        assert_eq!(participant.current_page(), first);
        assert!(!participant.back().unwrap());

        participant.advance_page(&rt).unwrap();
        assert_eq!(participant.current_page(), second);
    }

    #[test]
    fn assignments_are_made_once_per_tag() {
        let fixture = Fixture::new(BTreeMap::new());
        let rt = fixture.runtime();
        let assignment = crate::spec::branch::AssignmentSpec {
            tag: "cond".to_string(),
            factors: BTreeMap::from([("anchor".to_string(), vec![json!("low"), json!("high")])]),
        };
        let spec = BranchSpec::new(vec![page("one")]).with_assignment(assignment);
        let mut participant = Participant::new(ParticipantId(1));
        participant.begin(&spec, &rt).unwrap();
        let first = participant.assignments().clone();
        participant.push_branch(&spec, &rt).unwrap();
        assert_eq!(participant.assignments(), &first);
        assert_eq!(fixture.counter.counts("cond").iter().sum::<u64>(), 1);

        let row = participant.output_row().unwrap();
        assert!(row.get("cond_anchor").is_some());
    }
}
