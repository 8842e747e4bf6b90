use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::assignment::AssignmentCounter;
use crate::config::EngineConfig;
use crate::error::SurveyError;
use crate::export::Dataset;
use crate::ids::{PageId, ParticipantId};
use crate::model::{Direction, FormValues, Method};
use crate::participant::{Participant, Runtime};
use crate::registry::FunctionRegistry;
use crate::render::{RenderPayload, build_render_payload};
use crate::spec::definition::SurveyDefinition;
use crate::store::{MemoryStore, ParticipantStore};

/// How a submission was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitStatus {
    /// Moved to another page.
    Advanced,
    /// Validation failed; the same page is shown with errors.
    Invalid,
    /// Nothing to do: not a POST, or the requested move is not available.
    Unchanged,
    /// The participant reached a terminal page or exhausted the survey.
    Complete,
    /// The submission targeted a page that is no longer current.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitOutcome {
    pub status: SubmitStatus,
    pub direction: Direction,
    pub current_page: Option<PageId>,
}

type Slot = Arc<Mutex<Participant>>;

/// Serves many participants of one survey definition.
///
/// Each participant sits behind its own mutex; a transition works on a copy,
/// persists it and only then replaces the live state.
pub struct Engine {
    definition: SurveyDefinition,
    registry: FunctionRegistry,
    counter: AssignmentCounter,
    config: EngineConfig,
    store: Box<dyn ParticipantStore>,
    participants: RwLock<BTreeMap<ParticipantId, Slot>>,
    next_id: AtomicU64,
}

impl Engine {
    pub fn new(
        definition: SurveyDefinition,
        registry: FunctionRegistry,
        config: EngineConfig,
    ) -> Result<Self, SurveyError> {
        Self::with_store(definition, registry, config, Box::new(MemoryStore::new()))
    }

    /// Builds an engine over `store`, resuming every participant it holds.
    pub fn with_store(
        definition: SurveyDefinition,
        registry: FunctionRegistry,
        config: EngineConfig,
        store: Box<dyn ParticipantStore>,
    ) -> Result<Self, SurveyError> {
        definition.start_branch()?;
        let stored = store.load_all()?;
        let highest = stored.iter().map(|p| p.id().0).max().unwrap_or(0);
        if !stored.is_empty() {
            info!(participants = stored.len(), "resumed stored participants");
        }
        let counter = AssignmentCounter::new();
        for participant in &stored {
            for (tag, assigned) in participant.assignments() {
                let (Some(spec), Value::Object(assigned)) = (definition.assignment(tag), assigned)
                else {
                    warn!(participant = %participant.id(), tag = %tag, "stored assignment has no template");
                    continue;
                };
                if !counter.record(tag, &spec.factors, assigned) {
                    warn!(participant = %participant.id(), tag = %tag, "stored assignment matches no level");
                }
            }
        }
        let participants = stored
            .into_iter()
            .map(|participant| (participant.id(), Arc::new(Mutex::new(participant))))
            .collect();
        Ok(Self {
            definition,
            registry,
            counter,
            config,
            store,
            participants: RwLock::new(participants),
            next_id: AtomicU64::new(highest + 1),
        })
    }

    pub fn definition(&self) -> &SurveyDefinition {
        &self.definition
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn counter(&self) -> &AssignmentCounter {
        &self.counter
    }

    fn runtime(&self) -> Runtime<'_> {
        Runtime {
            registry: &self.registry,
            templates: &self.definition.branches,
            counter: &self.counter,
            max_branch_resolutions: self.config.max_branch_resolutions,
        }
    }

    pub fn participant_ids(&self) -> Vec<ParticipantId> {
        self.participants.read().keys().copied().collect()
    }

    fn slot(&self, id: ParticipantId) -> Result<Slot, SurveyError> {
        self.participants
            .read()
            .get(&id)
            .cloned()
            .ok_or(SurveyError::ParticipantNotFound(id))
    }

    /// Runs `f` on a copy of `live`; the copy is saved and swapped in only when
    /// every step succeeds. Conditions assigned by a discarded copy are
    /// returned to the counter.
    fn apply<T>(
        &self,
        live: &mut Participant,
        f: impl FnOnce(&mut Participant, &Runtime<'_>) -> Result<T, SurveyError>,
    ) -> Result<T, SurveyError> {
        let mut working = live.clone();
        let result = f(&mut working, &self.runtime())
            .inspect_err(|err| {
                if err.is_consistency_error() {
                    error!(participant = %live.id(), %err, "transition aborted");
                } else {
                    warn!(participant = %live.id(), %err, "transition failed");
                }
            })
            .and_then(|value| {
                self.store.save(&working)?;
                Ok(value)
            });
        match result {
            Ok(value) => {
                *live = working;
                Ok(value)
            }
            Err(err) => {
                self.release_assignments(live.assignments(), &working);
                Err(err)
            }
        }
    }

    /// Undoes counter increments for tags `discarded` assigned on top of `kept`.
    fn release_assignments(&self, kept: &Map<String, Value>, discarded: &Participant) {
        for (tag, assigned) in discarded.assignments() {
            if kept.contains_key(tag) {
                continue;
            }
            if let (Some(spec), Value::Object(assigned)) = (self.definition.assignment(tag), assigned)
            {
                self.counter.release(tag, &spec.factors, assigned);
            }
        }
    }

    fn transact<T>(
        &self,
        id: ParticipantId,
        f: impl FnOnce(&mut Participant, &Runtime<'_>) -> Result<T, SurveyError>,
    ) -> Result<T, SurveyError> {
        let slot = self.slot(id)?;
        let mut live = slot.lock();
        self.apply(&mut live, f)
    }

    /// Creates a participant and shows the first page of the start branch.
    pub fn start(&self) -> Result<ParticipantId, SurveyError> {
        self.start_with_key(None)
    }

    /// Like `start`, screening `key` (an opaque caller identity such as a
    /// client address) against the configured blocklist and, when enabled,
    /// against the keys of existing participants.
    pub fn start_with_key(&self, key: Option<&str>) -> Result<ParticipantId, SurveyError> {
        let root = self.definition.start_branch()?;
        if let Some(key) = key {
            if self.config.blocked_keys.contains(key) {
                warn!(key, "blocked participant key");
                return Err(SurveyError::Screened {
                    key: key.to_string(),
                    reason: "key is blocked",
                });
            }
        }

        let id = ParticipantId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut participant = Participant::new(id);
        participant.set_external_key(key.map(String::from));
        let started = participant
            .begin(root, &self.runtime())
            .and_then(|_| self.admit(participant.clone()));
        if started.is_err() {
            self.release_assignments(&Map::new(), &participant);
        }
        started.map(|_| id)
    }

    /// Persists and registers a freshly started participant. Duplicate keys
    /// are checked while the participant map is write-locked.
    fn admit(&self, participant: Participant) -> Result<(), SurveyError> {
        let mut participants = self.participants.write();
        if let Some(key) = participant.external_key() {
            let duplicate = self.config.block_duplicate_keys
                && participants
                    .values()
                    .any(|slot| slot.lock().external_key() == Some(key));
            if duplicate {
                warn!(key, "duplicate participant key");
                return Err(SurveyError::Screened {
                    key: key.to_string(),
                    reason: "key already started the survey",
                });
            }
        }
        self.store.save(&participant)?;
        participants.insert(participant.id(), Arc::new(Mutex::new(participant)));
        Ok(())
    }

    /// Runs compile hooks for the current page and returns what to show.
    pub fn render(&self, id: ParticipantId) -> Result<RenderPayload, SurveyError> {
        self.transact(id, |participant, rt| {
            participant.compile_current_page(rt)?;
            build_render_payload(&self.definition, participant)
        })
    }

    /// Applies a form submission made against `expected_page`.
    pub fn submit(
        &self,
        id: ParticipantId,
        expected_page: Option<PageId>,
        form: &FormValues,
        method: Method,
    ) -> Result<SubmitOutcome, SurveyError> {
        let slot = self.slot(id)?;
        let mut live = slot.lock();
        if expected_page.is_some() && expected_page != live.current_page() {
            warn!(
                participant = %id,
                expected = ?expected_page,
                current = ?live.current_page(),
                "rejecting stale submission"
            );
            return Ok(SubmitOutcome {
                status: SubmitStatus::Stale,
                direction: Direction::NoAction,
                current_page: live.current_page(),
            });
        }

        self.apply(&mut live, |participant, rt| {
            let direction = participant.submit(form, method, rt)?;
            let status = match direction {
                Direction::Invalid => SubmitStatus::Invalid,
                Direction::NoAction => SubmitStatus::Unchanged,
                Direction::Forward | Direction::Back if participant.is_complete() => {
                    SubmitStatus::Complete
                }
                Direction::Forward | Direction::Back => SubmitStatus::Advanced,
            };
            Ok(SubmitOutcome {
                status,
                direction,
                current_page: participant.current_page(),
            })
        })
    }

    /// Copy of the participant's current state.
    pub fn snapshot(&self, id: ParticipantId) -> Result<Participant, SurveyError> {
        Ok(self.slot(id)?.lock().clone())
    }

    /// One row per participant; incomplete ones only when configured.
    pub fn export(&self) -> Result<Dataset, SurveyError> {
        let slots: Vec<Slot> = self.participants.read().values().cloned().collect();
        let mut dataset = Dataset::new();
        for slot in slots {
            let participant = slot.lock();
            if participant.is_complete() || self.config.record_incomplete {
                dataset.push(participant.output_row()?);
            }
        }
        Ok(dataset)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("survey", &self.definition.id)
            .field("config", &self.config)
            .field("participants", &self.participants.read().len())
            .finish_non_exhaustive()
    }
}
