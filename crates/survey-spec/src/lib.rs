#![allow(missing_docs)]

pub mod assignment;
mod builtins;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod ids;
pub mod model;
pub mod participant;
pub mod registry;
pub mod render;
pub mod spec;
pub mod store;
pub mod template;

pub use assignment::AssignmentCounter;
pub use config::{ConfigError, EngineConfig};
pub use engine::{Engine, SubmitOutcome, SubmitStatus};
pub use error::{FunctionKind, SurveyError};
pub use export::{Dataset, OutputRow};
pub use ids::{BranchId, ChoiceId, PageId, ParticipantId, QuestionId, ValidatorId};
pub use model::{
    Branch, Choice, DIRECTION_FIELD, Direction, EntityStore, FormValues, HookStage, Method, Page,
    Question, QuestionOwner, Validator,
};
pub use participant::{Participant, ParticipantMeta, Runtime};
pub use registry::{
    ContinuationContext, ContinuationFn, FunctionRegistry, HookContext, HookFn, ValidatorFn,
};
pub use render::{
    RenderChoice, RenderPayload, RenderQuestion, RenderStatus, build_render_payload,
    render_json_ui, render_text,
};
pub use spec::{
    AssignmentSpec, BranchSpec, ChoiceSpec, ClearTrigger, DefinitionIssue, FunctionRef, PageSpec,
    QuestionKind, QuestionSpec, SurveyDefinition, ValidatorSpec,
};
pub use store::{DirectoryStore, MemoryStore, ParticipantStore, StoreError};
pub use template::{TemplateEngine, TemplateError};
