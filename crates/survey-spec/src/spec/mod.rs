pub mod branch;
pub mod definition;
pub mod function;
pub mod question;

pub use branch::{AssignmentSpec, BranchSpec, PageSpec};
pub use definition::{DefinitionIssue, SurveyDefinition};
pub use function::FunctionRef;
pub use question::{ChoiceSpec, ClearTrigger, QuestionKind, QuestionSpec, ValidatorSpec};
