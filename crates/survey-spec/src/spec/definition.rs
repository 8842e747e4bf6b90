use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FunctionKind, SurveyError};
use crate::registry::FunctionRegistry;
use crate::spec::branch::{AssignmentSpec, BranchSpec};
use crate::spec::function::FunctionRef;
use crate::spec::question::{QuestionKind, QuestionSpec};

/// Top-level survey definition: named branch templates plus the entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SurveyDefinition {
    pub id: String,
    pub title: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Template instantiated as every participant's root branch.
    pub start: String,
    pub branches: BTreeMap<String, BranchSpec>,
}

/// Problem found while checking a definition against a registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DefinitionIssue {
    pub path: String,
    pub message: String,
}

impl SurveyDefinition {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// JSON Schema describing survey definition documents.
    pub fn schema_document() -> Value {
        schemars::schema_for!(SurveyDefinition).to_value()
    }

    pub fn template(&self, name: &str) -> Result<&BranchSpec, SurveyError> {
        self.branches
            .get(name)
            .ok_or_else(|| SurveyError::UnknownTemplate {
                name: name.to_string(),
            })
    }

    pub fn start_branch(&self) -> Result<&BranchSpec, SurveyError> {
        self.template(&self.start)
    }

    /// First assignment declared under `tag` in any branch template.
    pub fn assignment(&self, tag: &str) -> Option<&AssignmentSpec> {
        self.branches
            .values()
            .flat_map(|branch| branch.assign.iter())
            .find(|assignment| assignment.tag == tag)
    }

    /// Reports every issue that would make a participant's traversal fail.
    pub fn check(&self, registry: &FunctionRegistry) -> Vec<DefinitionIssue> {
        let mut issues = Vec::new();
        if !self.branches.contains_key(&self.start) {
            issues.push(issue(
                "/start",
                format!("start template '{}' is not defined", self.start),
            ));
        }

        for (name, branch) in &self.branches {
            let base = format!("/branches/{}", name);
            if let Some(next) = &branch.next {
                self.check_continuation(registry, &format!("{}/next", base), next, &mut issues);
            }
            for (index, page) in branch.pages.iter().enumerate() {
                if page.terminal && page.back {
                    issues.push(issue(
                        &format!("{}/pages/{}", base, index),
                        "terminal pages cannot offer a back control",
                    ));
                }
                for (q_index, question) in page.questions.iter().enumerate() {
                    let path = format!("{}/pages/{}/questions/{}", base, index, q_index);
                    check_question(registry, &path, question, &mut issues);
                }
            }
            for (index, question) in branch.embedded.iter().enumerate() {
                let path = format!("{}/embedded/{}", base, index);
                check_question(registry, &path, question, &mut issues);
            }
            for (index, assignment) in branch.assign.iter().enumerate() {
                if assignment.factors.values().any(Vec::is_empty) {
                    issues.push(issue(
                        &format!("{}/assign/{}", base, index),
                        format!("assignment '{}' has a factor without levels", assignment.tag),
                    ));
                }
            }
        }
        issues
    }

    fn check_continuation(
        &self,
        registry: &FunctionRegistry,
        path: &str,
        next: &FunctionRef,
        issues: &mut Vec<DefinitionIssue>,
    ) {
        if !registry.contains(FunctionKind::Continuation, &next.key) {
            issues.push(issue(
                path,
                format!("no continuation registered under key '{}'", next.key),
            ));
            return;
        }
        let mut referenced = Vec::new();
        match next.key.as_str() {
            "branch" => match next.args.get("name").and_then(Value::as_str) {
                Some(name) => referenced.push(name.to_string()),
                None => issues.push(issue(path, "branch continuation requires args.name")),
            },
            "select" => {
                if let Some(cases) = next.args.get("cases").and_then(Value::as_object) {
                    referenced.extend(cases.values().filter_map(Value::as_str).map(String::from));
                }
                if let Some(default) = next.args.get("default").and_then(Value::as_str) {
                    referenced.push(default.to_string());
                }
                if next.args.get("var").and_then(Value::as_str).is_none() {
                    issues.push(issue(path, "select continuation requires args.var"));
                }
            }
            _ => {}
        }
        for name in referenced {
            if !self.branches.contains_key(&name) {
                issues.push(issue(
                    path,
                    format!("references undefined branch template '{}'", name),
                ));
            }
        }
    }
}

fn check_question(
    registry: &FunctionRegistry,
    path: &str,
    question: &QuestionSpec,
    issues: &mut Vec<DefinitionIssue>,
) {
    if matches!(question.kind, QuestionKind::SingleChoice) && question.choices.is_empty() {
        issues.push(issue(path, "single_choice questions need at least one choice"));
    }
    let mut labels = BTreeSet::new();
    for choice in &question.choices {
        let label = choice.label.as_deref().unwrap_or(&choice.text);
        if !labels.insert(label) {
            issues.push(issue(
                path,
                format!("choice label '{}' is used more than once", label),
            ));
        }
    }
    let has_var = question
        .var
        .as_deref()
        .map(|var| !var.trim().is_empty())
        .unwrap_or(false);
    if question.kind != QuestionKind::Text && !has_var {
        issues.push(issue(
            path,
            format!("{} question has no var; its data is never exported", question.kind.as_str()),
        ));
    }
    for (index, validator) in question.validators.iter().enumerate() {
        let validator_path = format!("{}/validators/{}", path, index);
        if !registry.contains(FunctionKind::Validator, &validator.key) {
            issues.push(issue(
                &validator_path,
                format!("no validator registered under key '{}'", validator.key),
            ));
        }
        if validator.key == "pattern" {
            match validator.args.get("pattern").and_then(Value::as_str) {
                Some(pattern) => {
                    if let Err(err) = Regex::new(pattern) {
                        issues.push(issue(&validator_path, format!("invalid pattern: {}", err)));
                    }
                }
                None => issues.push(issue(&validator_path, "pattern validator requires args.pattern")),
            }
        }
    }
    for (label, hooks) in [("compile", &question.compile), ("post", &question.post)] {
        for (index, hook) in hooks.iter().enumerate() {
            if !registry.contains(FunctionKind::Hook, &hook.key) {
                issues.push(issue(
                    &format!("{}/{}/{}", path, label, index),
                    format!("no hook registered under key '{}'", hook.key),
                ));
            }
        }
    }
}

fn issue(path: &str, message: impl Into<String>) -> DefinitionIssue {
    DefinitionIssue {
        path: path.to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::branch::PageSpec;
    use crate::spec::question::ChoiceSpec;

    fn definition(branch: BranchSpec) -> SurveyDefinition {
        SurveyDefinition {
            id: "t".into(),
            title: "T".into(),
            version: "1".into(),
            description: None,
            start: "main".into(),
            branches: BTreeMap::from([("main".to_string(), branch)]),
        }
    }

    fn messages(definition: &SurveyDefinition) -> Vec<String> {
        definition
            .check(&FunctionRegistry::with_builtins())
            .into_iter()
            .map(|issue| format!("{}: {}", issue.path, issue.message))
            .collect()
    }

    #[test]
    fn terminal_page_with_back_is_reported() {
        let branch = BranchSpec::new(vec![
            PageSpec::new(vec![QuestionSpec::text("hi")]),
            PageSpec::terminal(vec![QuestionSpec::text("bye")]).with_back(),
        ]);
        assert_eq!(
            messages(&definition(branch)),
            vec!["/branches/main/pages/1: terminal pages cannot offer a back control"]
        );
    }

    #[test]
    fn duplicate_choice_labels_are_reported() {
        let question = QuestionSpec {
            choices: vec![
                ChoiceSpec::new("Yes"),
                ChoiceSpec::new("Yes, definitely").with_label("Yes"),
                ChoiceSpec::new("No").with_label("no"),
            ],
            ..QuestionSpec::single_choice("agree", "Agree?", &[])
        };
        let branch = BranchSpec::new(vec![PageSpec::new(vec![question])]);
        assert_eq!(
            messages(&definition(branch)),
            vec!["/branches/main/pages/0/questions/0: choice label 'Yes' is used more than once"]
        );
    }

    #[test]
    fn assignment_is_found_by_tag() {
        let assignment = AssignmentSpec {
            tag: "cond".into(),
            factors: BTreeMap::from([("anchor".to_string(), vec![Value::from("low")])]),
        };
        let branch = BranchSpec::new(vec![PageSpec::new(vec![QuestionSpec::text("hi")])])
            .with_assignment(assignment.clone());
        let definition = definition(branch);
        assert_eq!(definition.assignment("cond"), Some(&assignment));
        assert!(definition.assignment("other").is_none());
    }
}
