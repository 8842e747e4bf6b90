use serde_json::{Value, json};

use crate::error::SurveyError;
use crate::ids::{ChoiceId, PageId, ParticipantId, QuestionId};
use crate::participant::Participant;
use crate::spec::definition::SurveyDefinition;
use crate::spec::question::QuestionKind;

/// Status labels returned by the renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    /// The current page expects a submission.
    NeedInput,
    /// A terminal page is shown or the survey is exhausted.
    Complete,
}

impl RenderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderStatus::NeedInput => "need_input",
            RenderStatus::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderChoice {
    pub id: ChoiceId,
    pub text: String,
    pub selected: bool,
}

#[derive(Debug, Clone)]
pub struct RenderQuestion {
    pub id: QuestionId,
    pub kind: QuestionKind,
    pub text: String,
    pub default: Option<String>,
    pub error: Option<String>,
    pub choices: Vec<RenderChoice>,
}

/// Everything a presentation layer needs to draw the current page.
#[derive(Debug, Clone)]
pub struct RenderPayload {
    pub survey_id: String,
    pub survey_title: String,
    pub survey_version: String,
    pub participant_id: ParticipantId,
    pub page_id: Option<PageId>,
    pub status: RenderStatus,
    /// Whether a forward control is offered.
    pub forward: bool,
    /// Whether a back control is offered.
    pub back: bool,
    pub questions: Vec<RenderQuestion>,
}

/// Collects the current page of `participant` in render order.
pub fn build_render_payload(
    definition: &SurveyDefinition,
    participant: &Participant,
) -> Result<RenderPayload, SurveyError> {
    let status = if participant.is_complete() {
        RenderStatus::Complete
    } else {
        RenderStatus::NeedInput
    };
    let mut payload = RenderPayload {
        survey_id: definition.id.clone(),
        survey_title: definition.title.clone(),
        survey_version: definition.version.clone(),
        participant_id: participant.id(),
        page_id: None,
        status,
        forward: false,
        back: false,
        questions: Vec::new(),
    };

    let Some(&top) = participant.branch_stack().last() else {
        return Ok(payload);
    };
    let Some(page) = participant.get_current_page()? else {
        return Ok(payload);
    };
    let store = participant.store();

    payload.page_id = Some(page.id());
    payload.forward = !page.is_terminal();
    payload.back = page.offers_back() && store.branch(top)?.history().len() > 1;
    payload.questions = store
        .render_order(page.id())?
        .into_iter()
        .filter(|question| question.kind() != QuestionKind::Embedded)
        .map(|question| RenderQuestion {
            id: question.id(),
            kind: question.kind(),
            text: question.text().to_string(),
            default: question.default_value().map(String::from),
            error: question.error().map(String::from),
            choices: question
                .choices()
                .iter()
                .map(|choice| RenderChoice {
                    id: choice.id(),
                    text: choice.text().to_string(),
                    selected: choice.is_selected(),
                })
                .collect(),
        })
        .collect();
    Ok(payload)
}

/// Render the payload as a structured JSON-friendly value.
pub fn render_json_ui(payload: &RenderPayload) -> Value {
    let questions = payload
        .questions
        .iter()
        .map(|question| {
            let choices = question
                .choices
                .iter()
                .map(|choice| {
                    json!({
                        "id": choice.id.to_string(),
                        "text": choice.text,
                        "selected": choice.selected,
                    })
                })
                .collect::<Vec<_>>();
            json!({
                "id": question.id.to_string(),
                "type": question.kind.as_str(),
                "text": question.text,
                "default": question.default,
                "error": question.error,
                "choices": choices,
            })
        })
        .collect::<Vec<_>>();

    json!({
        "survey_id": payload.survey_id,
        "survey_title": payload.survey_title,
        "survey_version": payload.survey_version,
        "participant_id": payload.participant_id.0,
        "page_id": payload.page_id.map(|page| page.to_string()),
        "status": payload.status.as_str(),
        "controls": {
            "forward": payload.forward,
            "back": payload.back,
        },
        "questions": questions,
    })
}

/// Render the payload as plain text; choices are numbered from 1.
pub fn render_text(payload: &RenderPayload) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "Survey: {} ({})",
        payload.survey_title, payload.survey_id
    ));
    lines.push(format!("Status: {}", payload.status.as_str()));

    for question in &payload.questions {
        lines.push(String::new());
        lines.push(question.text.clone());
        if let Some(error) = &question.error {
            lines.push(format!("  ! {}", error));
        }
        for (index, choice) in question.choices.iter().enumerate() {
            let marker = if choice.selected { "*" } else { " " };
            lines.push(format!("  {}[{}] {}", marker, index + 1, choice.text));
        }
        if question.kind == QuestionKind::Free {
            if let Some(default) = &question.default {
                lines.push(format!("  Default: {}", default));
            }
        }
    }

    let mut controls = Vec::new();
    if payload.back {
        controls.push("back");
    }
    if payload.forward {
        controls.push("forward");
    }
    if !controls.is_empty() {
        lines.push(String::new());
        lines.push(format!("Controls: {}", controls.join(", ")));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> RenderPayload {
        RenderPayload {
            survey_id: "demo".into(),
            survey_title: "Demo".into(),
            survey_version: "1".into(),
            participant_id: ParticipantId(3),
            page_id: Some(PageId(4)),
            status: RenderStatus::NeedInput,
            forward: true,
            back: true,
            questions: vec![RenderQuestion {
                id: QuestionId(5),
                kind: QuestionKind::SingleChoice,
                text: "Pick".into(),
                default: Some("7".into()),
                error: Some("required".into()),
                choices: vec![
                    RenderChoice {
                        id: ChoiceId(6),
                        text: "A".into(),
                        selected: false,
                    },
                    RenderChoice {
                        id: ChoiceId(7),
                        text: "B".into(),
                        selected: true,
                    },
                ],
            }],
        }
    }

    #[test]
    fn json_ui_exposes_controls_and_choices() {
        let ui = render_json_ui(&payload());
        assert_eq!(ui["controls"]["back"], json!(true));
        assert_eq!(ui["questions"][0]["type"], json!("single_choice"));
        assert_eq!(ui["questions"][0]["choices"][1]["id"], json!("7"));
        assert_eq!(ui["questions"][0]["error"], json!("required"));
    }

    #[test]
    fn text_numbers_choices_and_marks_selection() {
        let text = render_text(&payload());
        assert!(text.contains("  ! required"));
        assert!(text.contains("   [1] A"));
        assert!(text.contains("  *[2] B"));
        assert!(text.contains("Controls: back, forward"));
    }
}
