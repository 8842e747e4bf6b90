use serde_json::Value;

/// Controls which bits of state the wizard prints.
#[derive(Copy, Clone, Eq, PartialEq)]
pub enum Verbosity {
    /// Clean output: page text and prompts only.
    Clean,
    /// Verbose output: status, ids and the recorded row on completion.
    Verbose,
}

impl Verbosity {
    pub fn from_verbose(verbose: bool) -> Self {
        if verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Clean
        }
    }

    pub fn is_verbose(&self) -> bool {
        matches!(self, Verbosity::Verbose)
    }
}

/// Prints pages and prompts for the text shell.
pub struct WizardPresenter {
    verbosity: Verbosity,
    header_printed: bool,
}

impl WizardPresenter {
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            verbosity,
            header_printed: false,
        }
    }

    pub fn show_header(&mut self, payload: &WizardPayload) {
        if self.header_printed {
            return;
        }
        println!("Survey: {}", payload.survey_title);
        self.header_printed = true;
    }

    pub fn show_status(&self, payload: &WizardPayload) {
        if self.verbosity.is_verbose() {
            println!(
                "Status: {} (page {})",
                payload.status.as_str(),
                payload.page_id.as_deref().unwrap_or("-")
            );
        }
    }

    pub fn show_question(&self, question: &WizardQuestion) {
        println!();
        if self.verbosity.is_verbose() {
            println!("[{}] {}", question.id, question.text);
        } else {
            println!("{}", question.text);
        }
        if let Some(error) = &question.error {
            println!("  ! {}", error);
        }
        for (index, choice) in question.choices.iter().enumerate() {
            let marker = if choice.selected { "*" } else { " " };
            println!("  {}{}) {}", marker, index + 1, choice.text);
        }
    }

    pub fn show_prompt(&self, question: &WizardQuestion, back: bool) {
        let mut line = match question.kind {
            QuestionKind::SingleChoice => format!("Choose 1-{}", question.choices.len()),
            _ => "Answer".to_string(),
        };
        if let Some(default) = question.default_label() {
            line.push_str(&format!(" [{}]", default));
        }
        if back {
            line.push_str(" (<< to go back)");
        }
        println!("{}:", line);
    }

    pub fn show_continue(&self, back: bool) {
        if back {
            println!("Press enter to continue (<< to go back):");
        } else {
            println!("Press enter to continue:");
        }
    }

    pub fn show_parse_error(&self, error: &AnswerParseError) {
        eprintln!("Invalid answer: {}", error.user_message);
    }

    pub fn show_invalid(&self) {
        println!("Some answers need attention.");
    }

    pub fn show_completion(&self, participant_id: &str, row: Option<&Value>) {
        println!("Done ✅");
        println!("Participant: {}", participant_id);
        if self.verbosity.is_verbose()
            && let Some(row) = row
            && let Ok(pretty) = serde_json::to_string_pretty(row)
        {
            println!("{}", pretty);
        }
    }
}

/// Render payload extracted from the component output.
pub struct WizardPayload {
    pub survey_title: String,
    pub status: RenderStatus,
    pub page_id: Option<String>,
    pub forward: bool,
    pub back: bool,
    pub questions: Vec<WizardQuestion>,
}

impl WizardPayload {
    pub fn from_json(json: &Value) -> Result<Self, String> {
        let survey_title = json
            .get("survey_title")
            .and_then(Value::as_str)
            .ok_or_else(|| "wizard payload missing survey_title".to_string())?
            .to_string();
        let status = RenderStatus::from_label(
            json.get("status")
                .and_then(Value::as_str)
                .unwrap_or("need_input"),
        );
        let page_id = json
            .get("page_id")
            .and_then(Value::as_str)
            .map(String::from);
        let controls = json
            .get("controls")
            .and_then(Value::as_object)
            .ok_or_else(|| "wizard payload missing controls".to_string())?;
        let control = |name: &str| controls.get(name).and_then(Value::as_bool).unwrap_or(false);
        let questions = json
            .get("questions")
            .and_then(Value::as_array)
            .ok_or_else(|| "wizard payload missing questions".to_string())?
            .iter()
            .map(WizardQuestion::from_json)
            .collect::<Result<_, _>>()?;
        Ok(Self {
            survey_title,
            status,
            page_id,
            forward: control("forward"),
            back: control("back"),
            questions,
        })
    }

    /// Nothing left to submit: a terminal page or an exhausted survey.
    pub fn is_finished(&self) -> bool {
        self.status == RenderStatus::Complete && !self.forward
    }
}

/// Status returned by the renderer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RenderStatus {
    NeedInput,
    Complete,
}

impl RenderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderStatus::NeedInput => "need_input",
            RenderStatus::Complete => "complete",
        }
    }

    pub fn from_label(label: &str) -> Self {
        match label {
            "complete" => RenderStatus::Complete,
            _ => RenderStatus::NeedInput,
        }
    }
}

pub struct WizardChoice {
    pub id: String,
    pub text: String,
    pub selected: bool,
}

/// Minimal view of a question used for rendering prompts.
pub struct WizardQuestion {
    pub id: String,
    pub kind: QuestionKind,
    pub text: String,
    pub default: Option<String>,
    pub error: Option<String>,
    pub choices: Vec<WizardChoice>,
}

impl WizardQuestion {
    fn from_json(value: &Value) -> Result<Self, String> {
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| "question missing id".to_string())?
            .to_string();
        let kind = QuestionKind::from_label(value.get("type").and_then(Value::as_str).unwrap_or(""));
        let text = value
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let optional = |key: &str| value.get(key).and_then(Value::as_str).map(String::from);
        let choices = value
            .get("choices")
            .and_then(Value::as_array)
            .map(|choices| {
                choices
                    .iter()
                    .filter_map(|choice| {
                        Some(WizardChoice {
                            id: choice.get("id")?.as_str()?.to_string(),
                            text: choice.get("text")?.as_str()?.to_string(),
                            selected: choice
                                .get("selected")
                                .and_then(Value::as_bool)
                                .unwrap_or(false),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            id,
            kind,
            text,
            default: optional("default"),
            error: optional("error"),
            choices,
        })
    }

    pub fn takes_input(&self) -> bool {
        matches!(self.kind, QuestionKind::Free | QuestionKind::SingleChoice)
    }

    /// What an empty answer keeps, as shown to the user.
    pub fn default_label(&self) -> Option<String> {
        match self.kind {
            QuestionKind::SingleChoice => self
                .choices
                .iter()
                .position(|choice| choice.selected)
                .map(|index| (index + 1).to_string()),
            _ => self.default.clone().filter(|value| !value.is_empty()),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum QuestionKind {
    Text,
    Free,
    SingleChoice,
    Unknown,
}

impl QuestionKind {
    fn from_label(label: &str) -> Self {
        match label {
            "text" => QuestionKind::Text,
            "free" => QuestionKind::Free,
            "single_choice" => QuestionKind::SingleChoice,
            _ => QuestionKind::Unknown,
        }
    }
}

/// Error produced when parsing answers from the user.
#[derive(Debug)]
pub struct AnswerParseError {
    pub user_message: String,
}

impl AnswerParseError {
    pub fn new(user_message: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
        }
    }
}
