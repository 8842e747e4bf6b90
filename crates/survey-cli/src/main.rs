mod wizard;

use clap::{Parser, Subcommand, ValueEnum};
use component_survey::SurveyComponent;
use serde_json::{Map, Value, json};
use std::fs;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use survey_spec::{DIRECTION_FIELD, EngineConfig, FunctionRegistry, SurveyDefinition};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use wizard::{AnswerParseError, QuestionKind, Verbosity, WizardPayload, WizardPresenter, WizardQuestion};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

const BACK_TOKEN: &str = "<<";

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Text-based survey runner",
    long_about = "Runs, checks and exports branching surveys backed by the survey component"
)]
struct Cli {
    /// Log filter used when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum RenderMode {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Walk a new participant through a survey in a text shell.
    Run {
        /// Path to the survey definition JSON.
        #[arg(long, value_name = "SURVEY")]
        survey: PathBuf,
        /// Directory for participant snapshots (in memory when omitted).
        #[arg(long, value_name = "DIR")]
        store: Option<PathBuf>,
        /// Engine config JSON file.
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// Render output mode for each page.
        #[arg(long, value_enum, default_value_t = RenderMode::Text)]
        format: RenderMode,
        /// Show verbose output (statuses, ids, recorded row).
        #[arg(long, alias = "debug")]
        verbose: bool,
    },
    /// Report problems in a survey definition.
    Check {
        /// Path to the survey definition JSON.
        #[arg(long, value_name = "SURVEY")]
        survey: PathBuf,
    },
    /// Print the JSON Schema of survey definitions.
    Schema,
    /// Export stored participants as CSV (or JSON).
    Export {
        /// Path to the survey definition JSON.
        #[arg(long, value_name = "SURVEY")]
        survey: PathBuf,
        /// Directory holding participant snapshots.
        #[arg(long, value_name = "DIR")]
        store: PathBuf,
        /// Engine config JSON file.
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// Write to this file instead of stdout.
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
        /// Emit a JSON array instead of CSV.
        #[arg(long)]
        json: bool,
        /// Include participants that have not finished.
        #[arg(long)]
        include_incomplete: bool,
    },
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);
    match cli.command {
        Command::Run {
            survey,
            store,
            config,
            format,
            verbose,
        } => run_survey(&survey, store.as_deref(), config.as_deref(), format, verbose),
        Command::Check { survey } => run_check(&survey),
        Command::Schema => run_schema(),
        Command::Export {
            survey,
            store,
            config,
            out,
            json,
            include_incomplete,
        } => run_export(
            &survey,
            &store,
            config.as_deref(),
            out.as_deref(),
            json,
            include_incomplete,
        ),
    }
}

fn init_logging(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}

fn load_engine_config(path: Option<&Path>) -> CliResult<EngineConfig> {
    let raw = match path {
        Some(path) => fs::read_to_string(path)?,
        None => String::new(),
    };
    Ok(EngineConfig::from_json(&raw)?)
}

fn component_config(
    survey_json: &str,
    engine: &EngineConfig,
    store: Option<&Path>,
) -> CliResult<String> {
    let mut config = json!({
        "survey_json": survey_json,
        "engine": engine,
    });
    if let Some(store) = store {
        config["store_dir"] = Value::String(store.to_string_lossy().into_owned());
    }
    Ok(serde_json::to_string(&config)?)
}

fn parse_component_result(response: &str) -> CliResult<Value> {
    let value: Value = serde_json::from_str(response)?;
    if let Some(error) = value.get("error").and_then(Value::as_str) {
        Err(error.into())
    } else {
        Ok(value)
    }
}

fn read_survey(path: &Path) -> CliResult<(String, String)> {
    let survey_json = fs::read_to_string(path)?;
    let survey_id = serde_json::from_str::<Value>(&survey_json)?
        .get("id")
        .and_then(Value::as_str)
        .ok_or("survey definition is missing an id")?
        .to_string();
    Ok((survey_json, survey_id))
}

fn run_survey(
    survey_path: &Path,
    store: Option<&Path>,
    config_path: Option<&Path>,
    format: RenderMode,
    verbose: bool,
) -> CliResult<()> {
    let (survey_json, survey_id) = read_survey(survey_path)?;
    let engine = load_engine_config(config_path)?;
    let component = SurveyComponent::from_config(&component_config(&survey_json, &engine, store)?)?;

    let started = parse_component_result(&component.start(&survey_id))?;
    let participant_id = started["participant_id"]
        .as_str()
        .ok_or("component did not return a participant id")?
        .to_string();
    debug!(participant = %participant_id, "survey started");

    let mut presenter = WizardPresenter::new(Verbosity::from_verbose(verbose));
    let stdin = io::stdin();
    let mut input = stdin.lock();

    loop {
        let ui = parse_component_result(&component.render_json_ui(&participant_id))?;
        let payload =
            WizardPayload::from_json(&ui).map_err(|err| format!("wizard UI error: {}", err))?;
        presenter.show_header(&payload);
        presenter.show_status(&payload);
        if matches!(format, RenderMode::Json) {
            println!("{}", serde_json::to_string_pretty(&ui)?);
        }

        if payload.is_finished() {
            for question in &payload.questions {
                presenter.show_question(question);
            }
            let rows = parse_component_result(&component.export_json())?;
            let row = find_row(&rows, &participant_id);
            presenter.show_completion(&participant_id, row);
            return Ok(());
        }

        let form = collect_page(&mut input, &payload, &presenter)?;
        let submitted = parse_component_result(&component.submit(
            &participant_id,
            payload.page_id.as_deref().unwrap_or(""),
            &Value::Object(form).to_string(),
            "POST",
        ))?;
        if submitted["status"] == "invalid" {
            presenter.show_invalid();
        }
    }
}

fn find_row<'a>(rows: &'a Value, participant_id: &str) -> Option<&'a Value> {
    rows.as_array()?
        .iter()
        .find(|row| row["participant_id"].to_string() == participant_id)
}

/// Prompts for every answerable question of the page and builds the form.
fn collect_page(
    input: &mut impl BufRead,
    payload: &WizardPayload,
    presenter: &WizardPresenter,
) -> CliResult<Map<String, Value>> {
    let mut form = Map::new();
    let mut asked = false;
    for question in &payload.questions {
        presenter.show_question(question);
        if !question.takes_input() {
            continue;
        }
        asked = true;
        loop {
            presenter.show_prompt(question, payload.back);
            let line = read_line(input)?;
            if payload.back && line.trim() == BACK_TOKEN {
                return Ok(back_form(payload, form));
            }
            match parse_answer(question, &line) {
                Ok(value) => {
                    form.insert(question.id.clone(), Value::String(value));
                    break;
                }
                Err(err) => presenter.show_parse_error(&err),
            }
        }
    }
    if !asked {
        presenter.show_continue(payload.back);
        let line = read_line(input)?;
        if payload.back && line.trim() == BACK_TOKEN {
            return Ok(back_form(payload, form));
        }
    }
    Ok(form)
}

/// Going back still submits the page, so unanswered questions keep their
/// current defaults.
fn back_form(payload: &WizardPayload, mut form: Map<String, Value>) -> Map<String, Value> {
    for question in payload.questions.iter().filter(|question| question.takes_input()) {
        if form.contains_key(&question.id) {
            continue;
        }
        if let Ok(value) = parse_answer(question, "") {
            form.insert(question.id.clone(), Value::String(value));
        }
    }
    form.insert(DIRECTION_FIELD.to_string(), Value::String("back".into()));
    form
}

fn read_line(input: &mut impl BufRead) -> CliResult<String> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err("input closed before the survey finished".into());
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Turns a typed answer into the raw form value for `question`.
///
/// Choices are answered by their 1-based number; an empty answer keeps the
/// current default.
fn parse_answer(question: &WizardQuestion, raw: &str) -> Result<String, AnswerParseError> {
    let trimmed = raw.trim();
    match question.kind {
        QuestionKind::SingleChoice => {
            if trimmed.is_empty() {
                return Ok(question
                    .choices
                    .iter()
                    .find(|choice| choice.selected)
                    .map(|choice| choice.id.clone())
                    .unwrap_or_default());
            }
            let index: usize = trimmed.parse().map_err(|_| {
                AnswerParseError::new(format!(
                    "enter a number between 1 and {}",
                    question.choices.len()
                ))
            })?;
            index
                .checked_sub(1)
                .and_then(|index| question.choices.get(index))
                .map(|choice| choice.id.clone())
                .ok_or_else(|| {
                    AnswerParseError::new(format!(
                        "choice {} does not exist; pick 1-{}",
                        index,
                        question.choices.len()
                    ))
                })
        }
        _ if trimmed.is_empty() => Ok(question.default.clone().unwrap_or_default()),
        _ => Ok(raw.to_string()),
    }
}

fn run_check(survey_path: &Path) -> CliResult<()> {
    let contents = fs::read_to_string(survey_path)?;
    let definition = SurveyDefinition::from_json(&contents)?;
    let issues = definition.check(&FunctionRegistry::with_builtins());
    if issues.is_empty() {
        println!(
            "Survey '{}' ({} branches) is valid.",
            definition.id,
            definition.branches.len()
        );
        return Ok(());
    }
    for issue in &issues {
        println!("{}: {}", issue.path, issue.message);
    }
    Err(format!("{} issue(s) found in survey '{}'", issues.len(), definition.id).into())
}

fn run_schema() -> CliResult<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(&SurveyDefinition::schema_document())?
    );
    Ok(())
}

fn run_export(
    survey_path: &Path,
    store: &Path,
    config_path: Option<&Path>,
    out: Option<&Path>,
    as_json: bool,
    include_incomplete: bool,
) -> CliResult<()> {
    let (survey_json, _) = read_survey(survey_path)?;
    let mut engine = load_engine_config(config_path)?;
    engine.record_incomplete |= include_incomplete;
    let component =
        SurveyComponent::from_config(&component_config(&survey_json, &engine, Some(store))?)?;

    let output = if as_json {
        let rows = parse_component_result(&component.export_json())?;
        serde_json::to_string_pretty(&rows)?
    } else {
        let csv = component.export_csv();
        if csv.starts_with('{') {
            parse_component_result(&csv)?;
        }
        csv
    };

    match out {
        Some(path) => {
            fs::write(path, output)?;
            println!("Exported to {}", path.display());
        }
        None => print!("{}", output),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wizard::WizardChoice;
    use std::io::Cursor;

    fn choice_question() -> WizardQuestion {
        WizardQuestion {
            id: "5".into(),
            kind: QuestionKind::SingleChoice,
            text: "Pick".into(),
            default: None,
            error: None,
            choices: vec![
                WizardChoice {
                    id: "6".into(),
                    text: "A".into(),
                    selected: false,
                },
                WizardChoice {
                    id: "7".into(),
                    text: "B".into(),
                    selected: true,
                },
            ],
        }
    }

    #[test]
    fn parse_answer_maps_numbers_to_choice_ids() {
        let question = choice_question();
        assert_eq!(parse_answer(&question, "1").unwrap(), "6");
        assert_eq!(parse_answer(&question, " 2 ").unwrap(), "7");
        assert!(parse_answer(&question, "0").is_err());
        assert!(parse_answer(&question, "3").is_err());
        assert!(parse_answer(&question, "B").is_err());
    }

    #[test]
    fn empty_choice_answer_keeps_selection() {
        assert_eq!(parse_answer(&choice_question(), "").unwrap(), "7");
    }

    #[test]
    fn empty_free_answer_keeps_default() {
        let question = WizardQuestion {
            id: "1".into(),
            kind: QuestionKind::Free,
            text: "Name?".into(),
            default: Some("Ada".into()),
            error: None,
            choices: Vec::new(),
        };
        assert_eq!(parse_answer(&question, "").unwrap(), "Ada");
        assert_eq!(parse_answer(&question, "Bob").unwrap(), "Bob");
    }

    #[test]
    fn back_token_short_circuits_the_page() {
        let ui = json!({
            "survey_title": "Demo",
            "status": "need_input",
            "page_id": "3",
            "controls": { "forward": true, "back": true },
            "questions": [
                { "id": "5", "type": "single_choice", "text": "Pick",
                  "choices": [{ "id": "6", "text": "A", "selected": false }] }
            ]
        });
        let payload = WizardPayload::from_json(&ui).unwrap();
        let presenter = WizardPresenter::new(Verbosity::Clean);
        let mut input = Cursor::new("<<\n");
        let form = collect_page(&mut input, &payload, &presenter).unwrap();
        assert_eq!(form.get(DIRECTION_FIELD), Some(&json!("back")));
        assert_eq!(form.get("5"), Some(&json!("")));
    }

    #[test]
    fn closed_input_is_an_error() {
        let mut input = Cursor::new("");
        assert!(read_line(&mut input).is_err());
    }
}
