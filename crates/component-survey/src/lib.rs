use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use survey_spec::{
    ConfigError, DirectoryStore, Engine, EngineConfig, FormValues, FunctionRegistry, Method,
    PageId, ParticipantId, RenderPayload, SurveyDefinition, SurveyError, render_json_ui as ui_json,
    render_text as ui_text,
};

const DEFAULT_SURVEY: &str = include_str!("../../survey-spec/tests/fixtures/simple_survey.json");

#[derive(Debug, Error)]
pub enum ComponentError {
    #[error("failed to parse config/{0}")]
    ConfigParse(#[source] serde_json::Error),
    #[error("invalid engine config: {0}")]
    Config(#[from] ConfigError),
    #[error("survey '{0}' is not available")]
    SurveyUnavailable(String),
    #[error("invalid {field}: '{value}'")]
    InvalidArgument { field: &'static str, value: String },
    #[error("json encode error: {0}")]
    JsonEncode(#[source] serde_json::Error),
    #[error(transparent)]
    Survey(#[from] SurveyError),
}

#[derive(Debug, Deserialize, Serialize, Default)]
struct ComponentConfig {
    #[serde(default)]
    survey_json: Option<String>,
    #[serde(default)]
    engine: Option<EngineConfig>,
    /// Directory holding participant snapshots; in-memory when absent.
    #[serde(default)]
    store_dir: Option<String>,
}

fn respond(result: Result<Value, ComponentError>) -> String {
    match result {
        Ok(value) => serde_json::to_string(&value).unwrap_or_else(|error| {
            json!({"error": format!("json encode: {}", error)}).to_string()
        }),
        Err(err) => json!({ "error": err.to_string() }).to_string(),
    }
}

fn respond_string(result: Result<String, ComponentError>) -> String {
    match result {
        Ok(value) => value,
        Err(err) => json!({ "error": err.to_string() }).to_string(),
    }
}

fn parse_participant(raw: &str) -> Result<ParticipantId, ComponentError> {
    raw.parse().map_err(|_| ComponentError::InvalidArgument {
        field: "participant_id",
        value: raw.to_string(),
    })
}

fn parse_page(raw: &str) -> Result<Option<PageId>, ComponentError> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    raw.parse()
        .map(Some)
        .map_err(|_| ComponentError::InvalidArgument {
            field: "page_id",
            value: raw.to_string(),
        })
}

fn parse_method(raw: &str) -> Result<Method, ComponentError> {
    raw.parse().map_err(|_| ComponentError::InvalidArgument {
        field: "method",
        value: raw.to_string(),
    })
}

/// Form values arrive as a JSON object; non-string values are stringified.
fn parse_form(form_json: &str) -> Result<FormValues, ComponentError> {
    if form_json.trim().is_empty() {
        return Ok(FormValues::new());
    }
    let value: Value = serde_json::from_str(form_json).map_err(ComponentError::ConfigParse)?;
    let Value::Object(map) = value else {
        return Err(ComponentError::InvalidArgument {
            field: "form",
            value: form_json.to_string(),
        });
    };
    Ok(map
        .into_iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(text) => text,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (key, text)
        })
        .collect())
}

/// One hosted survey with its live participants.
#[derive(Debug)]
pub struct SurveyComponent {
    engine: Engine,
}

impl SurveyComponent {
    /// Reads `{"survey_json": "...", "engine": {...}, "store_dir": "..."}`; an
    /// empty config hosts the bundled demo survey in memory with default engine
    /// settings.
    pub fn from_config(config_json: &str) -> Result<Self, ComponentError> {
        let config = if config_json.trim().is_empty() {
            ComponentConfig::default()
        } else {
            serde_json::from_str::<ComponentConfig>(config_json)
                .map_err(ComponentError::ConfigParse)?
        };
        let survey_json = config.survey_json.as_deref().unwrap_or(DEFAULT_SURVEY);
        let definition =
            SurveyDefinition::from_json(survey_json).map_err(ComponentError::ConfigParse)?;
        let engine_config = config
            .engine
            .unwrap_or_default()
            .with_env_overrides()?;
        debug!(survey = %definition.id, store = ?config.store_dir, "component configured");
        let registry = FunctionRegistry::with_builtins();
        let engine = match config.store_dir {
            Some(dir) => {
                let store = DirectoryStore::open(dir).map_err(SurveyError::from)?;
                Engine::with_store(definition, registry, engine_config, Box::new(store))?
            }
            None => Engine::new(definition, registry, engine_config)?,
        };
        Ok(Self { engine })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    fn ensure_survey(&self, survey_id: &str) -> Result<&SurveyDefinition, ComponentError> {
        let definition = self.engine.definition();
        if definition.id != survey_id {
            Err(ComponentError::SurveyUnavailable(survey_id.to_string()))
        } else {
            Ok(definition)
        }
    }

    pub fn describe(&self, survey_id: &str) -> String {
        respond(self.ensure_survey(survey_id).and_then(|definition| {
            serde_json::to_value(definition).map_err(ComponentError::JsonEncode)
        }))
    }

    /// Reports definition issues against the built-in registry.
    pub fn check(&self, survey_id: &str) -> String {
        respond(self.ensure_survey(survey_id).and_then(|definition| {
            let issues = definition.check(self.engine.registry());
            serde_json::to_value(issues).map_err(ComponentError::JsonEncode)
        }))
    }

    pub fn start(&self, survey_id: &str) -> String {
        let result = self.ensure_survey(survey_id).and_then(|_| {
            let id = self.engine.start()?;
            let payload = self.engine.render(id)?;
            Ok(json!({
                "participant_id": id.to_string(),
                "page": ui_json(&payload),
            }))
        });
        respond(result)
    }

    fn payload(&self, participant_id: &str) -> Result<RenderPayload, ComponentError> {
        let id = parse_participant(participant_id)?;
        Ok(self.engine.render(id)?)
    }

    pub fn render_json_ui(&self, participant_id: &str) -> String {
        respond(self.payload(participant_id).map(|payload| ui_json(&payload)))
    }

    pub fn render_text(&self, participant_id: &str) -> String {
        respond_string(self.payload(participant_id).map(|payload| ui_text(&payload)))
    }

    /// Submits `form_json` for the page the client rendered (`page_id`) and
    /// returns the outcome plus the page to show next.
    pub fn submit(&self, participant_id: &str, page_id: &str, form_json: &str, method: &str) -> String {
        let result = (|| -> Result<Value, ComponentError> {
            let id = parse_participant(participant_id)?;
            let expected = parse_page(page_id)?;
            let form = parse_form(form_json)?;
            let method = parse_method(method)?;
            let outcome = self.engine.submit(id, expected, &form, method)?;
            let payload = self.engine.render(id)?;
            let mut response = serde_json::to_value(&outcome).map_err(ComponentError::JsonEncode)?;
            response["page"] = ui_json(&payload);
            Ok(response)
        })();
        respond(result)
    }

    pub fn export_json(&self) -> String {
        respond(self.engine.export().map(|dataset| dataset.to_json()).map_err(Into::into))
    }

    pub fn export_csv(&self) -> String {
        respond_string(
            self.engine
                .export()
                .map(|dataset| dataset.to_csv())
                .map_err(Into::into),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component() -> SurveyComponent {
        SurveyComponent::from_config("").expect("component")
    }

    fn parse(raw: &str) -> Value {
        serde_json::from_str(raw).expect("valid json")
    }

    #[test]
    fn describe_returns_definition_json() {
        let spec = parse(&component().describe("commute"));
        assert_eq!(spec["id"], "commute");
        assert_eq!(spec["start"], "intro");
    }

    #[test]
    fn describe_rejects_other_surveys() {
        let response = parse(&component().describe("other"));
        assert_eq!(response["error"], "survey 'other' is not available");
    }

    #[test]
    fn bundled_survey_checks_clean() {
        let issues = parse(&component().check("commute"));
        assert_eq!(issues, json!([]));
    }

    #[test]
    fn start_then_submit_round_trip() {
        let component = component();
        let started = parse(&component.start("commute"));
        let participant = started["participant_id"].as_str().expect("id").to_string();
        let page = started["page"]["page_id"].as_str().expect("page").to_string();
        let name = started["page"]["questions"][1]["id"]
            .as_str()
            .expect("question")
            .to_string();

        let form = json!({ (name.clone()): "" }).to_string();
        let invalid = parse(&component.submit(&participant, &page, &form, "POST"));
        assert_eq!(invalid["status"], "invalid");
        assert_eq!(invalid["page"]["questions"][1]["error"], "required");

        let form = json!({ (name): "Ada" }).to_string();
        let advanced = parse(&component.submit(&participant, &page, &form, "post"));
        assert_eq!(advanced["status"], "advanced");
        assert_eq!(advanced["direction"], "forward");

        let stale = parse(&component.submit(&participant, &page, &form, "POST"));
        assert_eq!(stale["status"], "stale");
    }

    #[test]
    fn bad_arguments_become_error_documents() {
        let component = component();
        let response = parse(&component.render_json_ui("not-a-number"));
        assert_eq!(response["error"], "invalid participant_id: 'not-a-number'");
        let response = parse(&component.render_text("99"));
        assert_eq!(response["error"], "participant 99 not found");
    }

    #[test]
    fn engine_config_is_read_from_component_config() {
        let config = json!({ "engine": { "record_incomplete": true } }).to_string();
        let component = SurveyComponent::from_config(&config).expect("component");
        component.start("commute");
        let rows = parse(&component.export_json());
        assert_eq!(rows.as_array().map(Vec::len), Some(1));
        assert!(component.export_csv().starts_with("participant_id,"));
    }

    #[test]
    fn store_dir_keeps_participants_between_components() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = json!({
            "store_dir": dir.path().to_string_lossy(),
            "engine": { "record_incomplete": true }
        })
        .to_string();
        let participant = {
            let component = SurveyComponent::from_config(&config).expect("component");
            let started = parse(&component.start("commute"));
            started["participant_id"].as_str().expect("id").to_string()
        };

        let reopened = SurveyComponent::from_config(&config).expect("component");
        let page = parse(&reopened.render_json_ui(&participant));
        assert_eq!(page["participant_id"].to_string(), participant);
        assert_eq!(parse(&reopened.export_json()).as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn custom_survey_json_is_hosted() {
        let survey = json!({
            "id": "tiny",
            "title": "Tiny",
            "version": "1",
            "start": "only",
            "branches": {
                "only": { "pages": [{ "terminal": true, "questions": [{ "type": "text", "text": "Bye" }] }] }
            }
        });
        let config = json!({ "survey_json": survey.to_string() }).to_string();
        let component = SurveyComponent::from_config(&config).expect("component");
        let started = parse(&component.start("tiny"));
        assert_eq!(started["page"]["status"], "complete");
        assert_eq!(started["page"]["controls"]["forward"], false);
    }
}
