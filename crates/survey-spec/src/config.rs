use std::collections::BTreeSet;
use std::env;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_MAX_BRANCH_RESOLUTIONS: &str = "SURVEY_MAX_BRANCH_RESOLUTIONS";
pub const ENV_RECORD_INCOMPLETE: &str = "SURVEY_RECORD_INCOMPLETE";
pub const ENV_BLOCK_DUPLICATE_KEYS: &str = "SURVEY_BLOCK_DUPLICATE_KEYS";

const DEFAULT_MAX_BRANCH_RESOLUTIONS: usize = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse engine config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value '{value}' for {key}")]
    InvalidEnv { key: &'static str, value: String },
    #[error("max_branch_resolutions must be at least 1")]
    ZeroResolutionLimit,
}

/// Engine tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EngineConfig {
    /// Continuations one `advance_page` call may resolve before the traversal is
    /// declared a loop.
    #[serde(default = "default_max_branch_resolutions")]
    pub max_branch_resolutions: usize,
    /// Export participants that have not reached a terminal page.
    #[serde(default)]
    pub record_incomplete: bool,
    /// Refuse to start a second participant with a key already in use.
    #[serde(default)]
    pub block_duplicate_keys: bool,
    /// Participant keys that may never start the survey.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub blocked_keys: BTreeSet<String>,
}

fn default_max_branch_resolutions() -> usize {
    DEFAULT_MAX_BRANCH_RESOLUTIONS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_branch_resolutions: DEFAULT_MAX_BRANCH_RESOLUTIONS,
            record_incomplete: false,
            block_duplicate_keys: false,
            blocked_keys: BTreeSet::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = if raw.trim().is_empty() {
            EngineConfig::default()
        } else {
            serde_json::from_str(raw)?
        };
        config.validated()
    }

    /// Applies `SURVEY_*` environment overrides on top of `self`.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| env::var(key).ok())
    }

    fn with_overrides(
        mut self,
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(value) = lookup(ENV_MAX_BRANCH_RESOLUTIONS) {
            self.max_branch_resolutions =
                value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    key: ENV_MAX_BRANCH_RESOLUTIONS,
                    value: value.clone(),
                })?;
        }
        if let Some(value) = lookup(ENV_RECORD_INCOMPLETE) {
            self.record_incomplete = parse_flag(ENV_RECORD_INCOMPLETE, value)?;
        }
        if let Some(value) = lookup(ENV_BLOCK_DUPLICATE_KEYS) {
            self.block_duplicate_keys = parse_flag(ENV_BLOCK_DUPLICATE_KEYS, value)?;
        }
        self.validated()
    }

    fn validated(self) -> Result<Self, ConfigError> {
        if self.max_branch_resolutions == 0 {
            return Err(ConfigError::ZeroResolutionLimit);
        }
        Ok(self)
    }
}

fn parse_flag(key: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidEnv { key, value }),
    }
}
