use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SquallError};

/// Loop-bounding knobs for the runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Model-consultation rounds allowed per invocation.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    /// Failures of a single tool tolerated within one invocation.
    #[serde(default = "default_max_tool_failures")]
    pub max_tool_failures: usize,
    /// Re-prompts allowed when the final reply fails schema validation.
    #[serde(default = "default_reply_retries")]
    pub reply_retries: usize,
}

fn default_max_rounds() -> usize {
    8
}

fn default_max_tool_failures() -> usize {
    3
}

fn default_reply_retries() -> usize {
    1
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            max_tool_failures: default_max_tool_failures(),
            reply_retries: default_reply_retries(),
        }
    }
}

impl EngineConfig {
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await.map_err(|err| {
            SquallError::Config(format!(
                "failed to read `{}`: {err}",
                path.as_ref().display()
            ))
        })?;
        toml::from_str(&raw).map_err(|err| SquallError::Config(format!("invalid engine config: {err}")))
    }

    /// Layer `SQUALL_*` environment overrides on top of this config.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(value) = env_usize("SQUALL_MAX_ROUNDS") {
            self.max_rounds = value;
        }
        if let Some(value) = env_usize("SQUALL_MAX_TOOL_FAILURES") {
            self.max_tool_failures = value;
        }
        if let Some(value) = env_usize("SQUALL_REPLY_RETRIES") {
            self.reply_retries = value;
        }
        self
    }
}

fn env_usize(key: &str) -> Option<usize> {
    let raw = env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(%key, %raw, "ignoring unparsable engine override");
            None
        }
    }
}
