use thiserror::Error;

use crate::schema::SchemaIssues;

pub type Result<T> = std::result::Result<T, SquallError>;

#[derive(Debug, Error)]
pub enum SquallError {
    #[error("tool `{0}` is already registered")]
    DuplicateTool(String),

    #[error("tool `{0}` not found")]
    UnknownTool(String),

    #[error("arguments for tool `{tool}` rejected: {issues}")]
    InvalidArguments { tool: String, issues: SchemaIssues },

    #[error("tool `{name}` invocation failed: {source}")]
    ToolInvocation {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("tool `{name}` failed {attempts} times within one invocation")]
    RepeatedToolFailure { name: String, attempts: usize },

    #[error("language model error: {0}")]
    Provider(String),

    #[error("invocation exceeded the round limit of {limit}")]
    RoundLimit { limit: usize },

    #[error("final reply rejected by the output schema: {0}")]
    InvalidReply(SchemaIssues),

    #[error("invocation cancelled before completion")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}
