use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Result, SquallError};
use crate::message::{Message, ToolCall};
use crate::schema::Schema;
use crate::tool::ToolDescription;

/// One serialized consultation of the language model: full history, system
/// instructions, tool declarations, and the expected reply shape.
pub struct ModelRequest<'a> {
    pub system: &'a str,
    pub messages: &'a [Message],
    pub tools: &'a [ToolDescription],
    pub reply_schema: Option<&'a Schema>,
}

/// What the model answered with: a final-answer candidate, a batch of tool
/// calls, or both (content accompanying calls is kept as commentary).
#[derive(Debug, Clone, PartialEq)]
pub struct ModelCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ModelCompletion {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Minimal abstraction around a chat completion provider. Provider failures
/// are fatal to the invocation; the runtime never retries them on its own.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete_chat(&self, request: ModelRequest<'_>) -> Result<ModelCompletion>;
}

/// A deterministic model used for tests and demos. Replays scripted JSON
/// directives, one per consultation.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ScriptedDirective {
    Respond { content: String },
    CallTool { name: String, arguments: Value },
    CallTools { calls: Vec<ScriptedCall> },
}

#[derive(Debug, Deserialize)]
struct ScriptedCall {
    name: String,
    arguments: Value,
}

fn scripted_call(name: String, arguments: Value) -> ToolCall {
    ToolCall {
        id: Uuid::new_v4().to_string(),
        name,
        arguments,
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete_chat(&self, _request: ModelRequest<'_>) -> Result<ModelCompletion> {
        let raw = {
            let mut locked = self
                .responses
                .lock()
                .map_err(|_| SquallError::Provider("scripted model lock poisoned".into()))?;
            locked.pop_front().ok_or_else(|| {
                SquallError::Provider("ScriptedModel ran out of scripted responses".into())
            })?
        };

        match serde_json::from_str::<ScriptedDirective>(&raw) {
            Ok(ScriptedDirective::Respond { content }) => Ok(ModelCompletion {
                content: Some(content),
                tool_calls: Vec::new(),
            }),
            Ok(ScriptedDirective::CallTool { name, arguments }) => Ok(ModelCompletion {
                content: None,
                tool_calls: vec![scripted_call(name, arguments)],
            }),
            Ok(ScriptedDirective::CallTools { calls }) => Ok(ModelCompletion {
                content: None,
                tool_calls: calls
                    .into_iter()
                    .map(|call| scripted_call(call.name, call.arguments))
                    .collect(),
            }),
            // Anything that is not a directive is treated as plain content.
            Err(_) => Ok(ModelCompletion {
                content: Some(raw),
                tool_calls: Vec::new(),
            }),
        }
    }
}
