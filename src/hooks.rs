use async_trait::async_trait;

use crate::agent::LoopPhase;
use crate::error::Result;
use crate::llm::ModelCompletion;
use crate::message::{Message, ToolCall, ToolResult};

/// Observation seam around the agent loop. All methods default to no-ops;
/// a failing hook aborts the invocation.
#[async_trait]
pub trait AgentHook: Send + Sync {
    /// Called on every state-machine transition, including terminal ones.
    async fn on_phase(&self, _phase: LoopPhase) {}

    async fn before_model(&self, _messages: &[Message]) -> Result<()> {
        Ok(())
    }

    async fn after_model(&self, _completion: &ModelCompletion) -> Result<()> {
        Ok(())
    }

    async fn before_tool_call(&self, _call: &ToolCall) -> Result<()> {
        Ok(())
    }

    async fn after_tool_result(&self, _result: &ToolResult) -> Result<()> {
        Ok(())
    }
}
