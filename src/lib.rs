//! Building blocks for running schema-disciplined conversational agents.
//!
//! The crate provides a minimal runtime with:
//! - A language model abstraction ([`LanguageModel`]) and a deterministic
//!   [`ScriptedModel`] for tests and demos.
//! - Schema-validated tools ([`Tool`], [`ToolRegistry`]).
//! - Per-thread transcripts and context behind a [`ThreadStore`].
//! - An [`Agent`] that loops between the model and tools and returns a
//!   [`StructuredReply`] validated against a declared [`Schema`].

mod agent;
mod config;
mod error;
mod hooks;
mod llm;
mod message;
mod metrics;
mod output;
mod schema;
mod storage;
mod telemetry;
mod tool;
mod toolkit;

pub use agent::{Agent, LoopPhase};
pub use config::EngineConfig;
pub use error::{Result, SquallError};
pub use hooks::AgentHook;
pub use llm::{LanguageModel, ModelCompletion, ModelRequest, ScriptedModel};
pub use message::{Message, Role, ToolCall, ToolResult};
pub use metrics::{InvocationReport, MetricsTracker, RunGuard};
pub use output::{OutputExtractor, StructuredReply};
pub use schema::{FieldKind, FieldSpec, IssueKind, Schema, SchemaIssue, SchemaIssues};
pub use storage::{FileThreadStore, MemoryThreadStore, ThreadStore};
pub use telemetry::init_tracing;
pub use tool::{BoundCall, Tool, ToolContext, ToolDescription, ToolRegistry};
pub use toolkit::weather_toolkit;

pub use tokio_util::sync::CancellationToken;
