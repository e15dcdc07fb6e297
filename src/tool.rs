use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Result, SquallError};
use crate::schema::Schema;

/// Read-only view of the invocation surroundings handed to tool handlers.
/// Thread context changes flow only through the store's merge path, never
/// through a handler.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    thread_id: String,
    context: Map<String, Value>,
}

impl ToolContext {
    pub fn new(thread_id: impl Into<String>, context: Map<String, Value>) -> Self {
        Self {
            thread_id: thread_id.into(),
            context,
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }

    pub fn entries(&self) -> &Map<String, Value> {
        &self.context
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    /// Contract the raw arguments must satisfy before the handler runs.
    fn parameters(&self) -> Schema {
        Schema::object()
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<Value>;
}

/// What a model provider sees of a registered tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(SquallError::DuplicateTool(name));
        }
        self.tools.insert(name, Arc::new(tool));
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn describe(&self) -> Vec<ToolDescription> {
        let mut described: Vec<ToolDescription> = self
            .tools
            .values()
            .map(|tool| ToolDescription {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters().to_value(),
            })
            .collect();
        described.sort_by(|a, b| a.name.cmp(&b.name));
        described
    }

    /// Look a tool up and validate `arguments` against its declared schema.
    pub fn resolve(&self, name: &str, arguments: Value) -> Result<BoundCall> {
        let tool = self
            .tools
            .get(name)
            .cloned()
            .ok_or_else(|| SquallError::UnknownTool(name.to_string()))?;
        tool.parameters()
            .validate(&arguments)
            .map_err(|issues| SquallError::InvalidArguments {
                tool: name.to_string(),
                issues,
            })?;
        Ok(BoundCall { tool, arguments })
    }
}

/// A resolved call whose arguments already passed the declared schema.
pub struct BoundCall {
    tool: Arc<dyn Tool>,
    arguments: Value,
}

impl std::fmt::Debug for BoundCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundCall")
            .field("tool", &self.tool.name())
            .field("arguments", &self.arguments)
            .finish()
    }
}

impl BoundCall {
    pub fn tool_name(&self) -> &str {
        self.tool.name()
    }

    pub async fn run(self, ctx: &ToolContext) -> Result<Value> {
        let BoundCall { tool, arguments } = self;
        match tool.call(arguments, ctx).await {
            Ok(output) => Ok(output),
            Err(err @ SquallError::ToolInvocation { .. }) => Err(err),
            Err(err) => Err(SquallError::ToolInvocation {
                name: tool.name().to_string(),
                source: Box::new(err),
            }),
        }
    }
}
