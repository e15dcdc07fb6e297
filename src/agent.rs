use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{Result, SquallError};
use crate::hooks::AgentHook;
use crate::llm::{LanguageModel, ModelCompletion, ModelRequest};
use crate::message::{Message, ToolCall, ToolResult};
use crate::metrics::{MetricsTracker, RunGuard};
use crate::output::{OutputExtractor, StructuredReply};
use crate::schema::{Schema, SchemaIssues};
use crate::storage::ThreadStore;
use crate::tool::{ToolContext, ToolRegistry};

/// Where an invocation currently stands. Observable through
/// [`AgentHook::on_phase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    AwaitingModel,
    ToolDispatch,
    Finalizing,
    Done,
    Failed,
}

/// A conversational agent: alternates between the model and registered
/// tools until the model produces a reply satisfying the declared schema.
/// All state lives in the injected [`ThreadStore`]; the agent itself holds
/// only configuration and collaborators, so one instance serves many
/// threads concurrently.
pub struct Agent<M: LanguageModel> {
    system_prompt: String,
    model: Arc<M>,
    tools: ToolRegistry,
    store: Arc<dyn ThreadStore>,
    extractor: Option<OutputExtractor>,
    config: EngineConfig,
    hooks: Vec<Arc<dyn AgentHook>>,
    metrics: Option<MetricsTracker>,
}

impl<M: LanguageModel> Agent<M> {
    pub fn new(model: Arc<M>, store: Arc<dyn ThreadStore>) -> Self {
        Self {
            system_prompt: "You are a helpful agent.".to_string(),
            model,
            tools: ToolRegistry::new(),
            store,
            extractor: None,
            config: EngineConfig::default(),
            hooks: Vec::new(),
            metrics: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Declare the shape every final reply must satisfy.
    pub fn with_reply_schema(mut self, schema: Schema) -> Self {
        self.extractor = Some(OutputExtractor::new(schema));
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.config.max_rounds = max_rounds.max(1);
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn AgentHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsTracker) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn tools_mut(&mut self) -> &mut ToolRegistry {
        &mut self.tools
    }

    pub fn store(&self) -> &Arc<dyn ThreadStore> {
        &self.store
    }

    /// Run one exchange on `thread_id` and return the structured reply.
    pub async fn invoke(
        &self,
        thread_id: &str,
        user_message: impl Into<String>,
    ) -> Result<StructuredReply> {
        self.invoke_with(thread_id, user_message, Map::new(), CancellationToken::new())
            .await
    }

    /// Like [`Agent::invoke`], additionally merging `context` into the
    /// thread before the first model consultation and honoring `cancel` at
    /// the loop's suspension points.
    pub async fn invoke_with(
        &self,
        thread_id: &str,
        user_message: impl Into<String>,
        context: Map<String, Value>,
        cancel: CancellationToken,
    ) -> Result<StructuredReply> {
        let mut guard = self.metrics.as_ref().map(|m| m.start_run(thread_id));
        let outcome = self
            .run_loop(thread_id, user_message.into(), context, &cancel, &mut guard)
            .await;

        match &outcome {
            Ok(_) => {
                if let Some(guard) = guard.take() {
                    guard.finish(true);
                }
                self.emit_phase(LoopPhase::Done).await;
            }
            Err(err) => {
                warn!(thread_id, error = %err, "invocation failed");
                if let Some(guard) = guard.take() {
                    guard.finish(false);
                }
                self.emit_phase(LoopPhase::Failed).await;
            }
        }
        outcome
    }

    async fn emit_phase(&self, phase: LoopPhase) {
        for hook in &self.hooks {
            hook.on_phase(phase).await;
        }
    }

    async fn run_loop(
        &self,
        thread_id: &str,
        user_message: String,
        context: Map<String, Value>,
        cancel: &CancellationToken,
        guard: &mut Option<RunGuard>,
    ) -> Result<StructuredReply> {
        if !context.is_empty() {
            self.store.merge_context(thread_id, context).await?;
        }
        let runtime_ctx = ToolContext::new(thread_id, self.store.context(thread_id).await?);

        self.store
            .append(thread_id, Message::user(user_message))
            .await?;

        let tool_specs = self.tools.describe();
        let mut failure_counts: HashMap<String, usize> = HashMap::new();

        for round in 0..self.config.max_rounds {
            if cancel.is_cancelled() {
                return Err(SquallError::Cancelled);
            }
            self.emit_phase(LoopPhase::AwaitingModel).await;
            if let Some(guard) = guard.as_mut() {
                guard.record_round();
            }

            let history = self.store.snapshot(thread_id).await?;
            for hook in &self.hooks {
                hook.before_model(&history).await?;
            }

            let request = ModelRequest {
                system: &self.system_prompt,
                messages: &history,
                tools: &tool_specs,
                reply_schema: self.extractor.as_ref().map(|e| e.schema()),
            };
            let completion = self.model.complete_chat(request).await?;
            for hook in &self.hooks {
                hook.after_model(&completion).await?;
            }

            if completion.has_tool_calls() {
                debug!(
                    thread_id,
                    round,
                    calls = completion.tool_calls.len(),
                    "dispatching tool round"
                );
                self.run_tool_round(
                    thread_id,
                    completion,
                    &runtime_ctx,
                    cancel,
                    &mut failure_counts,
                    guard,
                )
                .await?;
                continue;
            }

            self.emit_phase(LoopPhase::Finalizing).await;
            let content = completion.content.ok_or_else(|| {
                SquallError::Provider("completion carried neither content nor tool calls".into())
            })?;
            return self.finalize(thread_id, content, &history).await;
        }

        Err(SquallError::RoundLimit {
            limit: self.config.max_rounds,
        })
    }

    /// Execute one dispatch round. Calls run concurrently; results are
    /// buffered and flushed in original call order as a single batch, so a
    /// recorded round is always complete.
    async fn run_tool_round(
        &self,
        thread_id: &str,
        completion: ModelCompletion,
        runtime_ctx: &ToolContext,
        cancel: &CancellationToken,
        failure_counts: &mut HashMap<String, usize>,
        guard: &mut Option<RunGuard>,
    ) -> Result<()> {
        self.emit_phase(LoopPhase::ToolDispatch).await;

        let mut calls = completion.tool_calls;
        for call in &mut calls {
            if call.id.is_empty() {
                call.id = Uuid::new_v4().to_string();
            }
        }
        let mut seen = HashSet::new();
        for call in &calls {
            if !seen.insert(call.id.as_str()) {
                return Err(SquallError::Provider(format!(
                    "duplicate tool call id `{}` in one round",
                    call.id
                )));
            }
        }

        // Once the requesting turn is recorded the round runs to completion
        // and is recorded in full; cancellation only applies before that.
        if cancel.is_cancelled() {
            return Err(SquallError::Cancelled);
        }

        for hook in &self.hooks {
            for call in &calls {
                hook.before_tool_call(call).await?;
            }
        }

        let assistant =
            Message::assistant_with_calls(completion.content.unwrap_or_default(), calls.clone());
        self.store.append(thread_id, assistant).await?;

        let executions = calls.iter().map(|call| self.execute_call(call, runtime_ctx));
        let outcomes = join_all(executions).await;

        let mut abort: Option<SquallError> = None;
        let mut results = Vec::with_capacity(calls.len());
        for (call, outcome) in calls.iter().zip(outcomes) {
            if let Some(guard) = guard.as_mut() {
                guard.record_tool_call();
            }
            let output = match outcome {
                Ok(output) => output,
                Err(err) => {
                    if let Some(guard) = guard.as_mut() {
                        guard.record_tool_failure();
                    }
                    let failures = failure_counts.entry(call.name.clone()).or_insert(0);
                    *failures += 1;
                    if *failures >= self.config.max_tool_failures && abort.is_none() {
                        abort = Some(SquallError::RepeatedToolFailure {
                            name: call.name.clone(),
                            attempts: *failures,
                        });
                    }
                    warn!(thread_id, tool = %call.name, error = %err, "tool call failed; recording the failure for the model");
                    json!({ "error": err.to_string() })
                }
            };
            results.push(ToolResult {
                call_id: call.id.clone(),
                name: call.name.clone(),
                output,
            });
        }

        self.store
            .append_all(thread_id, results.iter().cloned().map(Message::tool).collect())
            .await?;

        for hook in &self.hooks {
            for result in &results {
                hook.after_tool_result(result).await?;
            }
        }

        match abort {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn execute_call(&self, call: &ToolCall, ctx: &ToolContext) -> Result<Value> {
        let bound = self.tools.resolve(&call.name, call.arguments.clone())?;
        bound.run(ctx).await
    }

    /// Validate the final-answer candidate. Rejected drafts and their
    /// corrective re-prompts stay ephemeral; only the accepted reply is
    /// persisted.
    async fn finalize(
        &self,
        thread_id: &str,
        content: String,
        history: &[Message],
    ) -> Result<StructuredReply> {
        let Some(extractor) = &self.extractor else {
            self.store
                .append(thread_id, Message::assistant(&content))
                .await?;
            return Ok(StructuredReply::plain(content));
        };

        let mut attempt = content;
        let mut accumulated = SchemaIssues::default();
        for retry in 0..=self.config.reply_retries {
            match extractor.extract(&attempt) {
                Ok(reply) => {
                    self.store
                        .append(thread_id, Message::assistant(&attempt))
                        .await?;
                    return Ok(reply);
                }
                Err(SquallError::InvalidReply(issues)) => {
                    warn!(thread_id, retry, issues = %issues, "reply failed schema validation");
                    accumulated = accumulated.merge(issues);
                    if retry == self.config.reply_retries {
                        break;
                    }
                    attempt = self.reprompt(history, &attempt, &accumulated).await?;
                }
                Err(other) => return Err(other),
            }
        }
        Err(SquallError::InvalidReply(accumulated))
    }

    async fn reprompt(
        &self,
        history: &[Message],
        rejected: &str,
        issues: &SchemaIssues,
    ) -> Result<String> {
        let mut messages = history.to_vec();
        messages.push(Message::assistant(rejected));
        messages.push(Message::user(format!(
            "Your reply did not satisfy the required output schema: {issues}. \
             Respond again with only a JSON object that satisfies the schema."
        )));

        let request = ModelRequest {
            system: &self.system_prompt,
            messages: &messages,
            tools: &[],
            reply_schema: self.extractor.as_ref().map(|e| e.schema()),
        };
        let completion = self.model.complete_chat(request).await?;
        completion
            .content
            .ok_or_else(|| SquallError::Provider("re-prompt produced no content".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedModel;
    use crate::message::Role;
    use crate::schema::FieldKind;
    use crate::storage::MemoryThreadStore;
    use crate::tool::Tool;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use tokio::time::{sleep, Duration};

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes the payload back."
        }

        async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<Value> {
            Ok(args)
        }
    }

    struct StampTool;

    #[async_trait]
    impl Tool for StampTool {
        fn name(&self) -> &str {
            "stamp"
        }

        fn description(&self) -> &str {
            "Returns `tag` after sleeping `delay_ms`."
        }

        async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<Value> {
            let delay = args.get("delay_ms").and_then(Value::as_u64).unwrap_or(0);
            sleep(Duration::from_millis(delay)).await;
            Ok(args.get("tag").cloned().unwrap_or(Value::Null))
        }
    }

    struct FaultyTool;

    #[async_trait]
    impl Tool for FaultyTool {
        fn name(&self) -> &str {
            "faulty"
        }

        fn description(&self) -> &str {
            "Always fails."
        }

        async fn call(&self, _args: Value, _ctx: &ToolContext) -> Result<Value> {
            Err(SquallError::Storage("backend offline".into()))
        }
    }

    fn agent_with(
        responses: Vec<String>,
        tools: ToolRegistry,
    ) -> (Agent<ScriptedModel>, Arc<MemoryThreadStore>) {
        let store = Arc::new(MemoryThreadStore::new());
        let agent = Agent::new(ScriptedModel::new(responses), store.clone()).with_tools(tools);
        (agent, store)
    }

    #[tokio::test]
    async fn returns_a_plain_reply_without_tools() {
        let (agent, store) = agent_with(
            vec![r#"{"action":"respond","content":"Hello!"}"#.into()],
            ToolRegistry::new(),
        );

        let reply = agent.invoke("t", "hi").await.unwrap();

        assert_eq!(reply.raw(), "Hello!");
        assert_eq!(store.snapshot("t").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn executes_a_tool_then_replies() {
        let mut tools = ToolRegistry::new();
        tools.register(EchoTool).unwrap();
        let (agent, store) = agent_with(
            vec![
                r#"{"action":"call_tool","name":"echo","arguments":{"text":"ping"}}"#.into(),
                r#"{"action":"respond","content":"Echoed."}"#.into(),
            ],
            tools,
        );

        let reply = agent.invoke("t", "say ping").await.unwrap();
        assert_eq!(reply.raw(), "Echoed.");

        let transcript = store.snapshot("t").await.unwrap();
        assert_eq!(transcript.len(), 4);
        assert_eq!(transcript[1].role, Role::Assistant);
        assert!(transcript[1].requests_tools());
        assert_eq!(transcript[2].role, Role::Tool);
    }

    #[tokio::test]
    async fn round_results_flush_in_call_order() {
        let mut tools = ToolRegistry::new();
        tools.register(StampTool).unwrap();
        let script = json!({
            "action": "call_tools",
            "calls": [
                {"name": "stamp", "arguments": {"delay_ms": 80, "tag": "first"}},
                {"name": "stamp", "arguments": {"delay_ms": 0, "tag": "second"}}
            ]
        });
        let (agent, store) = agent_with(
            vec![
                script.to_string(),
                r#"{"action":"respond","content":"done"}"#.into(),
            ],
            tools,
        );

        agent.invoke("t", "stamp twice").await.unwrap();

        let transcript = store.snapshot("t").await.unwrap();
        let requested: Vec<&str> = transcript[1]
            .tool_calls
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        let recorded: Vec<(&str, &Value)> = transcript[2..4]
            .iter()
            .filter_map(|m| m.tool_result.as_ref())
            .map(|r| (r.call_id.as_str(), &r.output))
            .collect();

        // The slow call finishes last but is still recorded first.
        assert_eq!(recorded[0].1, &json!("first"));
        assert_eq!(recorded[1].1, &json!("second"));
        assert_eq!(requested, vec![recorded[0].0, recorded[1].0]);
    }

    #[tokio::test]
    async fn unknown_tools_are_recorded_not_fatal() {
        let (agent, store) = agent_with(
            vec![
                r#"{"action":"call_tool","name":"missing","arguments":{}}"#.into(),
                r#"{"action":"respond","content":"recovered"}"#.into(),
            ],
            ToolRegistry::new(),
        );

        let reply = agent.invoke("t", "try it").await.unwrap();
        assert_eq!(reply.raw(), "recovered");

        let transcript = store.snapshot("t").await.unwrap();
        let result = transcript[2].tool_result.as_ref().unwrap();
        assert!(result.output["error"]
            .as_str()
            .unwrap()
            .contains("`missing` not found"));
    }

    #[tokio::test]
    async fn hitting_the_round_limit_fails_cleanly() {
        let mut tools = ToolRegistry::new();
        tools.register(EchoTool).unwrap();
        let call = r#"{"action":"call_tool","name":"echo","arguments":{}}"#.to_string();
        let (agent, store) = agent_with(vec![call.clone(), call], tools);
        let agent = agent.with_max_rounds(2);

        let err = agent.invoke("t", "loop forever").await.unwrap_err();
        assert!(matches!(err, SquallError::RoundLimit { limit: 2 }));

        // Both dispatched rounds are fully recorded: user + 2 * (assistant + tool).
        let transcript = store.snapshot("t").await.unwrap();
        assert_eq!(transcript.len(), 5);
        assert!(transcript[4].tool_result.is_some());
    }

    #[tokio::test]
    async fn a_repeatedly_failing_tool_aborts_the_invocation() {
        let mut tools = ToolRegistry::new();
        tools.register(FaultyTool).unwrap();
        let call = r#"{"action":"call_tool","name":"faulty","arguments":{}}"#.to_string();
        let (agent, store) = agent_with(vec![call.clone(), call], tools);
        let agent = agent.with_config(EngineConfig {
            max_tool_failures: 2,
            ..EngineConfig::default()
        });

        let err = agent.invoke("t", "keep trying").await.unwrap_err();
        assert!(
            matches!(err, SquallError::RepeatedToolFailure { ref name, attempts: 2 } if name == "faulty")
        );

        // The aborting round is still flushed in full.
        let transcript = store.snapshot("t").await.unwrap();
        assert_eq!(transcript.len(), 5);
        assert!(transcript[4].tool_result.is_some());
    }

    #[tokio::test]
    async fn cancellation_applies_before_the_next_model_call() {
        let (agent, store) = agent_with(
            vec![r#"{"action":"respond","content":"never sent"}"#.into()],
            ToolRegistry::new(),
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = agent
            .invoke_with("t", "hello?", Map::new(), cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, SquallError::Cancelled));
        assert_eq!(store.snapshot("t").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn an_invalid_reply_is_reprompted_once() {
        let (agent, store) = agent_with(
            vec![
                r#"{"action":"respond","content":"{\"wrong\":true}"}"#.into(),
                r#"{"action":"respond","content":"{\"punny_response\":\"second try\"}"}"#.into(),
            ],
            ToolRegistry::new(),
        );
        let agent = agent
            .with_reply_schema(Schema::object().required("punny_response", FieldKind::String));

        let reply = agent.invoke("t", "pun please").await.unwrap();
        assert_eq!(reply.field("punny_response").unwrap(), "second try");

        // Only the accepted reply lands in the transcript.
        let transcript = store.snapshot("t").await.unwrap();
        assert_eq!(transcript.len(), 2);
        assert!(transcript[1].content.contains("second try"));
    }

    #[tokio::test]
    async fn exhausted_retries_surface_accumulated_issues() {
        let bad = r#"{"action":"respond","content":"{\"wrong\":true}"}"#.to_string();
        let (agent, _store) = agent_with(vec![bad.clone(), bad], ToolRegistry::new());
        let agent = agent
            .with_reply_schema(Schema::object().required("punny_response", FieldKind::String));

        let err = agent.invoke("t", "pun please").await.unwrap_err();
        match err {
            SquallError::InvalidReply(issues) => assert_eq!(issues.0.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn duplicate_call_ids_are_a_protocol_violation() {
        struct DuplicatingModel;

        #[async_trait]
        impl LanguageModel for DuplicatingModel {
            async fn complete_chat(&self, _request: ModelRequest<'_>) -> Result<ModelCompletion> {
                let call = ToolCall {
                    id: "same".into(),
                    name: "echo".into(),
                    arguments: json!({}),
                };
                Ok(ModelCompletion {
                    content: None,
                    tool_calls: vec![call.clone(), call],
                })
            }
        }

        let mut tools = ToolRegistry::new();
        tools.register(EchoTool).unwrap();
        let store = Arc::new(MemoryThreadStore::new());
        let agent = Agent::new(Arc::new(DuplicatingModel), store).with_tools(tools);

        let err = agent.invoke("t", "go").await.unwrap_err();
        assert!(matches!(err, SquallError::Provider(_)));
    }

    #[tokio::test]
    async fn phases_are_observable_through_hooks() {
        #[derive(Default)]
        struct RecordingHook {
            phases: StdMutex<Vec<LoopPhase>>,
        }

        #[async_trait]
        impl AgentHook for RecordingHook {
            async fn on_phase(&self, phase: LoopPhase) {
                self.phases.lock().unwrap().push(phase);
            }
        }

        let hook = Arc::new(RecordingHook::default());
        let (agent, _store) = agent_with(
            vec![r#"{"action":"respond","content":"hi"}"#.into()],
            ToolRegistry::new(),
        );
        let agent = agent.with_hook(hook.clone());

        agent.invoke("t", "hello").await.unwrap();

        let phases = hook.phases.lock().unwrap().clone();
        assert_eq!(
            phases,
            vec![LoopPhase::AwaitingModel, LoopPhase::Finalizing, LoopPhase::Done]
        );
    }

    #[tokio::test]
    async fn metrics_account_for_rounds_and_tool_calls() {
        let mut tools = ToolRegistry::new();
        tools.register(EchoTool).unwrap();
        let tracker = MetricsTracker::default();
        let (agent, _store) = agent_with(
            vec![
                r#"{"action":"call_tool","name":"echo","arguments":{}}"#.into(),
                r#"{"action":"respond","content":"done"}"#.into(),
            ],
            tools,
        );
        let agent = agent.with_metrics(tracker.clone());

        agent.invoke("t", "go").await.unwrap();

        let reports = tracker.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].rounds, 2);
        assert_eq!(reports[0].tool_calls, 1);
        assert!(reports[0].success);
    }
}
