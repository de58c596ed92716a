//! Scripted runtimes and tools for orchestration tests

use anyhow::{Result, bail};
use async_trait::async_trait;
use nexus_core::{
    AgentRuntime, ExecutionContext, Message, ResponseChunk, RuntimeFactory, RuntimeSettings,
    Session, ToolHandler, ToolRegistry, ToolResult, json_schema,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// One scripted action in an agent turn
#[derive(Debug, Clone)]
pub enum Step {
    Say(String),
    CallTool(String, Value),
    Fail(String),
}

/// What a runtime saw when it was invoked
#[derive(Debug, Clone)]
pub struct Received {
    pub message: Message,
    pub current_agent: Option<String>,
    pub handoff_stack: Vec<String>,
}

/// Runtime that plays back queued turns; unscripted turns echo the message
pub struct ScriptedRuntime {
    agent_id: String,
    tools: RwLock<ToolRegistry>,
    turns: Mutex<VecDeque<Vec<Step>>>,
    delay: Mutex<Option<Duration>>,
    unavailable: Mutex<bool>,
    received: Mutex<Vec<Received>>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::for_agent("scripted")
    }

    pub fn for_agent(agent_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            tools: RwLock::new(ToolRegistry::new()),
            turns: Mutex::new(VecDeque::new()),
            delay: Mutex::new(None),
            unavailable: Mutex::new(false),
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn push_turn(&self, steps: Vec<Step>) {
        self.turns.lock().push_back(steps);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Make `process` fail outright
    pub fn set_unavailable(&self) {
        *self.unavailable.lock() = true;
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().clone()
    }
}

#[async_trait]
impl AgentRuntime for ScriptedRuntime {
    async fn process(
        &self,
        ctx: ExecutionContext,
        _session: Session,
        message: Message,
    ) -> Result<mpsc::Receiver<ResponseChunk>> {
        if *self.unavailable.lock() {
            bail!("{} is unavailable", self.agent_id);
        }

        self.received.lock().push(Received {
            message: message.clone(),
            current_agent: ctx.current_agent().map(str::to_string),
            handoff_stack: ctx.handoff_stack().to_vec(),
        });

        let steps = self
            .turns
            .lock()
            .pop_front()
            .unwrap_or_else(|| vec![Step::Say(format!("{}: {}", self.agent_id, message.content))]);

        let tools = self.tools.read().clone();
        let delay = *self.delay.lock();

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = ctx.cancelled() => return,
                }
            }
            for step in steps {
                let chunk = match step {
                    Step::Say(text) => ResponseChunk::Text(text),
                    Step::CallTool(name, input) => match tools.execute(&ctx, &name, input).await {
                        Ok(out) => ResponseChunk::ToolResult(ToolResult::success(name, out)),
                        Err(e) => ResponseChunk::ToolResult(ToolResult::failure(name, e.to_string())),
                    },
                    Step::Fail(error) => ResponseChunk::Error(error),
                };
                if tx.send(chunk).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }

    fn register_tool(&self, tool: Arc<dyn ToolHandler>) {
        self.tools.write().register(tool);
    }

    fn tool_names(&self) -> Vec<String> {
        self.tools.read().names()
    }
}

/// Factory handing out one scripted runtime per agent ID
#[derive(Default)]
pub struct ScriptedFactory {
    runtimes: Mutex<HashMap<String, Arc<ScriptedRuntime>>>,
    builds: Mutex<Vec<RuntimeSettings>>,
}

impl ScriptedFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Runtime for `agent_id`, created on first use so tests can script it
    /// before the agent is registered
    pub fn runtime(&self, agent_id: &str) -> Arc<ScriptedRuntime> {
        self.runtimes
            .lock()
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(ScriptedRuntime::for_agent(agent_id)))
            .clone()
    }

    pub fn builds(&self) -> Vec<RuntimeSettings> {
        self.builds.lock().clone()
    }
}

impl RuntimeFactory for ScriptedFactory {
    fn build(&self, settings: RuntimeSettings) -> Arc<dyn AgentRuntime> {
        let runtime = self.runtime(&settings.agent_id);
        self.builds.lock().push(settings);
        runtime
    }
}

/// Tool that always returns the same output
pub struct StaticTool {
    name: String,
    output: String,
}

impl StaticTool {
    pub fn new(name: &str, output: &str) -> Self {
        Self {
            name: name.to_string(),
            output: output.to_string(),
        }
    }
}

#[async_trait]
impl ToolHandler for StaticTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Returns a fixed string"
    }

    fn input_schema(&self) -> Value {
        json_schema(serde_json::json!({}), vec![])
    }

    async fn execute(&self, _ctx: &ExecutionContext, _input: Value) -> Result<String> {
        Ok(self.output.clone())
    }
}
