//! Offline runtime for `nexus simulate`: agents echo what they receive.
//! A first line of the form `/tool {json}` calls that tool instead, which
//! lets a simulation drive `handoff` and `return_control` by hand.

use anyhow::Result;
use async_trait::async_trait;
use nexus_core::{
    AgentRuntime, ExecutionContext, Message, ResponseChunk, RuntimeFactory, RuntimeSettings,
    Session, ToolHandler, ToolRegistry, ToolResult,
};
use serde_json::Value;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct EchoRuntime {
    agent_id: String,
    tools: RwLock<ToolRegistry>,
}

impl EchoRuntime {
    fn reply(&self, message: &Message) -> String {
        let first_line = message.content.lines().next().unwrap_or("");
        format!("[{}] {}", self.agent_id, first_line)
    }

    async fn call_tool(&self, ctx: &ExecutionContext, call: &str) -> ToolResult {
        let (name, args) = call
            .split_once(char::is_whitespace)
            .unwrap_or((call, ""));
        let input = match args.trim() {
            "" => Value::Object(Default::default()),
            args => match serde_json::from_str(args) {
                Ok(input) => input,
                Err(e) => return ToolResult::failure(name, format!("Invalid tool input: {}", e)),
            },
        };

        let tools = self.tools.read().clone();
        match tools.execute(ctx, name, input).await {
            Ok(output) => ToolResult::success(name, output),
            Err(e) => ToolResult::failure(name, e.to_string()),
        }
    }
}

#[async_trait]
impl AgentRuntime for EchoRuntime {
    async fn process(
        &self,
        ctx: ExecutionContext,
        _session: Session,
        message: Message,
    ) -> Result<mpsc::Receiver<ResponseChunk>> {
        let (tx, rx) = mpsc::channel(1);
        let first_line = message.content.lines().next().unwrap_or("").trim();
        let chunk = match first_line.strip_prefix('/') {
            Some(call) if !call.is_empty() => {
                ResponseChunk::ToolResult(self.call_tool(&ctx, call).await)
            }
            _ => ResponseChunk::Text(self.reply(&message)),
        };
        tx.send(chunk).await?;
        Ok(rx)
    }

    fn register_tool(&self, tool: Arc<dyn ToolHandler>) {
        self.tools.write().register(tool);
    }

    fn tool_names(&self) -> Vec<String> {
        self.tools.read().names()
    }
}

pub struct EchoFactory;

impl RuntimeFactory for EchoFactory {
    fn build(&self, settings: RuntimeSettings) -> Arc<dyn AgentRuntime> {
        Arc::new(EchoRuntime {
            agent_id: settings.agent_id,
            tools: RwLock::new(ToolRegistry::new()),
        })
    }
}
