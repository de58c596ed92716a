//! Agent runtime interface
//!
//! A runtime is the per-agent LLM call loop. The orchestrator only sees it
//! through this trait: feed it a message, read back a stream of chunks.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::context::ExecutionContext;
use crate::session::Session;
use crate::tools::ToolHandler;
use crate::types::{Message, ToolResult};

/// One piece of a streamed agent response
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseChunk {
    Text(String),
    ToolResult(ToolResult),
    Error(String),
}

/// Everything a factory needs to build a runtime for one agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeSettings {
    pub agent_id: String,
    pub system_prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub max_iterations: Option<usize>,
    /// Tool names the agent is allowed to bind
    #[serde(default)]
    pub tools: Vec<String>,
}

#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Run one turn. Chunks arrive on the returned receiver until the
    /// runtime drops its sender.
    async fn process(
        &self,
        ctx: ExecutionContext,
        session: Session,
        message: Message,
    ) -> Result<mpsc::Receiver<ResponseChunk>>;

    fn register_tool(&self, tool: Arc<dyn ToolHandler>);

    fn tool_names(&self) -> Vec<String>;
}

/// Binds agent definitions to the shared provider and session store
pub trait RuntimeFactory: Send + Sync {
    fn build(&self, settings: RuntimeSettings) -> Arc<dyn AgentRuntime>;
}

/// Drain a response stream into its text, failing on the first error chunk
pub async fn collect_text(mut rx: mpsc::Receiver<ResponseChunk>) -> Result<String> {
    let mut text = String::new();
    while let Some(chunk) = rx.recv().await {
        match chunk {
            ResponseChunk::Text(t) => text.push_str(&t),
            ResponseChunk::ToolResult(_) => {}
            ResponseChunk::Error(e) => anyhow::bail!(e),
        }
    }
    Ok(text)
}
