//! `list_agents` tool

use anyhow::Result;
use async_trait::async_trait;
use nexus_core::{ExecutionContext, ToolHandler, json_schema};
use serde_json::Value;

use crate::registry::AgentCatalog;
use crate::router::describe_agents;

pub struct ListAgentsTool {
    catalog: AgentCatalog,
}

impl ListAgentsTool {
    pub fn new(catalog: AgentCatalog) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl ToolHandler for ListAgentsTool {
    fn name(&self) -> &str {
        "list_agents"
    }

    fn description(&self) -> &str {
        "List the agents available for handoff, with their descriptions and tools."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "include_self": {
                    "type": "boolean",
                    "description": "Include the calling agent in the list (default: false)"
                }
            }),
            vec![],
        )
    }

    async fn execute(&self, ctx: &ExecutionContext, input: Value) -> Result<String> {
        let include_self = input
            .get("include_self")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let current = ctx.current_agent();

        let agents: Vec<_> = self
            .catalog
            .handoff_targets()
            .into_iter()
            .filter(|a| include_self || Some(a.id.as_str()) != current)
            .collect();

        if agents.is_empty() {
            return Ok("No other agents are available.".to_string());
        }
        Ok(describe_agents(&agents))
    }
}
