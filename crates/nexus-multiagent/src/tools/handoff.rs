//! `handoff` tool - lets an agent pass the conversation to another agent

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use nexus_core::{ExecutionContext, ToolHandler, json_schema};
use serde_json::Value;
use tracing::debug;

use crate::registry::AgentCatalog;
use crate::types::{HandoffRequest, SharedContext};

pub struct HandoffTool {
    catalog: AgentCatalog,
}

impl HandoffTool {
    pub fn new(catalog: AgentCatalog) -> Self {
        Self { catalog }
    }

    fn target_ids(&self) -> Vec<String> {
        self.catalog
            .handoff_targets()
            .iter()
            .map(|a| a.id.clone())
            .collect()
    }
}

#[async_trait]
impl ToolHandler for HandoffTool {
    fn name(&self) -> &str {
        "handoff"
    }

    fn description(&self) -> &str {
        "Transfer control of the conversation to another agent that is better suited \
         to the request. The other agent receives your reason and context."
    }

    fn input_schema(&self) -> Value {
        let mut target = serde_json::json!({
            "type": "string",
            "description": "ID or name of the agent to hand off to"
        });
        let ids = self.target_ids();
        if !ids.is_empty() {
            target["description"] = Value::from(format!(
                "ID or name of the agent to hand off to. Available: {}",
                ids.join(", ")
            ));
        }

        json_schema(
            serde_json::json!({
                "target_agent": target,
                "reason": {
                    "type": "string",
                    "description": "Why control is being transferred"
                },
                "context": {
                    "type": "string",
                    "description": "Summary of what the next agent needs to know"
                },
                "return_expected": {
                    "type": "boolean",
                    "description": "Whether control should come back to you afterwards (default: false)"
                }
            }),
            vec!["target_agent", "reason"],
        )
    }

    async fn execute(&self, ctx: &ExecutionContext, input: Value) -> Result<String> {
        let target = input
            .get("target_agent")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| anyhow!("Missing 'target_agent' parameter"))?;
        let reason = input
            .get("reason")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("Missing 'reason' parameter"))?;
        let summary = input.get("context").and_then(|v| v.as_str()).unwrap_or("");
        let return_expected = input
            .get("return_expected")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let agent = self.catalog.resolve(target).ok_or_else(|| {
            anyhow!(
                "Target agent not found: {}. Available agents: {}",
                target,
                self.target_ids().join(", ")
            )
        })?;
        if !agent.can_receive_handoffs {
            bail!("Agent {} does not accept handoffs", agent.id);
        }

        let from = ctx.current_agent().unwrap_or("unknown");
        if from == agent.id {
            bail!("Cannot hand off to yourself ({})", agent.id);
        }

        let context = SharedContext {
            summary: summary.to_string(),
            previous_agents: ctx.handoff_stack().to_vec(),
            ..Default::default()
        };
        let mut request = HandoffRequest::new(from, agent.id.clone(), reason).with_context(context);
        request.return_expected = return_expected;

        debug!("Handoff requested: {} -> {} ({})", from, agent.id, reason);
        let output = serde_json::json!({
            "handoff_request": request,
            "target_agent": agent.id,
            "target_name": agent.display_name(),
            "status": "initiated",
        });
        Ok(output.to_string())
    }
}
