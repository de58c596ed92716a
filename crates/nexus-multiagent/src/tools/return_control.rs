//! `return_control` tool - hands control back to the agent that delegated

use anyhow::{Result, bail};
use async_trait::async_trait;
use nexus_core::{ExecutionContext, ToolHandler, json_schema};
use serde_json::Value;

pub struct ReturnControlTool;

#[async_trait]
impl ToolHandler for ReturnControlTool {
    fn name(&self) -> &str {
        "return_control"
    }

    fn description(&self) -> &str {
        "Return control to the agent that handed this task to you, with a summary of what you did."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "summary": {
                    "type": "string",
                    "description": "What was accomplished"
                },
                "result": {
                    "type": "string",
                    "description": "The result to hand back"
                },
                "success": {
                    "type": "boolean",
                    "description": "Whether the task succeeded (default: true)"
                }
            }),
            vec!["summary"],
        )
    }

    async fn execute(&self, ctx: &ExecutionContext, input: Value) -> Result<String> {
        let Some(previous) = ctx.handoff_stack().last() else {
            bail!("No previous agent to return to");
        };
        let summary = input.get("summary").and_then(|v| v.as_str()).unwrap_or("");
        let result = input.get("result").and_then(|v| v.as_str()).unwrap_or("");
        let success = input.get("success").and_then(|v| v.as_bool()).unwrap_or(true);

        let output = serde_json::json!({
            "return_control": {
                "from_agent_id": ctx.current_agent().unwrap_or("unknown"),
                "to_agent_id": previous,
                "summary": summary,
                "result": result,
                "success": success,
            },
            "status": "returning",
        });
        Ok(output.to_string())
    }
}
