//! `report` tool - a specialist hands its findings back to the supervisor

use anyhow::{Result, bail};
use async_trait::async_trait;
use nexus_core::{ExecutionContext, ToolHandler, json_schema};
use serde_json::Value;

const STATUSES: [&str; 3] = ["complete", "partial", "failed"];

pub struct ReportTool {
    supervisor_id: String,
}

impl ReportTool {
    pub fn new(supervisor_id: impl Into<String>) -> Self {
        Self {
            supervisor_id: supervisor_id.into(),
        }
    }
}

#[async_trait]
impl ToolHandler for ReportTool {
    fn name(&self) -> &str {
        "report"
    }

    fn description(&self) -> &str {
        "Report the results of a delegated task back to the supervisor and give control back."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "summary": {
                    "type": "string",
                    "description": "Summary of your findings"
                },
                "details": {
                    "type": "string",
                    "description": "Detailed results or data"
                },
                "status": {
                    "type": "string",
                    "enum": STATUSES,
                    "description": "How far the task got"
                },
                "follow_up": {
                    "type": "string",
                    "description": "Suggested next steps, if any"
                }
            }),
            vec!["summary", "status"],
        )
    }

    async fn execute(&self, ctx: &ExecutionContext, input: Value) -> Result<String> {
        let Some(previous) = ctx.handoff_stack().last() else {
            bail!("No delegated task to report on");
        };
        let status = input.get("status").and_then(|v| v.as_str()).unwrap_or("");
        if !STATUSES.contains(&status) {
            bail!("Invalid 'status': expected one of {}", STATUSES.join(", "));
        }
        let summary = input.get("summary").and_then(|v| v.as_str()).unwrap_or("");
        let details = input.get("details").and_then(|v| v.as_str()).unwrap_or("");
        let follow_up = input.get("follow_up").and_then(|v| v.as_str()).unwrap_or("");

        let output = serde_json::json!({
            "return_control": {
                "from_agent_id": ctx.current_agent().unwrap_or("unknown"),
                "to_agent_id": previous,
                "summary": summary,
                "result": details,
                "success": status != "failed",
            },
            "report": {
                "supervisor": self.supervisor_id,
                "status": status,
                "follow_up": follow_up,
            },
            "status": "reported",
        });
        Ok(output.to_string())
    }
}
