//! `delegate` tool - the supervisor assigns a task to a specialist and gets
//! control back when the specialist is done

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use nexus_core::{ExecutionContext, ToolHandler, json_schema};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use crate::registry::AgentCatalog;
use crate::types::{HandoffRequest, SharedContext};

pub struct DelegateTool {
    catalog: AgentCatalog,
    supervisor_id: String,
}

impl DelegateTool {
    pub fn new(catalog: AgentCatalog, supervisor_id: impl Into<String>) -> Self {
        Self {
            catalog,
            supervisor_id: supervisor_id.into(),
        }
    }

    fn specialists(&self) -> Vec<String> {
        self.catalog
            .handoff_targets()
            .iter()
            .filter(|a| a.id != self.supervisor_id)
            .map(|a| format!("{} ({})", a.id, a.display_name()))
            .collect()
    }
}

fn text<'a>(input: &'a Value, field: &str) -> &'a str {
    input.get(field).and_then(|v| v.as_str()).unwrap_or("").trim()
}

#[async_trait]
impl ToolHandler for DelegateTool {
    fn name(&self) -> &str {
        "delegate"
    }

    fn description(&self) -> &str {
        "Delegate a task to a specialist agent. The specialist works on it and \
         control comes back to you with the result."
    }

    fn input_schema(&self) -> Value {
        let mut specialist = serde_json::json!({
            "type": "string",
            "description": "ID or name of the specialist"
        });
        let available = self.specialists();
        if !available.is_empty() {
            specialist["description"] = Value::from(format!(
                "ID or name of the specialist. Available: {}",
                available.join(", ")
            ));
        }

        json_schema(
            serde_json::json!({
                "specialist": specialist,
                "task": {
                    "type": "string",
                    "description": "What the specialist should do"
                },
                "context": {
                    "type": "string",
                    "description": "Relevant context from the conversation"
                },
                "expected_output": {
                    "type": "string",
                    "description": "What the result should look like"
                }
            }),
            vec!["specialist", "task"],
        )
    }

    async fn execute(&self, ctx: &ExecutionContext, input: Value) -> Result<String> {
        let reference = text(&input, "specialist");
        if reference.is_empty() {
            bail!("Missing 'specialist' parameter");
        }
        let task = text(&input, "task");
        if task.is_empty() {
            bail!("Missing 'task' parameter");
        }

        let specialist = self.catalog.resolve(reference).ok_or_else(|| {
            anyhow!(
                "Specialist not found: {}. Available: {}",
                reference,
                self.specialists().join(", ")
            )
        })?;
        if specialist.id == self.supervisor_id {
            bail!("The supervisor cannot delegate to itself");
        }
        if !specialist.can_receive_handoffs {
            bail!("Specialist {} cannot receive delegations", specialist.id);
        }

        let mut metadata = HashMap::new();
        metadata.insert("is_delegation".to_string(), Value::Bool(true));
        let expected = text(&input, "expected_output");
        if !expected.is_empty() {
            metadata.insert("expected_output".to_string(), Value::from(expected));
        }
        let context = SharedContext {
            task: task.to_string(),
            summary: text(&input, "context").to_string(),
            previous_agents: ctx.handoff_stack().to_vec(),
            metadata,
            ..Default::default()
        };

        let from = ctx.current_agent().unwrap_or(self.supervisor_id.as_str());
        let mut request =
            HandoffRequest::new(from, specialist.id.clone(), task).with_context(context);
        request.return_expected = true;

        debug!("Delegating to {}: {}", specialist.id, task);
        let output = serde_json::json!({
            "handoff_request": request,
            "target_agent": specialist.id,
            "target_name": specialist.display_name(),
            "status": "delegated",
        });
        Ok(output.to_string())
    }
}
