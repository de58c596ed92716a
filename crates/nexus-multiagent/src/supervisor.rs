//! Supervisor mode - one agent owns the conversation and delegates to specialists

use crate::metadata::SessionMetadata;
use crate::registry::AgentCatalog;

#[derive(Debug, Clone)]
pub struct Supervisor {
    supervisor_id: String,
    delegation_prompt: Option<String>,
}

impl Supervisor {
    pub fn new(supervisor_id: impl Into<String>) -> Self {
        Self {
            supervisor_id: supervisor_id.into(),
            delegation_prompt: None,
        }
    }

    /// Extra instructions appended to the supervisor prompt
    pub fn with_delegation_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.delegation_prompt = Some(prompt.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.supervisor_id
    }

    /// The supervisor takes every new turn unless a specialist it
    /// delegated to still holds control.
    pub fn select_agent(&self, meta: &SessionMetadata) -> String {
        match meta.current_agent_id.as_deref() {
            Some(current) if !meta.active_handoff_stack.is_empty() && current != self.supervisor_id => {
                current.to_string()
            }
            _ => self.supervisor_id.clone(),
        }
    }

    /// System prompt addition describing the team and how to delegate
    pub fn build_prompt(&self, catalog: &AgentCatalog) -> String {
        let mut out = String::from("\n\n## Supervisor Role\n\n");
        out.push_str(
            "You are a supervisor coordinating a team of specialists. \
             Work out what each request needs and delegate when a specialist is a better fit.\n\n",
        );

        out.push_str("### Available Specialists\n\n");
        for agent in catalog.handoff_targets() {
            if agent.id == self.supervisor_id {
                continue;
            }
            out.push_str(&format!(
                "- **{}** (`{}`): {}\n",
                agent.display_name(),
                agent.id,
                agent.description
            ));
            if !agent.tools.is_empty() {
                out.push_str(&format!("  - Tools: {}\n", agent.tools.join(", ")));
            }
        }

        out.push_str("\n### Delegation Guidelines\n\n");
        out.push_str("1. Answer directly when no specialist expertise is needed\n");
        out.push_str("2. Otherwise call `delegate` with a clear task for the specialist\n");
        out.push_str("3. Specialists answer with `report`; summarize their work for the user\n");

        if let Some(extra) = &self.delegation_prompt {
            out.push_str("\n### Additional Instructions\n\n");
            out.push_str(extra);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgentDefinition;

    #[test]
    fn test_select_defaults_to_supervisor() {
        let supervisor = Supervisor::new("boss");
        assert_eq!(supervisor.select_agent(&SessionMetadata::default()), "boss");

        let idle = SessionMetadata {
            current_agent_id: Some("coder".into()),
            ..Default::default()
        };
        assert_eq!(supervisor.select_agent(&idle), "boss");
    }

    #[test]
    fn test_select_keeps_active_delegate() {
        let supervisor = Supervisor::new("boss");
        let delegated = SessionMetadata {
            current_agent_id: Some("coder".into()),
            active_handoff_stack: vec!["boss".into()],
            ..Default::default()
        };
        assert_eq!(supervisor.select_agent(&delegated), "coder");
    }

    #[test]
    fn test_prompt_lists_specialists_only() {
        let catalog = AgentCatalog::new();
        catalog.insert(AgentDefinition::new("boss").with_description("Runs the team"));
        let mut coder = AgentDefinition::new("coder").with_name("Coder").with_description("Writes code");
        coder.tools = vec!["run_command".into()];
        catalog.insert(coder);
        catalog.insert(AgentDefinition {
            can_receive_handoffs: false,
            ..AgentDefinition::new("hidden")
        });

        let prompt = Supervisor::new("boss")
            .with_delegation_prompt("Prefer the coder for scripts.")
            .build_prompt(&catalog);
        assert!(prompt.contains("- **Coder** (`coder`): Writes code\n  - Tools: run_command"));
        assert!(!prompt.contains("`boss`"));
        assert!(!prompt.contains("hidden"));
        assert!(prompt.ends_with("Prefer the coder for scripts."));
    }
}
