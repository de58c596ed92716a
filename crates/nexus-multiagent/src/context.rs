//! Context sharing between agents during a handoff

use async_trait::async_trait;
use nexus_core::{Message, Role, SessionStore};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::HandoffError;
use crate::types::{ContextMode, DEFAULT_LAST_N, HandoffRequest, SharedContext, SharedMessage};

const MAX_SUMMARY_LENGTH: usize = 1000;
const SNIPPET_LENGTH: usize = 200;

/// Condenses a conversation for `summary` handoffs
#[async_trait]
pub trait ContextSummarizer: Send + Sync {
    async fn summarize(&self, messages: &[Message], max_length: usize) -> anyhow::Result<String>;
}

/// Builds the context that travels with a handoff
pub struct ContextManager {
    store: Arc<dyn SessionStore>,
    summarizer: Option<Arc<dyn ContextSummarizer>>,
    max_summary_length: usize,
}

impl ContextManager {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            summarizer: None,
            max_summary_length: MAX_SUMMARY_LENGTH,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn ContextSummarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Assemble the shared context for `request` under `mode`. Fields the
    /// sender supplied are kept; history is forwarded according to the mode.
    pub async fn build_shared_context(
        &self,
        session_id: &str,
        request: &HandoffRequest,
        mode: ContextMode,
    ) -> Result<SharedContext, HandoffError> {
        let mut shared = SharedContext {
            task: request.reason.clone(),
            previous_agents: vec![request.from_agent_id.clone()],
            ..Default::default()
        };

        if let Some(given) = &request.context {
            if !given.summary.is_empty() {
                shared.summary = given.summary.clone();
            }
            if !given.task.is_empty() {
                shared.task = given.task.clone();
            }
            shared.variables.extend(given.variables.clone());
            shared.metadata.extend(given.metadata.clone());
            for agent in &given.previous_agents {
                if !shared.previous_agents.contains(agent) {
                    shared.previous_agents.push(agent.clone());
                }
            }
        }

        if mode == ContextMode::None {
            return Ok(shared);
        }

        let history = self.store.get_history(session_id, None).await?;
        match mode {
            ContextMode::Full => shared.messages = to_shared(&history),
            ContextMode::LastN => {
                let n = last_n(&shared);
                let start = history.len().saturating_sub(n);
                shared.messages = to_shared(&history[start..]);
            }
            ContextMode::Summary => shared.summary = self.summarize(&history).await,
            ContextMode::None => {}
        }

        extract_variables(&history, &mut shared);
        debug!(
            "Built {} context for {}: {} message(s)",
            mode,
            request.from_agent_id,
            shared.messages.len()
        );
        Ok(shared)
    }

    async fn summarize(&self, history: &[Message]) -> String {
        match &self.summarizer {
            Some(summarizer) => match summarizer.summarize(history, self.max_summary_length).await {
                Ok(summary) => summary,
                Err(e) => {
                    warn!("Summarizer failed, using basic summary: {}", e);
                    basic_summary(history)
                }
            },
            None => basic_summary(history),
        }
    }
}

fn last_n(shared: &SharedContext) -> usize {
    shared
        .metadata
        .get("last_n")
        .and_then(Value::as_u64)
        .filter(|&n| n > 0)
        .map_or(DEFAULT_LAST_N, |n| n as usize)
}

fn to_shared(messages: &[Message]) -> Vec<SharedMessage> {
    messages
        .iter()
        .map(|m| SharedMessage {
            role: m.role.to_string(),
            content: m.content.clone(),
            agent_id: m.agent_id.clone(),
            timestamp: m.created_at,
        })
        .collect()
}

/// Copy `variables` and `entities` out of message metadata
fn extract_variables(history: &[Message], shared: &mut SharedContext) {
    for message in history {
        if let Some(Value::Object(vars)) = message.metadata.get("variables") {
            for (k, v) in vars {
                shared.variables.insert(k.clone(), v.clone());
            }
        }
        if let Some(Value::Object(entities)) = message.metadata.get("entities") {
            for (k, v) in entities {
                shared.variables.insert(format!("entity_{}", k), v.clone());
            }
        }
    }
    if let Some(first) = history.first() {
        shared.variables.insert(
            "conversation_start".to_string(),
            Value::from(first.created_at.to_rfc3339()),
        );
        shared
            .variables
            .insert("message_count".to_string(), Value::from(history.len()));
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", cut)
}

/// Summary built without a model: counts, the first and latest request,
/// and the tools used
pub fn basic_summary(history: &[Message]) -> String {
    if history.is_empty() {
        return "No conversation history.".to_string();
    }

    let count = |role: Role| history.iter().filter(|m| m.role == role).count();
    let mut out = String::from("Conversation summary:\n");
    out.push_str(&format!(
        "- {} user messages, {} assistant messages, {} tool interactions\n",
        count(Role::User),
        count(Role::Assistant),
        count(Role::Tool)
    ));

    let user_turns: Vec<(usize, &Message)> = history
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == Role::User && !m.content.is_empty())
        .collect();
    if let Some((first_idx, first)) = user_turns.first() {
        out.push_str(&format!(
            "- Original request: {}\n",
            truncate(&first.content, SNIPPET_LENGTH)
        ));
        if let Some((last_idx, last)) = user_turns.last()
            && last_idx != first_idx
        {
            out.push_str(&format!(
                "- Most recent request: {}\n",
                truncate(&last.content, SNIPPET_LENGTH)
            ));
        }
    }

    let mut seen = HashSet::new();
    let tools: Vec<&str> = history
        .iter()
        .flat_map(|m| m.tool_calls.iter().map(|c| c.name.as_str()))
        .filter(|name| seen.insert(*name))
        .collect();
    if !tools.is_empty() {
        out.push_str(&format!("- Tools used: {}\n", tools.join(", ")));
    }

    out
}

/// Render the message the receiving agent gets
pub fn build_handoff_message(request: &HandoffRequest) -> String {
    let mut out = format!(
        "You are receiving control from agent '{}'.\nReason: {}",
        request.from_agent_id, request.reason
    );
    if let Some(context) = &request.context {
        if !context.task.is_empty() {
            out.push_str(&format!("\n\nCurrent task: {}", context.task));
        }
        if let Some(expected) = context
            .metadata
            .get("expected_output")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
        {
            out.push_str(&format!("\n\nExpected output: {}", expected));
        }
        if !context.summary.is_empty() {
            out.push_str(&format!("\n\nConversation summary:\n{}", context.summary));
        }
        if !context.messages.is_empty() {
            out.push_str("\n\nConversation history:");
            for message in &context.messages {
                match &message.agent_id {
                    Some(agent) => out.push_str(&format!(
                        "\n[{} via {}] {}",
                        message.role, agent, message.content
                    )),
                    None => out.push_str(&format!("\n[{}] {}", message.role, message.content)),
                }
            }
        }
    }
    if request.return_expected {
        out.push_str(
            "\n\nNote: Control should be returned to the previous agent when your task is complete.",
        );
    }
    out
}

/// Format shared context as system prompt sections
pub fn format_context_for_prompt(context: &SharedContext) -> String {
    let mut out = String::new();

    if !context.task.is_empty() {
        out.push_str(&format!("## Current Task\n{}\n\n", context.task));
    }
    if !context.previous_agents.is_empty() {
        out.push_str(&format!(
            "## Previous Agents\nThis conversation has been handled by: {}\n\n",
            context.previous_agents.join(" -> ")
        ));
    }
    if !context.summary.is_empty() {
        out.push_str(&format!("## Conversation Summary\n{}\n\n", context.summary));
    }
    if !context.variables.is_empty() {
        out.push_str("## Context Variables\n");
        let mut keys: Vec<&String> = context.variables.keys().collect();
        keys.sort();
        for key in keys {
            out.push_str(&format!("- {}: {}\n", key, context.variables[key]));
        }
        out.push('\n');
    }

    out
}

/// Merge several contexts: summaries concatenate, later tasks and
/// variables win, messages and agents are de-duplicated
pub fn merge_contexts(contexts: &[SharedContext]) -> SharedContext {
    let mut merged = SharedContext::default();

    for context in contexts {
        if !context.summary.is_empty() {
            if !merged.summary.is_empty() {
                merged.summary.push_str("\n---\n");
            }
            merged.summary.push_str(&context.summary);
        }
        for message in &context.messages {
            if !merged.messages.iter().any(|m| m.timestamp == message.timestamp) {
                merged.messages.push(message.clone());
            }
        }
        if !context.task.is_empty() {
            merged.task = context.task.clone();
        }
        for agent in &context.previous_agents {
            if !merged.previous_agents.contains(agent) {
                merged.previous_agents.push(agent.clone());
            }
        }
        merged.variables.extend(context.variables.clone());
        merged.metadata.extend(context.metadata.clone());
    }

    merged
}
