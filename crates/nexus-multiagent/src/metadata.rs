//! Orchestration state stored in a session's metadata map

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

pub const KEY_CURRENT_AGENT: &str = "current_agent_id";
pub const KEY_HANDOFF_COUNT: &str = "handoff_count";
pub const KEY_HANDOFF_STACK: &str = "active_handoff_stack";
pub const KEY_LAST_HANDOFF_AT: &str = "last_handoff_at";
pub const KEY_AGENT_HISTORY: &str = "agent_history";

/// One stint of an agent holding control of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHistoryEntry {
    pub agent_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff_reason: Option<String>,
}

/// Typed view of the orchestration keys in `Session::metadata`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionMetadata {
    pub current_agent_id: Option<String>,
    /// Monotonic count of handoffs that reached context building
    pub handoff_count: u64,
    /// Senders of the handoffs in the current chain, oldest first
    pub active_handoff_stack: Vec<String>,
    pub last_handoff_at: Option<DateTime<Utc>>,
    pub agent_history: Vec<AgentHistoryEntry>,
}

impl SessionMetadata {
    /// Read the orchestration keys; malformed values fall back to defaults
    pub fn from_map(map: &HashMap<String, Value>) -> Self {
        let current_agent_id = map
            .get(KEY_CURRENT_AGENT)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let handoff_count = map
            .get(KEY_HANDOFF_COUNT)
            .and_then(Value::as_u64)
            .unwrap_or(0);

        let active_handoff_stack = map
            .get(KEY_HANDOFF_STACK)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let last_handoff_at = map
            .get(KEY_LAST_HANDOFF_AT)
            .and_then(Value::as_str)
            .and_then(|s| match DateTime::parse_from_rfc3339(s) {
                Ok(ts) => Some(ts.with_timezone(&Utc)),
                Err(e) => {
                    warn!("Ignoring malformed {}: {}", KEY_LAST_HANDOFF_AT, e);
                    None
                }
            });

        let agent_history = map
            .get(KEY_AGENT_HISTORY)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        Self {
            current_agent_id,
            handoff_count,
            active_handoff_stack,
            last_handoff_at,
            agent_history,
        }
    }

    /// Write the orchestration keys back, leaving unrelated keys untouched
    pub fn write_to(&self, map: &mut HashMap<String, Value>) {
        match &self.current_agent_id {
            Some(id) => {
                map.insert(KEY_CURRENT_AGENT.to_string(), Value::from(id.as_str()));
            }
            None => {
                map.remove(KEY_CURRENT_AGENT);
            }
        }
        map.insert(KEY_HANDOFF_COUNT.to_string(), Value::from(self.handoff_count));
        map.insert(
            KEY_HANDOFF_STACK.to_string(),
            Value::from(self.active_handoff_stack.clone()),
        );
        match self.last_handoff_at {
            Some(ts) => {
                map.insert(KEY_LAST_HANDOFF_AT.to_string(), Value::from(ts.to_rfc3339()));
            }
            None => {
                map.remove(KEY_LAST_HANDOFF_AT);
            }
        }
        if self.agent_history.is_empty() {
            map.remove(KEY_AGENT_HISTORY);
        } else if let Ok(history) = serde_json::to_value(&self.agent_history) {
            map.insert(KEY_AGENT_HISTORY.to_string(), history);
        }
    }

    /// Close the open history entry and open one for `agent_id`
    pub fn record_transition(&mut self, agent_id: &str, reason: Option<&str>) {
        let now = Utc::now();
        if let Some(open) = self
            .agent_history
            .iter_mut()
            .rev()
            .find(|e| e.ended_at.is_none())
        {
            open.ended_at = Some(now);
            open.handoff_to = Some(agent_id.to_string());
            open.handoff_reason = reason.map(str::to_string);
        }
        self.agent_history.push(AgentHistoryEntry {
            agent_id: agent_id.to_string(),
            started_at: now,
            ended_at: None,
            handoff_to: None,
            handoff_reason: None,
        });
    }

    /// Open a history entry if the session has none for the acting agent
    pub fn ensure_started(&mut self, agent_id: &str) {
        let open = self.agent_history.iter().rev().find(|e| e.ended_at.is_none());
        if open.is_none_or(|e| e.agent_id != agent_id) {
            self.record_transition(agent_id, None);
        }
    }
}
