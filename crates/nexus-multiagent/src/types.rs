//! Configuration model for multi-agent orchestration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

/// Default upper bound on the active handoff stack
pub const DEFAULT_MAX_HANDOFF_DEPTH: usize = 10;

/// Default deadline for a dispatched handoff
pub const DEFAULT_HANDOFF_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default window for [`ContextMode::LastN`]
pub const DEFAULT_LAST_N: usize = 10;

/// A named agent with its own prompt, tools, and handoff rules
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<usize>,
    #[serde(default)]
    pub can_receive_handoffs: bool,
    /// Per-agent state directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_dir: Option<String>,
    #[serde(default)]
    pub handoff_rules: Vec<HandoffRule>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl AgentDefinition {
    /// Create an agent that accepts handoffs, named after its ID
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            can_receive_handoffs: true,
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_rule(mut self, rule: HandoffRule) -> Self {
        self.handoff_rules.push(rule);
        self
    }

    /// Name for display, falling back to the ID
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }

    /// First rule targeting `target_id`
    pub fn rule_for(&self, target_id: &str) -> Option<&HandoffRule> {
        self.handoff_rules
            .iter()
            .find(|r| r.target_agent_id == target_id)
    }
}

/// Condition under which a handoff rule fires
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Trigger {
    /// Case-insensitive substring of the turn text
    Keyword(String),
    /// Case-insensitive regex searched in the turn text
    Pattern(String),
    /// Intent label attached to or classified from the turn
    Intent(String),
    /// Tool invoked during the turn
    ToolUse(String),
    /// Explicit target selection; empty matches any selection
    Explicit(String),
    /// Matches only when nothing else did
    Fallback,
    Always,
    TaskComplete,
    Error,
}

impl Trigger {
    /// Type name used in manifests and serialized configs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Keyword(_) => "keyword",
            Self::Pattern(_) => "pattern",
            Self::Intent(_) => "intent",
            Self::ToolUse(_) => "tool_use",
            Self::Explicit(_) => "explicit",
            Self::Fallback => "fallback",
            Self::Always => "always",
            Self::TaskComplete => "task_complete",
            Self::Error => "error",
        }
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            Self::Keyword(v)
            | Self::Pattern(v)
            | Self::Intent(v)
            | Self::ToolUse(v)
            | Self::Explicit(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback)
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.value() {
            Some(v) => write!(f, "{}:{}", self.kind(), v),
            None => write!(f, "{}", self.kind()),
        }
    }
}

/// How much conversation history travels with a handoff
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    #[default]
    Full,
    Summary,
    None,
    LastN,
}

impl std::fmt::Display for ContextMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Summary => write!(f, "summary"),
            Self::None => write!(f, "none"),
            Self::LastN => write!(f, "last_n"),
        }
    }
}

impl FromStr for ContextMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "summary" => Ok(Self::Summary),
            "none" => Ok(Self::None),
            "last_n" | "lastn" => Ok(Self::LastN),
            other => Err(format!("unknown context mode: {}", other)),
        }
    }
}

/// When and where an agent hands control to another agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffRule {
    pub target_agent_id: String,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_mode: Option<ContextMode>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub return_to_sender: bool,
    /// Extra instructions appended to the handoff message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HandoffRule {
    pub fn new(target_agent_id: impl Into<String>, triggers: Vec<Trigger>) -> Self {
        Self {
            target_agent_id: target_agent_id.into(),
            triggers,
            context_mode: None,
            priority: 0,
            return_to_sender: false,
            message: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_context_mode(mut self, mode: ContextMode) -> Self {
        self.context_mode = Some(mode);
        self
    }

    pub fn returning(mut self) -> Self {
        self.return_to_sender = true;
        self
    }
}

fn default_max_handoff_depth() -> usize {
    DEFAULT_MAX_HANDOFF_DEPTH
}

fn default_handoff_timeout() -> Duration {
    DEFAULT_HANDOFF_TIMEOUT
}

/// Top-level multi-agent configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiAgentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supervisor_agent_id: Option<String>,
    #[serde(default)]
    pub enable_peer_handoffs: bool,
    #[serde(default = "default_max_handoff_depth")]
    pub max_handoff_depth: usize,
    #[serde(default = "default_handoff_timeout", with = "humantime_serde")]
    pub handoff_timeout: Duration,
    #[serde(default)]
    pub default_context_mode: ContextMode,
    #[serde(default)]
    pub agents: Vec<AgentDefinition>,
    #[serde(default)]
    pub global_handoff_rules: Vec<HandoffRule>,
}

impl Default for MultiAgentConfig {
    fn default() -> Self {
        Self {
            default_agent_id: None,
            supervisor_agent_id: None,
            enable_peer_handoffs: true,
            max_handoff_depth: DEFAULT_MAX_HANDOFF_DEPTH,
            handoff_timeout: DEFAULT_HANDOFF_TIMEOUT,
            default_context_mode: ContextMode::Full,
            agents: Vec::new(),
            global_handoff_rules: Vec::new(),
        }
    }
}

impl MultiAgentConfig {
    /// Configured default agent, ignoring empty IDs
    pub fn default_agent(&self) -> Option<&str> {
        self.default_agent_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Configured supervisor, ignoring empty IDs
    pub fn supervisor(&self) -> Option<&str> {
        self.supervisor_agent_id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn is_supervisor(&self, agent_id: &str) -> bool {
        self.supervisor() == Some(agent_id)
    }

    pub fn agent(&self, id: &str) -> Option<&AgentDefinition> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// Fill defaults the YAML form leaves implicit: names fall back to IDs
    /// and zero limits fall back to the built-in defaults.
    pub fn apply_defaults(&mut self) {
        if self.max_handoff_depth == 0 {
            self.max_handoff_depth = DEFAULT_MAX_HANDOFF_DEPTH;
        }
        if self.handoff_timeout.is_zero() {
            self.handoff_timeout = DEFAULT_HANDOFF_TIMEOUT;
        }
        for agent in &mut self.agents {
            if agent.name.is_empty() {
                agent.name = agent.id.clone();
            }
        }
    }
}

/// Agents parsed from one or more markdown manifests
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentManifest {
    /// Path or label the agents were read from
    pub source: String,
    pub agents: Vec<AgentDefinition>,
}

/// A message forwarded as part of a handoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Context carried from the sending agent to the receiving agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SharedContext {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub task: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<SharedMessage>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub previous_agents: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

/// A request to move control from one agent to another
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffRequest {
    pub from_agent_id: String,
    /// Absent means the router picks the target
    #[serde(default, alias = "to_agent_id", skip_serializing_if = "Option::is_none")]
    pub target_agent_id: Option<String>,
    #[serde(default)]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<SharedContext>,
    #[serde(default)]
    pub return_expected: bool,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl HandoffRequest {
    pub fn new(from: impl Into<String>, target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            from_agent_id: from.into(),
            target_agent_id: Some(target.into()),
            reason: reason.into(),
            context: None,
            return_expected: false,
            timestamp: Utc::now(),
        }
    }

    pub fn with_context(mut self, context: SharedContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn expecting_return(mut self) -> Self {
        self.return_expected = true;
        self
    }
}

/// Outcome of a completed handoff
#[derive(Debug, Clone, PartialEq)]
pub struct HandoffResult {
    pub from_agent_id: String,
    pub to_agent_id: String,
    /// Text the target produced
    pub response: String,
    /// Control went back to the sender afterwards
    pub should_return: bool,
    pub duration: Duration,
}

/// Lifecycle event emitted by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestratorEvent {
    /// Agent the event is about; the sender for handoff events
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    AgentSelected,
    HandoffInitiated {
        to_agent_id: Option<String>,
        reason: String,
    },
    HandoffCompleted {
        to_agent_id: String,
        returned: bool,
    },
    HandoffFailed {
        to_agent_id: Option<String>,
        error: String,
    },
    ContextShared {
        to_agent_id: String,
        mode: ContextMode,
        messages: usize,
    },
    AgentError {
        error: String,
    },
}

impl OrchestratorEvent {
    pub fn new(agent_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            agent_id: agent_id.into(),
            timestamp: Utc::now(),
            kind,
        }
    }

    /// Snake-case event name, e.g. `handoff_completed`
    pub fn name(&self) -> &'static str {
        match self.kind {
            EventKind::AgentSelected => "agent_selected",
            EventKind::HandoffInitiated { .. } => "handoff_initiated",
            EventKind::HandoffCompleted { .. } => "handoff_completed",
            EventKind::HandoffFailed { .. } => "handoff_failed",
            EventKind::ContextShared { .. } => "context_shared",
            EventKind::AgentError { .. } => "agent_error",
        }
    }

    /// Receiving agent for handoff events
    pub fn to_agent_id(&self) -> Option<&str> {
        match &self.kind {
            EventKind::HandoffInitiated { to_agent_id, .. }
            | EventKind::HandoffFailed { to_agent_id, .. } => to_agent_id.as_deref(),
            EventKind::HandoffCompleted { to_agent_id, .. }
            | EventKind::ContextShared { to_agent_id, .. } => Some(to_agent_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_serde_shape() {
        let json = serde_json::to_value(Trigger::Pattern("test.*".into())).unwrap();
        assert_eq!(json, serde_json::json!({"type": "pattern", "value": "test.*"}));

        let fallback: Trigger = serde_json::from_value(serde_json::json!({"type": "fallback"})).unwrap();
        assert_eq!(fallback, Trigger::Fallback);

        let tool: Trigger =
            serde_json::from_value(serde_json::json!({"type": "tool_use", "value": "exec"})).unwrap();
        assert_eq!(tool, Trigger::ToolUse("exec".into()));
    }

    #[test]
    fn test_trigger_display() {
        assert_eq!(Trigger::Keyword("code".into()).to_string(), "keyword:code");
        assert_eq!(Trigger::TaskComplete.to_string(), "task_complete");
    }

    #[test]
    fn test_context_mode_parse() {
        assert_eq!("Summary".parse::<ContextMode>().unwrap(), ContextMode::Summary);
        assert_eq!("last_n".parse::<ContextMode>().unwrap(), ContextMode::LastN);
        assert!("filtered".parse::<ContextMode>().is_err());
        assert_eq!(ContextMode::default(), ContextMode::Full);
    }

    #[test]
    fn test_config_defaults() {
        let config = MultiAgentConfig::default();
        assert!(config.enable_peer_handoffs);
        assert_eq!(config.max_handoff_depth, 10);
        assert_eq!(config.handoff_timeout, Duration::from_secs(300));
        assert_eq!(config.default_context_mode, ContextMode::Full);
    }

    #[test]
    fn test_empty_supervisor_is_unset() {
        let config = MultiAgentConfig {
            supervisor_agent_id: Some(String::new()),
            ..Default::default()
        };
        assert!(config.supervisor().is_none());
        assert!(!config.is_supervisor(""));
    }

    #[test]
    fn test_apply_defaults_names_agents() {
        let mut config = MultiAgentConfig {
            max_handoff_depth: 0,
            handoff_timeout: Duration::ZERO,
            agents: vec![AgentDefinition {
                id: "writer".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        config.apply_defaults();
        assert_eq!(config.agents[0].name, "writer");
        assert_eq!(config.max_handoff_depth, DEFAULT_MAX_HANDOFF_DEPTH);
        assert_eq!(config.handoff_timeout, DEFAULT_HANDOFF_TIMEOUT);
    }

    #[test]
    fn test_handoff_request_accepts_legacy_field() {
        let request: HandoffRequest = serde_json::from_value(serde_json::json!({
            "from_agent_id": "a",
            "to_agent_id": "b",
            "reason": "needs code"
        }))
        .unwrap();
        assert_eq!(request.target_agent_id.as_deref(), Some("b"));
        assert!(!request.return_expected);
    }

    #[test]
    fn test_event_serializes_flat() {
        let event = OrchestratorEvent::new(
            "a",
            EventKind::HandoffCompleted {
                to_agent_id: "b".into(),
                returned: false,
            },
        );
        assert_eq!(event.name(), "handoff_completed");
        assert_eq!(event.to_agent_id(), Some("b"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "handoff_completed");
        assert_eq!(json["agent_id"], "a");
    }

    #[test]
    fn test_rule_for() {
        let agent = AgentDefinition::new("a")
            .with_rule(HandoffRule::new("b", vec![Trigger::Always]))
            .with_rule(HandoffRule::new("c", vec![Trigger::Fallback]).with_priority(3));
        assert_eq!(agent.rule_for("c").map(|r| r.priority), Some(3));
        assert!(agent.rule_for("z").is_none());
        assert_eq!(agent.display_name(), "a");
    }
}
