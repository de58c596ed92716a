//! Error types for configuration, registration, and handoffs

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// A single invariant violation found by the validator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Agent the violation belongs to, if any
    pub agent_id: Option<String>,
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            agent_id: None,
            message: message.into(),
        }
    }

    pub fn for_agent(agent_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.agent_id {
            Some(id) => write!(f, "agent {}: {}", id, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ValidationError {}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yml::Error),

    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("{} validation error(s): {}", .0.len(), join_errors(.0))]
    Validation(Vec<ValidationError>),
}

impl ConfigError {
    /// Validation errors carried by this error, empty for other variants
    pub fn validation_errors(&self) -> &[ValidationError] {
        match self {
            Self::Validation(errors) => errors,
            _ => &[],
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("agent ID cannot be empty")]
    EmptyId,

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("invalid multi-agent config: {}", join_errors(.0))]
    InvalidConfig(Vec<ValidationError>),
}

#[derive(Debug, thiserror::Error)]
pub enum HandoffError {
    #[error("max handoff depth ({0}) exceeded")]
    DepthExceeded(usize),

    #[error("peer handoffs are disabled: {from} cannot hand off to {to}")]
    PeerHandoffsDisabled { from: String, to: String },

    #[error("handoff target not found: {0}")]
    TargetNotFound(String),

    #[error("agent {0} does not accept handoffs")]
    TargetCannotReceive(String),

    #[error("agent {0} cannot hand off to itself")]
    SelfHandoff(String),

    #[error("handoff to {agent} timed out after {timeout:?}")]
    Timeout { agent: String, timeout: Duration },

    #[error("agent {agent} failed: {message}")]
    Runtime { agent: String, message: String },

    #[error("invalid handoff request: {0}")]
    InvalidRequest(String),

    #[error("no agents registered")]
    NoAgents,

    #[error("session store error: {0}")]
    Session(#[from] nexus_core::SessionError),
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("run not found: {0}")]
    NotFound(String),

    #[error("run {0} already finished")]
    AlreadyFinished(String),
}
