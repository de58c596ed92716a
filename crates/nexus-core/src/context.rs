//! Execution context carried through an agent turn

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per-turn context handed to runtimes and tools.
///
/// Carries the cancellation token and deadline for the turn, plus the
/// orchestration markers tools need: which agent is acting, the stack of
/// agents that handed control down to it, and the sessions whose turns are
/// blocked on this one.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    current_agent: Option<String>,
    handoff_stack: Vec<String>,
    /// Outermost session first
    sessions: Vec<String>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
            current_agent: None,
            handoff_stack: Vec::new(),
            sessions: Vec::new(),
        }
    }

    pub fn with_current_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.current_agent = Some(agent_id.into());
        self
    }

    pub fn with_handoff_stack(mut self, stack: Vec<String>) -> Self {
        self.handoff_stack = stack;
        self
    }

    /// Mark the turn as running on `session_id`
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        if self.sessions.last() != Some(&session_id) {
            self.sessions.push(session_id);
        }
        self
    }

    /// Derive a child context that is cancelled with its parent
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            ..self.clone()
        }
    }

    /// Derive a child context that is cancelled with its parent and whose
    /// deadline is at most `timeout` from now.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            cancel: self.cancel.child_token(),
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    pub fn current_agent(&self) -> Option<&str> {
        self.current_agent.as_deref()
    }

    pub fn handoff_stack(&self) -> &[String] {
        &self.handoff_stack
    }

    /// Session the turn runs on
    pub fn session_id(&self) -> Option<&str> {
        self.sessions.last().map(String::as_str)
    }

    /// Whether `session_id` is this turn's session or one blocked on it
    pub fn is_in_session(&self, session_id: &str) -> bool {
        self.sessions.iter().any(|s| s == session_id)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the turn is cancelled
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}
