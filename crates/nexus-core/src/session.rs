//! Session storage - each conversation gets its own session

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::types::{ChannelType, Message};

/// A single conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    /// Channel-specific address, e.g. a phone number or group handle
    pub key: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub channel: ChannelType,
    /// Generic metadata map; orchestration state lives here between turns
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(key: impl Into<String>, channel: ChannelType) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            key: key.into(),
            agent_id: None,
            channel,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }
}

/// Filters for [`SessionStore::list`]
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub channel: Option<ChannelType>,
    pub limit: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("session already exists: {0}")]
    AlreadyExists(String),
}

/// Durable session storage
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Session>, SessionError>;
    async fn get_by_key(&self, key: &str) -> Result<Option<Session>, SessionError>;
    async fn create(&self, session: Session) -> Result<Session, SessionError>;
    async fn update(&self, session: &Session) -> Result<(), SessionError>;
    async fn append_message(&self, message: Message) -> Result<(), SessionError>;
    /// Sessions bound to `agent_id`, most recently updated first
    async fn list(&self, agent_id: &str, opts: ListOptions) -> Result<Vec<Session>, SessionError>;
    /// Message history oldest first; `limit` keeps only the most recent entries
    async fn get_history(
        &self,
        session_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, SessionError>;
}

/// In-memory session store
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    messages: Arc<RwLock<HashMap<String, Vec<Message>>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, id: &str) -> Result<Option<Session>, SessionError> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn get_by_key(&self, key: &str) -> Result<Option<Session>, SessionError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.values().find(|s| s.key == key).cloned())
    }

    async fn create(&self, session: Session) -> Result<Session, SessionError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(SessionError::AlreadyExists(session.id));
        }
        info!("Created session '{}' ({})", session.key, session.id);
        sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn update(&self, session: &Session) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let stored = sessions
            .get_mut(&session.id)
            .ok_or_else(|| SessionError::NotFound(session.id.clone()))?;
        *stored = session.clone();
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn append_message(&self, message: Message) -> Result<(), SessionError> {
        if !self.sessions.read().await.contains_key(&message.session_id) {
            return Err(SessionError::NotFound(message.session_id));
        }
        let mut messages = self.messages.write().await;
        let history = messages.entry(message.session_id.clone()).or_default();
        history.push(message);
        debug!("Session history now {} messages", history.len());
        Ok(())
    }

    async fn list(&self, agent_id: &str, opts: ListOptions) -> Result<Vec<Session>, SessionError> {
        let sessions = self.sessions.read().await;
        let mut list: Vec<Session> = sessions
            .values()
            .filter(|s| s.agent_id.as_deref() == Some(agent_id))
            .filter(|s| opts.channel.is_none_or(|c| s.channel == c))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        if let Some(limit) = opts.limit {
            list.truncate(limit);
        }
        Ok(list)
    }

    async fn get_history(
        &self,
        session_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, SessionError> {
        let messages = self.messages.read().await;
        let history = messages.get(session_id).map(Vec::as_slice).unwrap_or_default();
        let start = limit.map_or(0, |l| history.len().saturating_sub(l));
        Ok(history[start..].to_vec())
    }
}
