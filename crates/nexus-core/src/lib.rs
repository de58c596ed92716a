//! nexus-core - shared seams for the nexus assistant runtime
//!
//! Message and session types, the session store, tool handlers, the agent
//! runtime interface, and the cancellable execution context every agent
//! turn runs under.

pub mod context;
pub mod runtime;
pub mod session;
pub mod tools;
pub mod types;

pub use context::ExecutionContext;
pub use runtime::{AgentRuntime, ResponseChunk, RuntimeFactory, RuntimeSettings, collect_text};
pub use session::{ListOptions, MemorySessionStore, Session, SessionError, SessionStore};
pub use tools::{ToolHandler, ToolRegistry, json_schema};
pub use types::{ChannelType, Message, Role, ToolCall, ToolResult};
