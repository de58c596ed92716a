//! nexus-multiagent - agent teams with rule-based routing and handoffs
//!
//! Agents are declared in YAML or in markdown `AGENTS.md` manifests,
//! validated, and registered with an [`Orchestrator`] that routes each turn
//! and moves control between agents.

pub mod config;
pub mod context;
pub mod error;
pub mod manifest;
pub mod metadata;
pub mod orchestrator;
pub mod registry;
pub mod router;
pub mod runs;
pub mod supervisor;
pub mod tools;
pub mod types;
pub mod validate;

#[cfg(test)]
mod testing;

pub use config::{
    config_from_manifest, discover_agents_files, load_agents_manifest, load_all_agents_files,
    load_config, parse_config_yaml, save_config,
};
pub use context::{ContextManager, ContextSummarizer, build_handoff_message};
pub use error::{ConfigError, HandoffError, RegistryError, RunError, ValidationError};
pub use manifest::{example_agents_md, parse_agents_markdown};
pub use metadata::{AgentHistoryEntry, SessionMetadata};
pub use orchestrator::{EventCallback, Orchestrator, OrchestratorBuilder};
pub use registry::{AgentCatalog, AgentRegistry};
pub use router::{IntentClassifier, RouteDecision, RouteMatch, Router, RuleScope, TurnOutcome};
pub use supervisor::Supervisor;
pub use runs::{NewRun, RunOutcome, RunRecord, RunRegistry, RunRegistryConfig, RunStats, RunStatus};
pub use tools::{
    DelegateTool, HandoffTool, ListAgentsTool, ReportTool, ReturnControlTool, SessionsSendTool,
};
pub use types::{
    AgentDefinition, AgentManifest, ContextMode, EventKind, HandoffRequest, HandoffResult,
    HandoffRule, MultiAgentConfig, OrchestratorEvent, SharedContext, SharedMessage, Trigger,
};
pub use validate::{validate_config, validate_manifest};
