//! Built-in tools that let agents coordinate with each other

pub mod delegate;
pub mod handoff;
pub mod list_agents;
pub mod report;
pub mod return_control;
pub mod sessions_send;

pub use delegate::DelegateTool;
pub use handoff::HandoffTool;
pub use list_agents::ListAgentsTool;
pub use report::ReportTool;
pub use return_control::ReturnControlTool;
pub use sessions_send::SessionsSendTool;
