//! `sessions_send` tool - deliver a message to another session

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use nexus_core::{
    AgentRuntime, ExecutionContext, Message, ResponseChunk, Session, SessionStore, ToolHandler,
    collect_text, json_schema,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::runs::{NewRun, RunOutcome, RunRegistry};

pub struct SessionsSendTool {
    store: Arc<dyn SessionStore>,
    runtime: Arc<dyn AgentRuntime>,
    runs: Option<RunRegistry>,
}

impl SessionsSendTool {
    pub fn new(store: Arc<dyn SessionStore>, runtime: Arc<dyn AgentRuntime>) -> Self {
        Self {
            store,
            runtime,
            runs: None,
        }
    }

    /// Record every delivered message as a run
    pub fn with_runs(mut self, runs: RunRegistry) -> Self {
        self.runs = Some(runs);
        self
    }

    async fn resolve_session(&self, id: Option<&str>, key: Option<&str>) -> Result<Session> {
        if let Some(id) = id {
            return self
                .store
                .get(id)
                .await?
                .ok_or_else(|| anyhow!("Session not found: {}", id));
        }
        if let Some(key) = key {
            return self
                .store
                .get_by_key(key)
                .await?
                .ok_or_else(|| anyhow!("Session not found for key: {}", key));
        }
        bail!("Either 'session_id' or 'session_key' is required")
    }
}

/// A registered run that still needs its outcome
struct Tracked {
    runs: RunRegistry,
    run_id: String,
}

impl Tracked {
    fn start(&self) {
        if let Err(e) = self.runs.start(&self.run_id) {
            warn!("Failed to mark run started: {}", e);
        }
    }

    fn finish(&self, outcome: RunOutcome) {
        if let Err(e) = self.runs.complete(&self.run_id, outcome) {
            warn!("Failed to record run outcome: {}", e);
        }
    }
}

fn non_empty<'a>(input: &'a Value, field: &str) -> Option<&'a str> {
    input
        .get(field)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[async_trait]
impl ToolHandler for SessionsSendTool {
    fn name(&self) -> &str {
        "sessions_send"
    }

    fn description(&self) -> &str {
        "Send a message to another session and optionally wait for the reply."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "session_id": {
                    "type": "string",
                    "description": "Target session ID"
                },
                "session_key": {
                    "type": "string",
                    "description": "Target session key"
                },
                "message": {
                    "type": "string",
                    "description": "Message to send"
                },
                "wait": {
                    "type": "boolean",
                    "description": "Wait for the reply (default: true)"
                },
                "timeout_seconds": {
                    "type": "integer",
                    "description": "Give up waiting after this many seconds",
                    "minimum": 0
                },
                "label": {
                    "type": "string",
                    "description": "Short label for the run record"
                }
            }),
            vec!["message"],
        )
    }

    async fn execute(&self, ctx: &ExecutionContext, input: Value) -> Result<String> {
        let text = non_empty(&input, "message").ok_or_else(|| anyhow!("Missing 'message' parameter"))?;
        let wait = input.get("wait").and_then(|v| v.as_bool()).unwrap_or(true);
        let timeout = input
            .get("timeout_seconds")
            .and_then(|v| v.as_u64())
            .filter(|&s| s > 0)
            .map(Duration::from_secs);

        let session = self
            .resolve_session(non_empty(&input, "session_id"), non_empty(&input, "session_key"))
            .await?;
        let session_id = session.id.clone();
        if wait && ctx.is_in_session(&session_id) {
            // Its turn cannot start until ours ends
            bail!(
                "Session {} is waiting on this turn; send with wait=false to queue the message",
                session_id
            );
        }

        let mut message = Message::user(&session.id, text).with_channel(session.channel);
        if let Some(sender) = ctx.current_agent() {
            message
                .metadata
                .insert("sent_by_agent".to_string(), Value::from(sender));
        }

        let tracked = self.runs.as_ref().map(|runs| {
            let record = runs.register(NewRun {
                child_session_id: session_id.clone(),
                requester_session_id: ctx.session_id().map(String::from),
                requester_agent_id: ctx.current_agent().map(String::from),
                task: text.to_string(),
                label: non_empty(&input, "label").map(String::from),
                timeout,
            });
            Tracked {
                runs: runs.clone(),
                run_id: record.run_id,
            }
        });
        let run_id = tracked.as_ref().map(|t| t.run_id.clone());

        if !wait {
            // Detached from the caller's cancellation so the turn outlives this tool call
            let turn = match timeout {
                Some(t) => ExecutionContext::new().child_with_timeout(t),
                None => ExecutionContext::new(),
            };
            let mut rx = match self.runtime.process(turn.clone(), session, message).await {
                Ok(rx) => rx,
                Err(e) => {
                    if let Some(t) = &tracked {
                        t.finish(RunOutcome::failed(e.to_string()));
                    }
                    return Err(e.context("Failed to start session turn"));
                }
            };
            if let Some(t) = &tracked {
                t.start();
            }
            let target = session_id.clone();
            tokio::spawn(async move {
                let drain = async {
                    let mut reply = String::new();
                    let mut failure = None;
                    while let Some(chunk) = rx.recv().await {
                        match chunk {
                            ResponseChunk::Text(t) => reply.push_str(&t),
                            ResponseChunk::Error(e) => {
                                warn!("Queued message to session {} failed: {}", target, e);
                                failure.get_or_insert(e);
                            }
                            ResponseChunk::ToolResult(_) => {}
                        }
                    }
                    match failure {
                        Some(e) => RunOutcome::failed(e),
                        None => RunOutcome::completed(reply),
                    }
                };
                let outcome = match turn.remaining() {
                    Some(left) => match tokio::time::timeout(left, drain).await {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            turn.cancel();
                            warn!("Queued message to session {} timed out", target);
                            RunOutcome::timed_out(format!("no reply within {}s", left.as_secs()))
                        }
                    },
                    None => drain.await,
                };
                if let Some(t) = tracked {
                    t.finish(outcome);
                }
            });
            debug!("Queued message for session {}", session_id);
            return Ok(with_run_id(
                serde_json::json!({
                    "status": "queued",
                    "session_id": session_id,
                }),
                run_id,
            ));
        }

        let turn = match timeout {
            Some(t) => ctx.child_with_timeout(t),
            None => ctx.child(),
        };
        let waited = async {
            let rx = match self.runtime.process(turn.clone(), session, message).await {
                Ok(rx) => rx,
                Err(e) => return Err(Waited::Failed(e.context("Failed to run session turn"))),
            };
            if let Some(t) = &tracked {
                t.start();
            }
            match timeout {
                Some(t) => match tokio::time::timeout(t, collect_text(rx)).await {
                    Ok(result) => result.map_err(Waited::Failed),
                    Err(_) => {
                        turn.cancel();
                        Err(Waited::TimedOut(format!(
                            "Timed out waiting for session {} after {}s",
                            session_id,
                            t.as_secs()
                        )))
                    }
                },
                None => collect_text(rx).await.map_err(Waited::Failed),
            }
        };

        let response = match waited.await {
            Ok(response) => {
                if let Some(t) = &tracked {
                    t.finish(RunOutcome::completed(response.clone()));
                }
                response
            }
            Err(Waited::TimedOut(message)) => {
                if let Some(t) = &tracked {
                    t.finish(RunOutcome::timed_out(message.clone()));
                }
                bail!(message);
            }
            Err(Waited::Failed(e)) => {
                if let Some(t) = &tracked {
                    t.finish(RunOutcome::failed(e.to_string()));
                }
                return Err(e);
            }
        };

        Ok(with_run_id(
            serde_json::json!({
                "status": "completed",
                "session_id": session_id,
                "response": response,
            }),
            run_id,
        ))
    }
}

enum Waited {
    Failed(anyhow::Error),
    TimedOut(String),
}

fn with_run_id(mut output: Value, run_id: Option<String>) -> String {
    if let Some(id) = run_id {
        output["run_id"] = Value::from(id);
    }
    output.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runs::RunStatus;
    use crate::testing::{ScriptedRuntime, Step};
    use nexus_core::{ChannelType, MemorySessionStore};

    async fn setup() -> (SessionsSendTool, Arc<ScriptedRuntime>, Session) {
        let store = Arc::new(MemorySessionStore::new());
        let session = store
            .create(Session::new("+15550199", ChannelType::WhatsApp))
            .await
            .unwrap();
        let runtime = Arc::new(ScriptedRuntime::for_agent("peer"));
        (SessionsSendTool::new(store, runtime.clone()), runtime, session)
    }

    #[tokio::test]
    async fn test_wait_returns_response() {
        let (tool, runtime, session) = setup().await;
        runtime.push_turn(vec![Step::Say("pong".into())]);

        let ctx = ExecutionContext::new().with_current_agent("coordinator");
        let output = tool
            .execute(&ctx, serde_json::json!({"session_id": session.id, "message": "ping"}))
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["status"], "completed");
        assert_eq!(parsed["session_id"], session.id.as_str());
        assert_eq!(parsed["response"], "pong");

        let seen = runtime.received();
        assert_eq!(seen[0].message.content, "ping");
        assert_eq!(seen[0].message.channel, ChannelType::WhatsApp);
        assert_eq!(seen[0].message.metadata["sent_by_agent"], "coordinator");
    }

    #[tokio::test]
    async fn test_no_wait_queues() {
        let (tool, runtime, session) = setup().await;
        let output = tool
            .execute(
                &ExecutionContext::new(),
                serde_json::json!({"session_key": "+15550199", "message": "later", "wait": false}),
            )
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["status"], "queued");
        assert_eq!(parsed["session_id"], session.id.as_str());
        assert!(parsed.get("response").is_none());
        assert_eq!(runtime.received().len(), 1);
    }

    #[tokio::test]
    async fn test_timeout() {
        let (tool, runtime, session) = setup().await;
        runtime.set_delay(Duration::from_secs(30));
        let err = tool
            .execute(
                &ExecutionContext::new(),
                serde_json::json!({"session_id": session.id, "message": "slow", "timeout_seconds": 1}),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Timed out"));
    }

    #[tokio::test]
    async fn test_error_chunk_surfaces() {
        let (tool, runtime, session) = setup().await;
        runtime.push_turn(vec![Step::Fail("model overloaded".into())]);
        let err = tool
            .execute(
                &ExecutionContext::new(),
                serde_json::json!({"session_id": session.id, "message": "hi"}),
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "model overloaded");
    }

    #[tokio::test]
    async fn test_wait_on_own_session_rejected() {
        let (tool, runtime, session) = setup().await;
        let ctx = ExecutionContext::new().with_session(session.id.clone());

        let err = tool
            .execute(&ctx, serde_json::json!({"session_id": session.id, "message": "hi"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("wait=false"));
        assert!(runtime.received().is_empty());

        let output = tool
            .execute(
                &ctx,
                serde_json::json!({"session_id": session.id, "message": "hi", "wait": false}),
            )
            .await
            .unwrap();
        assert!(output.contains("queued"));
    }

    #[tokio::test]
    async fn test_runs_recorded_for_waited_sends() {
        let (tool, runtime, session) = setup().await;
        let runs = RunRegistry::default();
        let tool = tool.with_runs(runs.clone());
        runtime.push_turn(vec![Step::Say("pong".into())]);
        runtime.push_turn(vec![Step::Fail("model overloaded".into())]);

        let ctx = ExecutionContext::new()
            .with_session("parent")
            .with_current_agent("coordinator");
        let output = tool
            .execute(
                &ctx,
                serde_json::json!({"session_id": session.id, "message": "ping", "label": "check-in"}),
            )
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&output).unwrap();
        let run = runs.get(parsed["run_id"].as_str().unwrap()).unwrap();
        assert_eq!(run.status(), RunStatus::Completed);
        assert_eq!(run.child_session_id, session.id);
        assert_eq!(run.requester_session_id.as_deref(), Some("parent"));
        assert_eq!(run.requester_agent_id.as_deref(), Some("coordinator"));
        assert_eq!(run.label.as_deref(), Some("check-in"));
        assert_eq!(run.outcome.unwrap().result.as_deref(), Some("pong"));

        tool.execute(&ctx, serde_json::json!({"session_id": session.id, "message": "again"}))
            .await
            .unwrap_err();
        let history = runs.list_for_requester("parent");
        assert_eq!(history.len(), 2);
        assert_eq!(runs.stats().by_status[&RunStatus::Error], 1);
        assert!(runs.list_active().is_empty());
    }

    #[tokio::test]
    async fn test_runs_recorded_for_timeouts() {
        let (tool, runtime, session) = setup().await;
        let runs = RunRegistry::default();
        let tool = tool.with_runs(runs.clone());
        runtime.set_delay(Duration::from_secs(30));

        tool.execute(
            &ExecutionContext::new(),
            serde_json::json!({"session_id": session.id, "message": "slow", "timeout_seconds": 1}),
        )
        .await
        .unwrap_err();
        assert_eq!(runs.stats().by_status[&RunStatus::Timeout], 1);
    }

    #[tokio::test]
    async fn test_queued_run_finishes_in_background() {
        let (tool, runtime, session) = setup().await;
        let runs = RunRegistry::default();
        let tool = tool.with_runs(runs.clone());
        runtime.push_turn(vec![Step::Say("later reply".into())]);

        let output = tool
            .execute(
                &ExecutionContext::new(),
                serde_json::json!({"session_id": session.id, "message": "later", "wait": false}),
            )
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&output).unwrap();
        let run_id = parsed["run_id"].as_str().unwrap().to_string();

        for _ in 0..100 {
            if runs.get(&run_id).is_some_and(|r| r.is_complete()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let run = runs.get(&run_id).unwrap();
        assert_eq!(run.status(), RunStatus::Completed);
        assert_eq!(run.outcome.unwrap().result.as_deref(), Some("later reply"));
    }

    #[tokio::test]
    async fn test_bad_input() {
        let (tool, _runtime, _session) = setup().await;
        let ctx = ExecutionContext::new();

        let err = tool
            .execute(&ctx, serde_json::json!({"session_id": "x"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("message"));

        let err = tool
            .execute(&ctx, serde_json::json!({"message": "hi"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("session_id"));

        let err = tool
            .execute(&ctx, serde_json::json!({"session_id": "missing", "message": "hi"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Session not found"));
    }
}
