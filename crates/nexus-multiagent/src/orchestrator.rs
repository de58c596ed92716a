//! Orchestrator - picks the agent for each turn and carries out handoffs
//!
//! Every turn on a session runs under that session's lock. The selected
//! agent's output is streamed back to the caller; once its stream ends the
//! router decides whether control moves on. A handoff walks
//! requested -> validated -> context built -> dispatched -> completed or
//! failed, emitting an event at each step.

use async_trait::async_trait;
use chrono::Utc;
use nexus_core::{
    AgentRuntime, ExecutionContext, Message, ResponseChunk, Role, RuntimeFactory,
    RuntimeSettings, Session, SessionError, SessionStore, ToolHandler,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::context::{ContextManager, ContextSummarizer, build_handoff_message};
use crate::error::{HandoffError, RegistryError};
use crate::metadata::SessionMetadata;
use crate::registry::AgentRegistry;
use crate::router::{
    IntentClassifier, RouteDecision, Router, TurnOutcome, detect_completion, is_handoff_signal,
    is_return_signal,
};
use crate::supervisor::Supervisor;
use crate::tools::{DelegateTool, HandoffTool, ListAgentsTool, ReportTool, ReturnControlTool};
use crate::types::{
    AgentDefinition, EventKind, HandoffRequest, HandoffResult, HandoffRule, MultiAgentConfig,
    OrchestratorEvent, SharedContext,
};
use crate::validate::validate_config;

/// Receives every orchestration event
pub type EventCallback = Arc<dyn Fn(&OrchestratorEvent) + Send + Sync>;

type RunFuture<'a> = Pin<Box<dyn Future<Output = Result<AgentRun, HandoffError>> + Send + 'a>>;

const CHUNK_BUFFER: usize = 32;

/// Builder for an [`Orchestrator`] with optional routing and summary models
pub struct OrchestratorBuilder {
    config: MultiAgentConfig,
    factory: Arc<dyn RuntimeFactory>,
    store: Arc<dyn SessionStore>,
    classifier: Option<Arc<dyn IntentClassifier>>,
    summarizer: Option<Arc<dyn ContextSummarizer>>,
}

impl OrchestratorBuilder {
    pub fn classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn summarizer(mut self, summarizer: Arc<dyn ContextSummarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Build and register every configured agent
    pub fn build(self) -> Result<Orchestrator, RegistryError> {
        let mut config = self.config;
        config.apply_defaults();

        let registry = AgentRegistry::new();
        let catalog = registry.catalog();

        let mut router = Router::new(catalog.clone(), config.global_handoff_rules.clone());
        if let Some(classifier) = self.classifier {
            router = router.with_classifier(classifier);
        }
        let mut context = ContextManager::new(self.store.clone());
        if let Some(summarizer) = self.summarizer {
            context = context.with_summarizer(summarizer);
        }

        let builtins: Vec<Arc<dyn ToolHandler>> = vec![
            Arc::new(HandoffTool::new(catalog.clone())),
            Arc::new(ReturnControlTool),
            Arc::new(ListAgentsTool::new(catalog)),
        ];
        let supervisor = config.supervisor().map(Supervisor::new);
        let agents = config.agents.clone();

        let orchestrator = Orchestrator {
            inner: Arc::new(Inner {
                config,
                registry,
                factory: self.factory,
                store: self.store,
                router,
                context,
                supervisor,
                builtins,
                callback: RwLock::new(None),
                session_locks: Mutex::new(HashMap::new()),
            }),
        };
        for agent in agents {
            orchestrator.register_agent(agent)?;
        }
        info!(
            "Orchestrator ready with {} agent(s)",
            orchestrator.inner.registry.len()
        );
        Ok(orchestrator)
    }

    /// Like [`build`](Self::build), but refuses configs that fail validation
    pub fn build_validated(self) -> Result<Orchestrator, RegistryError> {
        let errors = validate_config(&self.config);
        if !errors.is_empty() {
            return Err(RegistryError::InvalidConfig(errors));
        }
        self.build()
    }
}

struct Inner {
    config: MultiAgentConfig,
    registry: AgentRegistry,
    factory: Arc<dyn RuntimeFactory>,
    store: Arc<dyn SessionStore>,
    router: Router,
    context: ContextManager,
    supervisor: Option<Supervisor>,
    builtins: Vec<Arc<dyn ToolHandler>>,
    callback: RwLock<Option<EventCallback>>,
    session_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// State of one serialized unit of work on a session
struct Turn {
    session: Session,
    meta: SessionMetadata,
    tx: Option<mpsc::Sender<ResponseChunk>>,
    /// Handoffs dispatched so far in this unit of work
    hops: usize,
}

impl Turn {
    fn new(session: Session, tx: Option<mpsc::Sender<ResponseChunk>>) -> Self {
        Self {
            meta: SessionMetadata::from_map(&session.metadata),
            session,
            tx,
            hops: 0,
        }
    }

    async fn send(&self, chunk: ResponseChunk) {
        if let Some(tx) = &self.tx
            && tx.send(chunk).await.is_err()
        {
            debug!("Response receiver for session {} dropped", self.session.id);
        }
    }

    /// Session as runtimes should see it, carrying the live orchestration state
    fn snapshot(&self) -> Session {
        let mut session = self.session.clone();
        self.meta.write_to(&mut session.metadata);
        session
    }
}

struct AgentRun {
    text: String,
    /// The agent called `return_control`
    returned: bool,
}

/// Multi-agent coordinator, cheap to clone and shared across sessions
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn builder(
        config: MultiAgentConfig,
        factory: Arc<dyn RuntimeFactory>,
        store: Arc<dyn SessionStore>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            factory,
            store,
            classifier: None,
            summarizer: None,
        }
    }

    pub fn new(
        config: MultiAgentConfig,
        factory: Arc<dyn RuntimeFactory>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self, RegistryError> {
        Self::builder(config, factory, store).build()
    }

    pub fn from_validated(
        config: MultiAgentConfig,
        factory: Arc<dyn RuntimeFactory>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self, RegistryError> {
        Self::builder(config, factory, store).build_validated()
    }

    pub fn config(&self) -> &MultiAgentConfig {
        &self.inner.config
    }

    pub fn router(&self) -> &Router {
        &self.inner.router
    }

    /// Register an agent, building (or replacing) its runtime
    pub fn register_agent(&self, mut definition: AgentDefinition) -> Result<(), RegistryError> {
        if definition.id.trim().is_empty() {
            return Err(RegistryError::EmptyId);
        }
        if definition.name.is_empty() {
            definition.name = definition.id.clone();
        }

        let runtime = self.inner.factory.build(RuntimeSettings {
            agent_id: definition.id.clone(),
            system_prompt: definition.system_prompt.clone(),
            model: definition.model.clone(),
            provider: definition.provider.clone(),
            max_iterations: definition.max_iterations,
            tools: definition.tools.clone(),
        });

        let config = &self.inner.config;
        if config.enable_peer_handoffs || config.is_supervisor(&definition.id) {
            for tool in &self.inner.builtins {
                runtime.register_tool(tool.clone());
            }
        }
        if let Some(supervisor) = &self.inner.supervisor {
            if supervisor.id() == definition.id {
                runtime.register_tool(Arc::new(DelegateTool::new(
                    self.inner.registry.catalog(),
                    supervisor.id(),
                )));
            } else {
                runtime.register_tool(Arc::new(ReportTool::new(supervisor.id())));
            }
        }
        self.inner.registry.insert(definition, runtime)
    }

    pub fn get_agent(&self, id: &str) -> Option<Arc<AgentDefinition>> {
        self.inner.registry.get_agent(id)
    }

    pub fn get_runtime(&self, id: &str) -> Option<Arc<dyn AgentRuntime>> {
        self.inner.registry.get_runtime(id)
    }

    pub fn list_agents(&self) -> Vec<Arc<AgentDefinition>> {
        self.inner.registry.list_agents()
    }

    pub fn register_tool_for_agent(
        &self,
        agent_id: &str,
        tool: Arc<dyn ToolHandler>,
    ) -> Result<(), RegistryError> {
        self.inner.registry.register_tool_for_agent(agent_id, tool)
    }

    pub fn register_tool_for_all(&self, tool: Arc<dyn ToolHandler>) -> usize {
        self.inner.registry.register_tool_for_all(tool)
    }

    pub fn set_event_callback(&self, callback: impl Fn(&OrchestratorEvent) + Send + Sync + 'static) {
        *self.inner.callback.write() = Some(Arc::new(callback));
    }

    pub fn clear_event_callback(&self) {
        *self.inner.callback.write() = None;
    }

    /// Supervisor prompt section listing the current specialists
    pub fn supervisor_prompt(&self) -> Option<String> {
        let supervisor = self.inner.supervisor.as_ref()?;
        Some(supervisor.build_prompt(&self.inner.registry.catalog()))
    }

    fn emit(&self, event: OrchestratorEvent) {
        let callback = self.inner.callback.read().clone();
        if let Some(callback) = callback {
            callback(&event);
        }
    }

    fn fail(&self, from: &str, to: Option<String>, err: &HandoffError) {
        warn!(
            "Handoff {} -> {} failed: {}",
            from,
            to.as_deref().unwrap_or("<unresolved>"),
            err
        );
        self.emit(OrchestratorEvent::new(
            from,
            EventKind::HandoffFailed {
                to_agent_id: to,
                error: err.to_string(),
            },
        ));
    }

    /// Run `work` while holding the session's lock. The lock entry is
    /// dropped again once no other task holds or waits for it.
    async fn locked<T>(&self, session_id: &str, work: impl Future<Output = T>) -> T {
        let lock = self
            .inner
            .session_locks
            .lock()
            .entry(session_id.to_string())
            .or_default()
            .clone();
        let result = {
            let _guard = lock.lock().await;
            work.await
        };

        let mut locks = self.inner.session_locks.lock();
        drop(lock);
        if locks
            .get(session_id)
            .is_some_and(|l| Arc::strong_count(l) == 1)
        {
            locks.remove(session_id);
        }
        result
    }

    /// The stored copy holds whatever the previous unit of work wrote back
    async fn reload(&self, session: Session) -> Result<Session, HandoffError> {
        Ok(self.inner.store.get(&session.id).await?.unwrap_or(session))
    }

    /// Agent that takes a new turn: the supervisor's pick, then the current
    /// agent, then the default, then the first registered agent by ID.
    fn select_agent(&self, meta: &SessionMetadata) -> Result<String, HandoffError> {
        let registry = &self.inner.registry;
        if let Some(supervisor) = &self.inner.supervisor {
            let chosen = supervisor.select_agent(meta);
            if registry.get_runtime(&chosen).is_some() {
                return Ok(chosen);
            }
            warn!("Supervisor selected unknown agent '{}'", chosen);
        }
        if let Some(current) = meta.current_agent_id.as_deref()
            && registry.get_runtime(current).is_some()
        {
            return Ok(current.to_string());
        }
        if let Some(default) = self.inner.config.default_agent()
            && registry.get_runtime(default).is_some()
        {
            return Ok(default.to_string());
        }
        registry
            .list_agents()
            .first()
            .map(|a| a.id.clone())
            .ok_or(HandoffError::NoAgents)
    }

    /// Start a turn. The response streams on the returned receiver; failures
    /// arrive as error chunks.
    pub fn handle_message(
        &self,
        ctx: ExecutionContext,
        session: Session,
        message: Message,
    ) -> mpsc::Receiver<ResponseChunk> {
        let (tx, rx) = mpsc::channel(CHUNK_BUFFER);
        let this = self.clone();
        tokio::spawn(async move {
            let session_id = session.id.clone();
            if let Err(e) = this.run_turn(ctx, session, message, tx.clone()).await {
                error!("Turn on session {} failed: {}", session_id, e);
                let _ = tx.send(ResponseChunk::Error(e.to_string())).await;
            }
        });
        rx
    }

    async fn run_turn(
        &self,
        ctx: ExecutionContext,
        session: Session,
        message: Message,
        tx: mpsc::Sender<ResponseChunk>,
    ) -> Result<(), HandoffError> {
        let session_id = session.id.clone();
        self.locked(&session_id, async move {
            let mut turn = Turn::new(self.reload(session).await?, Some(tx));

            let agent_id = self.select_agent(&turn.meta)?;
            debug!("Session {} -> agent '{}'", turn.session.id, agent_id);
            self.emit(OrchestratorEvent::new(&agent_id, EventKind::AgentSelected));
            if turn.meta.current_agent_id.as_deref() != Some(agent_id.as_str()) {
                // Control was reset to a different agent; the old chain is gone
                turn.meta.active_handoff_stack.clear();
                turn.meta.current_agent_id = Some(agent_id.clone());
            }
            turn.meta.ensure_started(&agent_id);

            let result = self.run_agent(&mut turn, &ctx, agent_id, message, false).await;
            self.persist(&mut turn).await;
            result.map(|_| ())
        })
        .await
    }

    async fn persist(&self, turn: &mut Turn) {
        turn.meta.write_to(&mut turn.session.metadata);
        turn.session.updated_at = Utc::now();
        match self.inner.store.update(&turn.session).await {
            Ok(()) => {}
            Err(SessionError::NotFound(id)) => {
                debug!("Session {} is not stored; orchestration state not persisted", id)
            }
            Err(e) => warn!("Failed to save session {}: {}", turn.session.id, e),
        }
    }

    /// Run one agent, forward its output, then act on the routing decision.
    /// Only a missing runtime or a failed `process` call is an error; a
    /// failed follow-up handoff is reported on the stream.
    fn run_agent<'a>(
        &'a self,
        turn: &'a mut Turn,
        ctx: &'a ExecutionContext,
        agent_id: String,
        message: Message,
        dispatched: bool,
    ) -> RunFuture<'a> {
        Box::pin(async move {
            let runtime = self
                .inner
                .registry
                .get_runtime(&agent_id)
                .ok_or_else(|| HandoffError::TargetNotFound(agent_id.clone()))?;

            let agent_ctx = ctx
                .clone()
                .with_session(turn.session.id.clone())
                .with_current_agent(agent_id.clone())
                .with_handoff_stack(turn.meta.active_handoff_stack.clone());
            let mut rx = runtime
                .process(agent_ctx, turn.snapshot(), message.clone())
                .await
                .map_err(|e| HandoffError::Runtime {
                    agent: agent_id.clone(),
                    message: e.to_string(),
                })?;

            let mut reply = String::new();
            let mut outcome = TurnOutcome::default();
            let mut signal = None;
            let mut returned = false;
            while let Some(chunk) = rx.recv().await {
                match chunk {
                    ResponseChunk::Text(text) => {
                        reply.push_str(&text);
                        turn.send(ResponseChunk::Text(text)).await;
                    }
                    ResponseChunk::ToolResult(result) => {
                        if is_handoff_signal(&result) {
                            signal = Some(result.clone());
                        } else {
                            returned |= is_return_signal(&result);
                            turn.send(ResponseChunk::ToolResult(result.clone())).await;
                        }
                        outcome = outcome.with_tool_result(result);
                    }
                    ResponseChunk::Error(e) => {
                        warn!("Agent '{}' reported an error: {}", agent_id, e);
                        outcome.error = Some(e.clone());
                        turn.send(ResponseChunk::Error(e)).await;
                    }
                }
            }

            if returned {
                if !dispatched {
                    self.return_to_previous(turn, &agent_id);
                }
                return Ok(AgentRun {
                    text: reply,
                    returned: true,
                });
            }

            if signal.is_some() {
                outcome.tool_result = signal;
            }
            outcome.text = if reply.is_empty() {
                message.content.clone()
            } else {
                format!("{}\n{}", message.content, reply)
            };
            outcome.task_complete = detect_completion(&reply)
                || message
                    .metadata
                    .get("task_complete")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);

            let next = match self.inner.router.decide(Some(&agent_id), &outcome).await {
                Ok(RouteDecision::Stay) => None,
                Ok(RouteDecision::Signal(mut request)) => {
                    request.from_agent_id = agent_id.clone();
                    Some((request, None))
                }
                Ok(RouteDecision::Rule(found)) => {
                    let mut request = HandoffRequest::new(
                        &agent_id,
                        found.target_agent_id.clone(),
                        format!("matched {} rule", found.trigger),
                    )
                    .with_context(SharedContext {
                        task: message.content.clone(),
                        ..Default::default()
                    });
                    request.return_expected = found.rule.return_to_sender;
                    Some((request, Some(found.rule)))
                }
                Err(e) => {
                    self.fail(&agent_id, None, &e);
                    turn.send(ResponseChunk::Error(e.to_string())).await;
                    None
                }
            };

            if let Some((request, rule)) = next
                && let Err(e) = self.handle_handoff(turn, ctx, request, rule).await
            {
                turn.send(ResponseChunk::Error(e.to_string())).await;
            }

            Ok(AgentRun {
                text: reply,
                returned: false,
            })
        })
    }

    /// Pop the handoff stack after a `return_control` outside a dispatched
    /// handoff
    fn return_to_previous(&self, turn: &mut Turn, agent_id: &str) {
        let Some(previous) = turn.meta.active_handoff_stack.pop() else {
            warn!("Agent '{}' returned control with an empty handoff stack", agent_id);
            return;
        };
        info!("Agent '{}' returned control to '{}'", agent_id, previous);
        turn.meta.record_transition(&previous, Some("returned control"));
        turn.meta.current_agent_id = Some(previous.clone());
        self.emit(OrchestratorEvent::new(
            agent_id,
            EventKind::HandoffCompleted {
                to_agent_id: previous,
                returned: true,
            },
        ));
    }

    /// Hand control from `request.from_agent_id` to another agent outside of
    /// a turn. Works on the stored copy of the session and writes it back
    /// into `session`. Must not be called from inside a turn on the same
    /// session.
    pub async fn handoff(
        &self,
        session: &mut Session,
        request: HandoffRequest,
    ) -> Result<HandoffResult, HandoffError> {
        let session_id = session.id.clone();
        let (updated, result) = self
            .locked(&session_id, async {
                let mut turn = Turn::new(self.reload(session.clone()).await?, None);
                let ctx = ExecutionContext::new().with_session(session_id.clone());
                let result = self.handle_handoff(&mut turn, &ctx, request, None).await;
                self.persist(&mut turn).await;
                Ok::<_, HandoffError>((turn.session, result))
            })
            .await?;
        *session = updated;
        result
    }

    async fn handle_handoff(
        &self,
        turn: &mut Turn,
        ctx: &ExecutionContext,
        request: HandoffRequest,
        rule: Option<HandoffRule>,
    ) -> Result<HandoffResult, HandoffError> {
        let from = request.from_agent_id.clone();
        info!(
            "Handoff requested: {} -> {} ({})",
            from,
            request.target_agent_id.as_deref().unwrap_or("<router>"),
            request.reason
        );
        self.emit(OrchestratorEvent::new(
            &from,
            EventKind::HandoffInitiated {
                to_agent_id: request.target_agent_id.clone(),
                reason: request.reason.clone(),
            },
        ));

        let target = match self.validate_handoff(turn, &request).await {
            Ok(target) => target,
            Err(e) => {
                self.fail(&from, request.target_agent_id.clone(), &e);
                return Err(e);
            }
        };
        let rule = rule.or_else(|| {
            self.inner
                .registry
                .get_agent(&from)
                .and_then(|a| a.rule_for(&target.id).cloned())
        });
        let expects_return =
            request.return_expected || rule.as_ref().is_some_and(|r| r.return_to_sender);
        let mode = rule
            .as_ref()
            .and_then(|r| r.context_mode)
            .unwrap_or(self.inner.config.default_context_mode);

        let shared = match self
            .inner
            .context
            .build_shared_context(&turn.session.id, &request, mode)
            .await
        {
            Ok(shared) => shared,
            Err(e) => {
                self.fail(&from, Some(target.id.clone()), &e);
                return Err(e);
            }
        };

        let snapshot = turn.meta.clone();
        turn.meta.handoff_count += 1;
        match turn
            .meta
            .active_handoff_stack
            .iter()
            .position(|a| *a == target.id)
        {
            // Handing back down the chain unwinds it
            Some(i) if !expects_return => turn.meta.active_handoff_stack.truncate(i),
            _ => turn.meta.active_handoff_stack.push(from.clone()),
        }
        turn.meta.last_handoff_at = Some(Utc::now());
        turn.meta.record_transition(&target.id, Some(&request.reason));
        turn.meta.current_agent_id = Some(target.id.clone());
        turn.hops += 1;
        self.emit(OrchestratorEvent::new(
            &from,
            EventKind::ContextShared {
                to_agent_id: target.id.clone(),
                mode,
                messages: shared.messages.len(),
            },
        ));

        let mut outbound = request.clone();
        outbound.target_agent_id = Some(target.id.clone());
        outbound.return_expected = expects_return;
        outbound.context = Some(shared);
        let mut content = build_handoff_message(&outbound);
        if let Some(note) = rule
            .as_ref()
            .and_then(|r| r.message.as_deref())
            .filter(|m| !m.is_empty())
        {
            content.push_str("\n\n");
            content.push_str(note);
        }
        let message = Message::new(turn.session.id.clone(), Role::System, content)
            .with_channel(turn.session.channel)
            .with_agent(from.clone());

        let timeout = self.inner.config.handoff_timeout;
        let child = ctx.child_with_timeout(timeout);
        let budget = child.remaining().unwrap_or(timeout);
        let started = Instant::now();
        let dispatched = tokio::time::timeout(
            budget,
            self.run_agent(turn, &child, target.id.clone(), message, true),
        )
        .await;

        let outcome = match dispatched {
            Ok(result) => result,
            Err(_) => {
                child.cancel();
                Err(HandoffError::Timeout {
                    agent: target.id.clone(),
                    timeout: budget,
                })
            }
        };
        let run = match outcome {
            Ok(run) => run,
            Err(e) => {
                self.emit(OrchestratorEvent::new(
                    &target.id,
                    EventKind::AgentError {
                        error: e.to_string(),
                    },
                ));
                let count = turn.meta.handoff_count;
                turn.meta = snapshot;
                turn.meta.handoff_count = count;
                self.fail(&from, Some(target.id.clone()), &e);
                return Err(e);
            }
        };

        let should_return = expects_return || run.returned;
        if should_return {
            turn.meta.active_handoff_stack = snapshot.active_handoff_stack;
            turn.meta.record_transition(&from, Some("returned control"));
            turn.meta.current_agent_id = Some(from.clone());
        }
        info!(
            "Handoff completed: {} -> {}{}",
            from,
            target.id,
            if should_return { " (returned)" } else { "" }
        );
        self.emit(OrchestratorEvent::new(
            &from,
            EventKind::HandoffCompleted {
                to_agent_id: target.id.clone(),
                returned: should_return,
            },
        ));

        Ok(HandoffResult {
            from_agent_id: from,
            to_agent_id: target.id.clone(),
            response: run.text,
            should_return,
            duration: started.elapsed(),
        })
    }

    async fn validate_handoff(
        &self,
        turn: &Turn,
        request: &HandoffRequest,
    ) -> Result<Arc<AgentDefinition>, HandoffError> {
        let from = request.from_agent_id.as_str();
        let reference = request
            .target_agent_id
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());

        let target = match reference {
            Some(reference) => match self.resolve_target(reference) {
                Ok(agent) => agent,
                Err(e) => self.supervisor_fallback(from).ok_or(e)?,
            },
            None => {
                let routed = self
                    .inner
                    .router
                    .match_rules(Some(from), &TurnOutcome::from_text(&request.reason))
                    .await
                    .and_then(|m| self.resolve_target(&m.target_agent_id).ok());
                routed
                    .or_else(|| self.supervisor_fallback(from))
                    .ok_or_else(|| {
                        HandoffError::InvalidRequest("no handoff target could be determined".into())
                    })?
            }
        };

        if target.id == from {
            return Err(HandoffError::SelfHandoff(target.id.clone()));
        }
        let config = &self.inner.config;
        if !config.enable_peer_handoffs && !config.is_supervisor(from) && !config.is_supervisor(&target.id) {
            return Err(HandoffError::PeerHandoffsDisabled {
                from: from.to_string(),
                to: target.id.clone(),
            });
        }
        let depth = turn.meta.active_handoff_stack.len().max(turn.hops);
        if depth >= config.max_handoff_depth {
            return Err(HandoffError::DepthExceeded(config.max_handoff_depth));
        }
        Ok(target)
    }

    /// Exact ID, then case-insensitive ID or name
    fn resolve_target(&self, reference: &str) -> Result<Arc<AgentDefinition>, HandoffError> {
        let catalog = self.inner.registry.catalog();
        let agent = catalog
            .get(reference)
            .or_else(|| catalog.find_by_name(reference))
            .ok_or_else(|| HandoffError::TargetNotFound(reference.to_string()))?;
        if !agent.can_receive_handoffs {
            return Err(HandoffError::TargetCannotReceive(agent.id.clone()));
        }
        Ok(agent)
    }

    fn supervisor_fallback(&self, from: &str) -> Option<Arc<AgentDefinition>> {
        let id = self.inner.config.supervisor()?;
        if id == from {
            return None;
        }
        let supervisor = self
            .inner
            .registry
            .get_agent(id)
            .filter(|a| a.can_receive_handoffs)?;
        debug!("Falling back to supervisor '{}' for handoff from '{}'", id, from);
        Some(supervisor)
    }
}

/// The orchestrator is itself a runtime, so it can sit behind anything that
/// drives one, such as the `sessions_send` tool.
#[async_trait]
impl AgentRuntime for Orchestrator {
    async fn process(
        &self,
        ctx: ExecutionContext,
        session: Session,
        message: Message,
    ) -> anyhow::Result<mpsc::Receiver<ResponseChunk>> {
        if self.inner.registry.is_empty() {
            return Err(HandoffError::NoAgents.into());
        }
        Ok(self.handle_message(ctx, session, message))
    }

    fn register_tool(&self, tool: Arc<dyn ToolHandler>) {
        self.register_tool_for_all(tool);
    }

    fn tool_names(&self) -> Vec<String> {
        let names: BTreeSet<String> = self
            .list_agents()
            .iter()
            .filter_map(|a| self.get_runtime(&a.id))
            .flat_map(|rt| rt.tool_names())
            .collect();
        names.into_iter().collect()
    }
}
