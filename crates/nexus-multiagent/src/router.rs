//! Router - decides whether a finished turn hands control to another agent

use async_trait::async_trait;
use nexus_core::ToolResult;
use parking_lot::Mutex;
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

use crate::error::HandoffError;
use crate::registry::AgentCatalog;
use crate::types::{AgentDefinition, HandoffRequest, HandoffRule, Trigger};

static EXPLICIT_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:hand\s*off|transfer|switch|route)\s+(?:this\s+|control\s+)?to\s+@?([\w-]+)")
        .expect("valid regex")
});
static MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)@([\w-]+)").expect("valid regex"));

const COMPLETION_PHRASES: &[&str] = &[
    "task complete",
    "task completed",
    "task done",
    "task is complete",
    "i'm done",
    "i am done",
    "completed successfully",
];

/// Labels a turn with one of the candidate intents
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, text: &str, candidates: &[String]) -> anyhow::Result<Option<String>>;
}

/// What happened during an agent's turn, as seen by the router
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnOutcome {
    pub text: String,
    /// Last tool result produced in the turn
    pub tool_result: Option<ToolResult>,
    pub tools_used: Vec<String>,
    pub error: Option<String>,
    pub task_complete: bool,
    pub intent: Option<String>,
    pub explicit_target: Option<String>,
}

impl TurnOutcome {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_tool_result(mut self, result: ToolResult) -> Self {
        if !self.tools_used.contains(&result.tool_name) {
            self.tools_used.push(result.tool_name.clone());
        }
        self.tool_result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn completed(mut self) -> Self {
        self.task_complete = true;
        self
    }

    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    pub fn with_explicit_target(mut self, target: impl Into<String>) -> Self {
        self.explicit_target = Some(target.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleScope {
    Agent,
    Global,
}

/// The rule and trigger that fired
#[derive(Debug, Clone, PartialEq)]
pub struct RouteMatch {
    pub target_agent_id: String,
    pub priority: i32,
    pub trigger: Trigger,
    pub scope: RuleScope,
    pub rule: HandoffRule,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RouteDecision {
    /// Keep the current agent
    Stay,
    /// The agent asked for a handoff through a tool
    Signal(HandoffRequest),
    /// A handoff rule fired
    Rule(RouteMatch),
}

/// True when a tool result is a handoff request emitted by the handoff tool
pub fn is_handoff_signal(result: &ToolResult) -> bool {
    signal_field(result, "handoff_request").is_some()
}

/// Extract the request from a handoff signal
pub fn parse_handoff_signal(result: &ToolResult) -> Result<HandoffRequest, HandoffError> {
    let request = signal_field(result, "handoff_request")
        .ok_or_else(|| HandoffError::InvalidRequest("tool result is not a handoff signal".into()))?;
    serde_json::from_value(request).map_err(|e| HandoffError::InvalidRequest(e.to_string()))
}

/// True when a tool result asks to give control back to the previous agent
pub fn is_return_signal(result: &ToolResult) -> bool {
    signal_field(result, "return_control").is_some()
}

fn signal_field(result: &ToolResult, key: &str) -> Option<Value> {
    if result.is_error {
        return None;
    }
    match serde_json::from_str::<Value>(&result.content) {
        Ok(Value::Object(mut map)) => map.remove(key),
        _ => None,
    }
}

/// Find an agent named in phrases like "hand off to coder" or "@coder"
pub fn detect_explicit_target(text: &str) -> Option<String> {
    EXPLICIT_PHRASE
        .captures(text)
        .or_else(|| MENTION.captures(text))
        .map(|caps| caps[1].to_string())
}

/// True when a reply announces that the agent finished its task
pub fn detect_completion(text: &str) -> bool {
    let text = text.to_lowercase();
    COMPLETION_PHRASES.iter().any(|p| text.contains(p))
}

/// Markdown list of agents for prompts and the list_agents tool
pub fn describe_agents(agents: &[Arc<AgentDefinition>]) -> String {
    let mut out = String::from("Available agents:\n\n");
    for agent in agents {
        out.push_str(&format!(
            "- **{}** ({}): {}",
            agent.display_name(),
            agent.id,
            agent.description
        ));
        if !agent.tools.is_empty() {
            out.push_str(&format!("\n  Tools: {}", agent.tools.join(", ")));
        }
        out.push_str("\n\n");
    }
    out
}

/// Turn signals derived once per evaluation
struct Signals {
    text: String,
    intent: Option<String>,
    explicit: Option<String>,
}

pub struct Router {
    catalog: AgentCatalog,
    global_rules: Vec<HandoffRule>,
    classifier: Option<Arc<dyn IntentClassifier>>,
    patterns: Mutex<HashMap<String, Option<Regex>>>,
}

impl Router {
    pub fn new(catalog: AgentCatalog, global_rules: Vec<HandoffRule>) -> Self {
        Self {
            catalog,
            global_rules,
            classifier: None,
            patterns: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Decide what follows `current`'s turn. Only a malformed handoff
    /// signal is an error; no matching rule means stay.
    pub async fn decide(
        &self,
        current: Option<&str>,
        outcome: &TurnOutcome,
    ) -> Result<RouteDecision, HandoffError> {
        if let Some(result) = &outcome.tool_result
            && is_handoff_signal(result)
        {
            return parse_handoff_signal(result).map(RouteDecision::Signal);
        }

        Ok(match self.match_rules(current, outcome).await {
            Some(found) => RouteDecision::Rule(found),
            None => RouteDecision::Stay,
        })
    }

    /// Evaluate the current agent's rules, then the global rules, by
    /// descending priority. Fallback triggers are only considered once
    /// every other trigger has failed.
    pub async fn match_rules(&self, current: Option<&str>, outcome: &TurnOutcome) -> Option<RouteMatch> {
        let rules = self.ordered_rules(current);
        if rules.is_empty() {
            return None;
        }

        let intent = match &outcome.intent {
            Some(intent) => Some(intent.clone()),
            None => self.classify(&rules, &outcome.text).await,
        };
        let signals = Signals {
            text: outcome.text.to_lowercase(),
            intent,
            explicit: outcome
                .explicit_target
                .clone()
                .or_else(|| detect_explicit_target(&outcome.text)),
        };

        let primary = rules.iter().find_map(|(scope, rule)| {
            rule.triggers
                .iter()
                .find(|t| !t.is_fallback() && self.trigger_matches(t, outcome, &signals))
                .map(|t| (*scope, rule, t))
        });
        let found = primary.or_else(|| {
            rules.iter().find_map(|(scope, rule)| {
                rule.triggers
                    .iter()
                    .find(|t| t.is_fallback())
                    .map(|t| (*scope, rule, t))
            })
        });

        let (scope, rule, trigger) = found?;
        debug!(
            "Rule matched: {} -> {} via {} (priority {})",
            current.unwrap_or("<none>"),
            rule.target_agent_id,
            trigger,
            rule.priority
        );
        Some(RouteMatch {
            target_agent_id: rule.target_agent_id.clone(),
            priority: rule.priority,
            trigger: trigger.clone(),
            scope,
            rule: rule.clone(),
        })
    }

    /// Candidate rules, highest priority first. The sort is stable, so ties
    /// keep declaration order with the agent's own rules ahead of globals.
    fn ordered_rules(&self, current: Option<&str>) -> Vec<(RuleScope, HandoffRule)> {
        let mut rules: Vec<(RuleScope, HandoffRule)> = Vec::new();
        if let Some(id) = current
            && let Some(agent) = self.catalog.get(id)
        {
            rules.extend(
                agent
                    .handoff_rules
                    .iter()
                    .cloned()
                    .map(|r| (RuleScope::Agent, r)),
            );
        }
        rules.extend(
            self.global_rules
                .iter()
                .cloned()
                .map(|r| (RuleScope::Global, r)),
        );
        rules.retain(|(_, r)| Some(r.target_agent_id.as_str()) != current);
        rules.sort_by_key(|(_, r)| Reverse(r.priority));
        rules
    }

    async fn classify(&self, rules: &[(RuleScope, HandoffRule)], text: &str) -> Option<String> {
        let classifier = self.classifier.as_ref()?;
        let mut labels: Vec<String> = Vec::new();
        for (_, rule) in rules {
            for trigger in &rule.triggers {
                if let Trigger::Intent(label) = trigger
                    && !labels.contains(label)
                {
                    labels.push(label.clone());
                }
            }
        }
        if labels.is_empty() {
            return None;
        }
        match classifier.classify(text, &labels).await {
            Ok(intent) => intent,
            Err(e) => {
                warn!("Intent classification failed: {}", e);
                None
            }
        }
    }

    fn trigger_matches(&self, trigger: &Trigger, outcome: &TurnOutcome, signals: &Signals) -> bool {
        match trigger {
            Trigger::Keyword(word) => !word.is_empty() && signals.text.contains(&word.to_lowercase()),
            Trigger::Pattern(pattern) => self
                .pattern(pattern)
                .is_some_and(|re| re.is_match(&outcome.text)),
            Trigger::Intent(label) => signals
                .intent
                .as_deref()
                .is_some_and(|i| i.to_lowercase() == label.to_lowercase()),
            Trigger::ToolUse(name) => outcome.tools_used.iter().any(|t| t == name),
            Trigger::Explicit(target) => signals.explicit.as_deref().is_some_and(|chosen| {
                target.is_empty()
                    || chosen.to_lowercase() == target.to_lowercase()
                    || self.catalog.resolve(chosen).is_some_and(|a| a.id == *target)
            }),
            Trigger::Always => true,
            Trigger::TaskComplete => outcome.task_complete,
            Trigger::Error => {
                outcome.error.is_some() || outcome.tool_result.as_ref().is_some_and(|r| r.is_error)
            }
            Trigger::Fallback => false,
        }
    }

    /// Compiled, case-insensitive pattern; invalid patterns are cached as
    /// misses and never match
    fn pattern(&self, pattern: &str) -> Option<Regex> {
        let mut cache = self.patterns.lock();
        cache
            .entry(pattern.to_string())
            .or_insert_with(|| {
                match RegexBuilder::new(pattern).case_insensitive(true).build() {
                    Ok(re) => Some(re),
                    Err(e) => {
                        warn!("Invalid pattern trigger '{}': {}", pattern, e);
                        None
                    }
                }
            })
            .clone()
    }

    /// Case-insensitive lookup by ID or name
    pub fn find_agent_by_name(&self, name: &str) -> Option<Arc<AgentDefinition>> {
        self.catalog.find_by_name(name)
    }

    /// Handoff-capable agents whose own rules match the outcome; all
    /// handoff-capable agents when none do
    pub fn candidate_agents(&self, outcome: &TurnOutcome) -> Vec<Arc<AgentDefinition>> {
        let signals = Signals {
            text: outcome.text.to_lowercase(),
            intent: outcome.intent.clone(),
            explicit: outcome
                .explicit_target
                .clone()
                .or_else(|| detect_explicit_target(&outcome.text)),
        };
        let targets = self.catalog.handoff_targets();
        let matching: Vec<Arc<AgentDefinition>> = targets
            .iter()
            .filter(|agent| {
                agent.handoff_rules.iter().any(|rule| {
                    rule.triggers
                        .iter()
                        .any(|t| !t.is_fallback() && self.trigger_matches(t, outcome, &signals))
                })
            })
            .cloned()
            .collect();
        if matching.is_empty() { targets } else { matching }
    }

    /// Markdown description of every registered agent
    pub fn build_agent_descriptions(&self) -> String {
        describe_agents(&self.catalog.list())
    }
}
