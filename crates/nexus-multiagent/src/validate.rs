//! Referential and uniqueness checks for configs and manifests

use regex::RegexBuilder;
use std::collections::{HashMap, HashSet};

use crate::error::ValidationError;
use crate::types::{AgentDefinition, AgentManifest, HandoffRule, MultiAgentConfig, Trigger};

/// Validate a full config, reporting every violation found
pub fn validate_config(config: &MultiAgentConfig) -> Vec<ValidationError> {
    let mut errors = check_agents(&config.agents);
    let agents = by_id(&config.agents);
    let ids: HashSet<&str> = agents.keys().copied().collect();

    if config.max_handoff_depth == 0 {
        errors.push(ValidationError::new("max_handoff_depth must be at least 1"));
    }
    if config.handoff_timeout.is_zero() {
        errors.push(ValidationError::new("handoff_timeout must be greater than zero"));
    }

    if let Some(id) = config.default_agent()
        && !ids.contains(id)
    {
        errors.push(ValidationError::new(format!("default agent not found: {}", id)));
    }

    if let Some(id) = config.supervisor()
        && !ids.contains(id)
    {
        errors.push(ValidationError::new(format!("supervisor agent not found: {}", id)));
    }

    for (i, rule) in config.global_handoff_rules.iter().enumerate() {
        for problem in check_rule(rule, None, &agents) {
            errors.push(ValidationError::new(format!("global rule {}: {}", i, problem)));
        }
    }

    errors
}

/// Validate the agents of a parsed manifest
pub fn validate_manifest(manifest: &AgentManifest) -> Vec<ValidationError> {
    check_agents(&manifest.agents)
}

/// Per-agent checks shared by configs and manifests
fn check_agents(agents: &[AgentDefinition]) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut dirs: HashMap<String, &str> = HashMap::new();

    for agent in agents {
        if agent.id.trim().is_empty() {
            errors.push(ValidationError::new("agent has empty ID"));
            continue;
        }
        if !seen.insert(agent.id.as_str()) {
            errors.push(ValidationError::new(format!("duplicate agent ID: {}", agent.id)));
        }

        if let Some(dir) = agent.agent_dir.as_deref().filter(|d| !d.trim().is_empty()) {
            let normalized = normalize_dir(dir);
            match dirs.get(&normalized) {
                Some(owner) if *owner != agent.id => {
                    errors.push(ValidationError::for_agent(
                        &agent.id,
                        format!("agent_dir {} already used by agent {}", dir, owner),
                    ));
                }
                Some(_) => {}
                None => {
                    dirs.insert(normalized, &agent.id);
                }
            }
        }
    }

    let known = by_id(agents);
    for agent in agents {
        for rule in &agent.handoff_rules {
            for problem in check_rule(rule, Some(&agent.id), &known) {
                errors.push(ValidationError::for_agent(&agent.id, problem));
            }
        }
    }

    errors
}

/// First definition per ID
fn by_id(agents: &[AgentDefinition]) -> HashMap<&str, &AgentDefinition> {
    let mut map = HashMap::new();
    for agent in agents {
        map.entry(agent.id.as_str()).or_insert(agent);
    }
    map
}

/// Problems with one rule; `owner` is `None` for global rules
fn check_rule(
    rule: &HandoffRule,
    owner: Option<&str>,
    agents: &HashMap<&str, &AgentDefinition>,
) -> Vec<String> {
    let mut problems = Vec::new();
    let target = rule.target_agent_id.as_str();
    match agents.get(target) {
        None => problems.push(format!("handoff target not found: {}", target)),
        Some(_) if owner == Some(target) => {
            problems.push(format!("handoff rule targets its own agent: {}", target))
        }
        Some(agent) if !agent.can_receive_handoffs => {
            problems.push(format!("handoff target does not accept handoffs: {}", target))
        }
        Some(_) => {}
    }

    for trigger in &rule.triggers {
        if let Trigger::Pattern(pattern) = trigger
            && RegexBuilder::new(pattern).case_insensitive(true).build().is_err()
        {
            problems.push(format!("invalid pattern trigger: {}", pattern));
        }
    }
    problems
}

/// Lexically clean a directory path: drop `.` segments, fold `..` into
/// their parent, and strip trailing separators.
pub fn normalize_dir(dir: &str) -> String {
    let dir = dir.trim();
    let absolute = dir.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for segment in dir.split('/') {
        match segment {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}
