//! AGENTS.md parser - agent definitions written as markdown
//!
//! ```markdown
//! # Agent: coder
//! Name: Code Expert
//! Description: Writes and reviews code
//! Model: claude-sonnet
//!
//! ## System Prompt
//! You are a careful programmer.
//!
//! ## Tools
//! - read_file
//! - write_file
//!
//! ## Handoffs
//! - To: coordinator, Triggers: task_complete: error:, Return: true
//! ---
//! # Agent: coordinator
//! ...
//! ```

use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::types::{AgentDefinition, AgentManifest, ContextMode, HandoffRule, Trigger};

static AGENT_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^#\s+Agent:\s*(.+)$").expect("valid regex"));
static SECTION_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^##\s+(.+)$").expect("valid regex"));
static PROPERTY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_]+):\s*(.*)$").expect("valid regex"));
static BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-*]\s+(.+)$").expect("valid regex"));
static TOKEN_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s,]+").expect("valid regex"));

const RULE_KEYS: &[&str] = &[
    "to", "target", "trigger", "triggers", "context", "priority", "return", "message",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Header,
    Prompt,
    Description,
    Tools,
    Handoffs,
    Ignored,
}

impl Section {
    fn from_heading(heading: &str) -> Self {
        match heading.trim().to_lowercase().as_str() {
            "system prompt" | "prompt" => Self::Prompt,
            "description" => Self::Description,
            "tools" => Self::Tools,
            "handoffs" | "handoff rules" => Self::Handoffs,
            other => {
                debug!("Ignoring manifest section '{}'", other);
                Self::Ignored
            }
        }
    }
}

/// Agent block being assembled line by line
struct Block {
    agent: AgentDefinition,
    section: Section,
    prompt: Vec<String>,
    description: Vec<String>,
}

impl Block {
    fn new(id: &str) -> Self {
        Self {
            agent: AgentDefinition {
                id: id.trim().to_string(),
                can_receive_handoffs: true,
                ..Default::default()
            },
            section: Section::Header,
            prompt: Vec::new(),
            description: Vec::new(),
        }
    }

    fn push_line(&mut self, line: &str) {
        let trimmed = line.trim();
        match self.section {
            Section::Header => {
                if let Some(caps) = PROPERTY.captures(trimmed) {
                    self.set_property(&caps[1], caps[2].trim());
                }
            }
            Section::Prompt => self.prompt.push(line.to_string()),
            Section::Description => self.description.push(line.to_string()),
            Section::Tools => {
                if let Some(caps) = BULLET.captures(trimmed) {
                    self.agent.tools.push(caps[1].trim().to_string());
                }
            }
            Section::Handoffs => {
                if let Some(caps) = BULLET.captures(trimmed) {
                    match parse_handoff_line(&caps[1]) {
                        Some(rule) => self.agent.handoff_rules.push(rule),
                        None => warn!(
                            "Agent {}: skipping handoff without target: {}",
                            self.agent.id, trimmed
                        ),
                    }
                }
            }
            Section::Ignored => {}
        }
    }

    fn set_property(&mut self, key: &str, value: &str) {
        let key = key.to_lowercase().replace('_', "");
        let optional = || (!value.is_empty()).then(|| value.to_string());
        match key.as_str() {
            "name" => self.agent.name = value.to_string(),
            "description" => self.agent.description = value.to_string(),
            "model" => self.agent.model = optional(),
            "provider" => self.agent.provider = optional(),
            "agentdir" => self.agent.agent_dir = optional(),
            "maxiterations" => match value.parse::<usize>() {
                Ok(n) => self.agent.max_iterations = Some(n),
                Err(_) => warn!(
                    "Agent {}: ignoring non-numeric max_iterations '{}'",
                    self.agent.id, value
                ),
            },
            "canreceivehandoffs" => {
                let value = value.to_lowercase();
                self.agent.can_receive_handoffs = value == "true" || value == "yes";
            }
            _ => debug!("Agent {}: ignoring property '{}'", self.agent.id, key),
        }
    }

    fn finish(mut self) -> AgentDefinition {
        self.agent.system_prompt = self.prompt.join("\n").trim().to_string();
        if self.agent.description.is_empty() {
            self.agent.description = self.description.join("\n").trim().to_string();
        }
        if self.agent.name.is_empty() {
            self.agent.name = self.agent.id.clone();
        }
        self.agent
    }
}

/// Parse an AGENTS.md document. Content outside agent blocks is ignored,
/// so an empty document yields an empty manifest.
pub fn parse_agents_markdown(content: &str, source: &str) -> AgentManifest {
    let mut agents = Vec::new();
    let mut current: Option<Block> = None;

    for line in content.lines() {
        let trimmed = line.trim();

        if trimmed == "---" {
            if let Some(block) = current.take() {
                agents.push(block.finish());
            }
            continue;
        }

        if let Some(caps) = AGENT_HEADING.captures(trimmed) {
            if let Some(block) = current.take() {
                agents.push(block.finish());
            }
            current = Some(Block::new(&caps[1]));
            continue;
        }

        let Some(block) = current.as_mut() else {
            continue;
        };

        if let Some(caps) = SECTION_HEADING.captures(trimmed) {
            block.section = Section::from_heading(&caps[1]);
            continue;
        }

        block.push_line(line);
    }

    if let Some(block) = current.take() {
        agents.push(block.finish());
    }

    debug!("Parsed {} agent(s) from {}", agents.len(), source);
    AgentManifest {
        source: source.to_string(),
        agents,
    }
}

/// Split `key: value` when `key` is one of the handoff rule keys
fn split_rule_key(part: &str) -> Option<(String, &str)> {
    let idx = part.find(':')?;
    let key = part[..idx].trim().to_lowercase();
    RULE_KEYS
        .contains(&key.as_str())
        .then(|| (key, part[idx + 1..].trim()))
}

/// Parse one `## Handoffs` bullet; `None` when it names no target
pub fn parse_handoff_line(line: &str) -> Option<HandoffRule> {
    let mut target = String::new();
    let mut trigger_spec = String::new();
    let mut rule = HandoffRule::new(String::new(), Vec::new());
    let mut last_key = String::new();

    for part in line.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        let Some((key, value)) = split_rule_key(part) else {
            // Continuation of the previous value, e.g. `pattern:.*x.*` after `Triggers:`
            match last_key.as_str() {
                "trigger" | "triggers" => {
                    trigger_spec.push(' ');
                    trigger_spec.push_str(part);
                }
                "message" => {
                    if let Some(message) = rule.message.as_mut() {
                        message.push_str(", ");
                        message.push_str(part);
                    }
                }
                _ => debug!("Ignoring handoff fragment '{}'", part),
            }
            continue;
        };

        match key.as_str() {
            "to" | "target" => target = value.to_string(),
            "trigger" | "triggers" => {
                trigger_spec.push(' ');
                trigger_spec.push_str(value);
            }
            "context" => match value.parse::<ContextMode>() {
                Ok(mode) => rule.context_mode = Some(mode),
                Err(e) => warn!("{}; using the configured default", e),
            },
            "priority" => rule.priority = value.parse().unwrap_or(0),
            "return" => {
                let value = value.to_lowercase();
                rule.return_to_sender = value == "true" || value == "yes";
            }
            "message" => rule.message = Some(value.to_string()),
            _ => {}
        }
        last_key = key;
    }

    if target.is_empty() {
        return None;
    }
    rule.target_agent_id = target;
    rule.triggers = parse_triggers(&trigger_spec);
    Some(rule)
}

/// Parse a whitespace/comma separated trigger list
pub fn parse_triggers(spec: &str) -> Vec<Trigger> {
    TOKEN_SEPARATOR
        .split(spec)
        .filter(|token| !token.is_empty())
        .map(parse_trigger_token)
        .collect()
}

/// Parse one `type:value` token; bare or unknown tokens become keywords
pub fn parse_trigger_token(token: &str) -> Trigger {
    let Some(idx) = token.find(':').filter(|&i| i > 0) else {
        return Trigger::Keyword(token.to_string());
    };
    let value = token[idx + 1..].to_string();
    match token[..idx].to_lowercase().as_str() {
        "keyword" | "kw" => Trigger::Keyword(value),
        "pattern" | "regex" => Trigger::Pattern(value),
        "intent" => Trigger::Intent(value),
        "tool" | "tool_use" => Trigger::ToolUse(value),
        "explicit" => Trigger::Explicit(value),
        "fallback" => Trigger::Fallback,
        "always" => Trigger::Always,
        "task_complete" | "complete" => Trigger::TaskComplete,
        "error" => Trigger::Error,
        _ => Trigger::Keyword(token.to_string()),
    }
}

/// A ready-to-use three agent manifest: a coordinator and two specialists
pub fn example_agents_md() -> &'static str {
    r##"# Agents
#
# One block per agent. Blocks start with "# Agent: <id>" and are
# separated by a line containing only three dashes.

# Agent: coordinator
Name: Coordinator
Description: Understands the request and routes it to the right specialist

## System Prompt
You coordinate a small team of specialist agents. Work out what the user
needs, answer simple questions yourself, and hand anything substantial to
the specialist best suited for it.

Call list_agents if you are unsure who is available.

## Tools
- handoff
- list_agents

## Handoffs
- To: code-expert, Triggers: keyword:code keyword:bug keyword:programming, Context: summary
- To: research-expert, Triggers: keyword:research keyword:investigate, Context: full

---

# Agent: code-expert
Name: Code Expert
Description: Writes, debugs and reviews code

## System Prompt
You are an experienced software engineer. Write clear code, explain
trade-offs briefly, and review changes carefully.

## Tools
- read_file
- write_file
- run_command

## Handoffs
- To: coordinator, Triggers: task_complete: error:, Return: true

---

# Agent: research-expert
Name: Research Expert
Description: Finds, reads and summarizes information from the web

## System Prompt
You are a research specialist. Search thoroughly, cite what you read, and
summarize findings concisely.

## Tools
- web_search
- browse

## Handoffs
- To: coordinator, Triggers: task_complete: error:, Return: true
"##
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_two_blocks() {
        let content = r#"
# Agent: alpha
Name: Alpha
Description: First agent

## System Prompt
Line one.

Line two.

## Tools
- search
* fetch

---

# Agent: beta
Model: fast-model
can_receive_handoffs: no
"#;
        let manifest = parse_agents_markdown(content, "AGENTS.md");
        assert_eq!(manifest.source, "AGENTS.md");
        assert_eq!(manifest.agents.len(), 2);

        let alpha = &manifest.agents[0];
        assert_eq!(alpha.id, "alpha");
        assert_eq!(alpha.name, "Alpha");
        assert_eq!(alpha.description, "First agent");
        assert_eq!(alpha.system_prompt, "Line one.\n\nLine two.");
        assert_eq!(alpha.tools, vec!["search".to_string(), "fetch".to_string()]);
        assert!(alpha.can_receive_handoffs);

        let beta = &manifest.agents[1];
        assert_eq!(beta.name, "beta");
        assert_eq!(beta.model.as_deref(), Some("fast-model"));
        assert!(!beta.can_receive_handoffs);
    }

    #[test]
    fn test_heading_starts_new_block_without_separator() {
        let content = "# Agent: a\nName: A\n# Agent: b\nName: B\n";
        let manifest = parse_agents_markdown(content, "inline");
        let ids: Vec<&str> = manifest.agents.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(manifest.agents[1].name, "B");
    }

    #[test]
    fn test_empty_document() {
        assert!(parse_agents_markdown("", "empty").agents.is_empty());
        assert!(parse_agents_markdown("# Just a title\n\nSome prose.\n", "prose").agents.is_empty());
    }

    #[test]
    fn test_property_keys_are_normalized() {
        let content = "# Agent: a\nMAX_ITERATIONS: 7\nAgentDir: ./state/a\nCan_Receive_Handoffs: YES\nProvider: local\n";
        let agent = &parse_agents_markdown(content, "x").agents[0];
        assert_eq!(agent.max_iterations, Some(7));
        assert_eq!(agent.agent_dir.as_deref(), Some("./state/a"));
        assert!(agent.can_receive_handoffs);
        assert_eq!(agent.provider.as_deref(), Some("local"));
    }

    #[test]
    fn test_unparsable_max_iterations_ignored() {
        let agent = &parse_agents_markdown("# Agent: a\nmax_iterations: lots\n", "x").agents[0];
        assert_eq!(agent.max_iterations, None);
    }

    #[test]
    fn test_description_section_used_without_key() {
        let content = "# Agent: a\n\n## Description\nHandles billing\nquestions.\n\n## Prompt\nBe nice.\n";
        let agent = &parse_agents_markdown(content, "x").agents[0];
        assert_eq!(agent.description, "Handles billing\nquestions.");
        assert_eq!(agent.system_prompt, "Be nice.");
    }

    #[test]
    fn test_unknown_section_ignored() {
        let content = "# Agent: a\n## Notes\n- not a tool\n## Tools\n- real\n";
        let agent = &parse_agents_markdown(content, "x").agents[0];
        assert_eq!(agent.tools, vec!["real".to_string()]);
    }

    #[test]
    fn test_parse_handoff_line_full() {
        let rule = parse_handoff_line(
            "To: coder, Triggers: keyword:code pattern:fix.*, Context: last_n, Priority: 5, Return: yes, Message: Be brief",
        )
        .unwrap();
        assert_eq!(rule.target_agent_id, "coder");
        assert_eq!(
            rule.triggers,
            vec![
                Trigger::Keyword("code".into()),
                Trigger::Pattern("fix.*".into())
            ]
        );
        assert_eq!(rule.context_mode, Some(ContextMode::LastN));
        assert_eq!(rule.priority, 5);
        assert!(rule.return_to_sender);
        assert_eq!(rule.message.as_deref(), Some("Be brief"));
    }

    #[test]
    fn test_triggers_gathered_across_commas() {
        let rule = parse_handoff_line("To: helper, Triggers: keyword:help, pattern:.*error.*, Priority: 2").unwrap();
        assert_eq!(
            rule.triggers,
            vec![
                Trigger::Keyword("help".into()),
                Trigger::Pattern(".*error.*".into())
            ]
        );
        assert_eq!(rule.priority, 2);
    }

    #[test]
    fn test_handoff_without_target_skipped() {
        assert!(parse_handoff_line("Triggers: keyword:x").is_none());
        let content = "# Agent: a\n## Handoffs\n- Triggers: always:\n- Target: b, Trigger: always:\n";
        let agent = &parse_agents_markdown(content, "x").agents[0];
        assert_eq!(agent.handoff_rules.len(), 1);
        assert_eq!(agent.handoff_rules[0].target_agent_id, "b");
        assert_eq!(agent.handoff_rules[0].triggers, vec![Trigger::Always]);
    }

    #[test]
    fn test_bad_priority_and_context_fall_back() {
        let rule = parse_handoff_line("To: b, Priority: high, Context: filtered").unwrap();
        assert_eq!(rule.priority, 0);
        assert_eq!(rule.context_mode, None);
        assert!(rule.triggers.is_empty());
    }

    #[test]
    fn test_trigger_tokens() {
        assert_eq!(parse_trigger_token("kw:deploy"), Trigger::Keyword("deploy".into()));
        assert_eq!(parse_trigger_token("regex:^go"), Trigger::Pattern("^go".into()));
        assert_eq!(parse_trigger_token("intent:billing"), Trigger::Intent("billing".into()));
        assert_eq!(parse_trigger_token("tool:exec"), Trigger::ToolUse("exec".into()));
        assert_eq!(parse_trigger_token("tool_use:exec"), Trigger::ToolUse("exec".into()));
        assert_eq!(parse_trigger_token("explicit:"), Trigger::Explicit(String::new()));
        assert_eq!(parse_trigger_token("fallback:"), Trigger::Fallback);
        assert_eq!(parse_trigger_token("always:"), Trigger::Always);
        assert_eq!(parse_trigger_token("complete:"), Trigger::TaskComplete);
        assert_eq!(parse_trigger_token("Error:"), Trigger::Error);
        assert_eq!(parse_trigger_token("weather"), Trigger::Keyword("weather".into()));
        assert_eq!(parse_trigger_token("mood:happy"), Trigger::Keyword("mood:happy".into()));
        assert_eq!(parse_trigger_token(":odd"), Trigger::Keyword(":odd".into()));
    }

    #[test]
    fn test_example_manifest_parses() {
        let manifest = parse_agents_markdown(example_agents_md(), "example");
        assert!(manifest.agents.len() >= 2);
        let ids: Vec<&str> = manifest.agents.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["coordinator", "code-expert", "research-expert"]);

        let coordinator = &manifest.agents[0];
        assert_eq!(coordinator.handoff_rules.len(), 2);
        assert_eq!(coordinator.handoff_rules[0].context_mode, Some(ContextMode::Summary));
        assert!(coordinator.system_prompt.starts_with("You coordinate"));

        let coder = &manifest.agents[1];
        assert_eq!(
            coder.handoff_rules[0].triggers,
            vec![Trigger::TaskComplete, Trigger::Error]
        );
        assert!(coder.handoff_rules[0].return_to_sender);
    }

    #[test]
    fn test_example_manifest_keeps_quoted_heading_comment() {
        let example = example_agents_md();
        assert!(example.starts_with("# Agents\n"));
        assert!(example.contains("Blocks start with \"# Agent: <id>\" and are"));
        assert!(example.ends_with("Return: true\n"));
        assert_eq!(parse_agents_markdown(example, "example").agents.len(), 3);
    }
}
