//! Loading, saving, and discovering multi-agent configuration

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::ConfigError;
use crate::manifest::parse_agents_markdown;
use crate::types::{AgentManifest, MultiAgentConfig};
use crate::validate::{validate_config, validate_manifest};

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse a YAML config and fill in defaults, without validating it
pub fn parse_config_yaml(content: &str) -> Result<MultiAgentConfig, ConfigError> {
    let mut config: MultiAgentConfig = serde_yml::from_str(content)?;
    config.apply_defaults();
    Ok(config)
}

/// Load and validate a YAML config from disk
pub fn load_config(path: &Path) -> Result<MultiAgentConfig, ConfigError> {
    let content = read_file(path)?;
    let config = parse_config_yaml(&content)?;

    let errors = validate_config(&config);
    if !errors.is_empty() {
        warn!("Config {} has {} validation error(s)", path.display(), errors.len());
        return Err(ConfigError::Validation(errors));
    }

    info!("Loaded {} agent(s) from {}", config.agents.len(), path.display());
    Ok(config)
}

/// Write a config back out as YAML, creating parent directories
pub fn save_config(config: &MultiAgentConfig, path: &Path) -> Result<(), ConfigError> {
    let yaml = serde_yml::to_string(config)?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, yaml).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Saved config to {}", path.display());
    Ok(())
}

/// Read, parse, and validate one AGENTS.md file
pub fn load_agents_manifest(path: &Path) -> Result<AgentManifest, ConfigError> {
    let content = read_file(path)?;
    let manifest = parse_agents_markdown(&content, &path.display().to_string());

    let errors = validate_manifest(&manifest);
    if !errors.is_empty() {
        warn!("Manifest {} has {} validation error(s)", path.display(), errors.len());
        return Err(ConfigError::Validation(errors));
    }

    info!("Loaded {} agent(s) from {}", manifest.agents.len(), path.display());
    Ok(manifest)
}

/// Load several manifests and concatenate their agents. Each file is
/// validated on its own; duplicates across files are left for the caller
/// to catch by validating the merged result.
pub fn load_all_agents_files(paths: &[PathBuf]) -> Result<AgentManifest, ConfigError> {
    let mut merged = AgentManifest::default();
    let mut sources = Vec::with_capacity(paths.len());

    for path in paths {
        let manifest = load_agents_manifest(path)?;
        sources.push(manifest.source);
        merged.agents.extend(manifest.agents);
    }

    merged.source = sources.join(", ");
    Ok(merged)
}

fn is_agents_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_lowercase())
        .is_some_and(|n| n == "agents.md" || n.ends_with(".agents.md"))
}

/// Find `AGENTS.md` and `*.agents.md` files under `root`, sorted by path
pub fn discover_agents_files(root: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let base = glob::Pattern::escape(&root.display().to_string());
    let pattern = format!("{}/**/*.md", base.trim_end_matches('/'));
    let options = glob::MatchOptions {
        case_sensitive: false,
        ..Default::default()
    };

    let mut found: Vec<PathBuf> = glob::glob_with(&pattern, options)?
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Skipping unreadable path during discovery: {}", e);
                None
            }
        })
        .filter(|p| p.is_file() && is_agents_file(p))
        .collect();

    found.sort();
    debug!("Discovered {} manifest(s) under {}", found.len(), root.display());
    Ok(found)
}

/// Turn a manifest into a config: peer handoffs on, first agent as default
pub fn config_from_manifest(manifest: &AgentManifest) -> MultiAgentConfig {
    MultiAgentConfig {
        default_agent_id: manifest.agents.first().map(|a| a.id.clone()),
        agents: manifest.agents.clone(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::example_agents_md;
    use crate::types::{ContextMode, Trigger};
    use std::time::Duration;
    use tempfile::TempDir;

    const YAML: &str = r#"
default_agent_id: router
supervisor_agent_id: router
enable_peer_handoffs: true
handoff_timeout: 90s
default_context_mode: summary
agents:
  - id: router
    name: Router
    system_prompt: Route things.
    can_receive_handoffs: true
  - id: coder
    tools: [read_file]
    can_receive_handoffs: true
    handoff_rules:
      - target_agent_id: router
        priority: 2
        return_to_sender: true
        triggers:
          - type: task_complete
          - type: keyword
            value: done
global_handoff_rules:
  - target_agent_id: coder
    triggers:
      - type: pattern
        value: "fix .*"
"#;

    #[test]
    fn test_parse_config_yaml() {
        let config = parse_config_yaml(YAML).unwrap();
        assert_eq!(config.default_agent(), Some("router"));
        assert_eq!(config.supervisor(), Some("router"));
        assert_eq!(config.handoff_timeout, Duration::from_secs(90));
        assert_eq!(config.max_handoff_depth, 10);
        assert_eq!(config.default_context_mode, ContextMode::Summary);
        assert_eq!(config.agents.len(), 2);
        assert_eq!(config.agents[1].name, "coder");

        let rule = &config.agents[1].handoff_rules[0];
        assert_eq!(rule.priority, 2);
        assert!(rule.return_to_sender);
        assert_eq!(
            rule.triggers,
            vec![Trigger::TaskComplete, Trigger::Keyword("done".into())]
        );
        assert_eq!(
            config.global_handoff_rules[0].triggers,
            vec![Trigger::Pattern("fix .*".into())]
        );
    }

    #[test]
    fn test_parse_minimal_yaml_defaults() {
        let config = parse_config_yaml("agents:\n  - id: solo\n").unwrap();
        assert_eq!(config.handoff_timeout, Duration::from_secs(300));
        assert_eq!(config.max_handoff_depth, 10);
        assert_eq!(config.default_context_mode, ContextMode::Full);
        assert!(!config.enable_peer_handoffs);
        assert_eq!(config.agents[0].name, "solo");
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let err = parse_config_yaml("agents: [unclosed").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn test_load_config_rejects_invalid() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("agents.yaml");
        std::fs::write(
            &path,
            "default_agent_id: ghost\nagents:\n  - id: a\n  - id: a\n",
        )
        .unwrap();

        let err = load_config(&path).unwrap_err();
        let errors = err.validation_errors();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_load_config_zero_limits_mean_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("agents.yaml");
        std::fs::write(
            &path,
            "max_handoff_depth: 0\nhandoff_timeout: 0s\nagents:\n  - id: a\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.max_handoff_depth, 10);
        assert_eq!(config.handoff_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_load_config_rejects_bad_pattern() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("agents.yaml");
        std::fs::write(
            &path,
            "agents:\n  - id: a\n  - id: b\n    handoff_rules:\n      - target_agent_id: a\n        triggers:\n          - type: pattern\n            value: \"(unclosed\"\n",
        )
        .unwrap();

        let err = load_config(&path).unwrap_err();
        let errors: Vec<String> = err.validation_errors().iter().map(|e| e.to_string()).collect();
        assert_eq!(errors, vec!["agent b: invalid pattern trigger: (unclosed"]);
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_config(Path::new("/nonexistent/agents.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_save_and_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("agents.yaml");
        let config = parse_config_yaml(YAML).unwrap();

        save_config(&config, &path).unwrap();
        let reloaded = load_config(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_load_agents_manifest() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("AGENTS.md");
        std::fs::write(&path, example_agents_md()).unwrap();

        let manifest = load_agents_manifest(&path).unwrap();
        assert_eq!(manifest.agents.len(), 3);
        assert!(manifest.source.ends_with("AGENTS.md"));
    }

    #[test]
    fn test_duplicate_in_manifest_reported_once() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("AGENTS.md");
        std::fs::write(&path, "# Agent: twin\n---\n# Agent: twin\n").unwrap();

        let err = load_agents_manifest(&path).unwrap_err();
        let errors = err.validation_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("duplicate agent ID: twin"));
    }

    #[test]
    fn test_discover_and_merge() {
        let tmp = TempDir::new().unwrap();
        let nested = tmp.path().join("team").join("ops");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(tmp.path().join("AGENTS.md"), "# Agent: a\n").unwrap();
        std::fs::write(nested.join("deploy.agents.md"), "# Agent: b\n").unwrap();
        std::fs::write(nested.join("Agents.md"), "# Agent: c\n").unwrap();
        std::fs::write(nested.join("README.md"), "# Agent: nope\n").unwrap();

        let found = discover_agents_files(tmp.path()).unwrap();
        assert_eq!(found.len(), 3);
        let mut sorted = found.clone();
        sorted.sort();
        assert_eq!(found, sorted);

        let merged = load_all_agents_files(&found).unwrap();
        let mut ids: Vec<&str> = merged.agents.iter().map(|a| a.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_merge_keeps_duplicates_for_validation() {
        let tmp = TempDir::new().unwrap();
        let first = tmp.path().join("one.agents.md");
        let second = tmp.path().join("two.agents.md");
        std::fs::write(&first, "# Agent: shared\n").unwrap();
        std::fs::write(&second, "# Agent: shared\n").unwrap();

        let merged = load_all_agents_files(&[first, second]).unwrap();
        assert_eq!(merged.agents.len(), 2);
        assert_eq!(validate_manifest(&merged).len(), 1);
    }

    #[test]
    fn test_config_from_manifest() {
        let manifest = crate::manifest::parse_agents_markdown(example_agents_md(), "example");
        let config = config_from_manifest(&manifest);
        assert_eq!(config.default_agent(), Some("coordinator"));
        assert!(config.enable_peer_handoffs);
        assert_eq!(config.agents.len(), 3);
        assert!(validate_config(&config).is_empty());

        let empty = config_from_manifest(&AgentManifest::default());
        assert!(empty.default_agent().is_none());
    }
}
