use anyhow::{Context, Result};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::LazyLock;
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NexusConfig {
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub simulate: SimulateConfig,
}

/// Where the agent team comes from
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentsConfig {
    #[serde(default)]
    pub config_file: Option<String>,
    #[serde(default)]
    pub manifests: Vec<String>,
    #[serde(default)]
    pub discover_root: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulateConfig {
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default = "default_show_events")]
    pub show_events: bool,
}

fn default_channel() -> String {
    "internal".to_string()
}

fn default_show_events() -> bool {
    true
}

impl Default for SimulateConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            show_events: default_show_events(),
        }
    }
}

pub fn config_dir() -> PathBuf {
    if let Ok(home) = std::env::var("NEXUS_HOME")
        && !home.is_empty()
    {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".nexus")
}

impl NexusConfig {
    /// Load the CLI config. A missing default config is not an error; a
    /// missing custom path is.
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = match custom_path {
            Some(path) => path.clone(),
            None => {
                let path = config_dir().join("config.toml");
                if !path.exists() {
                    return Ok(Self::default());
                }
                path
            }
        };

        let content = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `nexus init` first.",
                path.display()
            )
        })?;
        Self::parse(&content).with_context(|| format!("Failed to parse config at {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_placeholders(content);
        Ok(toml::from_str(&expanded)?)
    }
}

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));

/// Resolved value of a supported `${NAME}` placeholder
fn placeholder_value(name: &str) -> Option<String> {
    match name {
        "NEXUS_HOME" => Some(config_dir().display().to_string()),
        "HOME" => dirs::home_dir().map(|p| p.display().to_string()),
        _ => None,
    }
}

/// Replace `${NEXUS_HOME}` with the Nexus directory and `${HOME}` with the
/// user's home. Other placeholders stay as written.
fn expand_placeholders(content: &str) -> String {
    PLACEHOLDER
        .replace_all(content, |caps: &Captures| {
            placeholder_value(&caps[1]).unwrap_or_else(|| {
                warn!(
                    "Config placeholder {} left as is; only ${{NEXUS_HOME}} and ${{HOME}} are substituted",
                    &caps[0]
                );
                caps[0].to_string()
            })
        })
        .into_owned()
}
