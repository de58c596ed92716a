use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use nexus_core::{ChannelType, ExecutionContext, Message, ResponseChunk, Session, SessionStore};
use nexus_multiagent::{
    AgentCatalog, AgentManifest, ConfigError, MultiAgentConfig, Orchestrator, Router,
    TurnOutcome, config_from_manifest, discover_agents_files, example_agents_md,
    load_agents_manifest, load_all_agents_files, load_config, validate_manifest,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod echo;

use config::NexusConfig;
use echo::EchoFactory;

#[derive(Parser)]
#[command(name = "nexus")]
#[command(version)]
#[command(about = "Nexus - multi-agent orchestration for your assistant")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config directory, default config and an example AGENTS.md
    Init,

    /// Validate a YAML team config or an AGENTS.md manifest
    Validate {
        /// File to validate (.yaml/.yml or .md)
        path: PathBuf,
    },

    /// List the agents of a team
    Agents {
        /// Team config, manifest, or directory (defaults to the configured sources)
        path: Option<PathBuf>,
    },

    /// Find AGENTS.md and *.agents.md files under a directory
    Discover {
        /// Directory to scan
        #[arg(default_value = ".")]
        root: PathBuf,

        /// Merge and validate the discovered manifests
        #[arg(long)]
        merge: bool,
    },

    /// Print an example AGENTS.md
    Example,

    /// Show where the router would send a message, without running agents
    Route {
        /// The message to route
        message: String,

        /// Agent that is handling the conversation (defaults to the default agent)
        #[arg(short, long)]
        agent: Option<String>,

        /// Team config, manifest, or directory
        #[arg(short, long)]
        team: Option<PathBuf>,
    },

    /// Run messages through the orchestrator with offline echo agents.
    /// A message like `/handoff {"target_agent": "code-expert"}` calls a tool.
    Simulate {
        /// Messages to send, in order, on one session
        #[arg(required = true)]
        messages: Vec<String>,

        /// Team config, manifest, or directory
        #[arg(short, long)]
        team: Option<PathBuf>,
    },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Validate { path } => cmd_validate(&path),
        Commands::Agents { path } => cmd_agents(&cli.config, path.as_deref()),
        Commands::Discover { root, merge } => cmd_discover(&root, merge),
        Commands::Example => {
            print!("{}", example_agents_md());
            Ok(())
        }
        Commands::Route {
            message,
            agent,
            team,
        } => cmd_route(&cli.config, team.as_deref(), &message, agent.as_deref()).await,
        Commands::Simulate { messages, team } => {
            cmd_simulate(&cli.config, team.as_deref(), &messages).await
        }
        Commands::Config => cmd_config(&cli.config),
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;
        info!("Created default config at {}", config_path.display());
    }

    let manifest_path = config_dir.join("AGENTS.md");
    if !manifest_path.exists() {
        tokio::fs::write(&manifest_path, example_agents_md()).await?;
        info!("Created AGENTS.md at {}", manifest_path.display());
    }

    println!("Nexus initialized at {}", config_dir.display());
    println!("Edit {} to define your agents.", manifest_path.display());
    Ok(())
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
}

fn print_validation(err: &ConfigError) {
    for e in err.validation_errors() {
        println!("  - {}", e);
    }
}

fn cmd_validate(path: &Path) -> Result<()> {
    let result = if is_yaml(path) {
        load_config(path).map(|c| c.agents.len())
    } else {
        load_agents_manifest(path).map(|m| m.agents.len())
    };

    match result {
        Ok(count) => {
            println!("{}: OK ({} agent(s))", path.display(), count);
            Ok(())
        }
        Err(e @ ConfigError::Validation(_)) => {
            println!("{}: invalid", path.display());
            print_validation(&e);
            bail!("{}", e)
        }
        Err(e) => Err(anyhow::Error::new(e).context(format!("Failed to load {}", path.display()))),
    }
}

fn validated(manifest: AgentManifest) -> Result<MultiAgentConfig> {
    let errors = validate_manifest(&manifest);
    if !errors.is_empty() {
        let err = ConfigError::Validation(errors);
        print_validation(&err);
        bail!("{} ({})", err, manifest.source);
    }
    Ok(config_from_manifest(&manifest))
}

fn team_from_dir(root: &Path) -> Result<MultiAgentConfig> {
    let files = discover_agents_files(root)?;
    if files.is_empty() {
        bail!("No AGENTS.md files found under {}", root.display());
    }
    validated(load_all_agents_files(&files)?)
}

fn team_from_path(path: &Path) -> Result<MultiAgentConfig> {
    if path.is_dir() {
        team_from_dir(path)
    } else if is_yaml(path) {
        Ok(load_config(path)?)
    } else {
        Ok(config_from_manifest(&load_agents_manifest(path)?))
    }
}

/// Resolve the team: an explicit path, else the sources in the CLI config
fn load_team(config_path: &Option<PathBuf>, path: Option<&Path>) -> Result<MultiAgentConfig> {
    if let Some(path) = path {
        return team_from_path(path);
    }

    let config = NexusConfig::load(config_path)?;
    let sources = &config.agents;
    if let Some(file) = &sources.config_file {
        return Ok(load_config(Path::new(file))?);
    }
    if !sources.manifests.is_empty() {
        let paths: Vec<PathBuf> = sources.manifests.iter().map(PathBuf::from).collect();
        return validated(load_all_agents_files(&paths)?);
    }
    if let Some(root) = &sources.discover_root {
        return team_from_dir(Path::new(root));
    }
    bail!("No agents configured. Pass a path or run `nexus init`.")
}

fn cmd_agents(config_path: &Option<PathBuf>, path: Option<&Path>) -> Result<()> {
    let team = load_team(config_path, path)?;

    println!("{:<20} {:<24} {:<8} RULES", "ID", "NAME", "HANDOFF");
    for agent in &team.agents {
        let mut flags = String::new();
        if team.default_agent() == Some(agent.id.as_str()) {
            flags.push_str(" (default)");
        }
        if team.is_supervisor(&agent.id) {
            flags.push_str(" (supervisor)");
        }
        println!(
            "{:<20} {:<24} {:<8} {}{}",
            agent.id,
            agent.name,
            if agent.can_receive_handoffs { "yes" } else { "no" },
            agent.handoff_rules.len(),
            flags
        );
    }
    println!(
        "\npeer handoffs: {}, max depth: {}, timeout: {:?}, context: {}",
        team.enable_peer_handoffs,
        team.max_handoff_depth,
        team.handoff_timeout,
        team.default_context_mode
    );
    Ok(())
}

fn cmd_discover(root: &Path, merge: bool) -> Result<()> {
    let files = discover_agents_files(root)?;
    if files.is_empty() {
        println!("No AGENTS.md files found under {}", root.display());
        return Ok(());
    }
    for file in &files {
        println!("{}", file.display());
    }

    if merge {
        let team = validated(load_all_agents_files(&files)?)?;
        let ids: Vec<&str> = team.agents.iter().map(|a| a.id.as_str()).collect();
        println!("\nMerged {} agent(s): {}", ids.len(), ids.join(", "));
    }
    Ok(())
}

async fn cmd_route(
    config_path: &Option<PathBuf>,
    team_path: Option<&Path>,
    message: &str,
    agent: Option<&str>,
) -> Result<()> {
    let team = load_team(config_path, team_path)?;
    let current = agent
        .or(team.default_agent())
        .context("No agent given and the team has no default agent")?;

    let catalog = AgentCatalog::new();
    for def in &team.agents {
        catalog.insert(def.clone());
    }
    if !catalog.contains(current) {
        bail!("Unknown agent: {}", current);
    }

    let router = Router::new(catalog, team.global_handoff_rules.clone());
    match router
        .match_rules(Some(current), &TurnOutcome::from_text(message))
        .await
    {
        Some(found) => {
            println!(
                "{} -> {} (trigger {}, priority {})",
                current, found.target_agent_id, found.trigger, found.priority
            );
            if found.rule.return_to_sender {
                println!("control returns to {} afterwards", current);
            }
        }
        None => println!("{} keeps the conversation", current),
    }
    Ok(())
}

async fn cmd_simulate(
    config_path: &Option<PathBuf>,
    team_path: Option<&Path>,
    messages: &[String],
) -> Result<()> {
    let settings = NexusConfig::load(config_path)?.simulate;
    let team = load_team(config_path, team_path)?;

    let store = Arc::new(nexus_core::MemorySessionStore::new());
    let orchestrator = Orchestrator::new(team, Arc::new(EchoFactory), store.clone())?;
    if settings.show_events {
        orchestrator.set_event_callback(|event| {
            if let Ok(line) = serde_json::to_string(event) {
                println!("  event: {}", line);
            }
        });
    }

    let session = store
        .create(Session::new("simulate", ChannelType::from_string(&settings.channel)))
        .await?;

    for text in messages {
        println!("> {}", text);
        let mut rx = orchestrator.handle_message(
            ExecutionContext::new(),
            session.clone(),
            Message::user(&session.id, text.as_str()).with_channel(session.channel),
        );
        while let Some(chunk) = rx.recv().await {
            match chunk {
                ResponseChunk::Text(t) => println!("{}", t),
                ResponseChunk::ToolResult(r) => println!("  tool {}: {}", r.tool_name, r.content),
                ResponseChunk::Error(e) => println!("  error: {}", e),
            }
        }
    }
    Ok(())
}

fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let config = NexusConfig::load(config_path)?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
