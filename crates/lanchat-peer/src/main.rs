//! LAN chat peer entry point.
//!
//! Finds other peers on the LAN, keeps at most one authenticated
//! connection, and relays chat lines between the console and that
//! connection.
//!
//! # Usage
//!
//! ```text
//! lanchat-peer [OPTIONS]
//!
//! Options:
//!   --config <PATH>            Config file [default: platform config dir]
//!   --name <NAME>              Display name
//!   --port <PORT>              TCP chat port [default: 7878]
//!   --discovery-port <PORT>    UDP discovery port [default: 7879]
//!   --secret "a,b,c"           Shared names (otherwise prompted)
//!   --connect <HOST:PORT>      Dial this peer at startup
//!   --no-discovery             Neither announce nor auto-connect
//!   --no-prompt                Answer challenges with --secret, never ask
//!   --save-config              Write the merged settings to the config file and exit
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                  | Flag               |
//! |---------------------------|--------------------|
//! | `LANCHAT_CONFIG`          | `--config`         |
//! | `LANCHAT_NAME`            | `--name`           |
//! | `LANCHAT_PORT`            | `--port`           |
//! | `LANCHAT_DISCOVERY_PORT`  | `--discovery-port` |
//! | `LANCHAT_SECRET`          | `--secret`         |
//!
//! # Architecture
//!
//! ```text
//! main()
//!  ├─ load config, apply CLI overrides, init tracing
//!  ├─ ConsoleRouter (stdin task)
//!  ├─ PeerNode::bind + run   (listener, discovery thread, coordinator)
//!  └─ loop: console commands ─► NodeCommand
//!           NodeNotification ─► stdout
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use lanchat_core::{Secret, SecretProvider, StaticSecretProvider};
use lanchat_peer::infrastructure::console::{ConsoleCommand, ConsoleRouter, PromptSecretProvider};
use lanchat_peer::infrastructure::network::discovery::DiscoveryConfig;
use lanchat_peer::infrastructure::node::{NodeCommand, NodeNotification, NodeSettings, PeerNode};
use lanchat_peer::infrastructure::storage::config::{
    config_file_path, load_config, load_config_from, save_config_to, AppConfig, ConfigError,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// LAN chat peer with shared-secret pairing.
#[derive(Debug, Parser)]
#[command(
    name = "lanchat-peer",
    about = "Peer-to-peer LAN chat with three-name pairing",
    version
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "LANCHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Display name shown to the other side.
    #[arg(long, env = "LANCHAT_NAME")]
    name: Option<String>,

    /// TCP port for incoming chat connections.
    #[arg(long, env = "LANCHAT_PORT")]
    port: Option<u16>,

    /// UDP port for discovery announcements.
    #[arg(long, env = "LANCHAT_DISCOVERY_PORT")]
    discovery_port: Option<u16>,

    /// Shared names, comma separated.
    #[arg(long, env = "LANCHAT_SECRET")]
    secret: Option<String>,

    /// Peer to dial at startup.
    #[arg(long)]
    connect: Option<String>,

    /// Disable UDP discovery.
    #[arg(long)]
    no_discovery: bool,

    /// Answer challenges with the configured names instead of prompting.
    #[arg(long)]
    no_prompt: bool,

    /// Write the merged settings to the config file and exit.
    #[arg(long)]
    save_config: bool,
}

impl Cli {
    /// Applies flags on top of the file config.
    fn apply(&self, cfg: &mut AppConfig) {
        if let Some(name) = &self.name {
            cfg.node.name = name.clone();
        }
        if let Some(port) = self.port {
            cfg.network.listen_port = port;
        }
        if let Some(port) = self.discovery_port {
            cfg.network.discovery_port = port;
        }
        if let Some(secret) = &self.secret {
            cfg.auth.names = Some(Secret::parse(secret).into_names());
        }
        if self.no_discovery {
            cfg.network.discovery_enabled = false;
        }
        if self.no_prompt {
            cfg.auth.prompt_on_challenge = false;
        }
    }

    fn load(&self) -> anyhow::Result<AppConfig> {
        let cfg = match &self.config {
            Some(path) => load_config_from(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => match load_config() {
                Ok(cfg) => cfg,
                Err(ConfigError::NoPlatformConfigDir) => AppConfig::default(),
                Err(e) => return Err(e).context("failed to load config"),
            },
        };
        Ok(cfg)
    }

    /// Writes `cfg` to `--config`, or to the platform config file.
    fn save(&self, cfg: &AppConfig) -> anyhow::Result<PathBuf> {
        let path = match &self.config {
            Some(path) => path.clone(),
            None => config_file_path().context("no config file location")?,
        };
        save_config_to(cfg, &path)
            .with_context(|| format!("failed to write config to {}", path.display()))?;
        Ok(path)
    }
}

/// Converts the merged config into node settings.
///
/// # Errors
///
/// Returns an error if an address in the config is not a valid IP.
fn node_settings(cfg: &AppConfig, local_secret: Secret) -> anyhow::Result<NodeSettings> {
    let discovery = if cfg.network.discovery_enabled {
        Some(DiscoveryConfig {
            bind_addr: cfg.discovery_bind_addr()?,
            broadcast_addr: cfg.broadcast_addr()?,
            announce_interval: Duration::from_secs(cfg.network.announce_interval_secs),
        })
    } else {
        None
    };

    Ok(NodeSettings {
        instance_id: Uuid::new_v4(),
        name: cfg.node.name.clone(),
        listen_addr: cfg.listen_addr()?,
        discovery,
        connect_timeout: Duration::from_secs(cfg.network.connect_timeout_secs),
        reconnect_cooldown: Duration::from_secs(cfg.network.reconnect_cooldown_secs),
        max_frame_bytes: cfg.network.max_frame_bytes,
        auth: cfg.auth_config(),
        local_secret: Some(local_secret),
    })
}

/// One line of console output for a notification, if it deserves one.
fn describe(notification: &NodeNotification) -> Option<String> {
    let line = match notification {
        NodeNotification::Listening(addr) => format!("* listening on {addr}"),
        NodeNotification::Connecting(peer) => format!("* connecting to {peer}"),
        NodeNotification::ConnectIgnored(addr) => {
            format!("* not connecting to {addr}: already connected or connecting")
        }
        NodeNotification::Connected { peer: Some(peer) } => format!("* connected to {peer}"),
        NodeNotification::Connected { peer: None } => "* incoming peer connected".to_string(),
        NodeNotification::Disconnected { reason } => format!("* disconnected: {reason}"),
        NodeNotification::ConnectionFailed { peer, error } => {
            format!("* could not connect to {peer}: {error}")
        }
        NodeNotification::AuthFailed { reason } => format!("* authentication failed: {reason}"),
        NodeNotification::Message(msg) => format!("<{}> {}", msg.sender, msg.text),
        NodeNotification::SendRejected(reason) => format!("* not sent: {reason}"),
        NodeNotification::Status(s) => {
            let state = if s.connected {
                "connected"
            } else if s.connecting {
                "connecting"
            } else {
                "idle"
            };
            match &s.peer {
                Some(peer) => format!("* {} on {}: {state} ({peer})", s.name, s.listen_addr),
                None => format!("* {} on {}: {state}", s.name, s.listen_addr),
            }
        }
        // The prompt itself is printed by the console.
        NodeNotification::SecretRequested => return None,
    };
    Some(line)
}

async fn resolve(target: &str) -> anyhow::Result<SocketAddr> {
    tokio::net::lookup_host(target)
        .await
        .with_context(|| format!("cannot resolve '{target}'"))?
        .next()
        .with_context(|| format!("'{target}' has no addresses"))
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut cfg = cli.load()?;
    cli.apply(&mut cfg);

    if cli.save_config {
        let path = cli.save(&cfg)?;
        println!("config written to {}", path.display());
        return Ok(());
    }

    // `RUST_LOG` wins; otherwise the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.node.log_level)),
        )
        .init();

    let (router, mut console) = ConsoleRouter::new();
    router.spawn_stdin();

    let local_secret = match cfg.local_secret() {
        Some(secret) => secret,
        None => {
            let text = format!(
                "Enter the {} shared names (comma separated):",
                cfg.auth.name_count
            );
            match router.prompt(&text).await {
                Some(line) => Secret::parse(&line),
                None => bail!("no shared names entered"),
            }
        }
    };
    local_secret
        .validate(cfg.auth.name_count)
        .context("invalid shared names")?;

    let provider: Arc<dyn SecretProvider> = if cfg.auth.prompt_on_challenge {
        Arc::new(PromptSecretProvider::new(
            Arc::clone(&router),
            cfg.auth.name_count,
        ))
    } else {
        Arc::new(StaticSecretProvider::new(local_secret.clone()))
    };

    let settings = node_settings(&cfg, local_secret)?;
    let (node, commands, mut notifications) = PeerNode::bind(settings, provider)
        .await
        .context("failed to start node")?;
    let mut node_task = tokio::spawn(node.run());

    if let Some(target) = &cli.connect {
        let addr = resolve(target).await?;
        commands.send(NodeCommand::Connect(addr)).await?;
    }

    info!("lanchat peer '{}' started", cfg.node.name);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl+C; shutting down");
                break;
            }
            Some(note) = notifications.recv() => {
                if let Some(line) = describe(&note) {
                    println!("{line}");
                }
            }
            command = console.recv() => {
                let command = match command {
                    None | Some(ConsoleCommand::Quit) => break,
                    Some(ConsoleCommand::Disconnect) => NodeCommand::Disconnect,
                    Some(ConsoleCommand::Status) => NodeCommand::Status,
                    Some(ConsoleCommand::Say(text)) => NodeCommand::Send(text),
                    Some(ConsoleCommand::Connect(target)) => match resolve(&target).await {
                        Ok(addr) => NodeCommand::Connect(addr),
                        Err(e) => {
                            println!("* {e:#}");
                            continue;
                        }
                    },
                    Some(ConsoleCommand::Unknown(line)) => {
                        println!("* unknown command {line}; try /connect, /disconnect, /status, /quit");
                        continue;
                    }
                };
                if commands.send(command).await.is_err() {
                    break;
                }
            }
            result = &mut node_task => {
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!("node stopped: {e}"),
                    Err(e) => error!("node task failed: {e}"),
                }
                return Ok(());
            }
        }
    }

    // Shutdown may race with the node having already stopped.
    let _ = commands.send(NodeCommand::Shutdown).await;
    match node_task.await {
        Ok(result) => result.context("node stopped with an error")?,
        Err(e) => error!("node task failed: {e}"),
    }
    info!("lanchat peer stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
