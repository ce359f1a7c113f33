//! Polyport — multi-protocol chat server
//!
//! Serves one chat room set over TCP, Unix domain sockets, Windows named
//! pipes and WebSocket at the same time. Every client speaks newline-delimited
//! JSON, whichever transport it uses.
//!
//! Usage:
//!   polyport                                     # TCP on 127.0.0.1:7070
//!   polyport --tcp 0.0.0.0:7070 --ws 127.0.0.1:8080
//!   polyport --unix /tmp/polyport.sock --single-room
//!   polyport --config polyport.json --verbose

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use polyport_chat::ChatHandler;
use polyport_server::{ListenerConfig, Server, ServerConfig};
use polyport_transport::{Handler, WebSocketConfig};
use tracing::error;
use tracing_subscriber::EnvFilter;

const DEFAULT_TCP_ADDR: &str = "127.0.0.1:7070";

#[derive(Parser, Debug)]
#[command(name = "polyport", version, about = "Polyport — multi-protocol chat server")]
struct Cli {
    /// TCP listen address (repeatable)
    #[arg(long)]
    tcp: Vec<String>,

    /// Unix domain socket path (repeatable)
    #[arg(long)]
    unix: Vec<PathBuf>,

    /// Windows named pipe name (repeatable)
    #[arg(long)]
    pipe: Vec<String>,

    /// WebSocket listen address (repeatable)
    #[arg(long)]
    ws: Vec<String>,

    /// WebSocket upgrade path
    #[arg(long, default_value = "/ws")]
    ws_path: String,

    /// Maximum concurrent WebSocket connections (0 for unlimited)
    #[arg(long, default_value = "32")]
    max_ws_connections: usize,

    /// Treat all traffic as one room
    #[arg(long)]
    single_room: bool,

    /// JSON config file; listeners given as flags are added to it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Milliseconds each transport waits for its connections on shutdown
    #[arg(long)]
    shutdown_timeout_ms: Option<u64>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Write logs to a file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Cli {
    fn server_config(&self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_json_file(path)?,
            None => ServerConfig::default(),
        };

        if let Some(ms) = self.shutdown_timeout_ms {
            config.shutdown_timeout_ms = ms;
        }

        let max_connections = (self.max_ws_connections > 0).then_some(self.max_ws_connections);
        config.listeners.extend(
            self.tcp
                .iter()
                .map(|addr| ListenerConfig::Tcp { addr: addr.clone() })
                .chain(self.unix.iter().map(|path| ListenerConfig::Unix { path: path.clone() }))
                .chain(self.pipe.iter().map(|name| ListenerConfig::NamedPipe { name: name.clone() }))
                .chain(self.ws.iter().map(|addr| {
                    ListenerConfig::WebSocket(WebSocketConfig {
                        addr: addr.clone(),
                        path: self.ws_path.clone(),
                        max_connections,
                    })
                })),
        );

        if config.listeners.is_empty() {
            config.listeners.push(ListenerConfig::Tcp {
                addr: DEFAULT_TCP_ADDR.into(),
            });
        }
        Ok(config)
    }
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if let Some(log_path) = &cli.log_file {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();

        eprintln!("Logging to {}", log_path.display());
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

fn print_banner(config: &ServerConfig, server: &Server, single_room: bool) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                       Polyport Server                        ║");
    println!("║              (TCP · Unix · Named Pipe · WebSocket)           ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("  Name:       {}", config.name);
    for (protocol, addr) in server.local_addrs() {
        println!("  {:<11} {addr}", format!("{protocol}:"));
    }
    println!(
        "  Rooms:      {}",
        if single_room { "single room (--single-room)" } else { "enabled" }
    );
    println!("  Shutdown:   {} ms per transport", config.shutdown_timeout_ms);
    println!();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.server_config()?;

    let handler: Arc<dyn Handler> = if cli.single_room {
        Arc::new(ChatHandler::single_room())
    } else {
        Arc::new(ChatHandler::new())
    };

    let server = Server::new(&config, handler)?;
    server.start().await?;
    print_banner(&config, &server, cli.single_room);

    server.run_until_shutdown().await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli) {
        eprintln!("{e:#}");
        std::process::exit(1);
    }

    if let Err(e) = run(cli).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}
