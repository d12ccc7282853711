//! RTC Debugger CLI - relay server and interactive peer session.
//!
//! This is the main binary entry point. See the `rtc_debugger` library
//! for the core functionality.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use rtc_debugger::commands::{self, Command};
use rtc_debugger::constants::DEFAULT_RELAY_LISTEN;
use rtc_debugger::engine::rtc::RtcFactory;
use rtc_debugger::signaling::{ProtocolMode, WsConnector};
use rtc_debugger::ws::http_to_ws_scheme;
use rtc_debugger::{Config, ConnectionOrchestrator, RelayServer, SessionEvent};

/// mimalloc as the global allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

// CLI
#[derive(Parser)]
#[command(name = "rtc-debugger")]
#[command(version)]
#[command(about = "Debug peer connections and data channels over a signaling relay")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the signaling relay
    Relay {
        /// Address to listen on
        #[arg(long, default_value = DEFAULT_RELAY_LISTEN)]
        listen: String,
    },
    /// Connect to a relay and start an interactive session
    Connect {
        /// Relay URL (overrides config)
        #[arg(long)]
        url: Option<String>,
        /// Signaling frame encoding: json or binary
        #[arg(long)]
        protocol: Option<ProtocolMode>,
        /// Config file to load instead of the default one
        #[arg(long)]
        config: Option<PathBuf>,
        /// Verbose logging
        #[arg(long)]
        debug: bool,
        /// Do not redial when the relay connection drops
        #[arg(long)]
        no_reconnect: bool,
    },
    /// Configuration helpers
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration, or write it to a file
    Export {
        /// Destination file
        path: Option<PathBuf>,
        /// Config file to load instead of the default one
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Log to stderr, or to `RTC_DEBUGGER_LOG_FILE` when set.
///
/// The filter admits debug output from this crate; the max level decides
/// whether it is shown, so `/debug` can flip it at runtime.
fn init_logging(debug: bool) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info,rtc_debugger=debug"),
    );
    builder.format_timestamp_secs();
    if let Ok(path) = std::env::var("RTC_DEBUGGER_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.init();

    if !debug && std::env::var_os("RUST_LOG").is_none() {
        log::set_max_level(log::LevelFilter::Info);
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Relay { listen } => {
            init_logging(false)?;
            run_relay(&listen).await?;
        }
        Commands::Connect {
            url,
            protocol,
            config,
            debug,
            no_reconnect,
        } => {
            let mut config = Config::load(config.as_deref())?;
            if let Some(url) = url {
                config.signaling.url = http_to_ws_scheme(&url);
            }
            if let Some(protocol) = protocol {
                config.signaling.protocol = protocol;
            }
            if debug {
                config.debug_mode = true;
            }
            if no_reconnect {
                config.auto_reconnect = false;
            }
            init_logging(config.debug_mode)?;
            run_session(config).await?;
        }
        Commands::Config {
            action: ConfigAction::Export { path, config },
        } => {
            let config = Config::load(config.as_deref())?;
            match path {
                Some(path) => {
                    config.save(&path)?;
                    println!("Configuration written to {}", path.display());
                }
                None => println!("{}", serde_json::to_string_pretty(&config)?),
            }
        }
    }

    Ok(())
}

async fn run_relay(listen: &str) -> Result<()> {
    let relay = RelayServer::bind(listen).await?.spawn()?;
    println!("Relay listening on {}", relay.url());
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    log::info!("[Relay] Shutting down ({} peers connected)", relay.peer_count());
    relay.shutdown();
    Ok(())
}

async fn run_session(config: Config) -> Result<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    log::info!(
        "[Session] Relay {} ({}), auto-reconnect {}",
        config.signaling.url,
        config.signaling.protocol,
        if config.auto_reconnect { "on" } else { "off" }
    );
    let orchestrator = ConnectionOrchestrator::new(
        config,
        Arc::new(RtcFactory),
        Arc::new(WsConnector),
        tx.clone(),
    );

    spawn_console(tx.clone());
    let shutdown = tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown.send(SessionEvent::Shutdown);
        }
    });

    println!("Type /help for commands.");
    tx.send(SessionEvent::Command(Command::Connect))
        .context("Session loop gone before start")?;
    drop(tx);

    orchestrator.run(rx).await;
    Ok(())
}

/// Read console lines and post them as commands. EOF ends the session.
fn spawn_console(tx: mpsc::UnboundedSender<SessionEvent>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match commands::parse(&line) {
                    Ok(Some(command)) => {
                        if tx.send(SessionEvent::Command(command)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(message) => eprintln!("{message}"),
                },
                Ok(None) => {
                    let _ = tx.send(SessionEvent::Shutdown);
                    break;
                }
                Err(e) => {
                    log::error!("[Console] Failed to read stdin: {e}");
                    let _ = tx.send(SessionEvent::Shutdown);
                    break;
                }
            }
        }
    });
}
