//! Rust IRC Bot - Main binary

use clap::{Parser, Subcommand};
use rustircbot_core::{AccessList, ClientBuilder, ClientHandle, ConfigStore, ConnectionSettings, ServerSettings};
use rustircbot_plugins::{AdminPlugin, HelpPlugin};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Rust IRC Bot - A plugin-driven IRC client
#[derive(Parser)]
#[command(name = "rustircbot")]
#[command(about = "A plugin-driven IRC bot written in Rust")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Access list file path
    #[arg(short, long, default_value = "access.toml")]
    access: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Test configuration and exit
    #[arg(long)]
    test_config: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a default configuration file
    Config {
        /// Output file path
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli.log_level)?;

    if let Some(Commands::Config { output }) = cli.command {
        generate_config(&output)?;
        return Ok(());
    }

    info!("Loading configuration from {:?}", cli.config);
    let config = ConfigStore::from_file(&cli.config)?;

    let access = if cli.access.exists() {
        info!("Loading access list from {:?}", cli.access);
        AccessList::from_file(&cli.access)?
    } else {
        warn!("Access list {:?} not found, starting with an empty one", cli.access);
        AccessList::new()
    };

    let server = ServerSettings::from_store(&config)?;
    ConnectionSettings::from_store(&config)?;
    if cli.test_config {
        info!("Configuration is valid");
        return Ok(());
    }

    let mut builder = ClientBuilder::new(config, access)?;
    builder.register(AdminPlugin::new())?;
    builder.register(HelpPlugin::new())?;
    let mut client = builder.build();
    let handle = client.handle();

    info!("Starting Rust IRC Bot as {} on {}", server.nick, server.host);
    client.connect().await?;

    let signal_handle = handle.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received");
                if let Err(e) = signal_handle.disconnect("Shutting down").await {
                    error!("Disconnect failed: {}", e);
                }
            }
            Err(e) => error!("Failed to listen for interrupt: {}", e),
        }
    });

    let result = client.input_loop().await;
    save_state(&handle, &cli.config, &cli.access);
    result?;

    info!("Rust IRC Bot stopped");
    Ok(())
}

/// Initialize logging
fn init_logging(level: &str) -> anyhow::Result<()> {
    let log_level = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .init();

    Ok(())
}

/// Write configuration and access list back to disk
fn save_state(handle: &ClientHandle, config: &Path, access: &Path) {
    if let Err(e) = handle.config().to_file(config) {
        error!("Failed to save configuration: {}", e);
    }
    if let Err(e) = handle.access().to_file(access) {
        error!("Failed to save access list: {}", e);
    }
}

/// Generate a default configuration file
fn generate_config(output: &Path) -> anyhow::Result<()> {
    let config = ConfigStore::new();
    config.set_string("server", "host", "irc.libera.chat:6667");
    config.set_string("server", "nick", "rustircbot");
    config.set_string("server", "ident", "rustircbot");
    config.set_string("server", "realname", "Rust IRC Bot");
    config.set_string("server", "trigger", "!");

    let defaults = ConnectionSettings::default();
    config.set_int("connection", "connect_timeout_secs", defaults.connect_timeout.as_secs() as i64);
    config.set_int("connection", "queue_capacity", defaults.queue_capacity as i64);
    config.set_string("connection", "flood_enabled", &defaults.flood_enabled.to_string());
    config.set_int("connection", "flood_burst", i64::from(defaults.flood_burst));
    config.set_int("connection", "flood_interval_ms", defaults.flood_interval.as_millis() as i64);

    config.to_file(output)?;
    println!("Default configuration written to {:?}", output);
    Ok(())
}
