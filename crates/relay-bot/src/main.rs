use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use teloxide::Bot;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use relay_core::{HistoryStore, StreamDriver};
use relay_providers::OpenAICompatStream;

mod bot;
mod config;
mod relay;
mod telegram;

use config::Config;
use relay::{Relay, RequestDefaults};

/// Dependencies whose own logging drowns ours below `warn`.
const NOISY_CRATES: &[&str] = &["reqwest", "hyper", "hyper_util", "teloxide", "teloxide_core"];

/// Log level for tracing output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Most verbose: every SSE chunk and sink operation
    Trace,
    /// Verbose: flushes, requests, state changes
    Debug,
    /// Standard: one line per message and turn
    Info,
    /// Quiet: only warnings and errors
    Warn,
    /// Minimal: only errors
    Error,
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Parser)]
#[command(name = "relay")]
#[command(author, version, about = "Relay: stream LLM replies into Telegram messages", long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.config/relay/config.toml)
    #[arg(short, long, env = "RELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Model to use (overrides config)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Base URL for the API (overrides config)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Enable debug logging (shorthand for --log-level debug)
    #[arg(short, long)]
    pub debug: bool,

    /// Write logs to file (JSON-lines format)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot (default)
    Run,
    /// Show the effective configuration with secrets masked
    Config,
}

fn log_filter(level: LogLevel) -> EnvFilter {
    let mut directives = vec![level.as_filter().to_string()];
    if level != LogLevel::Error {
        directives.extend(NOISY_CRATES.iter().map(|name| format!("{name}=warn")));
    }
    EnvFilter::new(directives.join(","))
}

fn init_logging(cli: &Cli) -> Result<()> {
    // --debug overrides --log-level
    let log_level = if cli.debug {
        LogLevel::Debug
    } else {
        cli.log_level
    };
    let filter = log_filter(log_level);

    if let Some(log_path) = &cli.log_file {
        let file = std::fs::File::create(log_path)
            .with_context(|| format!("Failed to create log file: {:?}", log_path))?;
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::sync::Mutex::new(file)))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

/// Apply command-line overrides on top of the loaded configuration.
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(model) = &cli.model {
        config.provider.model = Some(model.clone());
    }
    if let Some(base_url) = &cli.base_url {
        config.provider.base_url = base_url.clone();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let mut config = Config::load(cli.config.as_deref())?;
    apply_overrides(&mut config, &cli);

    match &cli.command {
        Some(Commands::Config) => show_config(&config),
        Some(Commands::Run) | None => run_bot(config).await,
    }
}

async fn run_bot(config: Config) -> Result<()> {
    config.validate()?;

    let token = config.telegram.token.clone().unwrap_or_default();
    let api_key = config.provider.api_key.clone().unwrap_or_default();

    let mut provider = OpenAICompatStream::new(api_key).with_base_url(&config.provider.base_url);
    if let Some(model) = &config.provider.model {
        provider = provider.with_default_model(model);
    }

    info!(
        base_url = provider.base_url(),
        model = config.provider.model.as_deref().unwrap_or("<server default>"),
        max_segment_length = config.display.max_segment_length,
        flush_interval_ms = config.display.flush_interval_ms,
        "Starting relay"
    );

    let relay = Relay::new(
        StreamDriver::new(config.display.clone()),
        Arc::new(provider),
        HistoryStore::new(config.history.max_entries),
        RequestDefaults::from_config(&config),
    );

    bot::run(Bot::new(token), Arc::new(relay)).await;
    Ok(())
}

fn show_config(config: &Config) -> Result<()> {
    let path = Config::config_path()?;
    println!("# Config file: {}", path.display());
    if !path.exists() {
        println!("# (not found, using defaults and environment)");
    }
    println!();
    let rendered =
        toml::to_string_pretty(&config.masked()).context("Failed to render configuration")?;
    print!("{}", rendered);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from(["relay", "--model", "gpt-4o", "--base-url", "http://localhost:8000/v1"]);
        let mut config = Config::default();
        apply_overrides(&mut config, &cli);
        assert_eq!(config.provider.model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.provider.base_url, "http://localhost:8000/v1");
    }

    #[test]
    fn test_cli_subcommands() {
        let cli = Cli::parse_from(["relay", "--debug", "config"]);
        assert!(cli.debug);
        assert!(matches!(cli.command, Some(Commands::Config)));

        let cli = Cli::parse_from(["relay"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, LogLevel::Info);
    }

    #[test]
    fn test_noisy_crates_capped() {
        let filter = log_filter(LogLevel::Debug).to_string();
        assert!(filter.contains("debug"));
        assert!(filter.contains("teloxide=warn"));
        assert!(filter.contains("reqwest=warn"));
    }
}
