//! # Stagehand Configuration Validator
//!
//! Command-line tool for validating Stagehand configuration before starting the engine.
//! Loads the same layered sources the engine does and prints the effective, sanitized view.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stagehand::config::{ConfigManager, StagehandConfig};
use std::path::PathBuf;
use std::process;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate Stagehand configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment whose overlay (`stagehand-{env}`) is applied
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Configuration directory path (default: config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load and validate the configuration (default)
    Validate,

    /// Print the effective configuration with secrets masked
    Show,

    /// Print the built-in defaults
    Defaults,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let _ = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match cli.command {
        Some(Commands::Show) => show_config(&cli),
        Some(Commands::Defaults) => show_defaults(),
        Some(Commands::Validate) | None => validate(&cli),
    };

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {:#}", e);
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> Result<std::sync::Arc<ConfigManager>> {
    let directory = cli
        .config_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("config"));
    ConfigManager::load_from_directory_with_env(&directory, &cli.environment).with_context(|| {
        format!(
            "failed to load configuration from {} for environment '{}'",
            directory.display(),
            cli.environment
        )
    })
}

fn validate(cli: &Cli) -> Result<()> {
    println!("🔧 Validating Stagehand Configuration");
    println!("Environment: {}", cli.environment);

    let manager = load(cli)?;
    let config = manager.config();
    println!("✅ Configuration loaded from {}", manager.config_directory().display());
    println!(
        "   - Workers: {} (stage timeout {}s)",
        config.orchestrator.worker_concurrency, config.orchestrator.stage_timeout_secs
    );
    println!(
        "   - Recovery: every {}s, at most {} attempts",
        config.recovery.scan_interval_secs, config.recovery.max_recovery_attempts
    );
    println!(
        "   - Retry overrides: {}",
        config.retry.overrides.len()
    );
    println!(
        "   - Database: {}",
        if config.database.url.is_some() { "configured" } else { "in-memory" }
    );

    println!("\n🎉 All configuration validation checks passed!");
    Ok(())
}

fn show_config(cli: &Cli) -> Result<()> {
    let manager = load(cli)?;
    println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
    Ok(())
}

fn show_defaults() -> Result<()> {
    let defaults = stagehand::config::loader::sanitize_config_for_logging(&StagehandConfig::default());
    println!("{}", serde_json::to_string_pretty(&defaults)?);
    Ok(())
}
