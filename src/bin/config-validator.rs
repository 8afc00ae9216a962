//! # Resilience Configuration Validator
//!
//! Command-line tool for validating resilience configuration across environments.
//! Catches threshold and timeout mistakes before a service starts with them.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use resilience_core::config::{ConfigManager, ResilienceConfig};
use resilience_core::constants::files::{BASE_CONFIG, DEFAULT_CONFIG_DIR};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate resilience configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment to validate (development, test, production, ...)
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Configuration directory path (default: config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format (table, json)
    #[arg(long, default_value = "table")]
    format: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate every configured component
    All,

    /// Show the effective configuration of one dependency
    Component {
        /// Dependency name (market_data, statistics, imagery, ...)
        name: String,
    },

    /// List environments that have an override file
    Environments,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match &cli.command {
        Some(Commands::All) | None => validate_all(&cli),
        Some(Commands::Component { name }) => show_component(&cli, name),
        Some(Commands::Environments) => list_environments(&cli),
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

fn load(cli: &Cli) -> anyhow::Result<Arc<ConfigManager>> {
    ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &cli.environment)
        .with_context(|| format!("loading configuration for '{}'", cli.environment))
}

fn validate_all(cli: &Cli) -> anyhow::Result<()> {
    let manager = load(cli)?;
    let config = manager.config();

    if cli.format == "json" {
        println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
        return Ok(());
    }

    println!("🔧 Validating Resilience Configuration");
    println!("Environment: {}", manager.environment());
    println!("Config Directory: {}", manager.config_directory().display());
    println!();

    print_summary(config);

    println!("\n🎉 All configuration validation checks passed!");
    Ok(())
}

fn print_summary(config: &ResilienceConfig) {
    let breakers = &config.circuit_breakers;
    println!(
        "Circuit breakers: {} (default: {} failures / {}ms reset)",
        if breakers.enabled { "enabled" } else { "disabled" },
        breakers.default_config.failure_threshold,
        breakers.default_config.reset_timeout_ms
    );
    println!("Default deadline: {}ms", config.deadlines.default_timeout_ms);
    println!();

    println!(
        "{:<20} {:>9} {:>10} {:>12} {:>11} {:>10}",
        "DEPENDENCY", "FAILURES", "RESET_MS", "TOKENS", "REFILL/S", "MAX_CONC"
    );
    for name in config.component_names() {
        let breaker = breakers.config_for_component(&name);
        let limiter = config.rate_limiters.get(&name);
        let semaphore = config.semaphores.get(&name);
        println!(
            "{:<20} {:>9} {:>10} {:>12} {:>11} {:>10}",
            name,
            breaker.failure_threshold,
            breaker.reset_timeout_ms,
            limiter.map_or("-".to_string(), |l| format!("{:.1}", l.max_tokens)),
            limiter.map_or("-".to_string(), |l| format!("{:.2}", l.refill_per_second)),
            semaphore.map_or("-".to_string(), |s| s.max_concurrent.to_string()),
        );
    }
}

fn show_component(cli: &Cli, name: &str) -> anyhow::Result<()> {
    let manager = load(cli)?;
    let config = manager.config();

    if !config.component_names().iter().any(|known| known == name) {
        bail!("no configuration entries for dependency '{name}' (defaults would apply)");
    }

    let effective = serde_json::json!({
        "circuit_breaker": config.circuit_breakers.config_for_component(name),
        "rate_limiter": config.rate_limiters.get(name),
        "semaphore": config.semaphores.get(name),
        "deadline_ms": config.deadlines.timeout_for(name).as_millis() as u64,
    });

    println!("{}", serde_json::to_string_pretty(&effective)?);
    Ok(())
}

fn list_environments(cli: &Cli) -> anyhow::Result<()> {
    let dir = cli
        .config_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR));

    println!("📋 Available Environments in {}:", dir.display());
    for environment in environments_in(&dir)? {
        println!("  • {environment}");
    }
    Ok(())
}

/// Environments with a `resilience.{env}.*` override file
fn environments_in(dir: &Path) -> anyhow::Result<Vec<String>> {
    let prefix = format!("{BASE_CONFIG}.");
    let mut environments = Vec::new();

    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let file_name = entry?.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let Some(rest) = name.strip_prefix(&prefix) else {
            continue;
        };
        // `resilience.production.yaml` -> `production`; skip the base file itself
        if let Some((environment, _extension)) = rest.rsplit_once('.') {
            environments.push(environment.to_string());
        }
    }

    environments.sort();
    environments.dedup();
    Ok(environments)
}
