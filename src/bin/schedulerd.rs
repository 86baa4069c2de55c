//! Scheduler daemon entry point.
//!
//! Hosts the demo state machine, the proximity-switch tap reader, and the
//! persistent job scheduler. Pattern generators are external collaborators;
//! an empty registry leaves the RPC and job surfaces up while autonomous
//! drawing reports an error.

use sandtable::patterns::PatternRegistry;
use sandtable::server::{BindPolicy, StopHandle};
use sandtable::{schedulerd, AppConfig, Result};
use std::env;
use std::path::Path;
use std::sync::Arc;

/// Parse config path from command line arguments.
///
/// Supports:
/// - `schedulerd <path>` (positional)
/// - `schedulerd --config <path>` (flag-based)
/// - `schedulerd -c <path>` (short flag)
///
/// Defaults to `/etc/sandtable.toml` if not specified.
fn parse_config_path() -> String {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return args[1].clone();
    }

    "/etc/sandtable.toml".to_string()
}

fn load_config(path: &str) -> Result<AppConfig> {
    if Path::new(path).exists() {
        AppConfig::from_file(path)
    } else {
        Ok(AppConfig::sandtable_defaults())
    }
}

fn main() {
    let config_path = parse_config_path();
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {}", config_path, e);
            std::process::exit(1);
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.logging.level),
    )
    .init();

    if Path::new(&config_path).exists() {
        log::info!("Using config: {}", config_path);
    } else {
        log::warn!("Config {} not found; using built-in defaults", config_path);
    }

    let stop = StopHandle::new();
    let handler_stop = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        handler_stop.stop();
    }) {
        log::error!("Error setting Ctrl-C handler: {}", e);
        std::process::exit(1);
    }

    let registry = Arc::new(PatternRegistry::new());
    if let Err(e) = schedulerd::run(&config, registry, BindPolicy::default(), stop) {
        log::error!("Scheduler daemon failed: {}", e);
        std::process::exit(1);
    }
}
