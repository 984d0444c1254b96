use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Relays Alertmanager webhook notifications into Matrix rooms.
#[derive(Debug, Parser)]
#[command(name = "herald", version, about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long)]
    config_path: String,

    #[arg(long, value_enum, default_value = "info")]
    log_level: LogLevel,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::new(cli.log_level.directive()))
        .init();

    let cfg = match herald_config::load_and_validate(&cli.config_path) {
        Ok(v) => v,
        Err(e) => {
            error!(path = %cli.config_path, error = %e, "failed to load config");
            return ExitCode::FAILURE;
        }
    };
    info!(config = %cfg.summary(), "configuration loaded");
    for (kind, count) in herald_config::describe_rules(&cfg.templating.computed_values) {
        info!(kind, count, "computed value rules");
    }

    if let Err(e) = herald_server::serve(cfg).await {
        error!(error = %e, "server exited with error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
