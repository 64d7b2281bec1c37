//! Farcall CLI: serve remote targets or call them.
//!
//! Logs go to stderr so that remote output and results on stdout stay clean.

mod cli;
mod cmd;
mod targets;

use crate::cli::{Cli, Commands};
use clap::Parser;
use colored::Colorize;
use farcall_types::config::{load_config, RpcConfig};
use farcall_types::RpcResult;

fn init_tracing_stderr(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Load config with a temporary stderr subscriber so loader warnings are
/// not lost before the real subscriber (which depends on the config) exists.
fn load(cli: &Cli) -> RpcConfig {
    let bootstrap = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::Level::WARN)
        .finish();
    tracing::subscriber::with_default(bootstrap, || load_config(cli.config.as_deref()))
}

fn run(cli: Cli, config: RpcConfig) -> RpcResult<()> {
    match cli.command {
        Commands::Sign { json, file } => cmd::sign::run(&config, json.as_deref(), file.as_deref()),
        Commands::Serve { listen } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(cmd::serve::run(&config, listen))
        }
        Commands::Call {
            target,
            method,
            args,
            hint,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(cmd::call::run(
                &config,
                &target,
                &method,
                &args,
                hint.as_deref(),
            ))
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let config = load(&cli);
    init_tracing_stderr(&config.log_level);

    if let Err(e) = run(cli, config) {
        eprintln!("{} {e}", "error:".bright_red().bold());
        std::process::exit(1);
    }
}
