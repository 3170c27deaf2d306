//! stk-wrapper - lifecycle wrapper for SuperTuxKart dedicated servers.
//!
//! The server never reports readiness on stdout, so the wrapper follows its
//! log file and turns log lines into lifecycle events.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod cli;
mod config;
mod error;
mod watcher;

pub use config::Config;
pub use error::Error;

#[derive(Parser)]
#[command(name = "stk-wrapper")]
#[command(about = "Run a SuperTuxKart server and track its lifecycle from the server log")]
#[command(version)]
struct Cli {
    /// The command and arguments to execute the server binary
    #[arg(short = 'i', long = "input")]
    input: String,

    /// Config file (default: ~/.config/stk-wrapper/config.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory the server log path is relative to (default: $HOME)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// How many times to try opening the log before giving up
    #[arg(long)]
    attempts: Option<u32>,

    /// Delay between attempts to open the log, in milliseconds
    #[arg(long)]
    retry_delay_ms: Option<u64>,

    /// Also process lines written before the wrapper attached
    #[arg(long)]
    replay_existing: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(dir) = &self.log_dir {
            config.log.base_dir = Some(dir.clone());
        }
        if let Some(attempts) = self.attempts {
            config.retry.max_attempts = attempts;
        }
        if let Some(delay) = self.retry_delay_ms {
            config.retry.delay_ms = delay;
            config.retry.max_delay_ms = config.retry.max_delay_ms.max(delay);
        }
        if self.replay_existing {
            config.tail.replay_existing = true;
        }
    }
}

fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("stk_wrapper=info".parse().unwrap()))
        .init();

    let cli = Cli::parse();

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32, Error> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    cli.apply(&mut config);

    let command = cli::run::ServerCommand::parse(&cli.input)?;
    info!(log = %config.log_path()?.display(), "Starting wrapper for SuperTuxKart");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(cli::run::run(command, config))
}
