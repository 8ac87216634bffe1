//! Woodpeckers: drive decoy birds from a configuration file.
//!
//! ```text
//!  logging ─▶ configuration ─▶ Controller (apply, set up)
//!                                   │
//!                                   ▼
//!                 EventLoop (+ admin server) ─▶ run until "stop" ─▶ tear down
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use woodpeckers::admin;
use woodpeckers::config::Configuration;
use woodpeckers::logging::{self, LogLevel};
use woodpeckers::{Controller, ControllerLoop};

#[derive(Debug, Parser)]
#[command(name = "woodpeckers", version, about = "Decoy woodpecker sequencer")]
struct Args {
    /// YAML configuration file; built-in defaults when omitted.
    config: Option<PathBuf>,

    /// Severity threshold when RUST_LOG is unset.
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    /// Only log errors.
    #[arg(long)]
    quiet: bool,

    /// Listen for admin commands on this loopback port.
    #[arg(long)]
    admin_port: Option<u16>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.log_level, args.quiet)?;

    info!("Woodpeckers {} starting", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => Configuration::load(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => {
            warn!("No configuration given, using defaults");
            Configuration::default()
        }
    };

    let mut controller = Controller::new();
    config
        .apply(&mut controller)
        .context("applying configuration")?;
    controller.set_up().context("setting up outputs")?;

    let mut event_loop = ControllerLoop::new().context("creating event loop")?;

    if let Some(port) = args.admin_port.or(config.admin_port()) {
        admin::install(&mut event_loop, port)
            .with_context(|| format!("starting admin server on port {port}"))?;
    }

    controller.run(&mut event_loop);

    controller.tear_down();
    info!("Woodpeckers stopped");
    Ok(())
}
