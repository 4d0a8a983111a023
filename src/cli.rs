use std::{path::PathBuf, sync::OnceLock};

use clap::Parser;

/// Watches a Podman service for containers coming and going.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Path to the config file.
    #[arg(short, long, default_value = "sealwatcher.toml")]
    pub config: PathBuf,
    /// Podman service URI, overriding the config file.
    #[arg(short, long)]
    pub socket: Option<String>,
    /// PID of the Podman service, overriding the config file.
    #[arg(short, long)]
    pub pid: Option<u32>,
}

static ARGS: OnceLock<Args> = OnceLock::new();

pub fn get_cli_args() -> &'static Args {
    ARGS.get_or_init(Args::parse)
}
