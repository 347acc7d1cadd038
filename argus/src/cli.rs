//! Command-line interface.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "argus",
    version,
    about = "Multi-cluster monitoring console for distributed key/value databases"
)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "argus.toml")]
    pub config: PathBuf,

    /// Override the HTTP bind address from the config file.
    #[arg(long)]
    pub bind: Option<String>,
}
