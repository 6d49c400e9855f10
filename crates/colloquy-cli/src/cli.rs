use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "colloquy",
    about = "Colloquy: posts with threaded comments and live updates",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// TOML configuration file
    #[arg(short, long, global = true, env = "COLLOQUY_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP server
    Serve(ServeArgs),
    /// Print the effective configuration as TOML
    Config(ConfigArgs),
}

/// Flags that override the file and the environment.
#[derive(Args, Debug, Default)]
pub struct Overrides {
    /// Address to listen on
    #[arg(long)]
    pub bind: Option<SocketAddr>,

    /// Storage backend: memory or postgres
    #[arg(long)]
    pub store: Option<String>,

    /// PostgreSQL connection string
    #[arg(long)]
    pub postgres_dsn: Option<String>,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub overrides: Overrides,
}
