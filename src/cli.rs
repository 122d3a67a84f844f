use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "bookie")]
#[command(about = "Ledger entry storage node", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the bookie and its admin HTTP server
    Server(ServerArgs),
    /// Load and validate configuration, then print it
    CheckConfig(CheckConfigArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServerArgs {
    /// Configuration file (defaults to $BOOKIE_CONFIG or config/bookie.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Address to bind the admin server to, overriding the configuration
    #[arg(long)]
    pub address: Option<SocketAddr>,
}

#[derive(clap::Args, Debug)]
pub struct CheckConfigArgs {
    /// Configuration file (defaults to $BOOKIE_CONFIG or config/bookie.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,
}
