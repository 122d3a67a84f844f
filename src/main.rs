mod cli;

use std::sync::Arc;

use bookie::auth::AuthzFactory;
use bookie::bookie::Bookie;
use bookie::config::{Config, config_path};
use bookie::server;
use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

type AnyError = Box<dyn std::error::Error + Send + Sync>;

fn load_config(path: Option<std::path::PathBuf>) -> Result<Config, AnyError> {
    let _ = dotenvy::dotenv();
    let path = path.unwrap_or_else(config_path);
    Ok(Config::load_from_path(path)?)
}

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server(args) => {
            let config = load_config(args.config)?;
            let address = args.address.unwrap_or(config.server.bind_addr);
            // Fail fast on a broken role list even before a transport binds providers
            if !config.auth.authorized_roles.is_empty() {
                AuthzFactory::init(&config.auth)?;
            }
            let bookie = Arc::new(Bookie::start(&config.bookie).await?);
            server::run(address, bookie).await?;
        }
        Commands::CheckConfig(args) => {
            let config = load_config(args.config)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
