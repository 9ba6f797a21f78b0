use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};

use idle_chat::{
    cli::{Cli, Command},
    client, server,
};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();

    match Cli::parse().command {
        Command::Serve(args) => server::serve(&args).await,
        Command::Connect(args) => client::run(args).await,
    }
}
