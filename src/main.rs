use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use tracing_subscriber::{fmt, EnvFilter};

mod error;
mod media;
mod provider;
mod server;
mod session;
mod settings;

#[derive(Debug, Parser)]
#[command(name = "voxrelay")]
#[command(about = "HTTP relay for chat, transcription, and speech synthesis", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Start {
        #[arg(long, default_value = "127.0.0.1:3000")]
        listen: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Start { listen } => {
            let settings = settings::Settings::from_env().context("invalid configuration")?;
            let addr: SocketAddr = listen.parse()?;
            let state = server::AppState::new(settings);
            server::serve(addr, state).await?;
        }
    }
    Ok(())
}
