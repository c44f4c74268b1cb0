mod config;
mod enrich;
mod extract;
mod llm;
mod prompts;
mod render;
mod server;
mod session;
mod types;
mod vehicle;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::llm::DashScopeClient;
use crate::server::AppState;
use crate::session::SessionStore;

#[derive(Parser)]
#[command(name = "diag-assistant", about = "Vehicle fault diagnosis backend")]
struct Args {
    /// Listen port, overriding PORT from the environment
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = Config::load()?;
    let port = args.port.unwrap_or(config.port);

    let provider = DashScopeClient::with_base_url(config.api_key, config.model, config.base_url);
    let state = Arc::new(AppState {
        provider: Arc::new(provider),
        sessions: SessionStore::new(),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {addr}");
    axum::serve(listener, server::router(state)).await?;

    Ok(())
}
