//! chat-relay server entry point.

use std::sync::Arc;

use chat_relay::config::{Cli, Config};
use chat_relay::server::chat_api::{build_router, AppState};
use chat_relay::upstream::client::UpstreamClient;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before reading configuration from the environment.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter = if cli.verbose {
        "chat_relay=debug,tower_http=debug"
    } else {
        "chat_relay=info,tower_http=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("chat-relay v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::from_env();
    if let Some(port) = cli.port {
        config.port = port;
    }
    let config = Arc::new(config);

    let upstream = UpstreamClient::from_config(&config);
    if upstream.is_none() {
        warn!("DEEPSEEK_API_KEY is not set; chat endpoints will return 500");
    }

    let state = Arc::new(AppState {
        upstream,
        config: config.clone(),
    });

    let app = build_router(state);

    let listen_addr = format!("0.0.0.0:{}", config.port);
    info!(addr = listen_addr, "Starting server");

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
