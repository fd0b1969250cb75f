use anyhow::Result;
use santa_backend::config::Config;
use santa_backend::{app, AppState};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let config = Config::from_env()?;
    let bind_addr = config.bind_addr.clone();
    tracing::info!(
        participants = config.roster.len(),
        namespace = %config.namespace,
        persist = ?config.persist_path,
        "starting secret santa"
    );

    let state = AppState::from_config(config).await;
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(%bind_addr, "listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}
