use tokio_util::sync::CancellationToken;

mod app;
mod auth;
mod config;
mod db;
mod error;
mod mail;
mod state;
#[cfg(test)]
mod testing;
mod users;
mod worker;

use crate::config::AppConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "authd=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = AppConfig::from_env()?;
    let (host, port) = (config.host.clone(), config.port);
    let app_state = AppState::init(config).await?;

    let shutdown = CancellationToken::new();
    let workers = worker::build_scheduler(&app_state).start(shutdown.clone());

    let served = app::serve(app::build_app(app_state), &host, port, shutdown.clone()).await;

    shutdown.cancel();
    workers.join().await;
    tracing::info!("shutdown complete");
    served
}
