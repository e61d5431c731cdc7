use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use apis_server::config::Config;
use apis_server::{build_router, AppState};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let config = Config::from_env()?;
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await?;

    let state = AppState::new(config, pool)?;
    state.revocation.start_sweeper().await;
    state.rate_limiter.start_sweeper().await;

    let addr = SocketAddr::new(state.config.host.parse()?, state.config.port);
    info!(%addr, mode = state.auth.kind(), "starting apis-server");

    let app = build_router(state.clone());
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Background sweepers are joined before exit so shutdown is clean.
    state.rate_limiter.stop().await;
    state.revocation.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
