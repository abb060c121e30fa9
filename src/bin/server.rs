use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use relgraph::api::{AppState, routes};
use relgraph::config::ServiceConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chromiumoxide=off")),
        )
        .init();

    let config = ServiceConfig::from_env().context("failed to load configuration")?;
    let bind = config.bind;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_db_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to postgres")?;

    relgraph::db::create_graph_tables(&pool)
        .await
        .context("failed to run graph migrations")?;

    let state = AppState::new(config, Arc::new(pool));
    let _maintenance = state.spawn_maintenance();
    let app = routes(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind listener on {}", bind))?;
    tracing::info!(bind = %bind, "relgraph server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server failed")
}
