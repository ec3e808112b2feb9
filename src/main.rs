mod broadcast;
mod config;
mod db;
mod registry;
mod routes;
mod services;
mod state;

use std::sync::Arc;

use config::ServerConfig;
use services::access::PgBoardAccess;
use services::identity::HttpIdentityVerifier;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "configuration invalid");
            std::process::exit(1);
        }
    };

    let pool = match db::init_pool(&config.database_url, config.db_max_connections).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "database init failed");
            std::process::exit(1);
        }
    };

    let identity = match HttpIdentityVerifier::new(&config.auth_url, config.auth_api_key.clone(), config.auth_timeout) {
        Ok(verifier) => verifier,
        Err(e) => {
            tracing::error!(error = %e, "identity client init failed");
            std::process::exit(1);
        }
    };

    let state = state::AppState::new(Arc::new(identity), Arc::new(PgBoardAccess::new(pool))).with_config(&config);
    if state.ingest_key.is_none() {
        tracing::info!("EVENTS_INGEST_KEY not set; event ingest route disabled");
    }

    let app = routes::app(state);
    let listener = match tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, port = config.port, "failed to bind");
            std::process::exit(1);
        }
    };

    tracing::info!(port = config.port, "taskboard sync listening");
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "server failed");
        std::process::exit(1);
    }
}
