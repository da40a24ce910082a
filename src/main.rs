#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # termsupd
//!
//! Multi-tenant PTY session supervisor for AI coding tool sub-processes.
//!
//! Exposes an HTTP + WebSocket API that lets a remote client spawn
//! interactive CLI sub-processes of supported AI coding tools under a PTY,
//! write to them with tool-specific submit quirks, stream their output, and
//! drive an orderly shutdown — plus a streaming parser that extracts
//! orchestrator control directives embedded in that output.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{delete, get, post},
    Extension, Router,
};
use clap::Parser;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use termsup::auth::ApiKey;
use termsup::config::Config;
use termsup::registry::Registry;
use termsup::routes;
use termsup::ws;
use termsup::AppState;

/// Multi-tenant PTY session supervisor for AI coding tool sub-processes.
#[derive(Parser)]
#[command(name = "termsupd", version)]
struct Cli {
    /// Path to a TOML config file. Defaults to `./termsup.toml` if present.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    run_server(cli.config.as_deref()).await;
}

async fn run_server(config_path: Option<&str>) {
    let config = Config::load(config_path);

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    termsup::noise_filter::install(&log_filter);

    let validation_errors = config.validate();
    if !validation_errors.is_empty() {
        for err in &validation_errors {
            tracing::error!("Config error: {err}");
        }
        std::process::exit(1);
    }

    info!("termsup v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}", config.server.listen);

    if config.auth.api_key == "change-me" {
        warn!("Using default API key — set TERMSUP_API_KEY or update config");
    }

    let default_submit_with_tab = termsup::ambient::submit_with_tab_from_env();
    let registry = Registry::new(
        config.tools_table(),
        config.supervisor_cwd.clone(),
        default_submit_with_tab,
        config.dedupe_window(),
        config.directives.carry_cap_bytes,
    );

    let state = AppState::new(config, registry);
    let listen_addr = state.config.server.listen.clone();
    let max_connections = state.config.server.max_connections;
    let api_key = state.config.auth.api_key.clone();

    let public_routes = Router::new().route("/health", get(routes::health::health));

    let authed_routes = Router::new()
        .route(
            "/sessions",
            get(routes::sessions::list_sessions).post(routes::sessions::create_session),
        )
        .route(
            "/sessions/{id}",
            get(routes::sessions::get_session).delete(routes::sessions::close_session),
        )
        .route("/sessions/{id}/write", post(routes::sessions::write_session))
        .route(
            "/sessions/{id}/resize",
            post(routes::sessions::resize_session),
        )
        .route(
            "/sessions/{id}/interrupt",
            post(routes::sessions::interrupt_session),
        )
        .route("/sessions/{id}/stop", post(routes::sessions::stop_session))
        .route("/sessions/{id}/kill", post(routes::sessions::kill_session))
        .layer(middleware::from_fn(termsup::auth::require_api_key));

    let stream_routes = Router::new().route("/sessions/{id}/stream", get(ws::stream_session));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
        ]);

    let app = Router::new()
        .merge(public_routes)
        .merge(authed_routes)
        .merge(stream_routes)
        .layer(Extension(ApiKey(api_key)))
        .with_state(state.clone())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections));

    let listener = TcpListener::bind(&listen_addr)
        .await
        .expect("Failed to bind");

    info!("Server ready");

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to register SIGTERM");
            tokio::select! {
                _ = ctrl_c => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("Received SIGINT");
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .expect("Server error");

    info!("Shutting down...");
    dispose_with_timeout(&state.registry).await;
    info!("Goodbye");
}

/// `dispose()` on every session, bounded so a stuck child can't hang
/// process exit indefinitely.
async fn dispose_with_timeout(registry: &Arc<Registry>) {
    if tokio::time::timeout(Duration::from_secs(5), registry.dispose())
        .await
        .is_err()
    {
        warn!("registry dispose timed out after 5s");
    }
}
