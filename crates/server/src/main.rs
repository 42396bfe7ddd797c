use std::{future::IntoFuture, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    routing::{get, patch, post},
    Router,
};
use server_api::{ApiContext, BroadcastBridge, HttpBroadcastBridge};
use storage::Storage;
use tokio::sync::watch;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod app_state;
mod bridge;
mod config;
mod coordinator;
mod gateway;
mod registry;
mod routes;
mod session;

use app_state::AppState;
use bridge::LocalBroadcastBridge;
use config::{load_settings, prepare_database_url};
use registry::ListRegistry;

const MAX_BODY_BYTES: usize = 256 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let registry = Arc::new(ListRegistry::new());
    let bridge: Arc<dyn BroadcastBridge> = match &settings.coordinator_url {
        Some(url) => {
            info!(coordinator_url = %url, "forwarding list events to remote coordinator");
            Arc::new(HttpBroadcastBridge::new(
                url,
                Duration::from_millis(settings.broadcast_timeout_ms),
            )?)
        }
        None => Arc::new(LocalBroadcastBridge::new(registry.clone())),
    };

    let state = Arc::new(AppState {
        api: ApiContext { storage, bridge },
        registry: registry.clone(),
    });
    let app = build_router(state.clone());
    let internal_app = build_internal_router(state);

    let addr: SocketAddr = settings.server_bind.parse()?;
    let internal_addr: SocketAddr = settings.internal_bind.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let internal_listener = tokio::net::TcpListener::bind(internal_addr).await?;
    info!(%addr, %internal_addr, "server listening");

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal(registry).await;
        let _ = stop_tx.send(true);
    });

    tokio::try_join!(
        axum::serve(listener, app)
            .with_graceful_shutdown(stopped(stop_rx.clone()))
            .into_future(),
        axum::serve(internal_listener, internal_app)
            .with_graceful_shutdown(stopped(stop_rx))
            .into_future(),
    )?;
    Ok(())
}

/// Routes reachable by browsers and clients. Connection attempts on the
/// coordinator path are always authenticated, whatever their headers claim.
fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(routes::healthz))
        .route("/ws/list/:list_id", get(gateway::list_socket))
        .route(
            "/parties/list/:list_id",
            get(gateway::list_socket).post(gateway::list_socket),
        )
        .route(
            "/api/lists",
            get(routes::http_get_lists).post(routes::http_create_list),
        )
        .route(
            "/api/lists/:list_id",
            get(routes::http_get_details).patch(routes::http_edit_list),
        )
        .route(
            "/api/lists/:list_id/items",
            get(routes::http_list_items).post(routes::http_create_item),
        )
        .route(
            "/api/lists/:list_id/items/:item_id",
            patch(routes::http_update_item).delete(routes::http_remove_item),
        )
        .route(
            "/api/lists/:list_id/items/:item_id/watched",
            post(routes::http_mark_watched).delete(routes::http_mark_unwatched),
        )
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

/// Routes for the mutation layer only; bind them to a private address.
fn build_internal_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/parties/list/:list_id", post(routes::internal_broadcast))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

async fn stopped(mut stop: watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}

async fn shutdown_signal(registry: Arc<ListRegistry>) {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
    registry.shutdown().await;
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
