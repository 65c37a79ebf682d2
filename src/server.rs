use crate::config::Config;
use crate::handlers::{get_element, health_check, list_elements, not_found, AppState, SharedState};
use crate::middleware::{cache_middleware, logging_middleware, throttle_middleware};
use crate::store::ElementStore;
use axum::routing::get;
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Builds the router. Element routes run behind the throttle, then the
/// response cache; `/health` bypasses both.
pub fn create_app(state: SharedState) -> Router {
    let api = Router::new()
        .route("/api/elements", get(list_elements))
        .route("/api/elements/", get(list_elements))
        .route("/api/elements/:atomic_number", get(get_element))
        .route("/api/elements/:atomic_number/", get(get_element))
        .route_layer(middleware::from_fn_with_state(state.clone(), cache_middleware))
        .route_layer(middleware::from_fn_with_state(state.clone(), throttle_middleware));

    Router::new()
        .merge(api)
        .route("/health", get(health_check))
        .fallback(not_found)
        .with_state(state.clone())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn_with_state(state, logging_middleware)),
        )
}

pub struct Server {
    app: Router,
    state: SharedState,
    bind_addr: SocketAddr,
    cleanup_interval: Duration,
}

impl Server {
    pub fn new(config: &Config, store: Arc<dyn ElementStore>) -> Self {
        let state = AppState::new(store, config);
        let app = create_app(state.clone());

        Self {
            app,
            state,
            bind_addr: config.bind_addr,
            cleanup_interval: config.cleanup_interval,
        }
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        tracing::info!("Periodic table API listening on {}", self.bind_addr);
        tracing::info!("Elements available at /api/elements/");
        tracing::info!("Health check available at /health");

        let cleanup = tokio::spawn(cleanup_loop(self.state.clone(), self.cleanup_interval));

        // Run server with graceful shutdown
        axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        cleanup.abort();
        Ok(())
    }
}

/// Periodically drops expired cache entries and idle throttle windows.
async fn cleanup_loop(state: SharedState, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;

    loop {
        interval.tick().await;
        let expired = state.cache.purge_expired();
        let idle = state.throttle.purge_idle();
        tracing::debug!(expired, idle, "Purged cache and throttle state");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
