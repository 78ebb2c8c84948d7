use axum::{
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::{ensure_db_dir, Settings};
use crate::manager::LinkManager;
use crate::storage::Database;
use crate::{Error, Result};

pub mod error;
pub mod routes;

/// Server state
pub struct AppState {
    pub manager: LinkManager,
    /// Deadline applied to every storage operation a request performs
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(manager: LinkManager, request_timeout: Duration) -> Self {
        Self { manager, request_timeout }
    }

    /// Run a blocking manager operation off the async runtime, bounded by
    /// the request deadline. An expired deadline is a transient failure.
    ///
    /// The deadline travels with the manager into the blocking task, so an
    /// operation that loses the race never commits after the caller was
    /// told it failed.
    pub async fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&LinkManager) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let deadline = Instant::now() + self.request_timeout;
        let manager = self.manager.with_deadline(deadline);
        let task = tokio::task::spawn_blocking(move || op(&manager));

        match tokio::time::timeout_at(deadline.into(), task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(Error::UnexpectedStorage(format!("storage task failed: {}", join_err))),
            Err(_) => {
                tracing::warn!(timeout_ms = self.request_timeout.as_millis() as u64, "storage deadline exceeded");
                Err(Error::TransientStorage(format!(
                    "deadline of {}ms exceeded",
                    self.request_timeout.as_millis()
                )))
            }
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route(
            "/feature",
            post(routes::create_feature)
                .get(routes::get_feature)
                .put(routes::update_feature)
                .delete(routes::delete_feature),
        )
        .route("/features", get(routes::list_features))
        .route(
            "/provision",
            post(routes::create_provision)
                .get(routes::get_provision)
                .put(routes::update_provision)
                .delete(routes::delete_provision),
        )
        .route("/provisions", get(routes::list_provisions))
        .route(
            "/link",
            post(routes::create_link)
                .put(routes::update_link)
                .delete(routes::delete_link),
        )
        .route("/link/provisions", get(routes::provisions_by_feature))
        .route("/link/features", get(routes::features_by_provision))
        .route("/link/by-feature", delete(routes::delete_links_by_feature))
        .route("/link/by-provision", delete(routes::delete_links_by_provision))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(settings: Settings) -> anyhow::Result<()> {
    ensure_db_dir(&settings.database)?;
    let db = Arc::new(Database::open_with(&settings.database, &settings.storage_options())?);
    let manager = LinkManager::with_options(Arc::clone(&db), settings.manager_options());
    let state = Arc::new(AppState::new(manager, settings.request_timeout));

    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    tracing::info!("Starting server on {}", addr);
    println!("🌍 Server running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db.close()?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
