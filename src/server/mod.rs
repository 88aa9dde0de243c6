//! Submission API: the HTTP surface that feeds the queue and serves status
//! reads. Clients poll document/job/batch rows; the core pushes nothing.

pub mod handlers;
mod routes;

pub use routes::create_router;

use std::sync::Arc;

use crate::blobs::BlobStore;
use crate::config::Settings;
use crate::store::Store;

/// Shared state for request handlers.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Store,
    pub blobs: Arc<dyn BlobStore>,
}

impl AppState {
    pub fn new(settings: Arc<Settings>, store: Store, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            settings,
            store,
            blobs,
        }
    }
}

/// Serve the submission API until the provided future resolves.
pub async fn serve(
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = state.settings.bind_addr.clone();
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("submission API listening on {}", addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
