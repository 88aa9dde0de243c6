//! The engine owns the store, the collaborators, and the dispatcher.
//!
//! All services hang off one [`Engine`] value rather than module-level
//! globals; collaborators are injected so tests can swap in fakes.

mod dispatcher;
mod worker;

pub use dispatcher::Dispatcher;
pub use worker::{Worker, WorkerError, WorkerSignal};

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::blobs::{BlobStore, LocalBlobStore};
use crate::config::Settings;
use crate::ocr::{HttpOcrProvider, OcrProvider};
use crate::store::Store;

/// Shared dependencies handed to every worker and timer task.
#[derive(Clone)]
pub struct EngineContext {
    pub settings: Arc<Settings>,
    pub store: Store,
    pub blobs: Arc<dyn BlobStore>,
    pub ocr: Arc<dyn OcrProvider>,
    /// Set once at shutdown; workers check it before each claim and between
    /// suspension points.
    pub draining: Arc<AtomicBool>,
}

/// Process-wide service value: store + collaborators + dispatcher.
pub struct Engine {
    ctx: EngineContext,
    dispatcher: Option<Dispatcher>,
}

impl Engine {
    /// Initialize from settings with the default collaborators: a local
    /// filesystem blob store and the HTTP OCR provider.
    pub fn init(settings: Settings) -> anyhow::Result<Self> {
        settings.ensure_directories()?;
        let store = Store::open(&settings.store_options())?;
        let blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(settings.blobs_dir())?);
        let ocr: Arc<dyn OcrProvider> = Arc::new(HttpOcrProvider::new(settings.ocr.clone()));
        Ok(Self::with_collaborators(settings, store, blobs, ocr))
    }

    /// Wire an engine from externally constructed collaborators.
    pub fn with_collaborators(
        settings: Settings,
        store: Store,
        blobs: Arc<dyn BlobStore>,
        ocr: Arc<dyn OcrProvider>,
    ) -> Self {
        let ctx = EngineContext {
            settings: Arc::new(settings),
            store,
            blobs,
            ocr,
            draining: Arc::new(AtomicBool::new(false)),
        };
        Self {
            ctx,
            dispatcher: None,
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn store(&self) -> &Store {
        &self.ctx.store
    }

    /// Start the worker pool and the periodic timers.
    pub async fn start(&mut self) {
        let mut dispatcher = Dispatcher::new(self.ctx.clone());
        dispatcher.start().await;
        self.dispatcher = Some(dispatcher);
    }

    /// Drain workers and stop timers. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.stop().await;
        }
    }
}
