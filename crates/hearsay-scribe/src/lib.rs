//! Transcription side of the pipeline: watches the recordings tree for
//! recognizer-ready artifacts, drains them through a bounded worker pool into
//! the per-endpoint transcript store, and publishes each transcript to live
//! WebSocket subscribers.
//!
//! The ingest side and this service share no queue in memory; the filesystem
//! is the handoff point, so recognition can stall without backpressuring
//! capture.

pub mod http;
pub mod hub;
pub mod store;
pub mod types;
pub mod watcher;
pub mod worker;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

pub use hub::SubscriptionHub;
pub use store::TranscriptStore;
pub use types::{TranscriptEnvelope, TranscriptMessage, TranscriptionJob};

/// Capacity of the watcher-to-workers job queue. Overflow drops jobs rather
/// than blocking the watcher.
pub const JOB_QUEUE_CAPACITY: usize = 100;

/// Result type alias for scribe operations.
pub type ScribeResult<T> = Result<T, ScribeError>;

/// Errors raised on the transcription path.
#[derive(Debug, Error)]
pub enum ScribeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("recognizer exited with status {status}: {stderr}")]
    Recognizer { status: i32, stderr: String },
}

/// Scribe service configuration, assembled by the daemon from environment.
#[derive(Debug, Clone)]
pub struct ScribeConfig {
    /// PEM certificate chain for the HTTPS surface.
    pub cert_file: PathBuf,
    /// PEM private key for the certificate.
    pub key_file: PathBuf,
    /// Root of the recordings tree to observe.
    pub recordings_dir: PathBuf,
    /// HTTPS/WebSocket bind address.
    pub http_addr: SocketAddr,
    /// Recognizer executable invoked per job.
    pub recognizer_path: PathBuf,
    /// Model argument passed to the recognizer.
    pub recognizer_model: String,
    /// Recognition parallelism.
    pub workers: usize,
    /// Dashboard assets served on unmatched paths.
    pub static_dir: PathBuf,
    /// Bound on worker drain during shutdown.
    pub shutdown_deadline: Duration,
}

impl ScribeConfig {
    pub fn new(
        http_addr: SocketAddr,
        cert_file: PathBuf,
        key_file: PathBuf,
        recognizer_path: PathBuf,
        recognizer_model: String,
    ) -> Self {
        Self {
            cert_file,
            key_file,
            recordings_dir: PathBuf::from("recordings"),
            http_addr,
            recognizer_path,
            recognizer_model,
            workers: 2,
            static_dir: PathBuf::from("static"),
            shutdown_deadline: Duration::from_secs(10),
        }
    }
}

/// The transcription service: owns the store and hub, runs the watcher, the
/// worker pool, and the HTTP surface until cancellation.
pub struct Scribe {
    config: Arc<ScribeConfig>,
    store: Arc<TranscriptStore>,
    hub: Arc<SubscriptionHub>,
}

impl Scribe {
    pub fn new(mut config: ScribeConfig) -> Self {
        if config.workers == 0 {
            config.workers = 2;
        }
        Self {
            config: Arc::new(config),
            store: Arc::new(TranscriptStore::new()),
            hub: Arc::new(SubscriptionHub::new()),
        }
    }

    pub fn store(&self) -> Arc<TranscriptStore> {
        Arc::clone(&self.store)
    }

    pub fn hub(&self) -> Arc<SubscriptionHub> {
        Arc::clone(&self.hub)
    }

    /// Run until cancellation. The HTTP server shuts down gracefully; workers
    /// finish their current job, bounded by the shutdown deadline.
    pub async fn run(&self, cancel: CancellationToken) -> ScribeResult<()> {
        // Child token so an HTTP startup failure also stops the watcher and
        // workers, not just a cancellation from above.
        let local = cancel.child_token();
        let (jobs_tx, jobs_rx) = mpsc::channel(JOB_QUEUE_CAPACITY);

        let watcher = {
            let config = Arc::clone(&self.config);
            let store = Arc::clone(&self.store);
            let local = local.clone();
            tokio::spawn(async move {
                if let Err(e) = watcher::watch_recordings(config, store, jobs_tx, local).await {
                    error!(error = %e, "recordings watcher failed");
                }
            })
        };

        let workers = tokio::spawn(worker::run_workers(
            Arc::clone(&self.config),
            Arc::clone(&self.store),
            Arc::clone(&self.hub),
            jobs_rx,
            local.clone(),
        ));

        let state = http::AppState {
            store: Arc::clone(&self.store),
            hub: Arc::clone(&self.hub),
        };
        let http_result = http::serve(Arc::clone(&self.config), state, local.clone()).await;
        local.cancel();

        if tokio::time::timeout(self.config.shutdown_deadline, workers)
            .await
            .is_err()
        {
            warn!("worker drain exceeded shutdown deadline");
        }
        watcher.abort();

        http_result
    }
}
