//! TLS ingest side of the pipeline: capture endpoints authenticate, stream
//! framed utterances, and leave finalized WAV artifacts in the recordings
//! tree for the transcription side to pick up.

pub mod endpoints;
pub mod frame;
pub mod recordings;
pub mod server;
pub mod session;
pub mod tls;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub use endpoints::{Endpoint, EndpointRegistry};
pub use server::IngestServer;

/// Result type alias for ingest operations.
pub type IngestResult<T> = Result<T, IngestError>;

/// Errors raised on the ingest path. Connection-scoped failures are logged
/// and terminate only their own session.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("payload frame of {len} bytes exceeds cap of {max}")]
    ChunkTooLarge { len: u32, max: u32 },

    #[error("payload of {len} bytes cannot be framed")]
    Unframeable { len: usize },

    #[error("audio artifact error: {0}")]
    Audio(#[from] hearsay_audio::AudioError),
}

/// Ingest server configuration, assembled by the daemon from environment.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// TLS listen address for capture endpoints.
    pub bind_addr: SocketAddr,
    /// PEM certificate chain presented to peers.
    pub cert_file: PathBuf,
    /// PEM private key for the certificate.
    pub key_file: PathBuf,
    /// Shared bearer secret; peers send exactly these bytes after handshake.
    pub token: String,
    /// Root of the recordings tree.
    pub recordings_dir: PathBuf,
    /// External transcoder invoked on each finalized utterance.
    pub transcoder_path: PathBuf,
    /// Utterances shorter than this are discarded.
    pub min_utterance: Duration,
    /// Largest accepted payload frame.
    pub max_chunk_bytes: u32,
}

impl IngestConfig {
    pub fn new(bind_addr: SocketAddr, cert_file: PathBuf, key_file: PathBuf, token: String) -> Self {
        Self {
            bind_addr,
            cert_file,
            key_file,
            token,
            recordings_dir: PathBuf::from("recordings"),
            transcoder_path: PathBuf::from("ffmpeg"),
            min_utterance: Duration::from_secs(1),
            max_chunk_bytes: frame::MAX_CHUNK_BYTES,
        }
    }
}
