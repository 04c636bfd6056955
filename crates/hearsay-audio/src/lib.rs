//! Audio artifact handling: the on-disk WAV container and the resample step
//! that turns a finished capture into a recognizer-ready file.

pub mod resample;
pub mod wav;

use thiserror::Error;

/// Result type alias for audio operations.
pub type AudioResult<T> = Result<T, AudioError>;

/// Errors from container writing/parsing and transcoder invocation.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed container header: {0}")]
    MalformedHeader(&'static str),

    #[error("transcoder exited with status {status}: {stderr}")]
    Transcode { status: i32, stderr: String },
}

pub use resample::{recognizer_sibling, resample_for_recognizer, RECOGNIZER_SUFFIX};
pub use wav::{
    WavHeader, CAPTURE_SAMPLE_RATE, HEADER_LEN, RECOGNIZER_SAMPLE_RATE,
};
