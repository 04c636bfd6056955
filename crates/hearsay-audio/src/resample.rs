//! Resample step: turn a finalized capture-rate file into the 16 kHz mono
//! sibling the recognizer consumes.
//!
//! The watcher treats only `_whisper` files as work, so a failed resample
//! simply produces no job; the original stays on disk for inspection.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::debug;

use crate::{wav::RECOGNIZER_SAMPLE_RATE, AudioError, AudioResult};

/// Basename suffix that marks a recognizer-ready artifact.
pub const RECOGNIZER_SUFFIX: &str = "_whisper";

/// Sibling path for the recognizer-ready rendition of `input`.
pub fn recognizer_sibling(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("audio");
    input.with_file_name(format!("{stem}{RECOGNIZER_SUFFIX}.wav"))
}

/// Invoke the external transcoder to produce the recognizer-rate sibling of
/// `input`, deleting the original on success. Returns the sibling path.
pub async fn resample_for_recognizer(transcoder: &Path, input: &Path) -> AudioResult<PathBuf> {
    let output_path = recognizer_sibling(input);

    let output = Command::new(transcoder)
        .arg("-i")
        .arg(input)
        .arg("-ar")
        .arg(RECOGNIZER_SAMPLE_RATE.to_string())
        .arg("-ac")
        .arg("1")
        .arg("-y")
        .arg(&output_path)
        .output()
        .await?;

    if !output.status.success() {
        return Err(AudioError::Transcode {
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    debug!(input = %input.display(), output = %output_path.display(), "resampled for recognizer");
    tokio::fs::remove_file(input).await?;
    Ok(output_path)
}
