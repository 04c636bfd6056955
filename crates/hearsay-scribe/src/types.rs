//! Shared transcription types: stored messages, queued jobs, and the fan-out
//! envelope.

use std::path::PathBuf;
use std::time::SystemTime;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One transcribed utterance. Appended to the owning endpoint's log and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub timestamp: DateTime<Local>,
    pub text: String,
    #[serde(rename = "audioFile")]
    pub audio_file: String,
    pub confidence: f32,
}

impl Default for TranscriptMessage {
    /// Placeholder for endpoints that are known but silent today.
    fn default() -> Self {
        Self {
            timestamp: DateTime::from(SystemTime::UNIX_EPOCH),
            text: String::new(),
            audio_file: String::new(),
            confidence: 0.0,
        }
    }
}

/// One unit of recognition work, created by the watcher and consumed exactly
/// once by a worker.
#[derive(Debug, Clone)]
pub struct TranscriptionJob {
    pub file_path: PathBuf,
    pub endpoint_id: Uuid,
    /// Enqueue time; carried into the transcript so message order tracks
    /// utterance order, not recognition completion order.
    pub enqueued_at: DateTime<Local>,
}

/// Envelope published to WebSocket subscribers for each transcript.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptEnvelope {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(rename = "clientId")]
    pub client_id: Uuid,
    pub timestamp: DateTime<Local>,
    pub payload: TranscriptMessage,
}

impl TranscriptEnvelope {
    pub fn transcription(client_id: Uuid, message: TranscriptMessage) -> Self {
        Self {
            kind: "transcription",
            client_id,
            timestamp: message.timestamp,
            payload: message,
        }
    }
}
