//! Worker pool: drains the job queue, runs the recognizer, and lands the
//! transcript in the store and on the wire.
//!
//! Workers are not order-preserving across each other; the queue itself is.
//! Two jobs from one endpoint may complete out of order, which the enqueue
//! timestamp on the message compensates for.

use std::sync::Arc;

use tokio::process::Command;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::types::{TranscriptEnvelope, TranscriptMessage, TranscriptionJob};
use crate::{ScribeConfig, ScribeError, ScribeResult, SubscriptionHub, TranscriptStore};

/// Recognizer stderr marker for an input that vanished before processing.
const INPUT_NOT_FOUND: &str = "input file not found";
/// Recognizer output marker for segments with no speech.
const BLANK_AUDIO: &str = "[BLANK_AUDIO]";

/// Run `config.workers` workers until the queue closes or cancellation.
/// Each worker finishes its current job before exiting.
pub async fn run_workers(
    config: Arc<ScribeConfig>,
    store: Arc<TranscriptStore>,
    hub: Arc<SubscriptionHub>,
    jobs: mpsc::Receiver<TranscriptionJob>,
    cancel: CancellationToken,
) {
    let jobs = Arc::new(Mutex::new(jobs));
    let mut handles = Vec::with_capacity(config.workers);
    for worker_id in 0..config.workers {
        handles.push(tokio::spawn(worker_loop(
            worker_id,
            Arc::clone(&config),
            Arc::clone(&store),
            Arc::clone(&hub),
            Arc::clone(&jobs),
            cancel.clone(),
        )));
    }
    for handle in handles {
        let _ = handle.await;
    }
}

async fn worker_loop(
    worker_id: usize,
    config: Arc<ScribeConfig>,
    store: Arc<TranscriptStore>,
    hub: Arc<SubscriptionHub>,
    jobs: Arc<Mutex<mpsc::Receiver<TranscriptionJob>>>,
    cancel: CancellationToken,
) {
    debug!(worker_id, "worker starting");
    loop {
        let job = tokio::select! {
            _ = cancel.cancelled() => break,
            job = async { jobs.lock().await.recv().await } => match job {
                Some(job) => job,
                None => break,
            },
        };

        if let Err(e) = process_job(&config, &store, &hub, &job).await {
            error!(
                worker_id,
                file = %job.file_path.display(),
                endpoint = %job.endpoint_id,
                error = %e,
                "failed to process recognition job"
            );
        }
    }
    debug!(worker_id, "worker shutting down");
}

/// Run the recognizer over one artifact and publish the result.
pub async fn process_job(
    config: &ScribeConfig,
    store: &TranscriptStore,
    hub: &SubscriptionHub,
    job: &TranscriptionJob,
) -> ScribeResult<()> {
    info!(file = %job.file_path.display(), endpoint = %job.endpoint_id, "processing audio file");

    let output = Command::new(&config.recognizer_path)
        .arg("--model")
        .arg(&config.recognizer_model)
        .arg(&job.file_path)
        .kill_on_drop(true)
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains(INPUT_NOT_FOUND) {
            // Already collected or re-processed; nothing to do.
            info!(file = %job.file_path.display(), "audio file gone before recognition; skipping");
            return Ok(());
        }
        return Err(ScribeError::Recognizer {
            status: output.status.code().unwrap_or(-1),
            stderr: stderr.trim().to_string(),
        });
    }

    let text = collapse_transcript(&String::from_utf8_lossy(&output.stdout));
    if text.is_empty() {
        info!(file = %job.file_path.display(), endpoint = %job.endpoint_id, "no transcribable content");
        return Ok(());
    }

    let message = TranscriptMessage {
        timestamp: job.enqueued_at,
        text,
        audio_file: job
            .file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string(),
        confidence: 1.0,
    };
    store.append(job.endpoint_id, message.clone());

    let envelope = TranscriptEnvelope::transcription(job.endpoint_id, message.clone());
    let data = serde_json::to_string(&envelope)?;
    let delivered = hub.publish(job.endpoint_id, &data);

    info!(
        endpoint = %job.endpoint_id,
        file = %message.audio_file,
        text = %message.text,
        delivered,
        "transcribed audio"
    );
    Ok(())
}

/// Collapse recognizer output into one line: drop empties and blank-audio
/// markers, trim the rest, join with single spaces.
pub fn collapse_transcript(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.contains(BLANK_AUDIO))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use uuid::Uuid;

    #[test]
    fn collapse_joins_trimmed_lines() {
        let raw = "  [00:00.000 --> 00:02.000]  hello there \n\n  general kenobi  \n";
        assert_eq!(
            collapse_transcript(raw),
            "[00:00.000 --> 00:02.000]  hello there general kenobi"
        );
    }

    #[test]
    fn collapse_drops_blank_audio_markers() {
        let raw = "first\n[BLANK_AUDIO]\nsecond\n   [BLANK_AUDIO]   \n";
        assert_eq!(collapse_transcript(raw), "first second");
    }

    #[test]
    fn collapse_of_silence_is_empty() {
        assert_eq!(collapse_transcript(""), "");
        assert_eq!(collapse_transcript("\n\n[BLANK_AUDIO]\n"), "");
    }

    fn test_config(recognizer: &std::path::Path, model: &str) -> ScribeConfig {
        ScribeConfig::new(
            "127.0.0.1:0".parse().unwrap(),
            "unused-cert.pem".into(),
            "unused-key.pem".into(),
            recognizer.to_path_buf(),
            model.into(),
        )
    }

    #[cfg(unix)]
    fn write_script(dir: &std::path::Path, body: &str) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("recognizer.sh");
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn job_lands_in_store_and_hub() {
        let dir = tempfile::tempdir().unwrap();
        let recognizer = write_script(
            dir.path(),
            "#!/bin/sh\necho 'hello world'\necho '[BLANK_AUDIO]'\n",
        );
        let config = test_config(&recognizer, "model.bin");
        let store = TranscriptStore::new();
        let hub = SubscriptionHub::new();

        let endpoint = Uuid::new_v4();
        let mut sub = hub.subscribe(endpoint);
        let job = TranscriptionJob {
            file_path: dir.path().join("audio_110000_whisper.wav"),
            endpoint_id: endpoint,
            enqueued_at: Local::now(),
        };

        process_job(&config, &store, &hub, &job).await.unwrap();

        let stored = store.latest_today(endpoint).unwrap();
        assert_eq!(stored.text, "hello world");
        assert_eq!(stored.audio_file, "audio_110000_whisper.wav");
        assert_eq!(stored.confidence, 1.0);
        assert_eq!(stored.timestamp, job.enqueued_at);

        let wire: serde_json::Value =
            serde_json::from_str(&sub.rx.recv().await.unwrap()).unwrap();
        assert_eq!(wire["type"], "transcription");
        assert_eq!(wire["clientId"], endpoint.to_string());
        assert_eq!(wire["payload"]["text"], "hello world");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn vanished_input_is_a_silent_skip() {
        let dir = tempfile::tempdir().unwrap();
        let recognizer = write_script(
            dir.path(),
            "#!/bin/sh\necho 'error: input file not found' >&2\nexit 3\n",
        );
        let config = test_config(&recognizer, "model.bin");
        let store = TranscriptStore::new();
        let hub = SubscriptionHub::new();

        let endpoint = Uuid::new_v4();
        let job = TranscriptionJob {
            file_path: dir.path().join("gone_whisper.wav"),
            endpoint_id: endpoint,
            enqueued_at: Local::now(),
        };

        process_job(&config, &store, &hub, &job).await.unwrap();
        assert!(!store.contains(endpoint));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn other_recognizer_failures_surface() {
        let dir = tempfile::tempdir().unwrap();
        let recognizer = write_script(dir.path(), "#!/bin/sh\necho 'model exploded' >&2\nexit 1\n");
        let config = test_config(&recognizer, "model.bin");
        let store = TranscriptStore::new();
        let hub = SubscriptionHub::new();

        let job = TranscriptionJob {
            file_path: dir.path().join("audio_whisper.wav"),
            endpoint_id: Uuid::new_v4(),
            enqueued_at: Local::now(),
        };

        let err = process_job(&config, &store, &hub, &job).await.unwrap_err();
        match err {
            ScribeError::Recognizer { status, stderr } => {
                assert_eq!(status, 1);
                assert!(stderr.contains("model exploded"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn empty_transcript_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let recognizer = write_script(dir.path(), "#!/bin/sh\necho '[BLANK_AUDIO]'\n");
        let config = test_config(&recognizer, "model.bin");
        let store = TranscriptStore::new();
        let hub = SubscriptionHub::new();

        let endpoint = Uuid::new_v4();
        let mut sub = hub.subscribe(endpoint);
        let job = TranscriptionJob {
            file_path: dir.path().join("quiet_whisper.wav"),
            endpoint_id: endpoint,
            enqueued_at: Local::now(),
        };

        process_job(&config, &store, &hub, &job).await.unwrap();
        assert!(!store.contains(endpoint));
        assert!(sub.rx.try_recv().is_err());
    }
}
