//! Recordings-tree watcher: turns filesystem create events into recognition
//! jobs.
//!
//! Only `_whisper` WAV files are work; the resample step produces them
//! strictly after the original's header is patched, so observing one implies
//! a complete artifact. The watch set is per-directory: the root, the current
//! day, and each endpoint directory as it appears.

use std::path::Path;
use std::sync::Arc;

use chrono::Local;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use hearsay_audio::RECOGNIZER_SUFFIX;

use crate::types::TranscriptionJob;
use crate::{ScribeConfig, ScribeResult, TranscriptStore};

fn today() -> String {
    Local::now().format("%Y%m%d").to_string()
}

/// What a create event under the recordings root means.
#[derive(Debug, PartialEq, Eq)]
enum TreeEvent {
    /// A new endpoint directory under today's tree.
    EndpointDir { id: Uuid },
    /// A recognizer-ready artifact to enqueue.
    RecognizerArtifact { id: Uuid },
    /// A WAV that has not been through the resample step.
    OriginalWav,
    Ignored,
}

fn classify_create(root: &Path, today: &str, path: &Path) -> TreeEvent {
    if path.extension().map(|e| e == "tmp").unwrap_or(false) {
        return TreeEvent::Ignored;
    }
    let Ok(rel) = path.strip_prefix(root) else {
        return TreeEvent::Ignored;
    };
    let parts: Vec<&str> = rel
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect();
    if parts.len() < 2 || parts[0] != today {
        return TreeEvent::Ignored;
    }

    match parts.as_slice() {
        [_, endpoint] => match Uuid::parse_str(endpoint) {
            Ok(id) => TreeEvent::EndpointDir { id },
            Err(_) => TreeEvent::Ignored,
        },
        [_, endpoint, leaf] => {
            let Ok(id) = Uuid::parse_str(endpoint) else {
                return TreeEvent::Ignored;
            };
            if !leaf.ends_with(".wav") {
                return TreeEvent::Ignored;
            }
            if leaf.contains(RECOGNIZER_SUFFIX) {
                TreeEvent::RecognizerArtifact { id }
            } else {
                TreeEvent::OriginalWav
            }
        }
        _ => TreeEvent::Ignored,
    }
}

/// Observe the recordings tree until cancellation, enqueueing a job for each
/// recognizer-ready artifact. Queue overflow drops the job with a warning;
/// losing one utterance beats backpressuring every endpoint.
pub async fn watch_recordings(
    config: Arc<ScribeConfig>,
    store: Arc<TranscriptStore>,
    jobs: mpsc::Sender<TranscriptionJob>,
    cancel: CancellationToken,
) -> ScribeResult<()> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                let _ = event_tx.send(event);
            }
        },
        Config::default(),
    )?;

    // Event paths arrive absolute; classify against the canonical root.
    tokio::fs::create_dir_all(&config.recordings_dir).await?;
    let root = tokio::fs::canonicalize(&config.recordings_dir).await?;
    watcher.watch(&root, RecursiveMode::NonRecursive)?;
    info!(path = %root.display(), "watching recordings directory");

    let day_path = root.join(today());
    tokio::fs::create_dir_all(&day_path).await?;
    watcher.watch(&day_path, RecursiveMode::NonRecursive)?;
    info!(path = %day_path.display(), "watching current day directory");

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("recordings watcher shutting down");
                return Ok(());
            }
            event = event_rx.recv() => match event {
                Some(event) => event,
                None => return Ok(()),
            },
        };

        if !matches!(event.kind, EventKind::Create(_)) {
            continue;
        }

        let today = today();
        for path in &event.paths {
            match classify_create(&root, &today, path) {
                TreeEvent::EndpointDir { id } => {
                    if let Err(e) = watcher.watch(path, RecursiveMode::NonRecursive) {
                        error!(path = %path.display(), error = %e, "failed to watch endpoint directory");
                        continue;
                    }
                    info!(endpoint = %id, path = %path.display(), "watching new endpoint directory");
                    store.ensure_log(id);
                }
                TreeEvent::RecognizerArtifact { id } => {
                    let job = TranscriptionJob {
                        file_path: path.clone(),
                        endpoint_id: id,
                        enqueued_at: Local::now(),
                    };
                    match jobs.try_send(job) {
                        Ok(()) => {
                            info!(endpoint = %id, file = %path.display(), "queued audio file for recognition");
                        }
                        Err(TrySendError::Full(_)) => {
                            warn!(endpoint = %id, file = %path.display(), "job queue full; dropping job");
                        }
                        Err(TrySendError::Closed(_)) => return Ok(()),
                    }
                }
                TreeEvent::OriginalWav => {
                    debug!(path = %path.display(), "wav without recognizer suffix; skipping");
                }
                TreeEvent::Ignored => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    fn root() -> PathBuf {
        PathBuf::from("/rec")
    }

    #[test]
    fn endpoint_dir_is_detected() {
        let id = Uuid::new_v4();
        let path = root().join("20250601").join(id.to_string());
        assert_eq!(
            classify_create(&root(), "20250601", &path),
            TreeEvent::EndpointDir { id }
        );
    }

    #[test]
    fn recognizer_artifact_is_detected() {
        let id = Uuid::new_v4();
        let path = root()
            .join("20250601")
            .join(id.to_string())
            .join("audio_101500_whisper.wav");
        assert_eq!(
            classify_create(&root(), "20250601", &path),
            TreeEvent::RecognizerArtifact { id }
        );
    }

    #[test]
    fn original_wav_is_skipped() {
        let id = Uuid::new_v4();
        let path = root()
            .join("20250601")
            .join(id.to_string())
            .join("audio_101500.wav");
        assert_eq!(
            classify_create(&root(), "20250601", &path),
            TreeEvent::OriginalWav
        );
    }

    #[test]
    fn foreign_days_temp_files_and_odd_paths_are_ignored() {
        let id = Uuid::new_v4();
        let yesterday = root().join("20250531").join(id.to_string());
        assert_eq!(classify_create(&root(), "20250601", &yesterday), TreeEvent::Ignored);

        let tmp = root().join("20250601").join(id.to_string()).join("x.tmp");
        assert_eq!(classify_create(&root(), "20250601", &tmp), TreeEvent::Ignored);

        let not_uuid = root().join("20250601").join("not-an-id");
        assert_eq!(classify_create(&root(), "20250601", &not_uuid), TreeEvent::Ignored);

        let incomplete = root()
            .join("20250601")
            .join(id.to_string())
            .join("audio_101500.wav.incomplete");
        assert_eq!(classify_create(&root(), "20250601", &incomplete), TreeEvent::Ignored);

        let too_deep = root()
            .join("20250601")
            .join(id.to_string())
            .join("sub")
            .join("audio_whisper.wav");
        assert_eq!(classify_create(&root(), "20250601", &too_deep), TreeEvent::Ignored);

        let outside = PathBuf::from("/elsewhere/audio_whisper.wav");
        assert_eq!(classify_create(&root(), "20250601", &outside), TreeEvent::Ignored);
    }

    #[tokio::test]
    async fn watcher_enqueues_recognizer_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ScribeConfig::new(
            "127.0.0.1:0".parse().unwrap(),
            PathBuf::from("unused-cert.pem"),
            PathBuf::from("unused-key.pem"),
            PathBuf::from("recognizer"),
            "model".into(),
        );
        config.recordings_dir = dir.path().to_path_buf();

        let store = Arc::new(TranscriptStore::new());
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(watch_recordings(
            Arc::new(config),
            Arc::clone(&store),
            tx,
            cancel.clone(),
        ));

        // Give the watcher time to arm before mutating the tree.
        tokio::time::sleep(Duration::from_millis(300)).await;

        let endpoint = Uuid::new_v4();
        let endpoint_dir = dir.path().join(today()).join(endpoint.to_string());
        std::fs::create_dir_all(&endpoint_dir).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        std::fs::write(endpoint_dir.join("audio_110000.wav"), b"original").unwrap();
        std::fs::write(endpoint_dir.join("audio_110000_whisper.wav"), b"resampled").unwrap();

        let job = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("watcher did not enqueue a job")
            .unwrap();
        assert_eq!(job.endpoint_id, endpoint);
        assert!(job
            .file_path
            .to_str()
            .unwrap()
            .ends_with("audio_110000_whisper.wav"));
        assert!(store.contains(endpoint));

        // Only the recognizer-ready artifact produced work.
        assert!(rx.try_recv().is_err());

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn full_queue_drops_jobs_instead_of_blocking() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ScribeConfig::new(
            "127.0.0.1:0".parse().unwrap(),
            PathBuf::from("unused-cert.pem"),
            PathBuf::from("unused-key.pem"),
            PathBuf::from("recognizer"),
            "model".into(),
        );
        config.recordings_dir = dir.path().to_path_buf();

        let store = Arc::new(TranscriptStore::new());
        let (tx, mut rx) = mpsc::channel(2);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(watch_recordings(
            Arc::new(config),
            store,
            tx,
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(300)).await;

        let endpoint = Uuid::new_v4();
        let endpoint_dir = dir.path().join(today()).join(endpoint.to_string());
        std::fs::create_dir_all(&endpoint_dir).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        for i in 0..5 {
            std::fs::write(
                endpoint_dir.join(format!("audio_{i:06}_whisper.wav")),
                b"resampled",
            )
            .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(500)).await;

        // Nobody drained the queue, so only its capacity survived.
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 2);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }
}
