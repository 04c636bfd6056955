//! Per-connection session: bearer-secret authentication followed by the
//! utterance state machine.
//!
//! At most one utterance is in progress per connection. Start marks allocate
//! the on-disk artifact with a placeholder header; end marks either discard
//! (short utterance) or patch the header and hand the file to the resample
//! step. A dying connection salvages what it can.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use hearsay_audio::{resample_for_recognizer, wav};

use crate::endpoints::EndpointRegistry;
use crate::frame::{read_frame, Frame};
use crate::recordings::{incomplete_path, RecordingsTree};
use crate::{IngestConfig, IngestError, IngestResult};

/// An utterance currently being received.
struct Recording {
    file: File,
    path: PathBuf,
    started_at: Instant,
    bytes: u32,
}

/// Compare secrets without leaking the mismatch position through timing.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Serve one authenticated connection end to end: verify the bearer secret,
/// mint and send the endpoint id, then run the utterance state machine until
/// the peer goes away or the server shuts down.
pub async fn serve_connection<S>(
    mut stream: S,
    peer: SocketAddr,
    cfg: Arc<IngestConfig>,
    tree: Arc<RecordingsTree>,
    registry: Arc<EndpointRegistry>,
    cancel: CancellationToken,
) -> IngestResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut presented = vec![0u8; cfg.token.len()];
    if let Err(e) = stream.read_exact(&mut presented).await {
        debug!(%peer, error = %e, "peer closed before presenting secret");
        return Ok(());
    }
    if !constant_time_eq(&presented, cfg.token.as_bytes()) {
        warn!(%peer, "invalid bearer secret; closing");
        return Ok(());
    }

    let endpoint_id = registry.register(peer);
    info!(%endpoint_id, %peer, "endpoint connected");

    let result = run_utterances(&mut stream, endpoint_id, &cfg, &tree, &cancel).await;

    registry.remove(endpoint_id);
    info!(%endpoint_id, %peer, "endpoint disconnected");
    result
}

async fn run_utterances<S>(
    stream: &mut S,
    endpoint_id: Uuid,
    cfg: &IngestConfig,
    tree: &RecordingsTree,
    cancel: &CancellationToken,
) -> IngestResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(endpoint_id.as_bytes()).await?;

    let mut recording: Option<Recording> = None;

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(%endpoint_id, "session shutting down");
                if let Some(rec) = recording.take() {
                    salvage_incomplete(rec, endpoint_id, cfg).await;
                }
                return Ok(());
            }
            frame = read_frame(stream, cfg.max_chunk_bytes) => frame,
        };

        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                if let Some(rec) = recording.take() {
                    salvage_incomplete(rec, endpoint_id, cfg).await;
                }
                return match e {
                    IngestError::Io(ref io) if io.kind() == ErrorKind::UnexpectedEof => {
                        debug!(%endpoint_id, "peer disconnected");
                        Ok(())
                    }
                    other => Err(other),
                };
            }
        };

        match frame {
            Frame::Start => {
                if let Some(rec) = recording.take() {
                    // Peer restarted without an end marker; treat the
                    // abandoned utterance like a dropped connection.
                    warn!(%endpoint_id, "start marker while recording; salvaging previous utterance");
                    salvage_incomplete(rec, endpoint_id, cfg).await;
                }
                let path = tree.utterance_path(endpoint_id)?;
                let mut file = match File::create(&path).await {
                    Ok(file) => file,
                    Err(e) => {
                        error!(%endpoint_id, path = %path.display(), error = %e, "failed to create artifact");
                        return Err(e.into());
                    }
                };
                wav::write_placeholder_header(&mut file).await?;
                info!(%endpoint_id, path = %path.display(), "started receiving utterance");
                recording = Some(Recording {
                    file,
                    path,
                    started_at: Instant::now(),
                    bytes: 0,
                });
            }
            Frame::End => match recording.take() {
                Some(rec) => finish_utterance(rec, endpoint_id, cfg).await,
                None => debug!(%endpoint_id, "end marker with no utterance in progress"),
            },
            Frame::Chunk(len) => {
                let mut payload = vec![0u8; len as usize];
                if let Err(e) = stream.read_exact(&mut payload).await {
                    if let Some(rec) = recording.take() {
                        salvage_incomplete(rec, endpoint_id, cfg).await;
                    }
                    return if e.kind() == ErrorKind::UnexpectedEof {
                        debug!(%endpoint_id, "peer disconnected mid-frame");
                        Ok(())
                    } else {
                        Err(e.into())
                    };
                }
                match recording.as_mut() {
                    Some(rec) => match rec.file.write_all(&payload).await {
                        Ok(()) => rec.bytes += len,
                        // A failed append loses the chunk but not the utterance.
                        Err(e) => warn!(%endpoint_id, error = %e, "failed to append payload frame"),
                    },
                    // No utterance in progress; the payload has been consumed
                    // so the stream stays framed.
                    None => debug!(%endpoint_id, len, "discarding payload frame outside utterance"),
                }
            }
        }
    }
}

/// End-marker path: discard a short utterance, otherwise patch the header and
/// run the resample step on the finalized artifact.
async fn finish_utterance(mut rec: Recording, endpoint_id: Uuid, cfg: &IngestConfig) {
    let duration = rec.started_at.elapsed();
    if duration < cfg.min_utterance {
        debug!(
            %endpoint_id,
            duration_ms = duration.as_millis() as u64,
            bytes = rec.bytes,
            "dropping short utterance"
        );
        drop(rec.file);
        if let Err(e) = tokio::fs::remove_file(&rec.path).await {
            warn!(%endpoint_id, path = %rec.path.display(), error = %e, "failed to remove short utterance");
        }
        return;
    }

    if let Err(e) = wav::patch_sizes(&mut rec.file, rec.bytes).await {
        error!(%endpoint_id, path = %rec.path.display(), error = %e, "failed to patch container header");
    }
    drop(rec.file);
    info!(
        %endpoint_id,
        duration_ms = duration.as_millis() as u64,
        bytes = rec.bytes,
        path = %rec.path.display(),
        "finished utterance"
    );

    match resample_for_recognizer(&cfg.transcoder_path, &rec.path).await {
        Ok(out) => info!(%endpoint_id, file = %out.display(), "audio resampled for recognizer"),
        Err(e) => error!(%endpoint_id, path = %rec.path.display(), error = %e, "resample failed; original retained"),
    }
}

/// Dead-connection path: delete a short fragment, keep a long one under the
/// incomplete suffix. The header is left unpatched; the data region is intact.
async fn salvage_incomplete(rec: Recording, endpoint_id: Uuid, cfg: &IngestConfig) {
    let duration = rec.started_at.elapsed();
    drop(rec.file);
    if duration < cfg.min_utterance {
        debug!(
            %endpoint_id,
            duration_ms = duration.as_millis() as u64,
            "dropping incomplete short utterance"
        );
        if let Err(e) = tokio::fs::remove_file(&rec.path).await {
            warn!(%endpoint_id, path = %rec.path.display(), error = %e, "failed to remove incomplete utterance");
        }
    } else {
        let target = incomplete_path(&rec.path);
        info!(
            %endpoint_id,
            duration_ms = duration.as_millis() as u64,
            path = %target.display(),
            "saving incomplete utterance"
        );
        if let Err(e) = tokio::fs::rename(&rec.path, &target).await {
            warn!(%endpoint_id, path = %rec.path.display(), error = %e, "failed to rename incomplete utterance");
        }
    }
}
