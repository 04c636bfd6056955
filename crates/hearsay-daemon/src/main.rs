//! Hearsay daemon: authenticated TLS utterance ingest on one address, the
//! transcription/query/subscription service on another, coupled only through
//! the recordings tree on disk.
//!
//! All configuration comes from the environment (a `.env` file is honored);
//! `HEARSAY_TOKEN`, the TLS material, and the recognizer are required, the
//! rest has defaults.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hearsay_ingest::{EndpointRegistry, IngestConfig, IngestServer};
use hearsay_scribe::{Scribe, ScribeConfig};

fn require_env(key: &str) -> Result<String, String> {
    std::env::var(key).map_err(|_| format!("{key} is not set"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn load_configs() -> Result<(IngestConfig, ScribeConfig), String> {
    let token = require_env("HEARSAY_TOKEN")?;
    let cert_file = PathBuf::from(require_env("HEARSAY_CERT_FILE")?);
    let key_file = PathBuf::from(require_env("HEARSAY_KEY_FILE")?);
    let recognizer_path = PathBuf::from(require_env("HEARSAY_RECOGNIZER_PATH")?);
    let recognizer_model = require_env("HEARSAY_RECOGNIZER_MODEL")?;

    let recordings_dir = PathBuf::from(env_or("HEARSAY_RECORDINGS_DIR", "recordings"));
    let ingest_addr: SocketAddr = env_or("HEARSAY_INGEST_ADDR", "0.0.0.0:8443")
        .parse()
        .map_err(|e| format!("invalid HEARSAY_INGEST_ADDR: {e}"))?;
    let http_addr: SocketAddr = env_or("HEARSAY_HTTP_ADDR", "0.0.0.0:8444")
        .parse()
        .map_err(|e| format!("invalid HEARSAY_HTTP_ADDR: {e}"))?;

    let mut ingest = IngestConfig::new(ingest_addr, cert_file.clone(), key_file.clone(), token);
    ingest.recordings_dir = recordings_dir.clone();
    ingest.transcoder_path = PathBuf::from(env_or("HEARSAY_TRANSCODER_PATH", "ffmpeg"));
    ingest.min_utterance = Duration::from_millis(env_parse("HEARSAY_MIN_UTTERANCE_MS", 1000));

    let mut scribe = ScribeConfig::new(
        http_addr,
        cert_file,
        key_file,
        recognizer_path,
        recognizer_model,
    );
    scribe.recordings_dir = recordings_dir;
    scribe.workers = env_parse("HEARSAY_WORKERS", 2usize);
    scribe.static_dir = PathBuf::from(env_or("HEARSAY_STATIC_DIR", "static"));
    scribe.shutdown_deadline =
        Duration::from_secs(env_parse("HEARSAY_SHUTDOWN_DEADLINE_SECS", 10u64));

    Ok((ingest, scribe))
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let (ingest_cfg, scribe_cfg) = match load_configs() {
        Ok(configs) => configs,
        Err(e) => {
            error!(error = %e, "configuration error");
            std::process::exit(1);
        }
    };
    let shutdown_deadline = scribe_cfg.shutdown_deadline;

    let cancel = CancellationToken::new();
    let registry = Arc::new(EndpointRegistry::new());
    let ingest = IngestServer::new(ingest_cfg, Arc::clone(&registry));
    let scribe = Scribe::new(scribe_cfg);

    let mut ingest_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = ingest.run(cancel).await {
                error!(error = %e, "ingest server failed");
            }
        })
    };
    let mut scribe_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = scribe.run(cancel).await {
                error!(error = %e, "scribe service failed");
            }
        })
    };

    let mut ingest_done = false;
    let mut scribe_done = false;
    tokio::select! {
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
        },
        _ = &mut ingest_task => {
            ingest_done = true;
            warn!("ingest server exited; shutting down");
        }
        _ = &mut scribe_task => {
            scribe_done = true;
            warn!("scribe service exited; shutting down");
        }
    }
    cancel.cancel();

    let drain = async {
        if !ingest_done {
            let _ = ingest_task.await;
        }
        if !scribe_done {
            let _ = scribe_task.await;
        }
    };
    if tokio::time::timeout(shutdown_deadline + Duration::from_secs(1), drain)
        .await
        .is_err()
    {
        warn!("tasks did not stop within the shutdown deadline");
    }
    info!("daemon stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parse_falls_back_on_garbage() {
        std::env::set_var("HEARSAY_TEST_WORKERS", "not-a-number");
        assert_eq!(env_parse("HEARSAY_TEST_WORKERS", 2usize), 2);
        std::env::set_var("HEARSAY_TEST_WORKERS", " 4 ");
        assert_eq!(env_parse("HEARSAY_TEST_WORKERS", 2usize), 4);
        std::env::remove_var("HEARSAY_TEST_WORKERS");
        assert_eq!(env_parse("HEARSAY_TEST_WORKERS", 2usize), 2);
    }

    #[test]
    fn env_or_prefers_set_values() {
        std::env::remove_var("HEARSAY_TEST_DIR");
        assert_eq!(env_or("HEARSAY_TEST_DIR", "recordings"), "recordings");
        std::env::set_var("HEARSAY_TEST_DIR", "/srv/rec");
        assert_eq!(env_or("HEARSAY_TEST_DIR", "recordings"), "/srv/rec");
        std::env::remove_var("HEARSAY_TEST_DIR");
    }
}
