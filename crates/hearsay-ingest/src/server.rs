//! TLS accept loop for capture endpoints.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::endpoints::EndpointRegistry;
use crate::recordings::RecordingsTree;
use crate::session::serve_connection;
use crate::tls::server_tls_config;
use crate::{IngestConfig, IngestResult};

/// Accepts endpoint connections and runs one session per peer.
pub struct IngestServer {
    cfg: Arc<IngestConfig>,
    registry: Arc<EndpointRegistry>,
    tree: Arc<RecordingsTree>,
}

impl IngestServer {
    pub fn new(cfg: IngestConfig, registry: Arc<EndpointRegistry>) -> Self {
        let tree = Arc::new(RecordingsTree::new(cfg.recordings_dir.clone()));
        Self {
            cfg: Arc::new(cfg),
            registry,
            tree,
        }
    }

    /// Bind the TLS listener and accept until cancellation. Sessions observe
    /// the same token and exit at their next frame boundary.
    pub async fn run(&self, cancel: CancellationToken) -> IngestResult<()> {
        let tls = server_tls_config(&self.cfg.cert_file, &self.cfg.key_file)?;
        let acceptor = TlsAcceptor::from(tls);
        let listener = TcpListener::bind(self.cfg.bind_addr).await?;
        info!(addr = %self.cfg.bind_addr, "ingest server listening");

        loop {
            let (tcp, peer) = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("ingest server stopped accepting");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                        continue;
                    }
                },
            };

            let acceptor = acceptor.clone();
            let cfg = Arc::clone(&self.cfg);
            let tree = Arc::clone(&self.tree);
            let registry = Arc::clone(&self.registry);
            let cancel = cancel.clone();

            tokio::spawn(async move {
                let stream = match acceptor.accept(tcp).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!(%peer, error = %e, "TLS handshake failed");
                        return;
                    }
                };
                if let Err(e) = serve_connection(stream, peer, cfg, tree, registry, cancel).await {
                    warn!(%peer, error = %e, "session ended with error");
                }
            });
        }
    }
}
