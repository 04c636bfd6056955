//! Server TLS configuration from PEM files.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;

use crate::{IngestError, IngestResult};

/// Load PEM certificates from a file (server cert chain).
fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, std::io::Error> {
    let f = File::open(path)?;
    let mut reader = BufReader::new(f);
    let certs = rustls_pemfile::certs(&mut reader)
        .filter_map(|r| r.ok())
        .map(|c| c.into_owned())
        .collect::<Vec<_>>();
    Ok(certs)
}

/// Load a single private key from PEM.
fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, std::io::Error> {
    let f = File::open(path)?;
    let mut reader = BufReader::new(f);
    let key = rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no private key"))?;
    Ok(key)
}

/// Build the server TLS config: present the certificate chain, no client
/// certificates (peers authenticate with the bearer secret instead).
pub fn server_tls_config(cert_path: &Path, key_path: &Path) -> IngestResult<Arc<ServerConfig>> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| IngestError::Tls(e.to_string()))?;

    Ok(Arc::new(config))
}
