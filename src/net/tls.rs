//! TLS configuration and certificate loading.

use std::io;

use axum_server::tls_rustls::RustlsConfig;

use crate::net::certs::{CertificateError, CertificateFiles};

/// Load the server certificate pair into a rustls configuration.
///
/// One `RustlsConfig` is shared by the REST and the pub/sub TLS listeners.
pub async fn load_tls_config(files: &CertificateFiles) -> Result<RustlsConfig, CertificateError> {
    for path in [&files.server_cert, &files.server_key] {
        if !path.exists() {
            return Err(CertificateError::Io {
                path: path.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "file not found"),
            });
        }
    }

    RustlsConfig::from_pem_file(&files.server_cert, &files.server_key)
        .await
        .map_err(|source| CertificateError::Io {
            path: files.server_cert.clone(),
            source,
        })
}
