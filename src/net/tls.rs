//! TLS configuration and certificate loading.
//!
//! The handshake itself is run by `axum-server`'s rustls acceptor; this
//! module only loads key material and builds the acceptor.

use std::path::Path;
use std::time::Duration;

use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};

use crate::config::TlsConfig;

/// Load TLS configuration from certificate and key files.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, std::io::Error> {
    if !cert_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Certificate file not found: {:?}", cert_path),
        ));
    }
    if !key_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Private key file not found: {:?}", key_path),
        ));
    }

    RustlsConfig::from_pem_file(cert_path, key_path).await
}

/// Build the handshake acceptor for the listener.
pub async fn build_acceptor(config: &TlsConfig, handshake_timeout: Duration) -> Result<RustlsAcceptor, std::io::Error> {
    let rustls = load_tls_config(Path::new(&config.cert_path), Path::new(&config.key_path)).await?;
    tracing::info!(cert_path = %config.cert_path, "TLS material loaded");
    Ok(RustlsAcceptor::new(rustls).handshake_timeout(handshake_timeout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_certificate_is_not_found() {
        let err = load_tls_config(Path::new("/nonexistent/cert.pem"), Path::new("/nonexistent/key.pem"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
