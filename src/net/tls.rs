//! TLS configuration and certificate loading.

use std::io;
use std::path::Path;

use axum_server::tls_rustls::RustlsConfig;

/// Load TLS configuration from PEM certificate and key files.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> io::Result<RustlsConfig> {
    let cert = read_pem(cert_path, "certificate").await?;
    let key = read_pem(key_path, "private key").await?;
    check_pem(&cert, &key)?;
    RustlsConfig::from_pem(cert, key).await
}

async fn read_pem(path: &Path, what: &str) -> io::Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| {
        io::Error::new(
            e.kind(),
            format!("{} file {}: {}", what, path.display(), e),
        )
    })
}

/// At least one certificate and a private key must be present.
pub fn check_pem(cert: &[u8], key: &[u8]) -> io::Result<()> {
    let certs = rustls_pemfile::certs(&mut &cert[..]).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "no certificate found in PEM data",
        ));
    }
    match rustls_pemfile::private_key(&mut &key[..])? {
        Some(_) => Ok(()),
        None => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "no private key found in PEM data",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_pem_is_rejected() {
        let err = check_pem(b"not a certificate", b"not a key").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn missing_files_name_the_path() {
        let err = load_tls_config(
            Path::new("/nonexistent/cert.pem"),
            Path::new("/nonexistent/key.pem"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(err.to_string().contains("/nonexistent/cert.pem"));
    }
}
