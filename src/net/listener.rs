//! Listener binding.
//!
//! # Responsibilities
//! - Load TLS material when HTTPS is configured
//! - Bind the configured address and port
//! - Tell address-in-use apart from every other bind failure

use std::io;
use std::net::{SocketAddr, TcpListener};

use axum_server::tls_rustls::RustlsConfig;
use thiserror::Error;

use crate::config::GatewayConfig;
use crate::net::tls::load_tls_config;

/// Why the listener could not be opened.
#[derive(Debug, Error)]
pub enum BindError {
    /// Another socket already owns the port.
    #[error("port {port} is already in use")]
    AddrInUse {
        port: u16,
        #[source]
        source: io::Error,
    },

    /// Any other socket error (permission denied, unknown address, ...).
    #[error("failed to bind {addr}: {source}")]
    Io {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// TLS certificate or key could not be loaded.
    #[error("failed to load TLS material: {0}")]
    Tls(#[source] io::Error),
}

impl BindError {
    pub fn is_addr_in_use(&self) -> bool {
        matches!(self, BindError::AddrInUse { .. })
    }
}

/// A bound, non-blocking listener ready for axum-server.
#[derive(Debug)]
pub struct BoundListener {
    pub listener: TcpListener,
    pub local_addr: SocketAddr,
    pub tls: Option<RustlsConfig>,
}

/// Bind `bind:port` synchronously.
pub fn bind_tcp(bind: &str, port: u16) -> Result<(TcpListener, SocketAddr), BindError> {
    let classify = |source: io::Error| {
        if source.kind() == io::ErrorKind::AddrInUse {
            BindError::AddrInUse { port, source }
        } else {
            BindError::Io {
                addr: format!("{}:{}", bind, port),
                source,
            }
        }
    };

    let listener = TcpListener::bind((bind, port)).map_err(classify)?;
    listener.set_nonblocking(true).map_err(classify)?;
    let local_addr = listener.local_addr().map_err(classify)?;
    Ok((listener, local_addr))
}

/// Load TLS material (if configured) and bind the listener.
pub async fn bind(config: &GatewayConfig) -> Result<BoundListener, BindError> {
    let tls = match config.tls_material() {
        Some((cert, key)) => Some(load_tls_config(cert, key).await.map_err(BindError::Tls)?),
        None => {
            if config.https {
                tracing::warn!("https requested without both key and cert; serving plain HTTP");
            }
            None
        }
    };

    let (listener, local_addr) = bind_tcp(&config.bind, config.port)?;
    tracing::info!(
        address = %local_addr,
        tls = tls.is_some(),
        "Listener bound"
    );

    Ok(BoundListener {
        listener,
        local_addr,
        tls,
    })
}
