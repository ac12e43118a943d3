// TLS termination for the daemon listener
// Enabled when the config names both a PEM certificate chain and a PEM private key

use crate::daemon::config::TlsPaths;
use crate::{Error, Result};
use axum::serve::Listener;
use rustls::ServerConfig;
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

/// Clients that don't finish the handshake in time are dropped
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Build an acceptor from the configured PEM files
pub fn load_acceptor(paths: &TlsPaths) -> Result<TlsAcceptor> {
    let certs = CertificateDer::pem_file_iter(&paths.cert_file)
        .and_then(|iter| iter.collect::<std::result::Result<Vec<_>, _>>())
        .map_err(|e| {
            Error::Config(format!(
                "failed to read certificates from {}: {}",
                paths.cert_file.display(),
                e
            ))
        })?;
    if certs.is_empty() {
        return Err(Error::Config(format!(
            "no certificates found in {}",
            paths.cert_file.display()
        )));
    }

    let key = PrivateKeyDer::from_pem_file(&paths.key_file).map_err(|e| {
        Error::Config(format!(
            "failed to read private key from {}: {}",
            paths.key_file.display(),
            e
        ))
    })?;

    let config = ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| Error::Config(format!("unsupported TLS protocol versions: {}", e)))?
    .with_no_client_auth()
    .with_single_cert(certs, key)
    .map_err(|e| Error::Config(format!("invalid certificate or key: {}", e)))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Handshaken connections waiting for axum to pick them up
const READY_QUEUE_CAPACITY: usize = 64;

/// TCP listener that hands axum only streams that completed a TLS handshake
///
/// Handshakes run on their own tasks, so a client that stalls mid-handshake
/// holds up nobody but itself.
pub struct TlsListener {
    ready: mpsc::Receiver<(TlsStream<TcpStream>, SocketAddr)>,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl TlsListener {
    /// Starts accepting right away; must be called inside a Tokio runtime
    pub fn new(inner: TcpListener, acceptor: TlsAcceptor) -> std::io::Result<Self> {
        let local_addr = inner.local_addr()?;
        let (tx, ready) = mpsc::channel(READY_QUEUE_CAPACITY);
        let accept_task = tokio::spawn(accept_loop(inner, acceptor, tx));
        Ok(Self {
            ready,
            local_addr,
            accept_task,
        })
    }
}

impl Drop for TlsListener {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(
    inner: TcpListener,
    acceptor: TlsAcceptor,
    tx: mpsc::Sender<(TlsStream<TcpStream>, SocketAddr)>,
) {
    loop {
        let accepted = tokio::select! {
            accepted = inner.accept() => accepted,
            _ = tx.closed() => return,
        };
        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };

        let acceptor = acceptor.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
                Ok(Ok(tls)) => {
                    let _ = tx.send((tls, peer)).await;
                }
                Ok(Err(e)) => tracing::warn!(%peer, error = %e, "TLS handshake failed"),
                Err(_) => tracing::warn!(%peer, "TLS handshake timed out"),
            }
        });
    }
}

impl Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.ready.recv().await {
            Some(accepted) => accepted,
            // Accept loop is gone; nothing more will arrive
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> std::io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}
