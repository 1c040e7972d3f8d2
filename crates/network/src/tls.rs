//! Mutually-authenticated admin listener, port 10059 (§4.5, §4.8).
//!
//! Certificate *provisioning* is out of scope (§1 non-goals); this module
//! only wires already-issued PEM material into a `rustls` server config
//! that demands and verifies a client certificate, the way the pgcat
//! example wires its client-auth listener.

use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::Arc;

use ld_config::Settings;
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

use crate::context::Context;
use crate::mirror::{self, Admission};
use crate::ports::ACCEPT_TIMEOUT_SECS;

/// Builds the server TLS config from §6's `CERTFILE`/`CERTKEY`/`CERTCHAIN`
/// settings. Returns `None` (caller does not start the listener) unless
/// all three paths are present, per §4.5.
pub fn build_acceptor(settings: &Settings) -> Option<TlsAcceptor> {
    if !settings.admin_tls_configured() {
        return None;
    }

    let certs = load_certs(&settings.cert_file).ok()?;
    let key = load_key(&settings.cert_key).ok()?;

    let mut client_roots = RootCertStore::empty();
    for cert in load_certs(&settings.cert_chain).ok()? {
        client_roots.add(cert).ok()?;
    }
    let verifier = WebPkiClientVerifier::builder(Arc::new(client_roots))
        .build()
        .ok()?;

    let config = ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)
        .ok()?;

    Some(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &str) -> std::io::Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let file = std::fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader).collect()
}

fn load_key(path: &str) -> std::io::Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "no private key found"))
}

/// Accept loop for the admin port. Bound to loopback only (§4.5).
pub async fn serve(ctx: Context, listener: TcpListener, acceptor: TlsAcceptor) {
    while !ctx.halt.is_tripped() {
        let accepted = tokio::time::timeout(
            std::time::Duration::from_secs(ACCEPT_TIMEOUT_SECS),
            listener.accept(),
        )
        .await;

        let (stream, peer) = match accepted {
            Ok(Ok(pair)) => pair,
            Ok(Err(err)) => {
                warn!(%err, "admin accept failed");
                continue;
            }
            Err(_) => continue,
        };

        if !Context::is_loopback(peer) {
            warn!(%peer, "rejected admin connection: not loopback");
            continue;
        }

        let ctx = ctx.clone();
        let acceptor = acceptor.clone();
        tokio::spawn(async move {
            match acceptor.accept(stream).await {
                Ok(tls_stream) => handle_admin(ctx, tls_stream, peer).await,
                Err(err) => warn!(%err, %peer, "TLS handshake failed"),
            }
        });
    }
    info!("admin listener halted");
}

async fn handle_admin(
    ctx: Context,
    stream: tokio_rustls::server::TlsStream<tokio::net::TcpStream>,
    peer: SocketAddr,
) {
    // `tokio_rustls::server::TlsStream` implements AsyncRead/AsyncWrite;
    // the mirror protocol handler is agnostic to the transport below it
    // once the handshake (and therefore client-cert verification) succeeds.
    if let Err(err) = mirror::run_over(ctx, stream, peer, Admission { is_admin: true }).await {
        info!(%peer, %err, "admin connection ended");
    }
}
