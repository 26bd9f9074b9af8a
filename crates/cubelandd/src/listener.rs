//! Listener — TLS configuration, the accept loop, and the cross-cutting
//! saver and reaper tasks.
//!
//! The acceptor owns the listening socket; each accepted connection gets a
//! TLS handshake and then its own session task. The saver sweeps all
//! sessions every two seconds; the reaper removes terminated sessions from
//! the registry and publishes their departure.

use crate::server::ServerShared;
use crate::session::Session;
use anyhow::{bail, Context, Result};
use cubeland_core::config::{ListenConfig, TlsConfig};
use cubeland_services::{BroadcastEvent, SessionId};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::io::BufReader;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast as shutdown_channel, mpsc};
use tokio_rustls::TlsAcceptor;

/// ALPN protocol identifier, fixed by the wire contract.
pub const ALPN_PROTOCOL: &[u8] = b"cubeland/1.0";

/// Period of the save sweep.
const SAVE_INTERVAL: Duration = Duration::from_secs(2);

// ── TLS setup ─────────────────────────────────────────────────────────────────

/// Build the server's rustls configuration from the `[tls]` section.
///
/// "secure" permits TLS 1.2 and 1.3; "tlsv1.3" restricts to 1.3. Key
/// exchange is always ephemeral (ECDHE), so forward secrecy needs no
/// separate DH parameter setup. Cipher selection beyond the library's
/// secure defaults is not supported.
pub fn build_tls_config(cfg: &TlsConfig) -> Result<Arc<rustls::ServerConfig>> {
    // Pin the process-wide crypto provider; repeat installs are no-ops.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let versions: &[&rustls::SupportedProtocolVersion] = match cfg.protocols.as_str() {
        "secure" | "" => rustls::ALL_VERSIONS,
        "tlsv1.3" => &[&rustls::version::TLS13],
        "tlsv1.2" => &[&rustls::version::TLS12],
        other => bail!("unsupported tls.protocols value: {other:?}"),
    };

    if cfg.ciphers != "secure" && !cfg.ciphers.is_empty() {
        tracing::warn!(
            ciphers = %cfg.ciphers,
            "custom cipher lists are not supported, using secure defaults"
        );
    }

    let certs = load_certs(cfg)?;
    let key = load_key(cfg)?;

    let mut config = rustls::ServerConfig::builder_with_protocol_versions(versions)
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("certificate/key rejected")?;
    config.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    Ok(Arc::new(config))
}

fn load_certs(cfg: &TlsConfig) -> Result<Vec<CertificateDer<'static>>> {
    let file = std::fs::File::open(&cfg.cert)
        .with_context(|| format!("cannot open tls.cert {}", cfg.cert.display()))?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::io::Result<_>>()
        .context("failed to parse certificate PEM")?;
    if certs.is_empty() {
        bail!("no certificates found in {}", cfg.cert.display());
    }
    Ok(certs)
}

fn load_key(cfg: &TlsConfig) -> Result<PrivateKeyDer<'static>> {
    let file = std::fs::File::open(&cfg.key)
        .with_context(|| format!("cannot open tls.key {}", cfg.key.display()))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .context("failed to parse private key PEM")?
        .with_context(|| format!("no private key found in {}", cfg.key.display()))
}

// ── Socket setup ──────────────────────────────────────────────────────────────

/// Bind the listening socket with the configured accept backlog.
pub fn bind(cfg: &ListenConfig) -> Result<TcpListener> {
    use socket2::{Domain, Protocol, Socket, Type};

    let addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, cfg.port).into();
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
        .context("failed to create socket")?;
    socket
        .set_reuse_address(true)
        .context("failed to set SO_REUSEADDR")?;
    socket
        .bind(&addr.into())
        .with_context(|| format!("failed to bind {addr}"))?;
    socket
        .listen(cfg.backlog as i32)
        .context("failed to listen")?;
    socket
        .set_nonblocking(true)
        .context("failed to set non-blocking")?;

    TcpListener::from_std(socket.into()).context("failed to register socket with the runtime")
}

// ── Background tasks ──────────────────────────────────────────────────────────

/// Accept loop: TCP accept, TLS accept, session install.
pub async fn run_acceptor(
    listener: TcpListener,
    tls: Arc<rustls::ServerConfig>,
    shared: Arc<ServerShared>,
    mut shutdown: shutdown_channel::Receiver<()>,
) {
    let acceptor = TlsAcceptor::from(tls);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("acceptor shutting down");
                return;
            }

            accepted = listener.accept() => {
                let (stream, peer_addr) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to accept client connection");
                        continue;
                    }
                };

                let acceptor = acceptor.clone();
                let shared = shared.clone();
                tokio::spawn(async move {
                    let tls_stream = match acceptor.accept(stream).await {
                        Ok(s) => s,
                        Err(e) => {
                            tracing::error!(peer = %peer_addr, error = %e, "TLS accept failed");
                            return;
                        }
                    };

                    let (session, handle) = Session::new(tls_stream, peer_addr, shared.clone());
                    shared.sessions.insert(handle.clone());
                    tracing::info!(peer = %peer_addr, session = handle.id, "client connected");
                    session.run().await;
                });
            }
        }
    }
}

/// Save sweep: every two seconds, ask each session to persist whatever its
/// handlers marked dirty.
pub async fn run_saver(shared: Arc<ServerShared>, mut shutdown: shutdown_channel::Receiver<()>) {
    let mut interval = tokio::time::interval(SAVE_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("saver shutting down");
                return;
            }

            _ = interval.tick() => {
                shared.sessions.for_each(|session| session.request_save());
            }
        }
    }
}

/// Reaper: removes terminated sessions from the registry, drops their chunk
/// observations, and announces authenticated departures.
pub async fn run_reaper(
    shared: Arc<ServerShared>,
    mut rx: mpsc::UnboundedReceiver<SessionId>,
    mut shutdown: shutdown_channel::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                // Drain anything sessions managed to queue while stopping.
                while let Ok(id) = rx.try_recv() {
                    reap(&shared, id).await;
                }
                tracing::debug!("reaper shutting down");
                return;
            }

            message = rx.recv() => {
                let Some(id) = message else {
                    tracing::debug!("reaper channel closed");
                    return;
                };
                reap(&shared, id).await;
            }
        }
    }
}

async fn reap(shared: &Arc<ServerShared>, id: SessionId) {
    let Some(handle) = shared.sessions.remove(id) else {
        return;
    };

    shared.observers.remove_session(id);

    match handle.identity() {
        Some(identity) => {
            shared.authed_players.fetch_sub(1, Ordering::SeqCst);
            shared
                .bus
                .publish(BroadcastEvent::PlayerLeft { id: identity.id })
                .await;
            tracing::info!(
                session = id,
                player = %identity.id,
                name = %identity.display_name,
                "player disconnected"
            );
        }
        None => {
            tracing::debug!(session = id, "unauthenticated session reaped");
        }
    }
}
