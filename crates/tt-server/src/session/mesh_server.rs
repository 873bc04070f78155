//! Mesh-facing WebSocket server
//!
//! Accepts the browser's second socket on the ephemeral peer's mesh port
//! (80, or 443 with TLS), checks the Origin against live mesh status, and
//! runs the SSH connector and I/O bridge for each accepted socket.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::OnceCell;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tt_core::mesh::CertificatePem;
use tt_core::{KnownHosts, MeshNode, SessionTuning};
use tt_protocol::{Envelope, MessageType, SshSessionConfig};

use super::origin::origin_allowed;
use super::{SessionError, SessionLifecycle};
use crate::bridge::IoBridge;
use crate::ssh::{HostTrustNegotiator, SshConnector, SshDialer};
use crate::ws::frame::{self, CLOSE_GOING_AWAY};
use crate::ws::{MessageHub, SyncedConnection};

/// Everything a mesh connection needs from its session
pub struct MeshContext {
    /// The session's ephemeral peer
    pub node: Arc<dyn MeshNode>,
    /// SSH transport
    pub dialer: Arc<dyn SshDialer>,
    /// Host trust store
    pub known_hosts: KnownHosts,
    /// Credentials from the setup socket
    pub ssh_config: SshSessionConfig,
    /// Timing and retry limits
    pub tuning: SessionTuning,
    /// Accept any origin
    pub dev: bool,
    /// Session end signal
    pub lifecycle: SessionLifecycle,
}

/// Accept mesh connections until the session ends
pub async fn serve(listener: TcpListener, tls: bool, ctx: Arc<MeshContext>) {
    let acceptor: Arc<OnceCell<TlsAcceptor>> = Arc::new(OnceCell::new());

    match listener.local_addr() {
        Ok(addr) => tracing::info!("{}: mesh listener on {}", ctx.node.hostname(), addr),
        Err(e) => tracing::debug!("{}: mesh listener address unknown: {}", ctx.node.hostname(), e),
    }

    loop {
        tokio::select! {
            _ = ctx.lifecycle.closed() => {
                tracing::info!("{}: mesh listener shutting down", ctx.node.hostname());
                break;
            }

            result = listener.accept() => {
                match result {
                    Ok((socket, peer_addr)) => {
                        let ctx = Arc::clone(&ctx);
                        let acceptor = Arc::clone(&acceptor);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(socket, peer_addr, tls, acceptor, ctx).await {
                                tracing::warn!("Mesh connection from {} ended: {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept mesh connection: {}", e);
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    socket: TcpStream,
    peer_addr: SocketAddr,
    tls: bool,
    acceptor: Arc<OnceCell<TlsAcceptor>>,
    ctx: Arc<MeshContext>,
) -> Result<(), SessionError> {
    tracing::info!("{}: mesh connection from {}", ctx.node.hostname(), peer_addr);

    if !tls {
        return serve_socket(socket, peer_addr, ctx).await;
    }

    // Certificates only exist once the node is running, so TLS is set up on
    // first use rather than at listen time
    let acceptor = acceptor
        .get_or_try_init(|| load_acceptor(ctx.node.as_ref()))
        .await?
        .clone();

    let stream = acceptor.accept(socket).await?;
    serve_socket(stream, peer_addr, ctx).await
}

async fn load_acceptor(node: &dyn MeshNode) -> Result<TlsAcceptor, SessionError> {
    tracing::info!(
        "Enabling TLS for {}; HTTPS certificates must be enabled for the tailnet",
        node.hostname()
    );

    let status = node.status().await?;
    let domain = status
        .self_node
        .map(|me| me.dns_name)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| SessionError::Tls("node has no DNS name yet".to_string()))?;

    let pem = node.certificate(&domain).await?;
    Ok(TlsAcceptor::from(Arc::new(tls_config(&pem)?)))
}

/// Build a rustls server config from PEM certificate material
pub fn tls_config(pem: &CertificatePem) -> Result<rustls::ServerConfig, SessionError> {
    let certs: Vec<rustls::pki_types::CertificateDer<'static>> =
        rustls_pemfile::certs(&mut &pem.cert[..]).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(SessionError::Tls("no certificate found in PEM".to_string()));
    }

    let key = rustls_pemfile::private_key(&mut &pem.key[..])?
        .ok_or_else(|| SessionError::Tls("no private key found in PEM".to_string()))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| SessionError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| SessionError::Tls(e.to_string()))?;

    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

/// Upgrade one accepted stream and run SSH over it
async fn serve_socket<S>(stream: S, peer_addr: SocketAddr, ctx: Arc<MeshContext>) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let valid_hosts = if ctx.dev {
        Default::default()
    } else {
        ctx.node.status().await?.valid_origin_hosts()
    };
    let dev = ctx.dev;

    let check_origin = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let host = header(req, "host");
        let origin = header(req, "origin");

        if origin_allowed(host, origin, &valid_hosts, dev) {
            return Ok(resp);
        }

        tracing::warn!("Rejected mesh upgrade: host {:?}, origin {:?}", host, origin);
        let mut denied = ErrorResponse::new(Some("origin not allowed".to_string()));
        *denied.status_mut() = StatusCode::FORBIDDEN;
        Err(denied)
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, check_origin).await {
        Ok(ws) => ws,
        Err(tokio_tungstenite::tungstenite::Error::Http(resp)) => {
            tracing::debug!("Upgrade from {} refused with {}", peer_addr, resp.status());
            return Ok(());
        }
        Err(e) => return Err(SessionError::Upgrade(e.to_string())),
    };

    let (sink, stream) = frame::from_tungstenite(ws);
    let conn = SyncedConnection::new(sink, stream);
    conn.start_keepalive(ctx.tuning.ping_interval, ctx.tuning.read_deadline);
    let hub = MessageHub::start(Arc::clone(&conn));

    hub.send(&Envelope::info(format!(
        "Connected to {} from {}.",
        ctx.node.hostname(),
        peer_addr
    )))
    .await?;

    // Subscribe before the shell exists so an early resize is not lost
    let inbound = hub.subscribe(&[MessageType::Input, MessageType::Size])?;

    let trust = Arc::new(HostTrustNegotiator::new(
        ctx.known_hosts.clone(),
        Arc::clone(&hub),
    ));
    let connector = SshConnector::new(
        Arc::clone(&hub),
        trust,
        Arc::clone(&ctx.dialer),
        Arc::clone(&ctx.node),
        ctx.tuning.max_ssh_attempts,
    );

    let shell = tokio::select! {
        result = connector.connect(ctx.ssh_config.clone()) => result,
        _ = ctx.lifecycle.closed() => {
            conn.close().await;
            return Ok(());
        }
    };

    let shell = match shell {
        Ok(shell) => shell,
        Err(e) => {
            tracing::error!("{}: SSH failed: {}", ctx.node.hostname(), e);
            if let Err(close_err) = conn.write_close(CLOSE_GOING_AWAY, &e.to_string()).await {
                tracing::debug!("Failed to send close frame: {}", close_err);
            }
            conn.close().await;
            ctx.lifecycle.fail(e.to_string());
            return Err(e.into());
        }
    };

    IoBridge::new(conn, ctx.lifecycle.clone(), ctx.tuning.pump_idle_delay)
        .run(shell, inbound)
        .await?;

    Ok(())
}

fn header<'a>(req: &'a Request, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}
