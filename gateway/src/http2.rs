//! HTTP/2-over-TLS listener
//!
//! axum behind axum-server's rustls acceptor. Connections are registered in
//! the connection table at accept time, before the TLS handshake; a table at
//! capacity refuses the connection outright, mirroring the QUIC listener.
//! Every request is framed as `(path, body)` and handed to the dispatcher.
//! The TLS material is loaded once at startup and a load failure is fatal.

use anyhow::Context as _;
use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, State},
    http::{header, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use axum_server::accept::Accept;
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use axum_server::Handle;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};

use crate::connections::{ConnectionGuard, ConnectionTable, Transport};
use crate::dispatch::{Dispatcher, MAX_BODY_BYTES};
use crate::error::GatewayError;
use crate::metrics;

#[derive(Clone)]
struct ListenerState {
    dispatcher: Arc<Dispatcher>,
}

/// Serve HTTP/2 over TLS until the handle signals shutdown. Fails fast when
/// the certificate or key cannot be loaded.
pub async fn serve(
    addr: SocketAddr,
    cert_file: &Path,
    key_file: &Path,
    dispatcher: Arc<Dispatcher>,
    connections: Arc<ConnectionTable>,
    handle: Handle,
) -> anyhow::Result<()> {
    let tls = RustlsConfig::from_pem_file(cert_file, key_file)
        .await
        .with_context(|| {
            format!(
                "loading TLS material from {} / {}",
                cert_file.display(),
                key_file.display()
            )
        })?;

    let acceptor = TrackedAcceptor {
        inner: RustlsAcceptor::new(tls),
        connections,
    };

    let state = ListenerState { dispatcher };

    let app = Router::new()
        .route("/health", get(health_handler))
        .fallback(dispatch_handler)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state);

    info!(%addr, "HTTP/2 listener ready");
    axum_server::bind(addr)
        .acceptor(acceptor)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .context("HTTP/2 listener failed")?;
    Ok(())
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn dispatch_handler(
    State(state): State<ListenerState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let path = request.uri().path().to_string();
    let body = match to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return GatewayError::PayloadTooLarge.into_response(),
    };

    let client_id = peer.ip().to_string();
    let outcome = state.dispatcher.dispatch(path, body, client_id).await;

    let status = StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        outcome.body,
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Connection-tracking acceptor
// ---------------------------------------------------------------------------

/// Wraps the rustls acceptor so each TCP connection claims a slot in the
/// connection table before its TLS handshake runs. A full table refuses the
/// connection, the same policy the QUIC listener applies at accept.
#[derive(Clone)]
pub struct TrackedAcceptor {
    inner: RustlsAcceptor,
    connections: Arc<ConnectionTable>,
}

impl<S> Accept<TcpStream, S> for TrackedAcceptor
where
    S: Send + 'static,
    RustlsAcceptor: Accept<TcpStream, S>,
    <RustlsAcceptor as Accept<TcpStream, S>>::Future: Send,
    <RustlsAcceptor as Accept<TcpStream, S>>::Stream: AsyncRead + AsyncWrite + Unpin + Send,
    <RustlsAcceptor as Accept<TcpStream, S>>::Service: Send,
{
    type Stream = TrackedStream<<RustlsAcceptor as Accept<TcpStream, S>>::Stream>;
    type Service = <RustlsAcceptor as Accept<TcpStream, S>>::Service;
    type Future = Pin<Box<dyn Future<Output = io::Result<(Self::Stream, Self::Service)>> + Send>>;

    fn accept(&self, stream: TcpStream, service: S) -> Self::Future {
        let inner = self.inner.clone();
        let connections = Arc::clone(&self.connections);
        Box::pin(async move {
            let peer = stream.peer_addr()?;
            let Some(guard) = connections.try_register(Transport::Http2, peer) else {
                metrics::record_connection_refused();
                debug!(%peer, "refusing connection at capacity");
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "connection limit reached",
                ));
            };
            debug!(%peer, conn = guard.id(), "connection accepted");

            let (tls_stream, service) = inner.accept(stream, service).await?;
            Ok((
                TrackedStream {
                    inner: tls_stream,
                    guard,
                },
                service,
            ))
        })
    }
}

/// TLS stream that owns its connection-table slot; dropping the stream
/// releases it. Reads and writes bump the connection's activity timestamp.
pub struct TrackedStream<T> {
    inner: T,
    guard: ConnectionGuard,
}

impl<T: AsyncRead + Unpin> AsyncRead for TrackedStream<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.guard.touch();
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for TrackedStream<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        this.guard.touch();
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        this.guard.touch();
        Pin::new(&mut this.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}
