//! HTTP/3-style QUIC listener
//!
//! quinn endpoint with the gateway's framing contract: each bidirectional
//! stream carries exactly one request/response pair.
//!
//! Request frame:  `path_len:u16BE | path | body_len:u32BE | body`
//! Response frame: `status:u16BE | body_len:u32BE | body`
//!
//! Connections past the configured cap are refused at accept time; streams
//! per connection are bounded by the transport configuration.

use anyhow::{bail, Context};
use bytes::Bytes;
use quinn::{Endpoint, RecvStream, SendStream};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::connections::{ConnectionTable, Transport};
use crate::dispatch::{Dispatcher, DispatchOutcome, MAX_BODY_BYTES};
use crate::metrics;

/// Upper bound on the path component of a frame.
const MAX_PATH_BYTES: usize = 2_048;

/// ALPN identifier spoken by GhostBridge clients.
pub const ALPN: &[u8] = b"ghostbridge/1";

/// Build the QUIC server endpoint. TLS load failure is fatal.
pub fn build_endpoint(
    addr: SocketAddr,
    cert_file: &Path,
    key_file: &Path,
    max_streams: u32,
) -> anyhow::Result<Endpoint> {
    let cert_pem = std::fs::read(cert_file)
        .with_context(|| format!("reading certificate {}", cert_file.display()))?;
    let key_pem =
        std::fs::read(key_file).with_context(|| format!("reading key {}", key_file.display()))?;

    let certs: Vec<_> = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<_, _>>()
        .context("parsing certificate PEM")?;
    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .context("parsing key PEM")?
        .context("no private key found in key file")?;
    if certs.is_empty() {
        bail!("no certificates found in {}", cert_file.display());
    }

    let mut crypto = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("building TLS configuration")?;
    crypto.alpn_protocols = vec![ALPN.to_vec()];

    let quic_crypto = quinn::crypto::rustls::QuicServerConfig::try_from(crypto)
        .context("QUIC TLS configuration rejected")?;
    let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_crypto));
    Arc::get_mut(&mut server_config.transport)
        .expect("fresh transport config is uniquely owned")
        .max_concurrent_bidi_streams(quinn::VarInt::from_u32(max_streams));

    Endpoint::server(server_config, addr).context("binding QUIC endpoint")
}

/// Accept loop: runs until cancelled.
pub async fn serve(
    endpoint: Endpoint,
    dispatcher: Arc<Dispatcher>,
    connections: Arc<ConnectionTable>,
    shutdown: CancellationToken,
) {
    info!(addr = ?endpoint.local_addr().ok(), "HTTP/3 listener ready");

    loop {
        let incoming = tokio::select! {
            incoming = endpoint.accept() => match incoming {
                Some(incoming) => incoming,
                None => break,
            },
            _ = shutdown.cancelled() => break,
        };

        let peer = incoming.remote_address();
        let Some(guard) = connections.try_register(Transport::Http3, peer) else {
            metrics::record_connection_refused();
            debug!(%peer, "refusing connection at capacity");
            incoming.refuse();
            continue;
        };
        debug!(%peer, conn = guard.id(), "connection accepted");

        let dispatcher = Arc::clone(&dispatcher);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let connecting = match incoming.accept() {
                Ok(connecting) => connecting,
                Err(e) => {
                    debug!(%peer, error = %e, "connection rejected during accept");
                    return;
                }
            };
            let connection = match connecting.await {
                Ok(connection) => connection,
                Err(e) => {
                    debug!(%peer, error = %e, "QUIC handshake failed");
                    return;
                }
            };
            handle_connection(connection, dispatcher, shutdown).await;
            drop(guard);
        });
    }

    endpoint.close(quinn::VarInt::from_u32(0), b"shutting down");
    info!("HTTP/3 listener stopped");
}

async fn handle_connection(
    connection: quinn::Connection,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) {
    let peer = connection.remote_address();
    let client_id = peer.ip().to_string();

    loop {
        let stream = tokio::select! {
            stream = connection.accept_bi() => stream,
            _ = shutdown.cancelled() => {
                connection.close(quinn::VarInt::from_u32(0), b"shutting down");
                break;
            }
        };

        let (send, recv) = match stream {
            Ok(pair) => pair,
            Err(quinn::ConnectionError::ApplicationClosed(_))
            | Err(quinn::ConnectionError::ConnectionClosed(_)) => break,
            Err(e) => {
                debug!(%peer, error = %e, "connection ended");
                break;
            }
        };

        let dispatcher = Arc::clone(&dispatcher);
        let client_id = client_id.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_stream(send, recv, dispatcher, client_id).await {
                debug!(error = %e, "stream handling failed");
            }
        });
    }
}

async fn handle_stream(
    mut send: SendStream,
    mut recv: RecvStream,
    dispatcher: Arc<Dispatcher>,
    client_id: String,
) -> anyhow::Result<()> {
    let (path, body) = read_request(&mut recv).await?;
    let outcome = dispatcher.dispatch(path, body, client_id).await;

    send.write_all(&encode_response(&outcome)).await?;
    send.finish()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Framing codec
// ---------------------------------------------------------------------------

async fn read_request(recv: &mut RecvStream) -> anyhow::Result<(String, Bytes)> {
    let mut len_buf = [0u8; 2];
    recv.read_exact(&mut len_buf).await.context("reading path length")?;
    let path_len = u16::from_be_bytes(len_buf) as usize;
    if path_len == 0 || path_len > MAX_PATH_BYTES {
        bail!("invalid path length {path_len}");
    }

    let mut path_buf = vec![0u8; path_len];
    recv.read_exact(&mut path_buf).await.context("reading path")?;
    let path = String::from_utf8(path_buf).context("path is not UTF-8")?;

    let mut body_len_buf = [0u8; 4];
    recv.read_exact(&mut body_len_buf)
        .await
        .context("reading body length")?;
    let body_len = u32::from_be_bytes(body_len_buf) as usize;
    if body_len > MAX_BODY_BYTES {
        bail!("body of {body_len} bytes exceeds limit");
    }

    let mut body = vec![0u8; body_len];
    if body_len > 0 {
        recv.read_exact(&mut body).await.context("reading body")?;
    }
    Ok((path, Bytes::from(body)))
}

/// Encode a request frame; used by clients and tests.
pub fn encode_request(path: &str, body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(6 + path.len() + body.len());
    frame.extend_from_slice(&(path.len() as u16).to_be_bytes());
    frame.extend_from_slice(path.as_bytes());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(body);
    frame
}

fn encode_response(outcome: &DispatchOutcome) -> Vec<u8> {
    let mut frame = Vec::with_capacity(6 + outcome.body.len());
    frame.extend_from_slice(&outcome.status.to_be_bytes());
    frame.extend_from_slice(&(outcome.body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&outcome.body);
    frame
}

/// Decode a response frame; used by clients and tests.
pub fn decode_response(frame: &[u8]) -> anyhow::Result<(u16, Bytes)> {
    if frame.len() < 6 {
        bail!("response frame truncated");
    }
    let status = u16::from_be_bytes([frame[0], frame[1]]);
    let body_len = u32::from_be_bytes([frame[2], frame[3], frame[4], frame[5]]) as usize;
    if frame.len() < 6 + body_len {
        bail!("response body truncated");
    }
    Ok((status, Bytes::copy_from_slice(&frame[6..6 + body_len])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_frame_layout() {
        let frame = encode_request("/zns/resolve", b"{}");
        assert_eq!(&frame[..2], &(12u16).to_be_bytes());
        assert_eq!(&frame[2..14], b"/zns/resolve");
        assert_eq!(&frame[14..18], &(2u32).to_be_bytes());
        assert_eq!(&frame[18..], b"{}");
    }

    #[test]
    fn response_frame_roundtrip() {
        let outcome = DispatchOutcome {
            status: 200,
            body: Bytes::from_static(b"{\"ok\":true}"),
        };
        let frame = encode_response(&outcome);
        let (status, body) = decode_response(&frame).unwrap();
        assert_eq!(status, 200);
        assert_eq!(&body[..], b"{\"ok\":true}");
    }

    #[test]
    fn truncated_response_rejected() {
        assert!(decode_response(&[0, 200]).is_err());
        let mut frame = encode_response(&DispatchOutcome {
            status: 200,
            body: Bytes::from_static(b"xyz"),
        });
        frame.truncate(7);
        assert!(decode_response(&frame).is_err());
    }
}
