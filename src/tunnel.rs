//! CONNECT tunnel handling.
//!
//! A CONNECT request is resolved against the current filter table, the
//! upstream TCP connection is opened, and only then is the client answered:
//! `200 Connection established` on success, `500 Connection error` (and a
//! closed connection) on failure. After the upgrade the tunnel is an opaque
//! byte pump; TLS and HTTP framing are never inspected.

use crate::config::ConfigStore;
use crate::debug::DebugGate;
use crate::error::{ProxyError, Result};
use crate::hostport::parse_host_port;
use crate::proxy::{empty_body, ProxyBody};
use crate::resolver::resolve;
use bytes::Bytes;
use hyper::body::Incoming;
use hyper::ext::ReasonPhrase;
use hyper::header::{HeaderValue, CONNECTION};
use hyper::upgrade::Upgraded;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, trace};

/// Size of the per-direction copy buffer.
const CHUNK_SIZE: usize = 16 * 1024;

/// Default port for CONNECT targets without one.
pub const DEFAULT_CONNECT_PORT: u16 = 443;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToUpstream => f.write_str(">"),
            Direction::UpstreamToClient => f.write_str("<"),
        }
    }
}

/// Handles one CONNECT request and returns the response hyper writes back.
pub(crate) async fn handle_connect(req: Request<Incoming>, store: &ConfigStore) -> Response<ProxyBody> {
    let target = connect_target(&req);
    let settings = store.load();
    let gate = DebugGate::for_target(settings.debug, &target);

    let (original_host, original_port) = parse_host_port(&target, DEFAULT_CONNECT_PORT);
    if gate.enabled(3) && settings.filter(&original_host).is_some() {
        trace!("  = should connect to site ({}:{})", original_host, original_port);
    }
    let (host, port) = resolve(&original_host, original_port, &settings);

    if gate.enabled(1) {
        info!("  = will connect to {}:{}", host, port);
    }

    let upstream = match connect_upstream(&host, port).await {
        Ok(stream) => stream,
        Err(e) => {
            if gate.enabled(2) {
                debug!("  < ERR: {}", e);
            }
            return status_response(StatusCode::INTERNAL_SERVER_ERROR, b"Connection error", true);
        }
    };

    if gate.enabled(1) {
        info!("  < connected to {}/{}", host, port);
    }

    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                let (client, bodyhead) = split_upgraded(upgraded);
                if gate.enabled(2) {
                    debug!("  > writing head of length {}", bodyhead.len());
                }
                let result = match client {
                    UpgradedClient::Tcp(stream) => relay(stream, bodyhead, upstream, gate).await,
                    UpgradedClient::Other(io) => relay(io, bodyhead, upstream, gate).await,
                };
                match result {
                    Ok((sent, received)) => {
                        if gate.enabled(2) {
                            debug!(
                                "  = tunnel to {}:{} closed ({} bytes sent, {} bytes received)",
                                host, port, sent, received
                            );
                        }
                    }
                    Err(e) => {
                        if gate.enabled(2) {
                            debug!("  = tunnel to {}:{} failed: {}", host, port, e);
                        }
                    }
                }
            }
            Err(e) => {
                if gate.enabled(2) {
                    debug!("  > upgrade error: {}", e);
                }
            }
        }
    });

    status_response(StatusCode::OK, b"Connection established", false)
}

/// The `host[:port]` the client asked to tunnel to.
fn connect_target<T>(req: &Request<T>) -> String {
    req.uri()
        .authority()
        .map(|a| a.as_str().to_string())
        .unwrap_or_else(|| req.uri().to_string())
}

async fn connect_upstream(host: &str, port: u16) -> Result<TcpStream> {
    TcpStream::connect((host, port))
        .await
        .map_err(|source| ProxyError::UpstreamConnect {
            host: host.to_string(),
            port,
            source,
        })
}

fn status_response(status: StatusCode, reason: &'static [u8], close: bool) -> Response<ProxyBody> {
    let mut response = Response::new(empty_body());
    *response.status_mut() = status;
    response
        .extensions_mut()
        .insert(ReasonPhrase::from_static(reason));
    if close {
        response
            .headers_mut()
            .insert(CONNECTION, HeaderValue::from_static("close"));
    }
    response
}

enum UpgradedClient {
    Tcp(TcpStream),
    Other(TokioIo<Upgraded>),
}

/// Recovers the raw client socket and any bytes the HTTP parser had
/// already buffered past the CONNECT head.
fn split_upgraded(upgraded: Upgraded) -> (UpgradedClient, Bytes) {
    match upgraded.downcast::<TokioIo<TcpStream>>() {
        Ok(parts) => (UpgradedClient::Tcp(parts.io.into_inner()), parts.read_buf),
        Err(upgraded) => (UpgradedClient::Other(TokioIo::new(upgraded)), Bytes::new()),
    }
}

/// Pumps bytes between `client` and `upstream` until both directions end.
///
/// `bodyhead` is written to the upstream before anything else. End of
/// stream on one side shuts down the write half of the other; an error in
/// either direction ends the relay and drops both sockets. Returns the byte
/// counts for client to upstream and upstream to client.
pub async fn relay<C, U>(client: C, bodyhead: Bytes, upstream: U, gate: DebugGate) -> io::Result<(u64, u64)>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

    if !bodyhead.is_empty() {
        upstream_write.write_all(&bodyhead).await?;
    }

    tokio::try_join!(
        pump(&mut client_read, &mut upstream_write, gate, Direction::ClientToUpstream),
        pump(&mut upstream_read, &mut client_write, gate, Direction::UpstreamToClient),
    )
}

async fn pump<R, W>(reader: &mut R, writer: &mut W, gate: DebugGate, direction: Direction) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            if gate.enabled(3) {
                trace!("  {} end", direction);
            }
            match writer.shutdown().await {
                Err(e) if e.kind() != io::ErrorKind::NotConnected => return Err(e),
                _ => return Ok(total),
            }
        }

        if gate.enabled(3) {
            trace!("  {} data length = {}", direction, n);
        }
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
}
