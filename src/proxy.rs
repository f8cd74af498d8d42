//! Proxy server implementation
//! Accepts client connections and relays plain HTTP requests or CONNECT tunnels

use crate::certificate::CertificateResponder;
use crate::config::ConfigStore;
use crate::debug::DebugGate;
use crate::error::{ProxyError, Result};
use crate::hostport::{parse_host_port, request_path};
use crate::tunnel;
use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::body::{Frame, Incoming};
use hyper::header::{HeaderValue, CONNECTION, CONTENT_TYPE, HOST};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::upgrade::OnUpgrade;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, trace, warn};

/// Error type carried by relayed bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body type of every response the proxy produces.
pub type ProxyBody = BoxBody<Bytes, BoxError>;

/// Default port for plain HTTP upstreams.
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Default listening port.
pub const DEFAULT_LISTEN_PORT: u16 = 8888;

/// Proxy server configuration
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub listen_addr: IpAddr,
    pub port: u16,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_LISTEN_PORT,
        }
    }
}

/// Proxy server
pub struct ProxyServer {
    config: ProxyConfig,
    store: Arc<ConfigStore>,
    certs: Arc<CertificateResponder>,
}

impl ProxyServer {
    /// Create a new proxy server
    pub fn new(config: ProxyConfig, store: Arc<ConfigStore>, certs: CertificateResponder) -> Self {
        Self {
            config,
            store,
            certs: Arc::new(certs),
        }
    }

    /// Bind the listening socket
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = SocketAddr::new(self.config.listen_addr, self.config.port);
        TcpListener::bind(addr)
            .await
            .map_err(|source| ProxyError::Bind {
                addr: addr.to_string(),
                source,
            })
    }

    /// Bind and serve until the task is dropped
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        if self.store.debug_level() >= 1 {
            info!("server listening on port {}", local_addr.port());
        }

        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Accept error: {}", e);
                    continue;
                }
            };
            let store = self.store.clone();
            let certs = self.certs.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, remote_addr, store, certs).await {
                    debug!("HTTP connection error from {}: {}", remote_addr, e);
                }
            });
        }
    }

    /// Handle a single client connection
    async fn handle_connection(
        stream: TcpStream,
        remote_addr: SocketAddr,
        store: Arc<ConfigStore>,
        certs: Arc<CertificateResponder>,
    ) -> std::result::Result<(), hyper::Error> {
        let io = TokioIo::new(stream);

        http1::Builder::new()
            .preserve_header_case(true)
            .title_case_headers(false)
            .serve_connection(
                io,
                service_fn(move |req| {
                    let store = store.clone();
                    let certs = certs.clone();
                    async move { Self::handle_request(req, remote_addr, store, certs).await }
                }),
            )
            .with_upgrades()
            .await
    }

    /// Handle incoming request
    async fn handle_request(
        req: Request<Incoming>,
        remote_addr: SocketAddr,
        store: Arc<ConfigStore>,
        certs: Arc<CertificateResponder>,
    ) -> std::result::Result<Response<ProxyBody>, Infallible> {
        if req.method() == Method::CONNECT {
            return Ok(tunnel::handle_connect(req, &store).await);
        }

        let target = req.uri().to_string();
        let gate = DebugGate::for_target(store.debug_level(), &target);
        if gate.enabled(1) {
            info!("  > request: {} (from {})", target, remote_addr);
        }

        match Self::process_request(req, &target, gate, &certs).await {
            Ok(response) => Ok(response),
            Err(e) => {
                if gate.enabled(2) {
                    debug!("  < ERR: {}", e);
                }
                Ok(Self::error_response(&e))
            }
        }
    }

    /// Serve a certificate download or relay the request upstream
    async fn process_request(
        req: Request<Incoming>,
        target: &str,
        gate: DebugGate,
        certs: &CertificateResponder,
    ) -> Result<Response<ProxyBody>> {
        let host_header = req
            .headers()
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);

        let uri_path = req.uri().path().to_string();
        if let Some(path) = certs.lookup(host_header.as_deref(), &uri_path).await {
            return certs.respond(&path).await;
        }

        let host_header = host_header
            .or_else(|| req.uri().authority().map(|a| a.as_str().to_string()))
            .unwrap_or_default();
        let (host, port) = parse_host_port(&host_header, DEFAULT_HTTP_PORT);

        Self::relay_request(req, target, &host, port, gate).await
    }

    /// Forward the request to `host:port` and stream the response back
    async fn relay_request(
        req: Request<Incoming>,
        target: &str,
        host: &str,
        port: u16,
        gate: DebugGate,
    ) -> Result<Response<ProxyBody>> {
        let path = request_path(target);

        if gate.enabled(2) {
            debug!(
                "  > options: {} {} via {}:{} headers: {:?}",
                req.method(),
                path,
                host,
                port,
                req.headers()
            );
        }

        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|source| ProxyError::UpstreamConnect {
                host: host.to_string(),
                port,
                source,
            })?;

        let (mut sender, conn) = hyper::client::conn::http1::Builder::new()
            .preserve_header_case(true)
            .handshake(TokioIo::new(stream))
            .await?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Upstream connection error: {}", e);
            }
        });

        let (mut parts, body) = req.into_parts();
        parts.uri = Uri::try_from(path)?;
        parts.extensions.remove::<OnUpgrade>();

        let body = body.map_frame(move |frame| {
            if gate.enabled(3) {
                if let Some(data) = frame.data_ref() {
                    trace!("  > chunk = {} bytes", data.len());
                }
            }
            frame
        });

        let response = sender.send_request(Request::from_parts(parts, body)).await?;

        if gate.enabled(2) {
            debug!(
                "  < response {} headers: {:?}",
                response.status().as_u16(),
                response.headers()
            );
        }

        let (parts, body) = response.into_parts();
        let body = body
            .map_frame(move |frame: Frame<Bytes>| {
                if gate.enabled(3) {
                    if let Some(data) = frame.data_ref() {
                        trace!("  < chunk = {} bytes", data.len());
                    }
                }
                frame
            })
            .map_err(BoxError::from)
            .boxed();

        Ok(Response::from_parts(parts, body))
    }

    /// 500 page carrying the error description; closes the client connection
    fn error_response(error: &ProxyError) -> Response<ProxyBody> {
        let page = format!(
            "<h1>500 Error</h1>\r\n<p>Error was <pre>{}</pre></p>\r\n</body></html>\r\n",
            error
        );
        let mut response = Response::new(full_body(Bytes::from(page)));
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
        response
            .headers_mut()
            .insert(CONNECTION, HeaderValue::from_static("close"));
        response
    }
}

/// Create full body
pub(crate) fn full_body(bytes: Bytes) -> ProxyBody {
    Full::new(bytes).map_err(|never| match never {}).boxed()
}

/// Create empty body
pub(crate) fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProxyConfig::default();
        assert_eq!(config.port, 8888);
        assert_eq!(config.listen_addr, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }

    #[tokio::test]
    async fn test_error_response_page() {
        let error = ProxyError::UpstreamConnect {
            host: "unreachable.example".to_string(),
            port: 80,
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        };
        let response = ProxyServer::error_response(&error);

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[CONNECTION], "close");
        assert_eq!(response.headers()[CONTENT_TYPE], "text/html");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.starts_with("<h1>500 Error</h1>"));
        assert!(text.contains("unreachable.example:80"));
    }

    #[tokio::test]
    async fn test_bind_reports_address_in_use() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let server = ProxyServer::new(
            ProxyConfig {
                listen_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
                port,
            },
            Arc::new(ConfigStore::default()),
            CertificateResponder::default(),
        );
        let err = server.bind().await.unwrap_err();
        assert!(matches!(err, ProxyError::Bind { .. }));
    }
}
