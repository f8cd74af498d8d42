//! Certificate download responder.
//!
//! Serves files from a local directory (by default `./ssl`) to clients
//! that address the proxy itself by a fixed virtual host, so a browser
//! behind the proxy can fetch and install a CA certificate. Requests for
//! any other host, or for paths that do not name an existing file, are
//! declined and go through the relay.

use crate::error::Result;
use crate::proxy::{BoxError, ProxyBody};
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::{Body, Frame};
use hyper::header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE, EXPIRES, PRAGMA};
use hyper::{Response, StatusCode};
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::fs::File;
use tokio::io::{AsyncRead, ReadBuf};
use tracing::debug;

/// Virtual host that selects the certificate responder.
pub const DEFAULT_CERT_HOST: &str = "localhost.com";

/// Directory the certificate files are served from.
pub const DEFAULT_CERT_DIR: &str = "./ssl";

const READ_CHUNK: usize = 8 * 1024;

/// Serves certificate files for requests to a fixed virtual host.
#[derive(Debug, Clone)]
pub struct CertificateResponder {
    root: PathBuf,
    host: String,
}

impl CertificateResponder {
    pub fn new<P: Into<PathBuf>, H: Into<String>>(root: P, host: H) -> Self {
        Self {
            root: root.into(),
            host: host.into(),
        }
    }

    /// Returns the file to serve, or `None` to decline the request.
    ///
    /// `uri_path` must not carry a query string. Only plain path segments
    /// are accepted, so the result always lies under the root directory.
    pub async fn lookup(&self, host_header: Option<&str>, uri_path: &str) -> Option<PathBuf> {
        if host_header != Some(self.host.as_str()) {
            return None;
        }

        let relative = Path::new(uri_path.trim_start_matches('/'));
        if relative.as_os_str().is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return None;
        }

        let candidate = self.root.join(relative);
        match tokio::fs::metadata(&candidate).await {
            Ok(meta) if meta.is_file() => Some(candidate),
            _ => None,
        }
    }

    /// Streams `path` back as a certificate download.
    pub async fn respond(&self, path: &Path) -> Result<Response<ProxyBody>> {
        let file = File::open(path).await?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        debug!("Serving certificate file {}", path.display());

        let response = Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/x-x509-ca-cert")
            .header("Content-Description", "File Transfer")
            .header(CONTENT_DISPOSITION, format!("attachment; filename={}", filename))
            .header(EXPIRES, "0")
            .header(CACHE_CONTROL, "must-revalidate, post-check=0, pre-check=0")
            .header(PRAGMA, "public")
            .body(FileBody::new(file).boxed())?;

        Ok(response)
    }
}

impl Default for CertificateResponder {
    fn default() -> Self {
        Self::new(DEFAULT_CERT_DIR, DEFAULT_CERT_HOST)
    }
}

/// Response body that reads a file one chunk at a time.
struct FileBody {
    file: Option<File>,
    buf: Box<[u8]>,
}

impl FileBody {
    fn new(file: File) -> Self {
        Self {
            file: Some(file),
            buf: vec![0u8; READ_CHUNK].into_boxed_slice(),
        }
    }
}

impl Body for FileBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<std::result::Result<Frame<Bytes>, BoxError>>> {
        let this = self.get_mut();
        let Some(file) = this.file.as_mut() else {
            return Poll::Ready(None);
        };

        let mut read_buf = ReadBuf::new(&mut this.buf[..]);
        match Pin::new(file).poll_read(cx, &mut read_buf) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => {
                this.file = None;
                Poll::Ready(Some(Err(e.into())))
            }
            Poll::Ready(Ok(())) => {
                let filled = read_buf.filled();
                if filled.is_empty() {
                    this.file = None;
                    Poll::Ready(None)
                } else {
                    Poll::Ready(Some(Ok(Frame::data(Bytes::copy_from_slice(filled)))))
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.file.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_lookup_matches_host_and_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("ca.crt"), b"CERT").unwrap();
        let responder = CertificateResponder::new(dir.path(), DEFAULT_CERT_HOST);

        assert_eq!(
            responder.lookup(Some("localhost.com"), "/ca.crt").await,
            Some(dir.path().join("ca.crt"))
        );
        assert_eq!(responder.lookup(Some("example.com"), "/ca.crt").await, None);
        assert_eq!(responder.lookup(None, "/ca.crt").await, None);
        assert_eq!(responder.lookup(Some("localhost.com"), "/missing.crt").await, None);
    }

    #[tokio::test]
    async fn test_lookup_declines_directories_and_traversal() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("ssl");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(dir.path().join("secret"), b"x").unwrap();
        let responder = CertificateResponder::new(&root, DEFAULT_CERT_HOST);

        assert_eq!(responder.lookup(Some("localhost.com"), "/").await, None);
        assert_eq!(responder.lookup(Some("localhost.com"), "/sub").await, None);
        assert_eq!(responder.lookup(Some("localhost.com"), "/../secret").await, None);
        assert_eq!(responder.lookup(Some("localhost.com"), "/sub/../../secret").await, None);
    }

    #[tokio::test]
    async fn test_respond_streams_file_with_download_headers() {
        let dir = tempdir().unwrap();
        let contents: Vec<u8> = (0..20_000u32).map(|i| (i % 256) as u8).collect();
        let path = dir.path().join("root.crt");
        std::fs::write(&path, &contents).unwrap();

        let responder = CertificateResponder::new(dir.path(), DEFAULT_CERT_HOST);
        let response = responder.respond(&path).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[CONTENT_TYPE], "application/x-x509-ca-cert");
        assert_eq!(headers["content-description"], "File Transfer");
        assert_eq!(headers[CONTENT_DISPOSITION], "attachment; filename=root.crt");
        assert_eq!(headers[EXPIRES], "0");
        assert_eq!(headers[PRAGMA], "public");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), contents.as_slice());
    }
}
