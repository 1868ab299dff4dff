//! HTTP/1.1 to the Docker Engine over a unix socket or TCP.
//!
//! One connection per request. The engine API is low-volume control
//! traffic, and a fresh connection keeps a hung call from poisoning the
//! next one.

use std::path::PathBuf;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST, USER_AGENT};
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid docker host {0:?}: expected unix:///path or tcp://host:port")]
    InvalidHost(String),

    #[error("cannot connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        source: std::io::Error,
    },

    #[error("http: {0}")]
    Http(#[from] hyper::Error),

    #[error("invalid request: {0}")]
    Request(#[from] http::Error),
}

/// Where the engine listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp(String),
}

impl Endpoint {
    /// Parse a `DOCKER_HOST`-style address.
    pub fn parse(host: &str) -> Result<Self, TransportError> {
        let host = host.trim();
        let invalid = || TransportError::InvalidHost(host.to_string());

        if let Some(path) = host.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(invalid());
            }
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }

        let addr = host
            .strip_prefix("tcp://")
            .or_else(|| host.strip_prefix("http://"))
            .ok_or_else(invalid)?
            .trim_end_matches('/');
        if addr.is_empty() || addr.contains('/') {
            return Err(invalid());
        }
        Ok(Endpoint::Tcp(addr.to_string()))
    }

    /// Value of the `Host` header.
    fn authority(&self) -> &str {
        match self {
            Endpoint::Unix(_) => "docker",
            Endpoint::Tcp(addr) => addr,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
        }
    }
}

/// Status and fully collected body of an engine response.
#[derive(Debug)]
pub struct EngineResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Minimal Docker Engine API client.
#[derive(Debug, Clone)]
pub struct EngineClient {
    endpoint: Endpoint,
    api_version: String,
}

impl EngineClient {
    pub fn new(endpoint: Endpoint, api_version: &str) -> Self {
        Self {
            endpoint,
            api_version: api_version.trim_start_matches('v').to_string(),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Versioned API path, e.g. `/v1.45/services/web`.
    pub fn path(&self, path: &str) -> String {
        format!("/v{}{}", self.api_version, path)
    }

    pub async fn get(&self, path: &str) -> Result<EngineResponse, TransportError> {
        self.send(Method::GET, path, &[], None).await
    }

    /// Send one request. `path` includes any query string.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        headers: &[(&str, String)],
        json_body: Option<Vec<u8>>,
    ) -> Result<EngineResponse, TransportError> {
        let mut builder = Request::builder()
            .method(method.clone())
            .uri(path)
            .header(HOST, self.endpoint.authority())
            .header(USER_AGENT, concat!("fleet/", env!("CARGO_PKG_VERSION")));
        if json_body.is_some() {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }
        let request = builder.body(Full::new(Bytes::from(json_body.unwrap_or_default())))?;

        debug!(%method, %path, endpoint = %self.endpoint, "engine request");

        let connect_err = |source: std::io::Error| TransportError::Connect {
            endpoint: self.endpoint.to_string(),
            source,
        };
        match &self.endpoint {
            #[cfg(unix)]
            Endpoint::Unix(socket) => {
                let stream = tokio::net::UnixStream::connect(socket)
                    .await
                    .map_err(connect_err)?;
                exchange(stream, request).await
            }
            #[cfg(not(unix))]
            Endpoint::Unix(_) => Err(connect_err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "unix sockets are not available on this platform",
            ))),
            Endpoint::Tcp(addr) => {
                let stream = tokio::net::TcpStream::connect(addr.as_str())
                    .await
                    .map_err(connect_err)?;
                exchange(stream, request).await
            }
        }
    }
}

async fn exchange<S>(
    stream: S,
    request: Request<Full<Bytes>>,
) -> Result<EngineResponse, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "engine connection closed with error");
        }
    });

    let response = sender.send_request(request).await?;
    let status = response.status();
    let body = response.into_body().collect().await?.to_bytes();
    Ok(EngineResponse { status, body })
}

/// Percent-encode a query parameter value.
pub(crate) fn encode_query(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
