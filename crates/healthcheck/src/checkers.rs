//! Checker implementations: one probe of one backend per invocation.

use crate::response::{ResponseStream, ResponseSummary};
use crate::tls;
use crate::types::{CheckFailure, CheckTarget, ConnectOptions, ProbeError, Protocol};
use async_trait::async_trait;
use rustls::pki_types::ServerName;
use std::net::IpAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Read buffer size for response streaming.
const READ_BUFFER_LENGTH: usize = 4096;

const USER_AGENT: &str = concat!("vigil/", env!("CARGO_PKG_VERSION"));

/// A single-backend health checker.
///
/// An implementation probes exactly one target per invocation; the monitor
/// loop owns scheduling, the retry policy and liveness transitions.
#[async_trait]
pub trait Checker: Send + Sync {
    /// Checker kind, for logs.
    fn kind(&self) -> &'static str;

    /// Number of targets in one full check cycle.
    fn target_count(&self) -> usize;

    /// Probe the target at `index`.
    async fn check_target(&self, index: usize) -> Result<(), CheckFailure>;
}

/// HTTP/SSL GET checker.
///
/// Fetches each configured URL over a fresh connection and validates the
/// status code and/or the MD5 digest of the body. The connection, TLS
/// session and parse state live only for the duration of one probe.
pub struct HttpChecker {
    protocol: Protocol,
    targets: Vec<CheckTarget>,
    conn: ConnectOptions,
    tls: Option<TlsConnector>,
}

impl HttpChecker {
    pub fn new(
        protocol: Protocol,
        targets: Vec<CheckTarget>,
        conn: ConnectOptions,
    ) -> Result<Self, rustls::Error> {
        let tls = match protocol {
            Protocol::Http => None,
            Protocol::Ssl => Some(TlsConnector::from(tls::probe_client_config()?)),
        };
        Ok(Self {
            protocol,
            targets,
            conn,
            tls,
        })
    }

    /// Build the GET request for `path`.
    ///
    /// HTTP/1.0 with no keep-alive: the server closing the connection frames
    /// the body. Literal IPv6 hosts are bracketed; a configured virtualhost
    /// replaces the address and carries no port.
    fn build_request(&self, path: &str) -> String {
        let host = match &self.conn.virtualhost {
            Some(vhost) => vhost.clone(),
            None => {
                let port = self.conn.address.port();
                match self.conn.address.ip() {
                    IpAddr::V4(v4) => format!("{v4}:{port}"),
                    IpAddr::V6(v6) => format!("[{v6}]:{port}"),
                }
            }
        };
        format!("GET {path} HTTP/1.0\r\nUser-Agent: {USER_AGENT}\r\nHost: {host}\r\n\r\n")
    }

    fn server_name(&self) -> Result<ServerName<'static>, ProbeError> {
        let host = self
            .conn
            .virtualhost
            .clone()
            .unwrap_or_else(|| self.conn.address.ip().to_string());
        ServerName::try_from(host)
            .map_err(|e| ProbeError::Malformed(format!("invalid TLS server name: {e}")))
    }

    /// Connect, optionally handshake, and fetch one target.
    async fn fetch(&self, target: &CheckTarget) -> Result<ResponseSummary, ProbeError> {
        let io_timeout = self.conn.timeout;
        let stream = timeout(io_timeout, TcpStream::connect(self.conn.address))
            .await
            .map_err(|_| ProbeError::ConnectTimeout)?
            .map_err(ProbeError::Connect)?;

        match &self.tls {
            None => self.exchange(stream, target).await,
            Some(connector) => {
                let name = self.server_name()?;
                let stream = timeout(io_timeout, connector.connect(name, stream))
                    .await
                    .map_err(|_| ProbeError::HandshakeTimeout)?
                    .map_err(ProbeError::Handshake)?;
                self.exchange(stream, target).await
            }
        }
    }

    /// Send the GET and stream the response to EOF.
    async fn exchange<S>(
        &self,
        mut stream: S,
        target: &CheckTarget,
    ) -> Result<ResponseSummary, ProbeError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let io_timeout = self.conn.timeout;
        let request = self.build_request(&target.path);
        timeout(io_timeout, stream.write_all(request.as_bytes()))
            .await
            .map_err(|_| ProbeError::WriteTimeout)?
            .map_err(ProbeError::Send)?;

        let mut parser = ResponseStream::new(target.digest.is_some());
        let mut buf = [0u8; READ_BUFFER_LENGTH];
        loop {
            let n = timeout(io_timeout, stream.read(&mut buf))
                .await
                .map_err(|_| ProbeError::ReadTimeout)?
                .map_err(ProbeError::Recv)?;
            if n == 0 {
                // EOF: the whole stream has been parsed.
                break;
            }
            parser.feed(&buf[..n])?;
        }
        Ok(parser.finish())
    }

    /// Validate one fully-read response against its target.
    fn evaluate(target: &CheckTarget, summary: &ResponseSummary) -> Result<(), CheckFailure> {
        if !summary.boundary_seen {
            return Err(CheckFailure::EmptyResponse);
        }

        let mut passed = false;
        if let Some(expected) = target.status_code {
            let actual = summary.status_code.unwrap_or(0);
            if actual != expected {
                return Err(CheckFailure::StatusMismatch { expected, actual });
            }
            passed = true;
        }
        if let Some(expected) = &target.digest {
            let actual = summary.digest.clone().unwrap_or_default();
            if &actual != expected {
                return Err(CheckFailure::DigestMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
            passed = true;
        }
        if !passed {
            return Err(CheckFailure::NoCriteria);
        }
        Ok(())
    }
}

#[async_trait]
impl Checker for HttpChecker {
    fn kind(&self) -> &'static str {
        match self.protocol {
            Protocol::Http => "http",
            Protocol::Ssl => "ssl",
        }
    }

    fn target_count(&self) -> usize {
        self.targets.len()
    }

    async fn check_target(&self, index: usize) -> Result<(), CheckFailure> {
        let target = &self.targets[index];
        let summary = self.fetch(target).await?;
        debug!(
            address = %self.conn.address,
            path = %target.path,
            status = summary.status_code,
            body_len = summary.body_len,
            "fetched target"
        );
        Self::evaluate(target, &summary)
    }
}

/// TCP connect checker: the backend is healthy when a connection attempt
/// completes within the timeout.
pub struct TcpChecker {
    conn: ConnectOptions,
}

impl TcpChecker {
    pub fn new(conn: ConnectOptions) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl Checker for TcpChecker {
    fn kind(&self) -> &'static str {
        "tcp"
    }

    fn target_count(&self) -> usize {
        1
    }

    async fn check_target(&self, _index: usize) -> Result<(), CheckFailure> {
        let stream = timeout(self.conn.timeout, TcpStream::connect(self.conn.address))
            .await
            .map_err(|_| ProbeError::ConnectTimeout)?
            .map_err(ProbeError::Connect)?;
        drop(stream);
        Ok(())
    }
}
