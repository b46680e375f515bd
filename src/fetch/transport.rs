//! Transports: the thing that turns one `reqwest::Request` into one response.
//!
//! A transport may additionally expose a [`TlsConfigurable`] surface. The
//! `Fetcher` only touches TLS settings through that capability; a transport
//! without it keeps its own TLS behaviour.
//!
//! Transports should hand redirects back instead of following them, so the
//! `Fetcher` can record cookies on every hop. A plain `reqwest::Client`
//! follows them itself unless built with `redirect::Policy::none()`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{redirect, Client, Request, Response};
use tracing::debug;

use crate::errors::FetchError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

/// Sends a single request. Retries, cookies and status handling live above this.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn send(&self, request: Request) -> reqwest::Result<Response>;

    /// TLS configuration surface, when the transport has one.
    fn tls(&self) -> Option<&dyn TlsConfigurable> {
        None
    }
}

/// Transports whose certificate verification can be switched off.
pub trait TlsConfigurable: Send + Sync {
    /// A copy of this transport that accepts invalid certificates.
    fn insecure(&self) -> Result<Arc<dyn Transport>, FetchError>;

    fn accepts_invalid_certs(&self) -> bool;
}

// A bare client is already built, so its TLS settings are fixed.
#[async_trait]
impl Transport for Client {
    async fn send(&self, request: Request) -> reqwest::Result<Response> {
        self.execute(request).await
    }
}

// ── Pooled transport ──────────────────────────────────────────────────────────

/// Long-lived pooled client used by `Fetcher::with_defaults`.
#[derive(Debug, Clone)]
pub struct PooledTransport {
    client: Client,
    skip_verify: bool,
}

impl PooledTransport {
    pub fn new() -> Result<Self, FetchError> {
        Self::build(false)
    }

    fn build(skip_verify: bool) -> Result<Self, FetchError> {
        let per_host = std::thread::available_parallelism()
            .map(|n| n.get() + 1)
            .unwrap_or(2);

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_idle_timeout(IDLE_TIMEOUT)
            .pool_max_idle_per_host(per_host)
            .tcp_keepalive(TCP_KEEPALIVE)
            .gzip(true)
            .redirect(redirect::Policy::none())
            .danger_accept_invalid_certs(skip_verify)
            .build()
            .map_err(FetchError::Client)?;

        debug!(skip_verify, pool_per_host = per_host, "built pooled transport");
        Ok(Self { client, skip_verify })
    }
}

#[async_trait]
impl Transport for PooledTransport {
    async fn send(&self, request: Request) -> reqwest::Result<Response> {
        self.client.execute(request).await
    }

    fn tls(&self) -> Option<&dyn TlsConfigurable> {
        Some(self)
    }
}

impl TlsConfigurable for PooledTransport {
    fn insecure(&self) -> Result<Arc<dyn Transport>, FetchError> {
        if self.skip_verify {
            return Ok(Arc::new(self.clone()));
        }
        Ok(Arc::new(Self::build(true)?))
    }

    fn accepts_invalid_certs(&self) -> bool {
        self.skip_verify
    }
}
