//! The `Fetcher`: one long-lived HTTP client with shared defaults.
//!
//! ## Construction
//!
//! `Fetcher::new(transport, config)`: caller owns the transport, no retries
//!   unless added with [`Fetcher::with_retry_policy`].
//!
//! `Fetcher::with_defaults(config)`: pooled transport, bounded retries
//!   (1s → 2s → 3s, four attempts), raise-for-status and a random user agent
//!   when none is given.
//!
//! ## Per-request flow
//!
//! URL is trimmed and parsed, a [`RequestContext`] is seeded from a clone of the
//! base config, options are folded over it, the request goes through the retry
//! loop, and a non-200 final response becomes a [`FetchError::Status`] when
//! raise-for-status is on. Redirects handed back by the transport are followed
//! here, up to [`redirect::MAX_REDIRECTS`] hops, with the cookie store applied
//! to each hop.

pub mod options;
pub mod redirect;
pub mod retry;
pub mod transport;

use std::future::pending;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::{Body, Method, Request, Response, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;

use crate::config::FetchSettings;
use crate::errors::FetchError;
use crate::random;

pub use self::options::{FetchOption, RequestContext};
pub use self::retry::RetryPolicy;
pub use self::transport::{PooledTransport, TlsConfigurable, Transport};

use self::retry::Attempt;

/// Timeouts at or below this are ignored.
pub const MIN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Config ────────────────────────────────────────────────────────────────────

/// Base settings of a [`Fetcher`]. Cloned into every request.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// User-Agent header.
    pub user_agent: Option<String>,

    /// Referer header.
    pub referer: Option<String>,

    /// Keep one cookie store for the fetcher's lifetime.
    pub enable_cookies: bool,

    /// Draw a user agent from the built-in pool at construction.
    pub random_user_agent: bool,

    /// Turn any final status other than 200 into an error.
    pub raise_for_status: bool,

    /// Per-attempt timeout.
    pub timeout: Option<Duration>,

    /// Custom transport for `Fetcher::with_defaults`. `Fetcher::new` takes its
    /// transport as an argument and discards this one.
    pub transport: Option<Arc<dyn Transport>>,

    /// Skip TLS verification. Only honoured by transports exposing
    /// [`TlsConfigurable`].
    pub skip_verify: bool,
}

// ── Fetcher ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    config: Config,
    cookies: Option<Arc<Jar>>,
    retry: Option<RetryPolicy>,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>, mut config: Config) -> Self {
        if config.transport.take().is_some() {
            debug!("config.transport ignored; using the transport argument");
        }
        let has_user_agent = config.user_agent.as_deref().is_some_and(|ua| !ua.is_empty());
        if config.random_user_agent && !has_user_agent {
            config.user_agent = Some(random::user_agent());
        }
        let cookies = config.enable_cookies.then(|| Arc::new(Jar::default()));

        debug!(
            user_agent = config.user_agent.as_deref().unwrap_or("-"),
            cookies = cookies.is_some(),
            "fetcher ready"
        );

        Self {
            transport,
            config,
            cookies,
            retry: None,
        }
    }

    pub fn with_defaults(config: Option<Config>) -> Result<Self, FetchError> {
        let mut config = config.unwrap_or_default();
        config.raise_for_status = true;
        if config.user_agent.as_deref().is_none_or(str::is_empty) {
            config.random_user_agent = true;
        }

        let mut transport: Arc<dyn Transport> = match config.transport.take() {
            Some(transport) => transport,
            None => Arc::new(PooledTransport::new()?),
        };
        if config.skip_verify {
            let insecure = transport.tls().map(|tls| tls.insecure()).transpose()?;
            match insecure {
                Some(insecure) => transport = insecure,
                None => debug!("transport has no TLS configuration; skip_verify ignored"),
            }
        }

        Ok(Self::new(transport, config).with_retry_policy(RetryPolicy::default()))
    }

    /// Defaulted fetcher shaped by file/env settings.
    pub fn from_settings(settings: &FetchSettings) -> Result<Self, FetchError> {
        Ok(Self::with_defaults(Some(settings.to_config()))?
            .with_retry_policy(settings.retry.policy()))
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.config.user_agent.as_deref()
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    pub fn cookie_jar(&self) -> Option<&Arc<Jar>> {
        self.cookies.as_ref()
    }

    pub async fn fetch(&self, url: &str) -> Result<Response, FetchError> {
        self.get(url, []).await
    }

    pub async fn get(
        &self,
        url: &str,
        options: impl IntoIterator<Item = FetchOption>,
    ) -> Result<Response, FetchError> {
        self.request(Method::GET, url, None, options).await
    }

    pub async fn post(
        &self,
        url: &str,
        body: impl Into<Body>,
        options: impl IntoIterator<Item = FetchOption>,
    ) -> Result<Response, FetchError> {
        self.request(Method::POST, url, Some(body.into()), options)
            .await
    }

    /// Issue a request. Returns either an open response or exactly one error.
    #[instrument(skip_all, fields(method = %method, url = %url.trim()))]
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<Body>,
        options: impl IntoIterator<Item = FetchOption>,
    ) -> Result<Response, FetchError> {
        let url = url.trim();
        let parsed = Url::parse(url).map_err(|e| FetchError::invalid_request(url, e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::invalid_request(
                url,
                format!("unsupported scheme `{}`", parsed.scheme()),
            ));
        }

        let mut request = Request::new(method, parsed);
        *request.body_mut() = body;

        let mut cx = RequestContext::new(request, self.config.clone());
        cx.apply_all(options)
            .map_err(|reason| FetchError::invalid_request(url, reason))?;

        let RequestContext {
            request,
            config,
            deadline,
            cancellation,
        } = cx;

        tokio::select! {
            biased;
            _ = cancelled(cancellation.as_ref()) => {
                debug!("cancelled by caller");
                Err(FetchError::cancelled(url))
            }
            _ = expired(deadline) => {
                debug!(?deadline, "deadline expired");
                Err(FetchError::cancelled(url))
            }
            result = self.exchange(request, config.raise_for_status) => result,
        }
    }

    async fn exchange(&self, request: Request, raise_for_status: bool) -> Result<Response, FetchError> {
        let url = request.url().to_string();

        let replayed = match self.retry {
            Some(policy) => Some(retry::run(&policy, &request, |attempt| self.send_once(attempt)).await),
            None => None,
        };
        let (outcome, attempts) = match replayed {
            Some((Err(Attempt::Unreplayable), _)) | None => {
                if self.retry.is_some() {
                    debug!("request body cannot be replayed; sending once");
                }
                (self.send_once(request).await.map_err(Attempt::Failed), 1)
            }
            Some(done) => done,
        };

        let response = match outcome {
            Ok(response) => response,
            Err(Attempt::Status(response)) if raise_for_status => {
                return Err(FetchError::RetriesExhausted {
                    url,
                    attempts,
                    status: response.status().as_u16(),
                });
            }
            Err(Attempt::Status(response)) => response,
            Err(Attempt::Failed(err)) if err.is_builder() => {
                return Err(FetchError::invalid_request(url, err.to_string()));
            }
            Err(Attempt::Failed(err)) => return Err(FetchError::transport(url, err)),
            Err(Attempt::Unreplayable) => {
                return Err(FetchError::invalid_request(url, "request body cannot be replayed"));
            }
        };

        let status = response.status();
        debug!(%status, attempts, "response");
        if raise_for_status && status != StatusCode::OK {
            // Dropping the response closes the body and frees the connection.
            drop(response);
            return Err(FetchError::status(url, status.as_u16()));
        }
        Ok(response)
    }

    /// One attempt: the request plus any redirects it leads to.
    async fn send_once(&self, mut request: Request) -> reqwest::Result<Response> {
        // A Cookie header set by the caller replaces the store until the
        // redirect chain leaves the origin.
        let mut caller_cookie = request.headers().contains_key(COOKIE);
        let mut hops = 0;

        loop {
            if let Some(jar) = &self.cookies {
                if !caller_cookie {
                    request.headers_mut().remove(COOKIE);
                    if let Some(value) = jar.cookies(request.url()) {
                        request.headers_mut().insert(COOKIE, value);
                    }
                }
            }

            let retained = request.try_clone();
            let response = self.transport.send(request).await?;

            if let Some(jar) = &self.cookies {
                let mut set_cookies = response.headers().get_all(SET_COOKIE).iter();
                jar.set_cookies(&mut set_cookies, response.url());
            }

            if hops == redirect::MAX_REDIRECTS {
                debug!(hops, "redirect limit reached");
                return Ok(response);
            }
            let Some(next) = retained.and_then(|previous| redirect::follow(previous, &response)) else {
                return Ok(response);
            };

            debug!(status = %response.status(), to = %next.url(), "following redirect");
            caller_cookie &= next.headers().contains_key(COOKIE);
            hops += 1;
            // Dropping the redirect response frees its connection.
            drop(response);
            request = next;
        }
    }
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => pending().await,
    }
}

async fn expired(deadline: Option<Duration>) {
    match deadline {
        Some(deadline) => tokio::time::sleep(deadline).await,
        None => pending().await,
    }
}

// ── Shared default ────────────────────────────────────────────────────────────

static SHARED: LazyLock<Fetcher> = LazyLock::new(|| {
    let config = Config {
        random_user_agent: true,
        ..Config::default()
    };
    #[allow(clippy::expect_used)]
    let fetcher = Fetcher::with_defaults(Some(config)).expect("failed to build the shared HTTP client");
    fetcher
});

/// Process-wide fetcher with a random user agent, built on first use.
///
/// # Panics
///
/// Panics on first use if the pooled HTTP client cannot be built.
pub fn shared() -> &'static Fetcher {
    &SHARED
}

pub async fn fetch(url: &str) -> Result<Response, FetchError> {
    shared().fetch(url).await
}

pub async fn get(
    url: &str,
    options: impl IntoIterator<Item = FetchOption>,
) -> Result<Response, FetchError> {
    shared().get(url, options).await
}

pub async fn post(
    url: &str,
    body: impl Into<Body>,
    options: impl IntoIterator<Item = FetchOption>,
) -> Result<Response, FetchError> {
    shared().post(url, body, options).await
}

pub async fn request(
    method: Method,
    url: &str,
    body: Option<Body>,
    options: impl IntoIterator<Item = FetchOption>,
) -> Result<Response, FetchError> {
    shared().request(method, url, body, options).await
}
