//! Per-request options and the context they are folded over.

use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue, REFERER, USER_AGENT};
use reqwest::Request;
use tokio_util::sync::CancellationToken;

use super::{Config, MIN_TIMEOUT};

/// One change to a request. Options apply in order; the last one touching a
/// field wins.
#[derive(Debug, Clone)]
pub enum FetchOption {
    UserAgent(String),
    Referer(String),
    Header(String, String),
    /// Per-attempt timeout.
    Timeout(Duration),
    RaiseForStatus(bool),
    /// Overall budget for the call, retries included. Expiry yields `Cancelled`.
    Deadline(Duration),
    Cancellation(CancellationToken),
}

impl FetchOption {
    pub fn user_agent(ua: impl Into<String>) -> Self {
        Self::UserAgent(ua.into())
    }

    pub fn referer(referer: impl Into<String>) -> Self {
        Self::Referer(referer.into())
    }

    pub fn header(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Header(name.into(), value.into())
    }

    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout(timeout)
    }

    pub fn raise_for_status(raise: bool) -> Self {
        Self::RaiseForStatus(raise)
    }

    pub fn deadline(deadline: Duration) -> Self {
        Self::Deadline(deadline)
    }

    pub fn cancellation(token: CancellationToken) -> Self {
        Self::Cancellation(token)
    }

    fn apply(self, cx: &mut RequestContext) -> Result<(), String> {
        match self {
            Self::UserAgent(ua) => {
                cx.set_header(USER_AGENT, &ua)?;
                cx.config.user_agent = Some(ua);
            }
            Self::Referer(referer) => {
                cx.set_header(REFERER, &referer)?;
                cx.config.referer = Some(referer);
            }
            Self::Header(name, value) => {
                let name = HeaderName::from_bytes(name.trim().as_bytes())
                    .map_err(|e| format!("invalid header name `{name}`: {e}"))?;
                cx.set_header(name, &value)?;
            }
            Self::Timeout(timeout) => {
                *cx.request.timeout_mut() = Some(timeout);
            }
            Self::RaiseForStatus(raise) => cx.config.raise_for_status = raise,
            Self::Deadline(deadline) => cx.deadline = Some(deadline),
            Self::Cancellation(token) => cx.cancellation = Some(token),
        }
        Ok(())
    }
}

/// Effective settings for one call plus the request being built.
///
/// Seeded from a clone of the fetcher's base config; options never reach the
/// fetcher itself.
#[derive(Debug)]
pub struct RequestContext {
    pub(crate) request: Request,
    pub(crate) config: Config,
    pub(crate) deadline: Option<Duration>,
    pub(crate) cancellation: Option<CancellationToken>,
}

impl RequestContext {
    pub(crate) fn new(mut request: Request, config: Config) -> Self {
        if let Some(timeout) = config.timeout.filter(|t| *t > MIN_TIMEOUT) {
            *request.timeout_mut() = Some(timeout);
        }
        Self {
            request,
            config,
            deadline: None,
            cancellation: None,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Base-config options first, then `options` in order.
    pub(crate) fn apply_all(
        &mut self,
        options: impl IntoIterator<Item = FetchOption>,
    ) -> Result<(), String> {
        let base = self.base_options();
        for option in base.into_iter().chain(options) {
            option.apply(self)?;
        }
        Ok(())
    }

    fn base_options(&self) -> Vec<FetchOption> {
        let mut options = Vec::new();
        if let Some(ua) = self.config.user_agent.as_deref().filter(|s| !s.is_empty()) {
            options.push(FetchOption::user_agent(ua));
        }
        if let Some(referer) = self.config.referer.as_deref().filter(|s| !s.is_empty()) {
            options.push(FetchOption::referer(referer));
        }
        options
    }

    fn set_header(&mut self, name: HeaderName, value: &str) -> Result<(), String> {
        let value = HeaderValue::from_str(value)
            .map_err(|e| format!("invalid value for header `{name}`: {e}"))?;
        self.request.headers_mut().insert(name, value);
        Ok(())
    }
}
