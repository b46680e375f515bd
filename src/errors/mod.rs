//! Error domain for the fetch layer.
//!
//! [`classify`] maps a raw HTTP status code to a [`StatusKind`]; [`FetchError`]
//! is what every public `Fetcher` operation returns on failure.

use std::fmt;

use thiserror::Error;

// ── Status classification ─────────────────────────────────────────────────────

/// Domain meaning of a non-success HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    RequestTimeout,
    Conflict,
    Gone,
    TooManyRequests,
    InternalServerError,
    NotImplemented,
    BadGateway,
    ServiceUnavailable,
    GatewayTimeout,
    /// Any code without a dedicated kind, carrying the raw value.
    Unexpected(u16),
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::BadRequest => "bad request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not found",
            Self::MethodNotAllowed => "method not allowed",
            Self::RequestTimeout => "request timeout",
            Self::Conflict => "conflict",
            Self::Gone => "gone",
            Self::TooManyRequests => "too many requests",
            Self::InternalServerError => "internal server error",
            Self::NotImplemented => "not implemented",
            Self::BadGateway => "bad gateway",
            Self::ServiceUnavailable => "service unavailable",
            Self::GatewayTimeout => "gateway timeout",
            Self::Unexpected(code) => return write!(f, "unexpected status {code}"),
        };
        f.write_str(text)
    }
}

/// Maps a status code to its [`StatusKind`]. Total over every `u16`.
pub fn classify(code: u16) -> StatusKind {
    match code {
        400 => StatusKind::BadRequest,
        401 => StatusKind::Unauthorized,
        403 => StatusKind::Forbidden,
        404 => StatusKind::NotFound,
        405 => StatusKind::MethodNotAllowed,
        408 => StatusKind::RequestTimeout,
        409 => StatusKind::Conflict,
        410 => StatusKind::Gone,
        429 => StatusKind::TooManyRequests,
        500 => StatusKind::InternalServerError,
        501 => StatusKind::NotImplemented,
        502 => StatusKind::BadGateway,
        503 => StatusKind::ServiceUnavailable,
        504 => StatusKind::GatewayTimeout,
        other => StatusKind::Unexpected(other),
    }
}

/// A status code together with its classified kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("HTTP {code}: {kind}")]
pub struct StatusError {
    pub code: u16,
    pub kind: StatusKind,
}

impl StatusError {
    pub fn from_code(code: u16) -> Self {
        Self {
            code,
            kind: classify(code),
        }
    }
}

// ── Fetch errors ──────────────────────────────────────────────────────────────

/// Errors returned by the fetch layer.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Method, URL, header or body could not form a request. Never retried.
    #[error("invalid request for {url}: {reason}")]
    InvalidRequest { url: String, reason: String },

    /// Network-level failure on the final attempt.
    #[error("transport failure fetching {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Non-success status with raise-for-status enabled. The body is already closed.
    #[error("{url} returned {source}")]
    Status {
        url: String,
        #[source]
        source: StatusError,
    },

    /// Every attempt came back with a retryable status.
    #[error("giving up on {url} after {attempts} attempts (last status {status})")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        status: u16,
    },

    /// Cancelled by the caller or by a per-request deadline.
    #[error("request to {url} was cancelled")]
    Cancelled { url: String },

    /// The pooled HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl FetchError {
    pub fn invalid_request(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            url: url.into(),
            source,
        }
    }

    pub fn status(url: impl Into<String>, code: u16) -> Self {
        Self::Status {
            url: url.into(),
            source: StatusError::from_code(code),
        }
    }

    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }

    /// Status code carried by the error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { source, .. } => Some(source.code),
            Self::RetriesExhausted { status, .. } => Some(*status),
            Self::Transport { source, .. } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
