//! Resilient HTTP fetch layer for metadata scrapers.
//!
//! [`fetch::Fetcher`] wraps one pooled transport with shared defaults
//! (user agent, referer, cookies, timeout, TLS), per-request
//! [`fetch::FetchOption`]s, bounded retries and typed [`errors::FetchError`]s.

pub mod config;
pub mod errors;
pub mod fetch;
pub mod random;
pub mod utils;

pub use errors::{FetchError, StatusError, StatusKind};
pub use fetch::{Config, FetchOption, Fetcher, RetryPolicy};
