//! Redirect following, one hop at a time.
//!
//! The pooled transport does not follow redirects on its own, so the
//! `Fetcher` sees every hop and can keep its cookie store current.

use reqwest::header::{
    AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, LOCATION, PROXY_AUTHORIZATION,
};
use reqwest::{Method, Request, Response, StatusCode};

/// Hops followed before the last redirect response is handed back as is.
pub const MAX_REDIRECTS: usize = 10;

/// The request for the hop after `response`, or `None` when `response` is not
/// a redirect that can be followed.
///
/// 301, 302 and 303 switch to a bodiless GET (HEAD stays HEAD). 307 and 308
/// resend the same method and body. Credentials are dropped when the hop
/// leaves the origin.
pub(crate) fn follow(previous: Request, response: &Response) -> Option<Request> {
    let keep_body = match response.status() {
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER => false,
        StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT => true,
        _ => return None,
    };

    let location = response.headers().get(LOCATION)?.to_str().ok()?;
    let target = previous.url().join(location).ok()?;
    if !matches!(target.scheme(), "http" | "https") {
        return None;
    }
    let same_origin = target.origin() == previous.url().origin();

    let mut next = previous;
    *next.url_mut() = target;
    if !keep_body {
        if next.method() != Method::HEAD {
            *next.method_mut() = Method::GET;
        }
        *next.body_mut() = None;
        next.headers_mut().remove(CONTENT_TYPE);
        next.headers_mut().remove(CONTENT_LENGTH);
    }
    if !same_origin {
        for name in [AUTHORIZATION, PROXY_AUTHORIZATION, COOKIE] {
            next.headers_mut().remove(name);
        }
    }
    Some(next)
}
