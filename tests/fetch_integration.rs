//! End-to-end behaviour of `Fetcher` against mock HTTP servers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metafetch::fetch::{self, Config, FetchOption, Fetcher, RetryPolicy, Transport};
use metafetch::{random, FetchError, StatusKind};
use reqwest::{Client, Request, Response};
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(Duration::from_millis(10), Duration::from_millis(30), 3)
}

fn defaulted(config: Config) -> Fetcher {
    Fetcher::with_defaults(Some(config))
        .expect("failed to build fetcher")
        .with_retry_policy(fast_policy())
}

/// A transport with no TLS configuration surface.
#[derive(Debug)]
struct PlainTransport(Client);

#[async_trait]
impl Transport for PlainTransport {
    async fn send(&self, request: Request) -> reqwest::Result<Response> {
        self.0.execute(request).await
    }
}

// ── Options ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_caller_user_agent_beats_base_config() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ua"))
        .and(header("user-agent", "caller-agent"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = defaulted(Config {
        user_agent: Some("base-agent".into()),
        ..Config::default()
    });
    let url = format!("{}/ua", server.uri());
    let response = fetcher
        .get(&url, [FetchOption::user_agent("caller-agent")])
        .await;
    assert_ok!(response);
}

#[tokio::test]
async fn test_base_referer_and_headers_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .and(header("referer", "https://example.com/"))
        .and(header("accept-language", "ja-JP"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = defaulted(Config {
        referer: Some("https://example.com/".into()),
        ..Config::default()
    });
    let url = format!("  {}/page \n", server.uri());
    let response = fetcher
        .get(&url, [FetchOption::header("Accept-Language", "ja-JP")])
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_random_user_agent_is_stable_per_fetcher() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let fetcher = defaulted(Config::default());
    let url = format!("{}/stable", server.uri());
    for _ in 0..5 {
        fetcher.fetch(&url).await.unwrap();
    }

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 5);
    let agents: Vec<String> = requests
        .iter()
        .map(|r| r.headers.get("user-agent").unwrap().to_str().unwrap().to_string())
        .collect();
    assert!(agents.iter().all(|ua| ua == &agents[0]), "{agents:?}");
    assert!(random::USER_AGENTS.contains(&agents[0].as_str()));
    assert_eq!(fetcher.user_agent(), Some(agents[0].as_str()));
}

// ── Status handling ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_non_ok_status_raises_classified_error() {
    let server = MockServer::start().await;
    for code in [201u16, 204, 403, 404, 410] {
        Mock::given(method("GET"))
            .and(path(format!("/status/{code}")))
            .respond_with(ResponseTemplate::new(code))
            .mount(&server)
            .await;
    }

    let fetcher = defaulted(Config::default());
    for code in [201u16, 204, 403, 404, 410] {
        let url = format!("{}/status/{code}", server.uri());
        let err = assert_err!(fetcher.fetch(&url).await);
        assert_eq!(err.status_code(), Some(code), "{err}");
        assert!(matches!(err, FetchError::Status { .. }), "{err:?}");
    }

    let err = fetcher
        .fetch(&format!("{}/status/404", server.uri()))
        .await
        .unwrap_err();
    let FetchError::Status { source, .. } = err else {
        panic!("expected status error");
    };
    assert_eq!(source.kind, StatusKind::NotFound);
}

#[tokio::test]
async fn test_status_passes_through_without_raise() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("nothing here"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(Arc::new(Client::new()), Config::default());

    let response = fetcher
        .fetch(&format!("{}/missing", server.uri()))
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(response.text().await.unwrap(), "nothing here");

    let response = fetcher
        .fetch(&format!("{}/broken", server.uri()))
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
}

#[tokio::test]
async fn test_raise_for_status_option_disables_raising() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let fetcher = defaulted(Config::default());
    let response = fetcher
        .get(&server.uri(), [FetchOption::raise_for_status(false)])
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_post_sends_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .and(wiremock::matchers::body_string("q=abc"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = defaulted(Config::default());
    let url = format!("{}/search", server.uri());
    let response = fetcher
        .post(
            &url,
            "q=abc",
            [FetchOption::header("Content-Type", "application/x-www-form-urlencoded")],
        )
        .await;
    assert_ok!(response);
}

// ── Cookies ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_cookies_persist_within_one_fetcher_only() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).insert_header("set-cookie", "session=abc; Path=/"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/profile"))
        .and(header("cookie", "session=abc"))
        .respond_with(ResponseTemplate::new(200))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/profile"))
        .respond_with(ResponseTemplate::new(401))
        .with_priority(2)
        .mount(&server)
        .await;

    let config = Config {
        enable_cookies: true,
        ..Config::default()
    };
    let first = defaulted(config.clone());
    let second = defaulted(config);

    first.fetch(&format!("{}/login", server.uri())).await.unwrap();
    let profile = format!("{}/profile", server.uri());
    assert_ok!(first.fetch(&profile).await);

    let err = second.fetch(&profile).await.unwrap_err();
    assert_eq!(err.status_code(), Some(401));
}

#[tokio::test]
async fn test_cookies_disabled_by_default() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).insert_header("set-cookie", "session=abc; Path=/"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/echo"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let fetcher = defaulted(Config::default());
    fetcher.fetch(&format!("{}/login", server.uri())).await.unwrap();
    fetcher.fetch(&format!("{}/echo", server.uri())).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| r.headers.get("cookie").is_none()));
}

#[tokio::test]
async fn test_cookie_set_on_redirect_is_stored() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("set-cookie", "session=abc; Path=/")
                .insert_header("location", "/home"),
        )
        .expect(1)
        .mount(&server)
        .await;
    for page in ["/home", "/profile"] {
        Mock::given(method("GET"))
            .and(path(page))
            .and(header("cookie", "session=abc"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(page))
            .respond_with(ResponseTemplate::new(401))
            .with_priority(2)
            .mount(&server)
            .await;
    }

    let fetcher = defaulted(Config {
        enable_cookies: true,
        ..Config::default()
    });

    // The redirect target already sees the cookie from the 302.
    let response = fetcher.fetch(&format!("{}/login", server.uri())).await.unwrap();
    assert_eq!(response.url().path(), "/home");
    assert_eq!(response.text().await.unwrap(), "/home");

    let profile = fetcher.fetch(&format!("{}/profile", server.uri())).await;
    assert_ok!(profile);
}

// ── Redirects ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_see_other_after_post_is_fetched_with_get() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/submit"))
        .respond_with(ResponseTemplate::new(303).insert_header("location", "/result"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/result"))
        .respond_with(ResponseTemplate::new(200).set_body_string("done"))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = defaulted(Config::default());
    let response = fetcher
        .post(&format!("{}/submit", server.uri()), "q=1", [])
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "done");
}

#[tokio::test]
async fn test_redirect_loop_stops_at_hop_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/loop"))
        .expect(fetch::redirect::MAX_REDIRECTS as u64 + 1)
        .mount(&server)
        .await;

    let fetcher = defaulted(Config::default());
    let err = fetcher
        .fetch(&format!("{}/loop", server.uri()))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(302));
}

#[tokio::test]
async fn test_cross_origin_redirect_drops_authorization() {
    let origin = MockServer::start().await;
    let other = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&other)
        .await;
    Mock::given(method("GET"))
        .and(path("/start"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("location", format!("{}/landing", other.uri())),
        )
        .expect(1)
        .mount(&origin)
        .await;

    let fetcher = defaulted(Config::default());
    let response = fetcher
        .get(
            &format!("{}/start", origin.uri()),
            [FetchOption::header("Authorization", "Bearer secret")],
        )
        .await;
    assert_ok!(response);

    let landed = other.received_requests().await.unwrap();
    assert_eq!(landed.len(), 1);
    assert!(landed[0].headers.get("authorization").is_none());
}

// ── Transports ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_skip_verify_is_noop_without_tls_surface() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = Fetcher::with_defaults(Some(Config {
        skip_verify: true,
        transport: Some(Arc::new(PlainTransport(Client::new()))),
        ..Config::default()
    }));
    let fetcher = assert_ok!(fetcher);
    assert_ok!(fetcher.fetch(&server.uri()).await);
}

#[tokio::test]
async fn test_shared_fetcher_serves_module_functions() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/shared"))
        .respond_with(ResponseTemplate::new(200).set_body_string("shared"))
        .mount(&server)
        .await;

    let url = format!("{}/shared", server.uri());
    let response = fetch::get(&url, []).await.unwrap();
    assert_eq!(response.text().await.unwrap(), "shared");

    assert!(fetch::shared().config().raise_for_status);
    assert!(fetch::shared().user_agent().is_some());
    assert!(std::ptr::eq(fetch::shared(), fetch::shared()));
}
