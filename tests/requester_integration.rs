//! Integration tests for the rate-limited requester.
//!
//! These tests verify throughput bounding and 429 backoff behavior against
//! mock HTTP servers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use fanarchive::{RequestError, Requester, RequesterConfig};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Helper to create a mock server answering GET on `path_str` with a body.
async fn setup_mock_page(path_str: &str, body: &str) -> MockServer {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(path_str))
        .respond_with(ResponseTemplate::new(200).set_body_string(body.to_string()))
        .mount(&mock_server)
        .await;

    mock_server
}

fn fast_config() -> RequesterConfig {
    RequesterConfig {
        max_calls: 100,
        window: Duration::from_secs(1),
        ..RequesterConfig::default()
    }
}

#[tokio::test]
async fn test_fetch_returns_raw_response() {
    let mock_server = setup_mock_page("/tags/Fluff", "<html>tag page</html>").await;
    let requester = Requester::new(fast_config());

    let url = format!("{}/tags/Fluff", mock_server.uri());
    let response = requester
        .fetch("GET", &url, None)
        .await
        .expect("fetch should succeed");

    assert_eq!(response.status().as_u16(), 200);
    let body = response.text().await.expect("body should read");
    assert_eq!(body, "<html>tag page</html>");
    assert_eq!(requester.total_requests(), 1);
}

#[tokio::test]
async fn test_non_429_error_status_is_not_an_error() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tags/Missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let requester = Requester::new(fast_config());
    let url = format!("{}/tags/Missing", mock_server.uri());
    let response = requester
        .fetch("GET", &url, None)
        .await
        .expect("status errors are the caller's to interpret");

    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn test_throughput_never_exceeds_window_budget() {
    let mock_server = setup_mock_page("/tags/Fluff", "ok").await;

    let requester = Arc::new(Requester::new(RequesterConfig {
        max_calls: 3,
        window: Duration::from_secs(1),
        ..RequesterConfig::default()
    }));
    let url = format!("{}/tags/Fluff", mock_server.uri());

    let mut handles = Vec::new();
    for _ in 0..10 {
        let requester = Arc::clone(&requester);
        let url = url.clone();
        handles.push(tokio::spawn(async move {
            requester
                .fetch("GET", &url, None)
                .await
                .expect("fetch should succeed");
            // The mock responds instantly, so completion time approximates
            // the dispatch time the window admitted.
            Instant::now()
        }));
    }

    let mut timestamps = Vec::new();
    for handle in handles {
        timestamps.push(handle.await.expect("task should not panic"));
    }
    timestamps.sort();

    // No trailing window slice may hold more than the budget. The slice is
    // measured slightly under the configured window to absorb scheduling
    // skew between "recorded" and "dispatched" instants.
    let slice = Duration::from_millis(950);
    for (i, &t) in timestamps.iter().enumerate() {
        let in_window = timestamps[..=i]
            .iter()
            .filter(|&&earlier| t.duration_since(earlier) < slice)
            .count();
        assert!(
            in_window <= 3,
            "observed {in_window} dispatches inside one window slice"
        );
    }

    assert_eq!(requester.total_requests(), 10);
}

#[tokio::test]
async fn test_429_backoff_retries_until_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/tags/Fluff"))
        .respond_with(
            ResponseTemplate::new(429).insert_header("Retry-After", "1"),
        )
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tags/Fluff"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&mock_server)
        .await;

    let requester = Requester::new(fast_config());
    let url = format!("{}/tags/Fluff", mock_server.uri());

    let start = Instant::now();
    let response = requester
        .fetch("GET", &url, None)
        .await
        .expect("backoff should absorb the 429");

    assert_eq!(response.status().as_u16(), 200);
    assert!(
        start.elapsed() >= Duration::from_millis(900),
        "should have slept for the Retry-After hint, elapsed {:?}",
        start.elapsed()
    );
    // One logical fetch, even though the transport saw two dispatches.
    assert_eq!(requester.total_requests(), 1);
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_429_pauses_all_other_callers() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/tags/Throttled"))
        .respond_with(
            ResponseTemplate::new(429).insert_header("Retry-After", "1"),
        )
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&mock_server)
        .await;

    let requester = Arc::new(Requester::new(fast_config()));
    let throttled_url = format!("{}/tags/Throttled", mock_server.uri());
    let other_url = format!("{}/tags/Other", mock_server.uri());

    let backoff_started = Instant::now();
    let first = {
        let requester = Arc::clone(&requester);
        tokio::spawn(async move { requester.fetch("GET", &throttled_url, None).await })
    };

    // Give the first caller time to receive the 429 and take the gate.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let second_elapsed = {
        let requester = Arc::clone(&requester);
        let start = Instant::now();
        requester
            .fetch("GET", &other_url, None)
            .await
            .expect("second caller should succeed after the pause");
        start.elapsed()
    };

    let first_response = first
        .await
        .expect("task should not panic")
        .expect("first caller should succeed after backoff");
    assert_eq!(first_response.status().as_u16(), 200);

    // The second caller dispatched nothing while the backoff gate was held:
    // its ~instant request took until the end of the first caller's sleep.
    assert!(
        second_elapsed >= Duration::from_millis(600),
        "second caller was not paused by the global backoff: {second_elapsed:?}"
    );
    assert!(
        backoff_started.elapsed() >= Duration::from_millis(1000),
        "backoff ended too early"
    );
}

#[tokio::test]
async fn test_429_with_backoff_disabled_surfaces_error() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tags/Fluff"))
        .respond_with(
            ResponseTemplate::new(429).insert_header("Retry-After", "7"),
        )
        .mount(&mock_server)
        .await;

    let requester = Requester::new(RequesterConfig {
        backoff: false,
        ..fast_config()
    });
    let url = format!("{}/tags/Fluff", mock_server.uri());

    match requester.fetch("GET", &url, None).await {
        Err(RequestError::RateLimited { retry_after, .. }) => {
            assert_eq!(retry_after, Some(Duration::from_secs(7)));
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[tokio::test]
async fn test_default_client_sends_identifying_user_agent() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tags/Fluff"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let requester = Requester::new(fast_config());
    let url = format!("{}/tags/Fluff", mock_server.uri());
    requester
        .fetch("GET", &url, None)
        .await
        .expect("fetch should succeed");

    let requests = mock_server.received_requests().await.unwrap();
    let ua = requests[0]
        .headers
        .get("user-agent")
        .expect("UA header present")
        .to_str()
        .expect("UA is ascii");
    assert!(
        ua.starts_with("fanarchive/"),
        "default client must identify itself, got {ua}"
    );
}

#[tokio::test]
async fn test_caller_supplied_session_is_used() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tags/Fluff"))
        .and(header("x-archive-session", "logged-in"))
        .respond_with(ResponseTemplate::new(200).set_body_string("authed"))
        .mount(&mock_server)
        .await;

    let mut session_headers = reqwest::header::HeaderMap::new();
    session_headers.insert(
        "x-archive-session",
        reqwest::header::HeaderValue::from_static("logged-in"),
    );
    let session = reqwest::Client::builder()
        .default_headers(session_headers)
        .build()
        .expect("session client builds");

    let requester = Requester::new(fast_config());
    let url = format!("{}/tags/Fluff", mock_server.uri());
    let response = requester
        .fetch("GET", &url, Some(&session))
        .await
        .expect("fetch through session should succeed");

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await.expect("body reads"), "authed");
}
