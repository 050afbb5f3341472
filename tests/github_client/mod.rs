//! Behavioural tests for the GitHub client against a local server:
//! retries, 202 polling, rate-limit observation, breaker transitions.

use crate::common::{Response, TestServer, point_github_at};
use octostats::github::{
    BreakerState, CircuitBreaker, ClientError, GithubClient, LimitTier, Transport,
};
use secrecy::SecretString;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant, SystemTime};

fn client(transport: &Arc<Transport>) -> GithubClient {
    GithubClient::new(transport.clone(), "alice", SecretString::from("test-token")).unwrap()
}

fn epoch_in(secs: u64) -> String {
    (SystemTime::UNIX_EPOCH.elapsed().unwrap().as_secs() + secs).to_string()
}

#[tokio::test]
async fn rest_requests_carry_auth_and_user_agent() {
    let server = TestServer::spawn();
    let _guard = point_github_at(&server);
    server.handle("GET", "/user/repos", |_| Response::json(json!([{"id": 1}])));

    let transport = Arc::new(Transport::new().unwrap());
    let gh = client(&transport);
    let result = gh.rest("/user/repos", &[("per_page", "1".to_string())]).await.unwrap();
    assert_eq!(result[0]["id"], 1);

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].headers.get("authorization").map(String::as_str),
        Some("Bearer test-token")
    );
    assert_eq!(
        requests[0].headers.get("user-agent").map(String::as_str),
        Some("octostats")
    );
    assert_eq!(requests[0].query, "per_page=1");
}

#[tokio::test]
async fn graphql_queries_are_posted_and_errors_detected() {
    let server = TestServer::spawn();
    let _guard = point_github_at(&server);
    server.handle("POST", "/graphql", |req| {
        let body = req.json();
        let query = body["query"].as_str().unwrap_or("");
        if query.contains("viewer") {
            Response::json(json!({"data": {"viewer": {"login": "alice"}}}))
        } else {
            Response::json(json!({"errors": [{"message": "Field missing"}]}))
        }
    });

    let transport = Arc::new(Transport::new().unwrap());
    let gh = client(&transport);

    let ok = gh.graphql("{ viewer { login } }").await.unwrap();
    assert_eq!(ok["data"]["viewer"]["login"], "alice");

    let err = gh.graphql("{ nothing }").await.unwrap_err();
    assert!(matches!(err, ClientError::Graphql(ref msg) if msg.contains("Field missing")));
}

#[tokio::test]
async fn server_errors_are_retried_up_to_three_attempts() {
    let server = TestServer::spawn();
    let _guard = point_github_at(&server);
    let hits = Arc::new(AtomicU32::new(0));
    let handler_hits = hits.clone();
    server.handle("GET", "/repos/alice/site", move |_| {
        if handler_hits.fetch_add(1, Ordering::SeqCst) < 2 {
            Response::new(500).body(b"{\"message\": \"boom\"}")
        } else {
            Response::json(json!({"full_name": "alice/site"}))
        }
    });

    let transport = Arc::new(Transport::new().unwrap());
    let gh = client(&transport);
    let result = gh.rest("repos/alice/site", &[]).await.unwrap();
    assert_eq!(result["full_name"], "alice/site");
    assert_eq!(server.requests_to("/repos/alice/site"), 3);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = TestServer::spawn();
    let _guard = point_github_at(&server);
    server.handle("GET", "/repos/alice/missing", |_| {
        Response::new(404).body(b"{\"message\": \"Not Found\"}")
    });

    let transport = Arc::new(Transport::new().unwrap());
    let gh = client(&transport);
    let err = gh.rest("repos/alice/missing", &[]).await.unwrap_err();
    assert!(matches!(err, ClientError::Status { status: 404, .. }));
    assert_eq!(server.requests_to("/repos/alice/missing"), 1);
}

#[tokio::test]
async fn secondary_rate_limits_honour_retry_after() {
    let server = TestServer::spawn();
    let _guard = point_github_at(&server);
    let hits = Arc::new(AtomicU32::new(0));
    let handler_hits = hits.clone();
    server.handle("GET", "/rate/limited", move |_| {
        if handler_hits.fetch_add(1, Ordering::SeqCst) == 0 {
            Response::new(403)
                .header("Retry-After", "1")
                .body(b"{\"message\": \"You have exceeded a secondary rate limit\"}")
        } else {
            Response::json(json!({"ok": true}))
        }
    });

    let transport = Arc::new(Transport::new().unwrap());
    let gh = client(&transport);
    let started = Instant::now();
    let result = gh.rest("rate/limited", &[]).await.unwrap();
    assert_eq!(result["ok"], true);
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(server.requests_to("/rate/limited"), 2);
}

#[tokio::test]
async fn accepted_responses_are_polled_until_ready() {
    let server = TestServer::spawn();
    let _guard = point_github_at(&server);
    let hits = Arc::new(AtomicU32::new(0));
    let handler_hits = hits.clone();
    server.handle("GET", "/repos/alice/site/stats/contributors", move |_| {
        if handler_hits.fetch_add(1, Ordering::SeqCst) == 0 {
            Response::new(202)
        } else {
            Response::json(json!([{"total": 10}]))
        }
    });

    let transport = Arc::new(Transport::new().unwrap());
    let gh = client(&transport);
    let started = Instant::now();
    let result = gh
        .rest("repos/alice/site/stats/contributors", &[])
        .await
        .unwrap();
    assert_eq!(result[0]["total"], 10);
    // One 2 s pause between the 202 and the successful poll.
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(server.requests_to("/repos/alice/site/stats/contributors"), 2);
}

#[tokio::test]
async fn rate_limit_headers_feed_the_shared_snapshot() {
    let server = TestServer::spawn();
    let _guard = point_github_at(&server);
    server.handle("GET", "/user", move |_| {
        Response::json(json!({"login": "alice"}))
            .header("X-RateLimit-Remaining", "42")
            .header("X-RateLimit-Limit", "5000")
            .header("X-RateLimit-Reset", &epoch_in(3600))
    });

    let transport = Arc::new(Transport::new().unwrap());
    let gh = client(&transport);
    assert_eq!(transport.rate_limit.tier(), LimitTier::Unknown);

    gh.rest("user", &[]).await.unwrap();
    let snapshot = transport.rate_limit.snapshot().unwrap();
    assert_eq!(snapshot.remaining, 42);
    assert_eq!(snapshot.limit, 5000);
    assert_eq!(transport.rate_limit.tier(), LimitTier::Degraded);
}

#[tokio::test]
async fn critical_budget_delays_the_next_dispatch() {
    let server = TestServer::spawn();
    let _guard = point_github_at(&server);
    server.handle("GET", "/user", move |_| {
        Response::json(json!({"login": "alice"}))
            .header("X-RateLimit-Remaining", "3")
            .header("X-RateLimit-Limit", "5000")
            .header("X-RateLimit-Reset", &epoch_in(2))
    });

    let transport = Arc::new(Transport::new().unwrap());
    let gh = client(&transport);
    gh.rest("user", &[]).await.unwrap();
    assert_eq!(transport.rate_limit.tier(), LimitTier::Critical);

    // remaining=3 and reset two seconds out: the governor sleeps
    // roughly until the reset before dispatching.
    let started = Instant::now();
    gh.rest("user", &[]).await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn breaker_trips_then_fails_fast() {
    let server = TestServer::spawn();
    let _guard = point_github_at(&server);
    server.handle("GET", "/always/failing", |_| {
        Response::new(502).body(b"{\"message\": \"bad gateway\"}")
    });

    let transport = Arc::new(
        Transport::with_breaker(10, CircuitBreaker::new(2, Duration::from_secs(3600))).unwrap(),
    );
    let gh = client(&transport);

    // Attempt 1 and 2 both 502 -> breaker opens; attempt 3 fails fast.
    let err = gh.rest("always/failing", &[]).await.unwrap_err();
    assert!(matches!(err, ClientError::BreakerOpen));
    assert_eq!(server.requests_to("/always/failing"), 2);
    assert_eq!(transport.breaker.state(), BreakerState::Open);

    // Fail-fast without touching the network.
    let err = gh.rest("always/failing", &[]).await.unwrap_err();
    assert!(matches!(err, ClientError::BreakerOpen));
    assert_eq!(server.requests_to("/always/failing"), 2);
}

#[tokio::test]
async fn breaker_closes_after_a_successful_probe() {
    let server = TestServer::spawn();
    let _guard = point_github_at(&server);
    let hits = Arc::new(AtomicU32::new(0));
    let handler_hits = hits.clone();
    server.handle("GET", "/flaky", move |_| {
        if handler_hits.fetch_add(1, Ordering::SeqCst) == 0 {
            Response::new(500)
        } else {
            Response::json(json!({"ok": true}))
        }
    });

    let transport = Arc::new(
        Transport::with_breaker(10, CircuitBreaker::new(1, Duration::from_secs(2))).unwrap(),
    );
    let gh = client(&transport);

    // The first 500 trips the single-failure breaker; the retry finds
    // it still open (back-off is shorter than the reset window) and the
    // call fails fast.
    let err = gh.rest("flaky", &[]).await.unwrap_err();
    assert!(matches!(err, ClientError::BreakerOpen));

    tokio::time::sleep(Duration::from_millis(2100)).await;
    let probed = gh.rest("flaky", &[]).await.unwrap();
    assert_eq!(probed["ok"], true);
    assert_eq!(transport.breaker.state(), BreakerState::Closed);
}
