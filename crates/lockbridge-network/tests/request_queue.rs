//! Integration tests for the serialized request queue.
//!
//! Every test runs against the scripted `MockTransport`, authenticated with
//! token pair `a1`/`r1`. Timing tests use tokio's paused clock, so recorded
//! call instants advance only by the backoff sleeps.

use futures::future::join_all;
use lockbridge_core::Error;
use lockbridge_core::constants::{PATH_LOCK_BATTERY, PATH_LOCK_LOCK, PATH_OAUTH_TOKEN};
use lockbridge_network::mock::{MockReply, MockTransport};
use lockbridge_network::{HttpMethod, RequestQueue, RetryExecutor, SessionClient};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn token_reply(access: &str, refresh: &str) -> MockReply {
    MockReply::ok(json!({"access_token": access, "refresh_token": refresh}))
}

async fn setup() -> (MockTransport, Arc<SessionClient>, RequestQueue) {
    let mock = MockTransport::new();
    mock.push(PATH_OAUTH_TOKEN, token_reply("a1", "r1"));
    let session = Arc::new(SessionClient::new(mock.clone(), "cid", "secret"));
    session.authenticate("u", "p").await.unwrap();
    let queue = RequestQueue::start(RetryExecutor::new(Arc::clone(&session), mock.clone()));
    (mock, session, queue)
}

fn battery_params() -> Vec<(String, String)> {
    vec![("lockId".to_string(), "1".to_string())]
}

#[tokio::test]
async fn test_authenticated_call_carries_credentials() {
    let (mock, _session, queue) = setup().await;
    mock.push(PATH_LOCK_BATTERY, MockReply::ok(json!({"electricQuantity": 80})));

    let body = queue
        .enqueue(PATH_LOCK_BATTERY, HttpMethod::Get, battery_params())
        .await
        .unwrap();
    assert_eq!(body["electricQuantity"], 80);

    // No re-authentication happened.
    assert_eq!(mock.call_count(PATH_OAUTH_TOKEN), 1);

    let call = &mock.calls_to(PATH_LOCK_BATTERY)[0].request;
    assert_eq!(call.get("clientId"), Some("cid"));
    assert_eq!(call.get("accessToken"), Some("a1"));
    assert_eq!(call.get("lockId"), Some("1"));
    assert_eq!(call.bearer.as_deref(), Some("a1"));
    let date: i64 = call.get("date").unwrap().parse().unwrap();
    assert!(date > 1_600_000_000_000, "date is a millisecond timestamp");
}

#[tokio::test]
async fn test_unauthorized_refreshes_once_for_concurrent_callers() {
    let (mock, session, queue) = setup().await;
    mock.on(PATH_OAUTH_TOKEN, |_| token_reply("a2", "r2"));
    mock.on(PATH_LOCK_BATTERY, |request| {
        if request.get("accessToken") == Some("a1") {
            MockReply::unauthorized()
        } else {
            MockReply::ok(json!({"electricQuantity": 50}))
        }
    });

    let calls = (0..5).map(|_| queue.enqueue(PATH_LOCK_BATTERY, HttpMethod::Get, battery_params()));
    let results = join_all(calls).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(session.refresh_count(), 1);
    assert_eq!(mock.call_count(PATH_OAUTH_TOKEN), 2);
    assert_eq!(session.access_token().as_deref(), Some("a2"));
    // One rejected attempt plus five successful ones.
    assert_eq!(mock.call_count(PATH_LOCK_BATTERY), 6);
}

#[tokio::test]
async fn test_second_unauthorized_after_refresh_is_token_expired() {
    let (mock, session, queue) = setup().await;
    mock.on(PATH_OAUTH_TOKEN, |_| token_reply("a2", "r2"));
    mock.on(PATH_LOCK_BATTERY, |_| MockReply::unauthorized());

    let result = queue
        .enqueue(PATH_LOCK_BATTERY, HttpMethod::Get, battery_params())
        .await;

    assert!(matches!(result, Err(Error::TokenExpired)));
    assert_eq!(session.refresh_count(), 1);
    assert_eq!(mock.call_count(PATH_LOCK_BATTERY), 2);
}

#[tokio::test]
async fn test_failed_refresh_surfaces_authentication_error() {
    let (mock, _session, queue) = setup().await;
    mock.on(PATH_OAUTH_TOKEN, |_| MockReply::error(10003, "invalid refresh token"));
    mock.on(PATH_LOCK_BATTERY, |_| MockReply::unauthorized());

    let result = queue
        .enqueue(PATH_LOCK_BATTERY, HttpMethod::Get, battery_params())
        .await;
    assert!(matches!(result, Err(Error::Authentication(_))));

    // Session is gone; later calls fail fast without touching the network.
    let result = queue
        .enqueue(PATH_LOCK_BATTERY, HttpMethod::Get, battery_params())
        .await;
    assert!(matches!(result, Err(Error::Authentication(_))));
    assert_eq!(mock.call_count(PATH_LOCK_BATTERY), 1);
}

#[tokio::test(start_paused = true)]
async fn test_busy_backoff_delays() {
    let (mock, _session, queue) = setup().await;
    for _ in 0..3 {
        mock.push(PATH_LOCK_LOCK, MockReply::busy());
    }
    mock.push(PATH_LOCK_LOCK, MockReply::success());

    queue
        .enqueue(PATH_LOCK_LOCK, HttpMethod::Post, battery_params())
        .await
        .unwrap();

    let instants: Vec<_> = mock.calls_to(PATH_LOCK_LOCK).iter().map(|c| c.at).collect();
    assert_eq!(instants.len(), 4);
    let gaps: Vec<Duration> = instants.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(
        gaps,
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_busy_retries_exhausted() {
    let (mock, _session, queue) = setup().await;
    mock.on(PATH_LOCK_LOCK, |_| MockReply::error(1, "Please try again"));

    let result = queue
        .enqueue(PATH_LOCK_LOCK, HttpMethod::Post, battery_params())
        .await;

    match result {
        Err(Error::TransientService { endpoint, attempts }) => {
            assert_eq!(endpoint, PATH_LOCK_LOCK);
            assert_eq!(attempts, 4);
        }
        other => panic!("expected TransientService, got {other:?}"),
    }
    assert_eq!(mock.call_count(PATH_LOCK_LOCK), 4);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_does_not_reset_retry_budget() {
    let (mock, session, queue) = setup().await;
    mock.on(PATH_OAUTH_TOKEN, |_| token_reply("a2", "r2"));
    mock.push(PATH_LOCK_LOCK, MockReply::busy());
    mock.push(PATH_LOCK_LOCK, MockReply::unauthorized());
    mock.on(PATH_LOCK_LOCK, |_| MockReply::busy());

    let result = queue
        .enqueue(PATH_LOCK_LOCK, HttpMethod::Post, battery_params())
        .await;

    assert!(matches!(
        result,
        Err(Error::TransientService { attempts: 4, .. })
    ));
    assert_eq!(session.refresh_count(), 1);
    // Four busy attempts plus the one unauthorized attempt.
    assert_eq!(mock.call_count(PATH_LOCK_LOCK), 5);
}

#[tokio::test]
async fn test_application_error_not_retried() {
    let (mock, _session, queue) = setup().await;
    mock.push(PATH_LOCK_LOCK, MockReply::error(-2012, "lock is not connected to gateway"));

    let result = queue
        .enqueue(PATH_LOCK_LOCK, HttpMethod::Post, battery_params())
        .await;

    match result {
        Err(Error::RequestFailed { errcode, body, .. }) => {
            assert_eq!(errcode, Some(-2012));
            assert!(body.contains("not connected"));
        }
        other => panic!("expected RequestFailed, got {other:?}"),
    }
    assert_eq!(mock.call_count(PATH_LOCK_LOCK), 1);
}

#[tokio::test]
async fn test_transport_error_fails_immediately() {
    let (mock, _session, queue) = setup().await;
    mock.push(PATH_LOCK_LOCK, MockReply::transport_error("connection refused"));

    let result = queue
        .enqueue(PATH_LOCK_LOCK, HttpMethod::Post, battery_params())
        .await;
    assert!(matches!(result, Err(Error::Transport(_))));
    assert_eq!(mock.call_count(PATH_LOCK_LOCK), 1);
}

#[tokio::test]
async fn test_queue_keeps_draining_after_failure() {
    let (mock, _session, queue) = setup().await;
    mock.push(PATH_LOCK_LOCK, MockReply::raw(502, "<html>bad gateway</html>"));
    mock.push(PATH_LOCK_LOCK, MockReply::success());

    let first = queue.enqueue(PATH_LOCK_LOCK, HttpMethod::Post, battery_params());
    let second = queue.enqueue(PATH_LOCK_LOCK, HttpMethod::Post, battery_params());
    let (first, second) = tokio::join!(first, second);

    assert!(matches!(first, Err(Error::RequestFailed { status: 502, .. })));
    assert!(second.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_at_most_one_call_in_flight() {
    let (mock, _session, queue) = setup().await;
    mock.on(PATH_LOCK_BATTERY, |_| {
        MockReply::ok(json!({"electricQuantity": 60})).with_delay(Duration::from_millis(200))
    });
    mock.on(PATH_LOCK_LOCK, |_| MockReply::success().with_delay(Duration::from_millis(150)));

    let mut tasks = Vec::new();
    for i in 0..10 {
        let queue = queue.clone();
        let endpoint = if i % 2 == 0 { PATH_LOCK_BATTERY } else { PATH_LOCK_LOCK };
        tasks.push(tokio::spawn(async move {
            queue
                .enqueue(endpoint, HttpMethod::Get, battery_params())
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(mock.max_in_flight(), 1);
    assert_eq!(mock.calls().len(), 11);
}
