mod common;

use common::{Reply, TestServer};
use scorecard_signing::{RetryingPublisher, SigningError};
use serde_json::json;
use std::time::Duration;

fn fast_publisher(url: &str) -> RetryingPublisher {
    RetryingPublisher::new(url)
        .unwrap()
        .with_backoff(vec![Duration::from_millis(10); 3])
}

#[tokio::test]
async fn test_created_on_first_attempt() {
    let server = TestServer::start(|_, _| Reply::text(201, "")).await;

    fast_publisher(&server.url())
        .publish("{}", "org/repo", "refs/heads/main", "ghs_token", 1, "{}")
        .await
        .unwrap();

    assert_eq!(server.request_count(), 1);
}

#[tokio::test]
async fn test_succeeds_after_two_failures() {
    let server = TestServer::start(|_, index| {
        if index < 2 {
            Reply::text(500, "try later")
        } else {
            Reply::text(201, "")
        }
    })
    .await;

    fast_publisher(&server.url())
        .publish("{}", "org/repo", "refs/heads/main", "ghs_token", 1, "{}")
        .await
        .unwrap();

    assert_eq!(server.request_count(), 3);
}

#[tokio::test]
async fn test_gives_up_after_schedule_is_exhausted() {
    let server = TestServer::start(|_, _| Reply::text(400, "repo not found")).await;

    let err = fast_publisher(&server.url())
        .publish("{}", "org/repo", "refs/heads/main", "ghs_token", 1, "{}")
        .await
        .unwrap_err();

    assert_eq!(server.request_count(), 4);
    match &err {
        SigningError::PublishRetriesExhausted { attempts, source } => {
            assert_eq!(*attempts, 4);
            assert!(source.to_string().contains("repo not found"));
            assert!(source.to_string().contains("400"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_ok_status_is_not_success() {
    let server = TestServer::start(|_, _| Reply::text(200, "ok")).await;

    let result = RetryingPublisher::new(&server.url())
        .unwrap()
        .with_backoff(Vec::new())
        .publish("{}", "org/repo", "refs/heads/main", "ghs_token", 1, "{}")
        .await;

    assert!(result.is_err());
    assert_eq!(server.request_count(), 1);
}

#[tokio::test]
async fn test_request_shape() {
    let server = TestServer::start(|_, _| Reply::text(201, "")).await;
    let bundle = json!({"mediaType": "application/vnd.dev.sigstore.bundle.v0.3+json"}).to_string();

    fast_publisher(&format!("{}/", server.url()))
        .publish(
            r#"{"score":5.2}"#,
            "org/repo",
            "refs/heads/main",
            "ghs_token",
            42,
            &bundle,
        )
        .await
        .unwrap();

    let requests = server.requests();
    let request = &requests[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/projects/github.com/org/repo");
    assert_eq!(request.header("content-type"), Some("application/json"));

    let body = request.json();
    assert_eq!(body["result"], r#"{"score":5.2}"#);
    assert_eq!(body["branch"], "refs/heads/main");
    assert_eq!(body["accessToken"], "ghs_token");
    assert_eq!(body["tlogIndex"], 42);
    assert_eq!(body["bundle"], bundle);
}

#[tokio::test]
async fn test_retries_resend_identical_body() {
    let server = TestServer::start(|_, index| {
        if index == 0 {
            Reply::text(503, "")
        } else {
            Reply::text(201, "")
        }
    })
    .await;

    fast_publisher(&server.url())
        .publish("{}", "org/repo", "refs/heads/main", "ghs_token", 7, "{}")
        .await
        .unwrap();

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].body, requests[1].body);
}

#[tokio::test]
async fn test_unreachable_endpoint_is_retried() {
    // Bind and drop to get a port nothing listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = RetryingPublisher::new(&format!("http://{}", addr))
        .unwrap()
        .with_backoff(vec![Duration::from_millis(5)])
        .publish("{}", "org/repo", "refs/heads/main", "ghs_token", 1, "{}")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SigningError::PublishRetriesExhausted { attempts: 2, .. }
    ));
}

#[tokio::test]
async fn test_unreadable_response_body_is_reported() {
    let server = TestServer::start(|_, _| Reply::truncated(500, "oops")).await;

    let err = RetryingPublisher::new(&server.url())
        .unwrap()
        .with_backoff(Vec::new())
        .publish("{}", "org/repo", "refs/heads/main", "ghs_token", 1, "{}")
        .await
        .unwrap_err();

    match err {
        SigningError::PublishRetriesExhausted { attempts, source } => {
            assert_eq!(attempts, 1);
            assert!(source.to_string().contains("reading response body"));
        }
        other => panic!("unexpected error: {other}"),
    }
}
