mod common;

use common::{Reply, TestServer};
use scorecard_signing::services::{FulcioClient, RekorClient, TsaClient};
use scorecard_signing::{
    CertificateIssuer, ServiceOptions, SigningError, TimestampAuthority, TransparencyLog,
};
use serde_json::json;
use std::time::Duration;

fn options(url: &str) -> ServiceOptions {
    ServiceOptions::new(url)
        .with_retries(2)
        .with_retry_backoff(Duration::from_millis(5))
}

#[tokio::test]
async fn test_fulcio_request_and_detached_sct_response() {
    let server = TestServer::start(|_, _| {
        Reply::json(
            200,
            json!({
                "signedCertificateDetachedSct": {
                    "chain": {"certificates": ["-----BEGIN CERTIFICATE-----\nMAA=\n-----END CERTIFICATE-----\n"]},
                    "signedCertificateTimestamp": "e30="
                }
            }),
        )
    })
    .await;

    let client = FulcioClient::new(options(&server.url())).unwrap();
    let issued = client
        .issue("header.claims.sig", "-----BEGIN PUBLIC KEY-----\n", &[1, 2, 3])
        .await
        .unwrap();
    assert_eq!(issued.leaf(), [0x30u8, 0x00].as_slice());

    let request = &server.requests()[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/api/v2/signingCert");
    assert_eq!(request.header("authorization"), Some("Bearer header.claims.sig"));
    let body = request.json();
    assert_eq!(body["credentials"]["oidcIdentityToken"], "header.claims.sig");
    assert_eq!(body["publicKeyRequest"]["publicKey"]["algorithm"], "ECDSA");
    assert_eq!(body["publicKeyRequest"]["proofOfPossession"], "AQID");
}

#[tokio::test]
async fn test_fulcio_rejection_is_not_retried() {
    let server = TestServer::start(|_, _| Reply::text(401, "invalid identity token")).await;

    let client = FulcioClient::new(options(&server.url())).unwrap();
    let err = client.issue("a.b.c", "pem", &[1]).await.unwrap_err();

    match err {
        SigningError::CertificateIssuer(message) => {
            assert!(message.contains("invalid identity token"))
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(server.request_count(), 1);
}

#[tokio::test]
async fn test_fulcio_empty_response_fails() {
    let server = TestServer::start(|_, _| Reply::json(200, json!({}))).await;

    let client = FulcioClient::new(options(&server.url())).unwrap();
    assert!(matches!(
        client.issue("a.b.c", "pem", &[1]).await,
        Err(SigningError::CertificateIssuer(_))
    ));
}

#[tokio::test]
async fn test_tsa_granted_response_is_returned_verbatim() {
    let granted = vec![0x30, 0x07, 0x30, 0x03, 0x02, 0x01, 0x00, 0x30, 0x00];
    let reply = granted.clone();
    let server = TestServer::start(move |_, _| {
        Reply::bytes(200, "application/timestamp-reply", reply.clone())
    })
    .await;

    let client = TsaClient::new(options(&format!("{}/api/v1/timestamp", server.url()))).unwrap();
    let response = client.timestamp(b"signature").await.unwrap();

    assert_eq!(response, granted);
    let request = &server.requests()[0];
    assert_eq!(request.path, "/api/v1/timestamp");
    assert_eq!(
        request.header("content-type"),
        Some("application/timestamp-query")
    );
    // DER SEQUENCE
    assert_eq!(request.body[0], 0x30);
}

#[tokio::test]
async fn test_tsa_rejection_fails() {
    let server = TestServer::start(|_, _| {
        Reply::bytes(
            200,
            "application/timestamp-reply",
            vec![0x30, 0x05, 0x30, 0x03, 0x02, 0x01, 0x02],
        )
    })
    .await;

    let client = TsaClient::new(options(&server.url())).unwrap();
    assert!(matches!(
        client.timestamp(b"signature").await,
        Err(SigningError::TimestampAuthority(_))
    ));
}

#[tokio::test]
async fn test_rekor_retries_server_errors() {
    let server = TestServer::start(|_, index| {
        if index == 0 {
            return Reply::text(503, "busy");
        }
        Reply::json(
            201,
            json!({
                "24296fb24b8ad77a": {
                    "body": "e30=",
                    "integratedTime": 1700000000,
                    "logID": "0102",
                    "logIndex": 99,
                    "verification": {
                        "inclusionProof": {
                            "checkpoint": "checkpoint\n",
                            "hashes": ["ff"],
                            "logIndex": 98,
                            "rootHash": "aa",
                            "treeSize": 100
                        }
                    }
                }
            }),
        )
    })
    .await;

    let client = RekorClient::new(options(&server.url())).unwrap();
    let entry = client
        .submit(&[0x30, 0x44], &[0x30, 0x00], &[0u8; 32])
        .await
        .unwrap();

    assert_eq!(server.request_count(), 2);
    assert_eq!(entry.log_index, "99");
    assert_eq!(entry.log_id.key_id, "AQI=");
    assert!(entry.inclusion_promise.is_none());

    let body = server.requests()[1].json();
    assert_eq!(body["kind"], "hashedrekord");
    assert_eq!(body["spec"]["signature"]["content"], "MEQ=");
    assert_eq!(body["spec"]["data"]["hash"]["value"], "00".repeat(32));
}

#[tokio::test]
async fn test_rekor_gives_up_after_retries() {
    let server = TestServer::start(|_, _| Reply::text(503, "busy")).await;

    let client = RekorClient::new(options(&server.url())).unwrap();
    let err = client
        .submit(&[0x30], &[0x30, 0x00], &[0u8; 32])
        .await
        .unwrap_err();

    assert!(matches!(err, SigningError::TransparencyLog(_)));
    // First attempt plus two retries
    assert_eq!(server.request_count(), 3);
}

#[tokio::test]
async fn test_fulcio_non_json_body_names_the_issuer() {
    let server = TestServer::start(|_, _| Reply::text(200, "<html>")).await;

    let client = FulcioClient::new(options(&server.url())).unwrap();
    match client.issue("a.b.c", "pem", &[1]).await {
        Err(SigningError::CertificateIssuer(message)) => {
            assert!(message.contains("Failed to parse response"))
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_rekor_non_json_body_names_the_log() {
    let server = TestServer::start(|_, _| Reply::text(201, "created")).await;

    let client = RekorClient::new(options(&server.url())).unwrap();
    assert!(matches!(
        client.submit(&[0x30], &[0x30, 0x00], &[0u8; 32]).await,
        Err(SigningError::TransparencyLog(_))
    ));
}

#[tokio::test]
async fn test_tsa_truncated_body_names_the_authority() {
    let server = TestServer::start(|_, _| Reply::truncated(200, "0")).await;

    let client = TsaClient::new(options(&server.url())).unwrap();
    assert!(matches!(
        client.timestamp(b"signature").await,
        Err(SigningError::TimestampAuthority(_))
    ));
}

#[tokio::test]
async fn test_unreadable_error_body_is_reported() {
    let server = TestServer::start(|_, _| Reply::truncated(400, "bad")).await;

    let client = FulcioClient::new(options(&server.url())).unwrap();
    match client.issue("a.b.c", "pem", &[1]).await {
        Err(SigningError::CertificateIssuer(message)) => {
            assert!(message.contains("reading response body"));
            assert!(!message.contains("Unknown error"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}
