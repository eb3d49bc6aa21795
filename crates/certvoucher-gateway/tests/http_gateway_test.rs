// Integration tests for the HTTP issuer client and webhook notifier using wiremock.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use certvoucher_gateway::{
    CompletionNotice, CompletionNotifier, CompletionOutcome, GatewayError, HttpIssuerClient,
    IssuerClient, IssuerConfig, NotifierConfig, WebhookNotifier,
};
use certvoucher_types::{QueryStatus, RequestId, VoucherId};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup(config: impl FnOnce(&mut IssuerConfig)) -> (MockServer, HttpIssuerClient) {
    let server = MockServer::start().await;
    let mut cfg = IssuerConfig {
        base_url: server.uri(),
        ..IssuerConfig::default()
    };
    config(&mut cfg);
    let client = HttpIssuerClient::new(cfg).unwrap();
    (server, client)
}

// ── Issuer ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_plain_object_situation() {
    let (server, client) = setup(|_| {}).await;

    Mock::given(method("GET"))
        .and(path("/vouchers/ABC123/situation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuedAt": "2025-01-10",
            "ownerName": "Fulano de Tal",
            "ownerDocument": "123.456.789-00",
            "queryStatus": "success",
        })))
        .mount(&server)
        .await;

    let s = client.query_situation("ABC123").await.unwrap();
    assert_eq!(s.owner_document.as_deref(), Some("12345678900"));
    assert_eq!(s.owner_name.as_deref(), Some("FULANO DE TAL"));
    assert_eq!(
        s.issued_at,
        Some(Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap())
    );
    assert_eq!(s.query_status, QueryStatus::Success);
}

#[tokio::test]
async fn test_double_encoded_body() {
    let (server, client) = setup(|_| {}).await;

    let inner = json!({"dataEmissao": "10/01/2025", "cpfCnpj": "22222222222"}).to_string();
    Mock::given(method("GET"))
        .and(path("/vouchers/XYZ789/situation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": inner})))
        .mount(&server)
        .await;

    let s = client.query_situation("XYZ789").await.unwrap();
    assert_eq!(s.owner_document.as_deref(), Some("22222222222"));
    assert!(s.issued_at.is_some());
}

#[tokio::test]
async fn test_query_parameter_endpoint_and_bearer() {
    let (server, client) = setup(|cfg| {
        cfg.situation_path = "/api/consulta".into();
        cfg.token = Some("t0ken".into());
    })
    .await;

    Mock::given(method("GET"))
        .and(path("/api/consulta"))
        .and(query_param("code", "ABC123"))
        .and(header("authorization", "Bearer t0ken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .mount(&server)
        .await;

    let s = client.query_situation("ABC123").await.unwrap();
    assert!(s.query_status.is_success());
    assert!(!s.shows_usage());
}

#[tokio::test]
async fn test_non_2xx_is_status_error() {
    let (server, client) = setup(|_| {}).await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = client.query_situation("ABC123").await.unwrap_err();
    assert!(matches!(err, GatewayError::Status { status: 503, .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_non_json_body_is_malformed() {
    let (server, client) = setup(|_| {}).await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = client.query_situation("ABC123").await.unwrap_err();
    assert!(matches!(err, GatewayError::MalformedPayload { .. }));
}

#[tokio::test]
async fn test_slow_issuer_times_out() {
    let (server, client) = setup(|cfg| cfg.timeout_secs = 1).await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let err = client.query_situation("ABC123").await.unwrap_err();
    assert!(matches!(err, GatewayError::Timeout { timeout_secs: 1 }));
}

// ── Notifier ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_webhook_posts_notice() {
    let server = MockServer::start().await;
    let request = RequestId::new();

    Mock::given(method("POST"))
        .and(path("/hooks/requests"))
        .and(body_partial_json(json!({
            "outcome": "ISSUED",
            "progress": "CERTIFICATE_ISSUED",
            "voucher_code": "ABC123",
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/hooks/requests", server.uri()).parse().unwrap();
    let notifier = WebhookNotifier::new(url, &NotifierConfig::default()).unwrap();
    let notice = CompletionNotice::new(
        request,
        VoucherId::new(),
        "ABC123",
        Utc::now(),
        CompletionOutcome::Issued,
    );
    notifier.notify(&notice).await.unwrap();
}

#[tokio::test]
async fn test_webhook_failure_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let url = server.uri().parse().unwrap();
    let notifier = WebhookNotifier::new(url, &NotifierConfig::default()).unwrap();
    let notice = CompletionNotice::new(
        RequestId::new(),
        VoucherId::new(),
        "ABC123",
        Utc::now(),
        CompletionOutcome::OwnershipConflict,
    );
    let err = notifier.notify(&notice).await.unwrap_err();
    assert!(matches!(err, GatewayError::Status { status: 500, .. }));
}
