//! HTTP contract tests for the Resend provider against a local mock server.

use domain_mailer::config::keys;
use domain_mailer::{
    Attachment, EmailMessage, EmailProvider, ErrorCode, ProviderConfig, ProviderKind,
    ResendProvider, Sender,
};
use serde_json::json;
use std::collections::BTreeMap;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> ProviderConfig {
    let credentials = BTreeMap::from([(keys::API_KEY.to_string(), "re_test_key".to_string())]);
    let settings = BTreeMap::from([(keys::API_URL.to_string(), server.uri())]);
    ProviderConfig::new(ProviderKind::Resend, credentials, settings, false).unwrap()
}

fn provider(server: &MockServer) -> ResendProvider {
    let mut provider = ResendProvider::new();
    provider.initialize(&config(server)).unwrap();
    provider
}

fn message(to: &str) -> EmailMessage {
    EmailMessage::new(
        Sender::named("bookings@spa.example", "Acme Spa"),
        to,
        "Booking confirmed",
        "<p>See you soon</p>",
    )
}

#[tokio::test]
async fn test_send_posts_structured_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/emails"))
        .and(header("authorization", "Bearer re_test_key"))
        .and(body_partial_json(json!({
            "from": "Acme Spa <bookings@spa.example>",
            "to": ["guest@example.org"],
            "subject": "Booking confirmed",
            "attachments": [{ "filename": "invoice.pdf", "content": "JVBERg==" }],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "em_123" })))
        .expect(1)
        .mount(&server)
        .await;

    let msg = message("guest@example.org")
        .with_attachment(Attachment::new("invoice.pdf", b"%PDF".to_vec()));
    let result = provider(&server).send_email(&msg).await;

    assert!(result.success);
    assert_eq!(result.provider, "Resend");
    assert_eq!(result.message_id.as_deref(), Some("em_123"));
}

#[tokio::test]
async fn test_invalid_sender_is_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/emails"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "statusCode": 422,
            "name": "invalid_from_address",
            "message": "Invalid `from` field.",
        })))
        .mount(&server)
        .await;

    let result = provider(&server).send_email(&message("guest@example.org")).await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert_eq!(error.code, ErrorCode::InvalidSender);
    assert_eq!(error.status_code, Some(422));
    assert!(!error.is_retryable());
}

#[tokio::test]
async fn test_server_error_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/emails"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let result = provider(&server).send_email(&message("guest@example.org")).await;

    let error = result.error.unwrap();
    assert_eq!(error.code, ErrorCode::ServiceUnavailable);
    assert_eq!(error.message, "upstream unavailable");
    assert!(error.is_retryable());
}

#[tokio::test]
async fn test_bulk_uses_batch_endpoint_and_keeps_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/emails/batch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "id": "em_1" }, { "id": "em_2" }],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let results = provider(&server)
        .send_bulk_emails(&[message("one@example.org"), message("two@example.org")])
        .await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].message_id.as_deref(), Some("em_1"));
    assert_eq!(results[1].message_id.as_deref(), Some("em_2"));
}

#[tokio::test]
async fn test_bulk_failure_marks_whole_batch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/emails/batch"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "name": "rate_limit_exceeded",
            "message": "Too many requests",
        })))
        .mount(&server)
        .await;

    let results = provider(&server)
        .send_bulk_emails(&[message("one@example.org"), message("two@example.org")])
        .await;

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.error_code() == Some(ErrorCode::RateLimited)));
}

#[tokio::test]
async fn test_bulk_with_attachments_sends_one_by_one() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/emails"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "em_x" })))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/emails/batch"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let with_attachment = message("two@example.org")
        .with_attachment(Attachment::new("a.txt", b"hi".to_vec()));
    let results = provider(&server)
        .send_bulk_emails(&[message("one@example.org"), with_attachment])
        .await;

    assert!(results.iter().all(|r| r.success));
}

#[tokio::test]
async fn test_health_check_lists_domains() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/domains"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .mount(&server)
        .await;

    let health = provider(&server).health_check().await;

    assert!(health.healthy);
    assert!(health.latency_ms.is_some());
}

#[tokio::test]
async fn test_health_check_accepts_sending_only_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/domains"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "name": "restricted_api_key",
            "message": "This API key is restricted to only send emails",
        })))
        .mount(&server)
        .await;

    assert!(provider(&server).health_check().await.healthy);
}

#[tokio::test]
async fn test_health_check_rejects_bad_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/domains"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "name": "invalid_api_key",
            "message": "API key is invalid",
        })))
        .mount(&server)
        .await;

    let health = provider(&server).health_check().await;

    assert!(!health.healthy);
    assert!(health.error.unwrap().contains("UNAUTHORIZED"));
}
