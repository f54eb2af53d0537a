//! Repository tests against a mock Firestore REST endpoint.

use std::time::Duration;

use serde_json::json;
use vigil_firestore::{
    AnalysisRepository, AuthSource, FirestoreClient, FirestoreConfig, FirestoreError, RetryConfig,
    ANALYST_COLLECTION, SPECIALIST_COLLECTION,
};
use vigil_models::{AnalysisRecord, AnalystResult, SessionId, TriggerReason};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DOCS_ROOT: &str = "/v1/projects/demo/databases/(default)/documents";

fn client(server: &MockServer) -> FirestoreClient {
    let mut config = FirestoreConfig::new("demo");
    config.emulator_host = Some(server.uri());
    config.timeout = Duration::from_secs(5);
    config.retry = RetryConfig {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(20),
        give_up_after: Duration::from_secs(2),
    };
    FirestoreClient::with_auth(config, AuthSource::Static("test-token".to_string())).unwrap()
}

fn analyst_record() -> AnalysisRecord {
    let mut result = AnalystResult::cached("ALERT: fight near bar", 7, TriggerReason::EscalationEligible);
    result.keywords.insert("alert".to_string());
    result.keywords.insert("fight".to_string());
    AnalysisRecord::Analyst {
        session_id: SessionId::from_string("session-1"),
        result,
    }
}

#[tokio::test]
async fn save_analyst_record_posts_to_collection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{}/{}", DOCS_ROOT, ANALYST_COLLECTION)))
        .and(header("authorization", "Bearer test-token"))
        .and(body_partial_json(json!({
            "fields": {
                "sessionId": { "stringValue": "session-1" },
                "frameNumber": { "integerValue": "7" }
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": format!("projects/demo/databases/(default)/documents/{}/abc123", ANALYST_COLLECTION),
            "fields": {}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let repo = AnalysisRepository::new(client(&server));
    let doc = repo.save(&analyst_record()).await.unwrap();
    assert_eq!(doc.id(), Some("abc123"));
}

#[tokio::test]
async fn save_retries_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "projects/demo/databases/(default)/documents/videoAnalysis/retried"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let repo = AnalysisRepository::new(client(&server));
    let doc = repo.save(&analyst_record()).await.unwrap();
    assert_eq!(doc.id(), Some("retried"));
}

#[tokio::test]
async fn save_does_not_retry_permission_denied() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403).set_body_string("PERMISSION_DENIED"))
        .expect(1)
        .mount(&server)
        .await;

    let repo = AnalysisRepository::new(client(&server));
    let err = repo.save(&analyst_record()).await.unwrap_err();
    assert!(matches!(err, FirestoreError::PermissionDenied(_)));
}

#[tokio::test]
async fn get_missing_document_returns_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{}/{}/nope", DOCS_ROOT, SPECIALIST_COLLECTION)))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let repo = AnalysisRepository::new(client(&server));
    assert!(repo.get(SPECIALIST_COLLECTION, "nope").await.unwrap().is_none());
}

#[tokio::test]
async fn expired_static_token_surfaces_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_string(r#"{"error":{"status":"UNAUTHENTICATED","message":"ACCESS_TOKEN_EXPIRED"}}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server)
        .get_document(ANALYST_COLLECTION, "doc")
        .await
        .unwrap_err();
    assert!(matches!(err, FirestoreError::AuthError(_)));
}
