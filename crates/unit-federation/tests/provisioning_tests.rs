//! Provisioning tests against a mocked project API.
//!
//! Each test starts a wiremock server standing in for a project's
//! `/api/v1/users` endpoint and checks both what the mapper sent and how
//! many times it called.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use unit_federation::{
    FederationConfig, FederationError, HttpProvisioningClient, IdentityFederationMapper, MappingStore,
    MemoryMappingStore, MemoryProjectRegistry, ProvisioningClient,
};
use unit_org::{AuthMode, OutboundUser, Principal, Project};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Mock project plus a mapper wired to it.
struct TestFixture {
    server: MockServer,
    mappings: Arc<MemoryMappingStore>,
    mapper: IdentityFederationMapper,
}

impl TestFixture {
    async fn new() -> Self {
        Self::with_project(|p| p).await
    }

    async fn with_project(configure: impl FnOnce(Project) -> Project) -> Self {
        let server = MockServer::start().await;
        let projects = Arc::new(MemoryProjectRegistry::new());
        projects
            .upsert(configure(Project::new("notes", "Notes", server.uri())))
            .await;
        let mappings = Arc::new(MemoryMappingStore::new());
        let client = HttpProvisioningClient::new(&FederationConfig::default()).unwrap();
        let mapper = IdentityFederationMapper::new(projects, mappings.clone(), Arc::new(client));

        Self {
            server,
            mappings,
            mapper,
        }
    }
}

fn alice() -> Principal {
    Principal::new("u1", "user")
        .with_email("u1@example.com")
        .with_username("alice")
        .with_nickname("Alice")
}

#[tokio::test]
async fn test_ensure_mapping_calls_remote_once() {
    let fixture = TestFixture::new().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/users"))
        .and(body_json(json!({
            "user_id": "u1",
            "email": "u1@example.com",
            "username": "alice",
            "nickname": "Alice",
            "avatar": ""
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"user_id": "L-42"})))
        .expect(1)
        .mount(&fixture.server)
        .await;

    let first = fixture.mapper.ensure_mapping("notes", &alice()).await.unwrap();
    let second = fixture.mapper.ensure_mapping("notes", &alice()).await.unwrap();

    assert_eq!(first, "L-42");
    assert_eq!(second, "L-42");
    let stored = fixture.mappings.find("notes", "u1").await.unwrap().unwrap();
    assert_eq!(stored.local_user_id, "L-42");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_logins_create_one_remote_user() {
    let fixture = TestFixture::new().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/users"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"user_id": 7}))
                .set_delay(Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&fixture.server)
        .await;

    let mut handles = Vec::new();
    for _ in 0..6 {
        let mapper = fixture.mapper.clone();
        handles.push(tokio::spawn(async move { mapper.ensure_mapping("notes", &alice()).await }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), "7");
    }
    assert_eq!(fixture.mappings.len().await, 1);
}

#[tokio::test]
async fn test_api_key_project_sends_project_token() {
    let fixture = TestFixture::with_project(|p| p.with_auth(AuthMode::ApiKey, "proj-secret")).await;
    Mock::given(method("POST"))
        .and(path("/api/v1/users"))
        .and(header("X-Project-Token", "proj-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"user_id": "9"})))
        .expect(1)
        .mount(&fixture.server)
        .await;

    assert_eq!(fixture.mapper.ensure_mapping("notes", &alice()).await.unwrap(), "9");
}

#[tokio::test]
async fn test_bearer_project_sends_authorization() {
    let fixture = TestFixture::with_project(|p| p.with_auth(AuthMode::Bearer, "svc-token")).await;
    Mock::given(method("POST"))
        .and(path("/api/v1/users"))
        .and(header("Authorization", "Bearer svc-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"user_id": 12345678901u64})))
        .expect(1)
        .mount(&fixture.server)
        .await;

    assert_eq!(
        fixture.mapper.ensure_mapping("notes", &alice()).await.unwrap(),
        "12345678901"
    );
}

#[tokio::test]
async fn test_server_error_leaves_no_mapping() {
    let fixture = TestFixture::new().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/users"))
        .respond_with(ResponseTemplate::new(500).set_body_string("database unavailable"))
        .expect(1)
        .mount(&fixture.server)
        .await;

    let err = fixture.mapper.ensure_mapping("notes", &alice()).await.unwrap_err();
    match &err {
        FederationError::RemoteProvisioningFailed { project, reason } => {
            assert_eq!(project, "notes");
            assert!(reason.starts_with("HTTP 500"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(fixture.mappings.is_empty().await);
}

#[tokio::test]
async fn test_empty_user_id_is_a_failure() {
    let fixture = TestFixture::new().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"user_id": ""})))
        .expect(1)
        .mount(&fixture.server)
        .await;

    let result = fixture.mapper.ensure_mapping("notes", &alice()).await;
    assert!(matches!(result, Err(FederationError::RemoteProvisioningFailed { .. })));
    assert!(fixture.mappings.is_empty().await);
}

#[tokio::test]
async fn test_fractional_user_id_is_a_failure() {
    let fixture = TestFixture::new().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"user_id": 7.9})))
        .expect(1)
        .mount(&fixture.server)
        .await;

    let err = fixture.mapper.ensure_mapping("notes", &alice()).await.unwrap_err();
    match &err {
        FederationError::RemoteProvisioningFailed { reason, .. } => {
            assert_eq!(reason, "invalid local user id: 7.9");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(fixture.mappings.is_empty().await);
}

#[tokio::test]
async fn test_slow_project_times_out_without_retry() {
    let fixture = TestFixture::with_project(|p| p.with_timeout_ms(100)).await;
    Mock::given(method("POST"))
        .and(path("/api/v1/users"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"user_id": "late"}))
                .set_delay(Duration::from_secs(2)),
        )
        .expect(1)
        .mount(&fixture.server)
        .await;

    let err = fixture.mapper.ensure_mapping("notes", &alice()).await.unwrap_err();
    assert!(matches!(err, FederationError::RemoteProvisioningFailed { .. }));
    assert!(err.to_string().contains("timed out"));
    assert!(fixture.mappings.is_empty().await);
}

#[tokio::test]
async fn test_disabled_project_is_never_called() {
    let fixture = TestFixture::with_project(|p| p.disabled()).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"user_id": "1"})))
        .expect(0)
        .mount(&fixture.server)
        .await;

    let result = fixture.mapper.ensure_mapping("notes", &alice()).await;
    assert!(matches!(result, Err(FederationError::ProjectDisabledOrUnknown(_))));

    let result = fixture.mapper.ensure_mapping("ghost", &alice()).await;
    assert!(matches!(result, Err(FederationError::ProjectDisabledOrUnknown(_))));
}

#[tokio::test]
async fn test_update_user_puts_profile() {
    let server = MockServer::start().await;
    let project = Project::new("notes", "Notes", server.uri()).with_auth(AuthMode::ApiKey, "k");
    Mock::given(method("PUT"))
        .and(path("/api/v1/users/L-42"))
        .and(header("X-Project-Token", "k"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpProvisioningClient::new(&FederationConfig::default()).unwrap();
    client
        .update_user(&project, "L-42", &OutboundUser::from(&alice()))
        .await
        .unwrap();
}
