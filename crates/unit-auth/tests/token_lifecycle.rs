//! End-to-end token flows against the in-memory stores.

use std::sync::{Arc, OnceLock};

use unit_auth::{
    AuthConfig, AuthError, AuthorizeOutcome, AuthorizeRequest, ClientInfo, ClientRegistry, KeyRing,
    MemoryClientRegistry, MemoryRefreshTokenRepository, MemoryUserDirectory, OAuthClient, OAuthServer,
    RefreshTokenStore, RsaSigningKey, SessionRegistry, TokenIssuer, TokenRequest, TokenType, TokenValidator,
};
use unit_org::Principal;

const SECRET: &str = "integration-secret-key-with-at-least-32-chars";
const REDIRECT: &str = "https://notes.example.com/oauth/callback";
const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

fn keys() -> Arc<KeyRing> {
    static KEYS: OnceLock<Arc<KeyRing>> = OnceLock::new();
    KEYS.get_or_init(|| Arc::new(KeyRing::new(SECRET, RsaSigningKey::generate().unwrap()).unwrap()))
        .clone()
}

fn config() -> AuthConfig {
    AuthConfig::with_secret(SECRET)
}

fn issuer() -> TokenIssuer {
    TokenIssuer::new(keys(), config())
}

fn validator() -> TokenValidator {
    TokenValidator::new(keys(), &config())
}

fn refresh_store() -> RefreshTokenStore {
    RefreshTokenStore::new(Arc::new(MemoryRefreshTokenRepository::new()), issuer(), validator())
}

fn alice() -> Principal {
    Principal::new("u1", "user").with_email("u1@example.com")
}

#[test]
fn test_access_token_for_u1() {
    let token = issuer().issue_access("u1", "u1@example.com", "user").unwrap();
    let claims = validator().validate(&token).unwrap();

    assert_eq!(claims.sub, "u1");
    assert_eq!(claims.token_type, TokenType::Access);
    assert_eq!(claims.exp - claims.iat, 3600);
    assert!(!validator().is_expiring_soon(&token, Some(chrono::Duration::minutes(30))).unwrap());
}

#[tokio::test]
async fn test_internal_client_code_without_verifier() {
    let clients = Arc::new(MemoryClientRegistry::new());
    clients
        .register(OAuthClient::new("notes-web", "notes-secret", REDIRECT).with_double_verification())
        .await
        .unwrap();
    let directory = Arc::new(MemoryUserDirectory::new());
    directory.insert(alice(), "pw").await;

    let server = OAuthServer::new(issuer(), validator(), clients, SessionRegistry::in_memory(), directory);
    let outcome = server
        .authorize(
            &AuthorizeRequest {
                client_id: "notes-web".into(),
                redirect_uri: REDIRECT.into(),
                response_type: "code".into(),
                scope: Some("openid".into()),
                state: Some("s-123".into()),
                code_challenge: Some(CHALLENGE.into()),
                code_challenge_method: Some("S256".into()),
                app_id: Some("notes".into()),
            },
            Some(&alice()),
        )
        .await
        .unwrap();
    let AuthorizeOutcome::Redirect { code, .. } = outcome else {
        panic!("expected a redirect");
    };

    let mut request = TokenRequest {
        grant_type: "authorization_code".into(),
        client_id: "notes-web".into(),
        client_secret: "notes-secret".into(),
        code: Some(code),
        redirect_uri: Some(REDIRECT.into()),
        state: Some("s-123".into()),
        app_id: Some("notes".into()),
        ..Default::default()
    };
    let err = server.token(&request).await.unwrap_err();
    assert_eq!(err.to_string(), "invalid_grant: PKCE code_verifier required");
    assert_eq!(err.oauth_error(), "invalid_grant");

    request.code_verifier = Some(VERIFIER.into());
    let response = server.token(&request).await.unwrap();
    assert!(response.refresh_token.is_some());
    assert_eq!(server.userinfo(&response.access_token).await.unwrap().sub, "u1");
}

#[tokio::test]
async fn test_double_verification_flags_on_token_request() {
    let clients = Arc::new(MemoryClientRegistry::new());
    clients
        .register(OAuthClient::new("notes-web", "notes-secret", REDIRECT))
        .await
        .unwrap();
    let directory = Arc::new(MemoryUserDirectory::new());
    directory.insert(alice(), "pw").await;
    let server = OAuthServer::new(issuer(), validator(), clients, SessionRegistry::in_memory(), directory);

    let outcome = server
        .authorize(
            &AuthorizeRequest {
                client_id: "notes-web".into(),
                redirect_uri: REDIRECT.into(),
                response_type: "code".into(),
                scope: None,
                state: Some("s-9".into()),
                code_challenge: None,
                code_challenge_method: None,
                app_id: Some("notes".into()),
            },
            Some(&alice()),
        )
        .await
        .unwrap();
    let AuthorizeOutcome::Redirect { code, .. } = outcome else {
        panic!("expected a redirect");
    };

    let request: TokenRequest = serde_json::from_value(serde_json::json!({
        "grant_type": "authorization_code",
        "client_id": "notes-web",
        "client_secret": "notes-secret",
        "code": code,
        "redirect_uri": REDIRECT,
        "state": "s-9",
        "app_id": "notes",
        "internal_auth": true,
        "double_verification": true
    }))
    .unwrap();
    let err = server.token(&request).await.unwrap_err();
    assert_eq!(err.to_string(), "invalid_grant: PKCE code_verifier required");
    assert_eq!(err.oauth_error(), "invalid_grant");
}

#[tokio::test]
async fn test_revoke_all_then_rotate() {
    let store = refresh_store();
    let client = ClientInfo::new("203.0.113.7", "integration-test");
    let pair = store.login_with_token_pair(&alice(), &client).await.unwrap();

    assert_eq!(store.revoke_all("u1").await.unwrap(), 1);
    let result = store.consume_and_rotate("u1", &pair.refresh_token, &client).await;
    assert!(matches!(result, Err(AuthError::NoMatchingToken)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_rotation_has_one_winner() {
    let store = refresh_store();
    let client = ClientInfo::default();
    let pair = store.login_with_token_pair(&alice(), &client).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let raw = pair.refresh_token.clone();
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            store.consume_and_rotate("u1", &raw, &client).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(AuthError::NoMatchingToken) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(store.find_active_by_user("u1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_remember_me_extension() {
    let store = refresh_store();
    let token = issuer().issue_remember_me("u1", "u1@example.com", "user").unwrap();

    let extended = store.refresh_access_token(&token).await.unwrap();
    let claims = validator().validate(&extended).unwrap();
    assert_eq!(claims.token_type, TokenType::RememberMe);
    assert_eq!(claims.exp - claims.iat, 720 * 3600);

    let refresh = issuer().issue_refresh("u1", "u1@example.com", "user").unwrap();
    assert!(matches!(
        store.refresh_access_token(&refresh).await,
        Err(AuthError::WrongTokenType { .. })
    ));
}

#[tokio::test]
async fn test_jwks_verifies_oauth_tokens() {
    let jwks = keys().jwks();
    let kid = keys().active_kid().to_string();
    let jwk = jwks.find(&kid).expect("active key published");
    assert_eq!(jwk.alg, "RS256");
    assert!(jwk.n.is_some() && jwk.e.is_some());

    let header_kid = {
        let clients = Arc::new(MemoryClientRegistry::new());
        clients
            .register(OAuthClient::new("svc", "svc-secret", REDIRECT).with_grant_types(["client_credentials"]))
            .await
            .unwrap();
        let server = OAuthServer::new(
            issuer(),
            validator(),
            clients,
            SessionRegistry::in_memory(),
            Arc::new(MemoryUserDirectory::new()),
        );
        let response = server
            .token(&TokenRequest {
                grant_type: "client_credentials".into(),
                client_id: "svc".into(),
                client_secret: "svc-secret".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        jsonwebtoken::decode_header(&response.access_token).unwrap().kid
    };
    assert_eq!(header_kid.as_deref(), Some(kid.as_str()));
}
