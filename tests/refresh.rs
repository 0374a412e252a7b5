mod common;

use std::time::Duration;

use common::*;
use iserv_sso::{Algorithm, Error, SsoClient, SsoConfig};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockBuilder, ResponseTemplate};

fn refresh_grant() -> MockBuilder {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt-1"))
}

#[tokio::test]
async fn refresh_replaces_tokens_and_claims() {
    let issuer = MockIssuer::start().await;
    let client = issuer.client().await;
    let mut user = issuer.login(&client, "user-42", &["ROLE_STUDENT"]).await;
    let before = user.access_token_expire_date().unwrap();

    let mut claims = id_claims(&issuer.issuer(), "user-42", "jane.smith", &["ROLE_TEACHER"]);
    claims["email"] = "jane.smith@school.iserv.example".into();
    let id_token = issuer.id_token_with(claims);
    refresh_grant()
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_response(&id_token, "at-2", Some("rt-2"), 7200)),
        )
        .expect(1)
        .mount(&issuer.server)
        .await;

    user.refresh_access_token().await.unwrap();

    assert_eq!(user.access_token(), "at-2");
    assert_eq!(user.refresh_token(), Some("rt-2"));
    assert_eq!(user.username(), "jane.smith");
    assert_eq!(user.email(), "jane.smith@school.iserv.example");
    assert_eq!(user.roles(), ["ROLE_TEACHER"]);
    assert!(user.access_token_expire_date().unwrap() > before);
    assert!(user.access_token_expire_countdown().unwrap() > 6_000_000);
}

#[tokio::test]
async fn rejected_refresh_leaves_user_unchanged() {
    let issuer = MockIssuer::start().await;
    let client = issuer.client().await;
    let mut user = issuer.login(&client, "user-42", &["ROLE_STUDENT"]).await;
    let expire_date = user.access_token_expire_date();

    refresh_grant()
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "refresh token revoked"
        })))
        .mount(&issuer.server)
        .await;

    let err = user.refresh_access_token().await.unwrap_err();

    match &err {
        Error::Refresh { status, detail } => {
            assert_eq!(*status, Some(400));
            assert!(detail.contains("revoked"), "detail: {detail}");
        }
        other => panic!("expected Refresh, got {other:?}"),
    }
    assert!(err.requires_login());
    assert_eq!(user.access_token(), "at-1");
    assert_eq!(user.refresh_token(), Some("rt-1"));
    assert_eq!(user.roles(), ["ROLE_STUDENT"]);
    assert_eq!(user.access_token_expire_date(), expire_date);
}

#[tokio::test]
async fn refresh_without_id_token_reads_userinfo() {
    let issuer = MockIssuer::start().await;
    let client = issuer.client().await;
    let mut user = issuer.login(&client, "user-42", &["ROLE_STUDENT"]).await;

    refresh_grant()
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-2",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .mount(&issuer.server)
        .await;
    Mock::given(method("GET"))
        .and(path(USERINFO_PATH))
        .and(header("authorization", "Bearer at-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sub": "user-42",
            "email": "jane.doe@school.iserv.example",
            "preferred_username": "jane.doe",
            "roles": [{ "id": "ROLE_STUDENT" }, { "id": "ROLE_LIBRARY" }]
        })))
        .expect(1)
        .mount(&issuer.server)
        .await;

    user.refresh_access_token().await.unwrap();

    assert_eq!(user.access_token(), "at-2");
    // Omitted from the response, so the old one stays in use.
    assert_eq!(user.refresh_token(), Some("rt-1"));
    assert_eq!(user.roles(), ["ROLE_STUDENT", "ROLE_LIBRARY"]);
}

#[tokio::test]
async fn refresh_for_different_subject_is_rejected() {
    let issuer = MockIssuer::start().await;
    let client = issuer.client().await;
    let mut user = issuer.login(&client, "user-42", &["ROLE_STUDENT"]).await;

    let id_token = issuer.id_token("user-99", "intruder", &["ROLE_ADMIN"]);
    refresh_grant()
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_response(&id_token, "at-2", Some("rt-2"), 3600)),
        )
        .mount(&issuer.server)
        .await;

    let err = user.refresh_access_token().await.unwrap_err();

    assert!(matches!(err, Error::Refresh { .. }), "got {err:?}");
    assert_eq!(user.username(), "jane.doe");
    assert_eq!(user.access_token(), "at-1");
    assert!(!user.has_role("ROLE_ADMIN"));
}

#[tokio::test]
async fn refresh_with_unverifiable_id_token_is_refresh_error() {
    let issuer = MockIssuer::start().await;
    let client = issuer.client().await;
    let mut user = issuer.login(&client, "user-42", &[]).await;

    refresh_grant()
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_response("not.a.jwt", "at-2", None, 3600)),
        )
        .mount(&issuer.server)
        .await;

    let err = user.refresh_access_token().await.unwrap_err();

    assert!(matches!(err, Error::Refresh { .. }), "got {err:?}");
    assert_eq!(user.access_token(), "at-1");
}

#[tokio::test]
async fn client_refresh_returns_token_set() {
    let issuer = MockIssuer::start().await;
    let client = issuer.client().await;

    let id_token = issuer.id_token("user-42", "jane.doe", &[]);
    refresh_grant()
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_response(&id_token, "at-2", Some("rt-2"), 3600)),
        )
        .mount(&issuer.server)
        .await;

    let token_set = client.refresh("rt-1").await.unwrap();

    assert_eq!(token_set.access_token, "at-2");
    assert_eq!(token_set.refresh_token.as_deref(), Some("rt-2"));
    assert!(token_set.expire_date().is_some());
}

#[tokio::test]
async fn refresh_against_unreachable_issuer_is_transport_error() {
    init_tracing();
    // HMAC-signed ID tokens need no JWKS, so init succeeds offline.
    let config = SsoConfig::new(&dead_issuer(), CLIENT_ID, CLIENT_SECRET, REDIRECT_URI)
        .unwrap()
        .with_id_token_signed_response_alg(Algorithm::HS256);
    let client = SsoClient::initialize(config).await.unwrap();

    let err = client.refresh("rt-1").await.unwrap_err();

    assert!(err.is_transport(), "got {err:?}");
    assert!(!err.requires_login());
}

#[tokio::test]
async fn timed_out_refresh_is_transport_error_and_keeps_user() {
    let issuer = MockIssuer::start().await;
    let http = reqwest::Client::builder()
        .timeout(Duration::from_millis(300))
        .build()
        .unwrap();
    let client = SsoClient::with_http_client(issuer.config(), http);
    client.init().await.unwrap();
    let mut user = issuer.login(&client, "user-42", &["ROLE_STUDENT"]).await;

    let id_token = issuer.id_token("user-42", "jane.doe", &["ROLE_TEACHER"]);
    refresh_grant()
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_response(&id_token, "at-2", Some("rt-2"), 3600))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&issuer.server)
        .await;

    let err = user.refresh_access_token().await.unwrap_err();

    assert!(err.is_transport(), "got {err:?}");
    assert!(!err.requires_login());
    assert_eq!(user.access_token(), "at-1");
    assert_eq!(user.refresh_token(), Some("rt-1"));
    assert_eq!(user.roles(), ["ROLE_STUDENT"]);
}

#[tokio::test]
async fn userinfo_error_status_is_userinfo_error() {
    let issuer = MockIssuer::start().await;
    let client = issuer.client().await;

    Mock::given(method("GET"))
        .and(path(USERINFO_PATH))
        .and(header("authorization", "Bearer expired-token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_token",
            "error_description": "access token expired"
        })))
        .expect(1)
        .mount(&issuer.server)
        .await;

    let err = client.userinfo("expired-token").await.unwrap_err();

    match &err {
        Error::Userinfo { status, detail } => {
            assert_eq!(*status, Some(401));
            assert!(detail.contains("invalid_token"), "detail: {detail}");
        }
        other => panic!("expected Userinfo, got {other:?}"),
    }
    assert!(!err.is_transport());
}

#[tokio::test]
async fn userinfo_failure_during_refresh_is_refresh_error() {
    let issuer = MockIssuer::start().await;
    let client = issuer.client().await;
    let mut user = issuer.login(&client, "user-42", &["ROLE_STUDENT"]).await;

    refresh_grant()
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-2",
            "expires_in": 3600
        })))
        .mount(&issuer.server)
        .await;
    Mock::given(method("GET"))
        .and(path(USERINFO_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "error": "invalid_token" })))
        .mount(&issuer.server)
        .await;

    let err = user.refresh_access_token().await.unwrap_err();

    assert!(
        matches!(err, Error::Refresh { status: Some(401), .. }),
        "got {err:?}"
    );
    assert_eq!(user.access_token(), "at-1");
}
