#![allow(dead_code)]

use iserv_sso::{Algorithm, SsoClient, SsoConfig, User};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use time::OffsetDateTime;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CLIENT_ID: &str = "test-client";
pub const CLIENT_SECRET: &str = "test-secret";
pub const REDIRECT_URI: &str = "https://app.example/auth/callback";
pub const KID: &str = "test-key-1";
pub const TOKEN_PATH: &str = "/iserv/oauth/v2/token";
pub const JWKS_PATH: &str = "/iserv/public/jwk";
pub const USERINFO_PATH: &str = "/iserv/public/oauth/userinfo";

const PRIVATE_KEY_PEM: &str = include_str!("../fixtures/test_rsa.pem");
pub const JWKS: &str = include_str!("../fixtures/test_jwks.json");

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A wiremock server standing in for an IServ issuer.
pub struct MockIssuer {
    pub server: MockServer,
}

impl MockIssuer {
    /// Starts the server with the JWKS endpoint mounted.
    pub async fn start() -> Self {
        let issuer = Self::bare().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_raw(JWKS, "application/json"))
            .mount(&issuer.server)
            .await;
        issuer
    }

    /// Starts the server with nothing mounted.
    pub async fn bare() -> Self {
        init_tracing();
        Self {
            server: MockServer::start().await,
        }
    }

    /// How often the JWKS endpoint has been hit so far.
    pub async fn jwks_requests(&self) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == JWKS_PATH)
            .count()
    }

    pub fn issuer(&self) -> String {
        self.server.uri()
    }

    pub fn config(&self) -> SsoConfig {
        SsoConfig::new(&self.issuer(), CLIENT_ID, CLIENT_SECRET, REDIRECT_URI).unwrap()
    }

    pub async fn client(&self) -> SsoClient {
        SsoClient::initialize(self.config()).await.unwrap()
    }

    /// RS256 ID token signed with the key published in the JWKS.
    pub fn id_token(&self, sub: &str, username: &str, roles: &[&str]) -> String {
        self.id_token_with(id_claims(&self.issuer(), sub, username, roles))
    }

    pub fn id_token_with(&self, claims: Value) -> String {
        self.id_token_with_kid(claims, KID)
    }

    /// Signed with the fixture key but announcing `kid` in the header.
    pub fn id_token_with_kid(&self, claims: Value, kid: &str) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.into());
        let key = EncodingKey::from_rsa_pem(PRIVATE_KEY_PEM.as_bytes()).unwrap();
        encode(&header, &claims, &key).unwrap()
    }

    /// Mounts a successful authorization code exchange for `code`.
    pub async fn mount_code_exchange(&self, code: &str, body: Value) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains(format!("code={code}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Runs a full login for `sub` and returns the user.
    pub async fn login(&self, client: &SsoClient, sub: &str, roles: &[&str]) -> User {
        let id_token = self.id_token(sub, "jane.doe", roles);
        self.mount_code_exchange(
            "login-code",
            token_response(&id_token, "at-1", Some("rt-1"), 3600),
        )
        .await;

        let redirector = client.redirector().unwrap();
        let uri: http::Uri = "/auth/callback?code=login-code".parse().unwrap();
        client.fetch(&uri, &redirector.code_verifier).await.unwrap()
    }
}

pub fn id_claims(issuer: &str, sub: &str, username: &str, roles: &[&str]) -> Value {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    json!({
        "iss": issuer,
        "aud": CLIENT_ID,
        "sub": sub,
        "iat": now,
        "exp": now + 3600,
        "email": format!("{username}@school.iserv.example"),
        "preferred_username": username,
        "roles": roles.iter().map(|id| json!({ "id": id })).collect::<Vec<_>>(),
    })
}

pub fn token_response(
    id_token: &str,
    access_token: &str,
    refresh_token: Option<&str>,
    expires_in: i64,
) -> Value {
    let mut body = json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": expires_in,
        "id_token": id_token,
        "scope": "openid email profile roles",
    });
    if let Some(refresh_token) = refresh_token {
        body["refresh_token"] = refresh_token.into();
    }
    body
}

/// The fixture key set with its key published under another `kid`.
pub fn jwks_with_kid(kid: &str) -> String {
    JWKS.replace(KID, kid)
}

/// A loopback URL nothing listens on.
pub fn dead_issuer() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}")
}
