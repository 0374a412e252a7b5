use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use time::OffsetDateTime;

use crate::config::SsoConfig;
use crate::error::Error;
use crate::jwks::KeyStore;
use crate::types::Claims;

/// The two grants this client sends to the token endpoint.
///
/// Failures are reported as [`Error::AuthorizationExchange`] or
/// [`Error::Refresh`] depending on which grant was in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Grant {
    AuthorizationCode,
    RefreshToken,
}

impl Grant {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::RefreshToken => "refresh_token",
        }
    }

    pub(crate) fn error(self, status: Option<u16>, detail: impl Into<String>) -> Error {
        let detail = detail.into();
        match self {
            Self::AuthorizationCode => Error::AuthorizationExchange { status, detail },
            Self::RefreshToken => Error::Refresh { status, detail },
        }
    }
}

/// Successful token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".into()
}

/// RFC 6749 error body (`{"error": "...", "error_description": "..."}`).
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Human readable detail for a failed token or userinfo response.
pub(crate) fn error_detail(body: &str) -> String {
    match serde_json::from_str::<OAuthErrorBody>(body) {
        Ok(OAuthErrorBody {
            error,
            error_description: Some(description),
        }) => format!("{error}: {description}"),
        Ok(OAuthErrorBody { error, .. }) => error,
        Err(_) if body.trim().is_empty() => "empty response body".into(),
        Err(_) => body.chars().take(200).collect(),
    }
}

/// Tokens issued by the token endpoint.
///
/// Serializable so hosts can keep it in their own session storage.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct TokenSet {
    pub access_token: String,
    pub token_type: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub scope: Option<String>,
    /// Access token expiry, seconds since the Unix epoch.
    pub expires_at: Option<i64>,
}

impl TokenSet {
    pub(crate) fn from_response(response: TokenResponse, now: OffsetDateTime) -> Self {
        let expires_at = response.expires_at.or_else(|| {
            response
                .expires_in
                .map(|secs| now.unix_timestamp().saturating_add(secs))
        });

        Self {
            access_token: response.access_token,
            token_type: response.token_type,
            refresh_token: response.refresh_token,
            id_token: response.id_token,
            scope: response.scope,
            expires_at,
        }
    }

    /// Access token expiry as an absolute instant.
    #[must_use]
    pub fn expire_date(&self) -> Option<OffsetDateTime> {
        self.expires_at
            .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
    }
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("token_type", &self.token_type)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("has_id_token", &self.id_token.is_some())
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

pub(crate) fn is_hmac(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

/// Verifies an ID token and decodes its claims.
///
/// Checks the signature (client secret for HMAC, issuer JWKS otherwise),
/// `iss`, `aud`, `exp` and `sub`, and `azp` when the token has several
/// audiences.
pub(crate) async fn verify_id_token(
    config: &SsoConfig,
    keys: Option<&KeyStore>,
    http: &reqwest::Client,
    id_token: &str,
    grant: Grant,
) -> Result<Claims, Error> {
    let header = decode_header(id_token)
        .map_err(|e| grant.error(None, format!("malformed id_token: {e}")))?;

    let key = if is_hmac(config.id_token_alg) {
        DecodingKey::from_secret(config.client_secret.as_bytes())
    } else {
        let keys = keys.ok_or_else(|| Error::Config("issuer signing keys not loaded".into()))?;
        keys.decoding_key(http, header.kid.as_deref())
            .await
            .map_err(|e| match e {
                Error::Config(detail) => grant.error(None, detail),
                other => other,
            })?
    };

    let mut validation = Validation::new(config.id_token_alg);
    validation.set_issuer(&[config.issuer.as_str()]);
    validation.set_audience(&[config.client_id.as_str()]);
    validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
    validation.leeway = config.clock_tolerance.as_secs();

    let data = decode::<JsonValue>(id_token, &key, &validation)
        .map_err(|e| grant.error(None, format!("id_token rejected: {e}")))?;

    check_authorized_party(&data.claims, &config.client_id)
        .map_err(|detail| grant.error(None, detail))?;

    serde_json::from_value(data.claims)
        .map_err(|e| grant.error(None, format!("id_token claims: {e}")))
}

fn check_authorized_party(claims: &JsonValue, client_id: &str) -> Result<(), String> {
    match claims.get("azp").and_then(JsonValue::as_str) {
        Some(azp) if azp != client_id => Err(format!(
            "azp mismatch: expected '{client_id}', got '{azp}'"
        )),
        Some(_) => Ok(()),
        None => match claims.get("aud").and_then(JsonValue::as_array) {
            Some(audiences) if audiences.len() > 1 => {
                Err("azp is required when id_token has multiple audiences".into())
            }
            _ => Ok(()),
        },
    }
}
