use derive_more::{Display, From, Into};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};

/// PKCE code verifier (opaque, caller-retained secret).
///
/// Produced by [`SsoClient::redirector`](crate::SsoClient::redirector); the caller
/// persists it (cookie, session) and hands it back to
/// [`SsoClient::fetch`](crate::SsoClient::fetch). `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct CodeVerifier(String);

impl CodeVerifier {
    /// The verifier as sent in the `code_verifier` form field.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CodeVerifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CodeVerifier {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl std::fmt::Debug for CodeVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CodeVerifier(..)")
    }
}

/// A role assigned to the subject, as listed in the `roles` claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Role {
    pub id: String,
    /// Provider specific attributes (display name, group, ...).
    #[serde(flatten)]
    pub attributes: Map<String, JsonValue>,
}

impl Role {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: Map::new(),
        }
    }
}

/// Identity claims decoded from an ID token or returned by the userinfo endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub preferred_username: String,
    /// Roles in the order the issuer listed them. Absent or `null` is empty.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub roles: Vec<Role>,
    /// Every other claim (`iss`, `aud`, `exp`, `name`, ...).
    #[serde(flatten)]
    pub additional: Map<String, JsonValue>,
}

impl Claims {
    /// Role identifiers in claim order.
    #[must_use]
    pub fn role_ids(&self) -> Vec<String> {
        self.roles.iter().map(|r| r.id.clone()).collect()
    }

    /// Looks up any other claim by name.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.additional.get(key)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Role>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Role>>::deserialize(deserializer)?.unwrap_or_default())
}
