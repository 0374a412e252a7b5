//! Issuer signing keys.

use std::time::{Duration, Instant};

use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::{Jwk, JwkSet, PublicKeyUse};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, RwLock};
use url::Url;

use crate::error::Error;

/// Minimum time between two downloads triggered by unknown `kid`s.
const REFETCH_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct RawJwkSet {
    keys: Vec<JsonValue>,
}

/// Keys from the issuer's JWKS endpoint.
///
/// Downloaded once during init. A token signed with a `kid` that is not in the
/// cached set triggers one re-download, which picks up rotated keys. Further
/// re-downloads wait for [`REFETCH_COOLDOWN`] so tokens with made-up `kid`s
/// cannot hammer the issuer.
#[derive(Debug)]
pub(crate) struct KeyStore {
    jwks_uri: Url,
    keys: RwLock<JwkSet>,
    last_refetch: Mutex<Option<Instant>>,
}

impl KeyStore {
    /// Downloads the key set.
    ///
    /// # Errors
    ///
    /// [`Error::Transport`] if the endpoint is unreachable or answers with a
    /// server error, [`Error::Config`] for any other error status or a
    /// document without usable keys.
    pub(crate) async fn fetch(http: &reqwest::Client, jwks_uri: Url) -> Result<Self, Error> {
        let keys = download(http, &jwks_uri).await?;
        Ok(Self {
            jwks_uri,
            keys: RwLock::new(keys),
            last_refetch: Mutex::new(None),
        })
    }

    /// Returns the verification key for a token header's `kid`.
    ///
    /// Without a `kid` the set must contain exactly one signing key.
    pub(crate) async fn decoding_key(
        &self,
        http: &reqwest::Client,
        kid: Option<&str>,
    ) -> Result<DecodingKey, Error> {
        if let Some(key) = select(&*self.keys.read().await, kid)? {
            return Ok(key);
        }

        let mut last_refetch = self.last_refetch.lock().await;
        // Another task may have refetched while this one waited for the lock.
        if let Some(key) = select(&*self.keys.read().await, kid)? {
            return Ok(key);
        }
        if last_refetch.is_some_and(|at| at.elapsed() < REFETCH_COOLDOWN) {
            tracing::debug!(kid = ?kid, "Unknown signing key, JWKS refetched recently");
            return Err(self.no_matching_key(kid));
        }
        *last_refetch = Some(Instant::now());

        tracing::debug!(kid = ?kid, jwks_uri = %self.jwks_uri, "Unknown signing key, refreshing JWKS");
        let fresh = download(http, &self.jwks_uri).await?;
        let mut keys = self.keys.write().await;
        *keys = fresh;

        select(&keys, kid)?.ok_or_else(|| self.no_matching_key(kid))
    }

    fn no_matching_key(&self, kid: Option<&str>) -> Error {
        Error::Config(format!(
            "no signing key matching kid {kid:?} in JWKS at {}",
            self.jwks_uri
        ))
    }
}

fn select(keys: &JwkSet, kid: Option<&str>) -> Result<Option<DecodingKey>, Error> {
    let jwk = match kid {
        Some(kid) => keys.find(kid),
        None => {
            let mut signing = keys.keys.iter().filter(|k| is_signing_key(k));
            match (signing.next(), signing.next()) {
                (Some(only), None) => Some(only),
                _ => None,
            }
        }
    };

    jwk.map(|jwk| {
        DecodingKey::from_jwk(jwk).map_err(|e| Error::Config(format!("unusable JWK: {e}")))
    })
    .transpose()
}

fn is_signing_key(jwk: &Jwk) -> bool {
    !matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption))
}

async fn download(http: &reqwest::Client, jwks_uri: &Url) -> Result<JwkSet, Error> {
    let response = http.get(jwks_uri.clone()).send().await?;
    let status = response.status();
    // An issuer outage is as retryable as an unreachable issuer.
    if status.is_server_error() {
        if let Err(e) = response.error_for_status_ref() {
            return Err(Error::Transport(e));
        }
    }
    let body = response.text().await?;

    if !status.is_success() {
        return Err(Error::Config(format!(
            "JWKS request to {jwks_uri} failed with HTTP {}",
            status.as_u16()
        )));
    }

    let raw: RawJwkSet = serde_json::from_str(&body)
        .map_err(|e| Error::Config(format!("invalid JWKS document: {e}")))?;

    // Keys this client cannot represent (unknown kty/alg) are skipped, not fatal.
    let keys: Vec<Jwk> = raw
        .keys
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<Jwk>(value) {
            Ok(jwk) => Some(jwk),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unsupported JWK");
                None
            }
        })
        .collect();

    if keys.is_empty() {
        return Err(Error::Config(format!(
            "JWKS at {jwks_uri} contains no usable keys"
        )));
    }

    tracing::debug!(count = keys.len(), jwks_uri = %jwks_uri, "Loaded issuer signing keys");
    Ok(JwkSet { keys })
}
