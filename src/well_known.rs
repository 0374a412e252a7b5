use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;

const AUTHORIZATION_PATH: &str = "/iserv/oauth/v2/auth";
const TOKEN_PATH: &str = "/iserv/oauth/v2/token";
const JWKS_PATH: &str = "/iserv/public/jwk";
const USERINFO_PATH: &str = "/iserv/public/oauth/userinfo";

/// Endpoints of an IServ issuer.
///
/// IServ does not need discovery: every endpoint lives at a fixed path below
/// the issuer base URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct IssuerMetadata {
    pub issuer: String,
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    pub jwks_uri: Url,
    pub userinfo_endpoint: Url,
}

impl IssuerMetadata {
    /// Derives the endpoints from a normalized issuer (no trailing slash).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if an endpoint does not form a valid URL.
    pub fn for_issuer(issuer: &str) -> Result<Self, Error> {
        let endpoint = |path: &str| -> Result<Url, Error> {
            format!("{issuer}{path}")
                .parse()
                .map_err(|e| Error::Config(format!("invalid endpoint for issuer '{issuer}': {e}")))
        };

        Ok(Self {
            issuer: issuer.to_owned(),
            authorization_endpoint: endpoint(AUTHORIZATION_PATH)?,
            token_endpoint: endpoint(TOKEN_PATH)?,
            jwks_uri: endpoint(JWKS_PATH)?,
            userinfo_endpoint: endpoint(USERINFO_PATH)?,
        })
    }
}
