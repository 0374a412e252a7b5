use std::time::Duration;

use jsonwebtoken::Algorithm;
use url::{Host, Url};

use crate::error::Error;

/// Scopes requested by default: identity, email, profile and the IServ `roles` claim.
pub const DEFAULT_SCOPES: [&str; 4] = ["openid", "email", "profile", "roles"];

/// How the client authenticates itself at the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum TokenEndpointAuthMethod {
    /// HTTP Basic with the form-urlencoded client id and secret.
    #[default]
    ClientSecretBasic,
    /// `client_id` and `client_secret` in the request body.
    ClientSecretPost,
}

/// SSO client configuration.
///
/// Required values are constructor parameters and are validated up front, so
/// a built `SsoConfig` is always usable.
///
/// ```rust,ignore
/// use iserv_sso::SsoConfig;
///
/// let config = SsoConfig::new(
///     "school.iserv.example",
///     "my-client-id",
///     "my-client-secret",
///     "https://my-app.example/auth/callback",
/// )?;
/// assert_eq!(config.issuer(), "https://school.iserv.example");
/// ```
#[derive(Clone)]
#[non_exhaustive]
pub struct SsoConfig {
    pub(crate) issuer: String,
    pub(crate) client_id: String,
    pub(crate) client_secret: String,
    pub(crate) redirect_uri: Url,
    pub(crate) scopes: Vec<String>,
    pub(crate) auth_method: TokenEndpointAuthMethod,
    pub(crate) id_token_alg: Algorithm,
    pub(crate) clock_tolerance: Duration,
}

impl SsoConfig {
    /// Create a configuration.
    ///
    /// `issuer` is the IServ base URL. Without a scheme `https://` is
    /// prepended; an explicit scheme is kept as given.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the issuer is not an https URL (plain http
    /// is only allowed for loopback hosts), if the client id or secret is
    /// blank, or if the redirect URI does not parse.
    pub fn new(
        issuer: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: &str,
    ) -> Result<Self, Error> {
        let issuer = normalize_issuer(issuer)?;

        let client_id = client_id.into();
        if client_id.trim().is_empty() {
            return Err(Error::Config("client_id is required".into()));
        }
        let client_secret = client_secret.into();
        if client_secret.trim().is_empty() {
            return Err(Error::Config("client_secret is required".into()));
        }

        let redirect_uri: Url = redirect_uri
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("redirect_uri: {e}")))?;

        Ok(Self {
            issuer,
            client_id,
            client_secret,
            redirect_uri,
            scopes: DEFAULT_SCOPES.iter().map(|s| (*s).to_owned()).collect(),
            auth_method: TokenEndpointAuthMethod::default(),
            id_token_alg: Algorithm::RS256,
            clock_tolerance: Duration::from_secs(60),
        })
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `SSO_ISSUER`: IServ base URL
    /// - `SSO_CLIENT_ID`: OAuth2 client ID
    /// - `SSO_CLIENT_SECRET`: OAuth2 client secret
    /// - `SSO_REDIRECT_URI`: callback URI registered at the issuer
    ///
    /// # Optional env vars
    /// - `SSO_SCOPES`: Comma-separated scopes
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a required variable is missing or a value is invalid.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| Error::Config(format!("{key} is required")))
        };

        let issuer = required("SSO_ISSUER")?;
        let client_id = required("SSO_CLIENT_ID")?;
        let client_secret = required("SSO_CLIENT_SECRET")?;
        let redirect_uri = required("SSO_REDIRECT_URI")?;

        let mut config = Self::new(&issuer, client_id, client_secret, &redirect_uri)?;

        if let Some(scopes) = lookup("SSO_SCOPES") {
            config = config.with_scopes(
                scopes
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            );
        }

        Ok(config)
    }

    /// Override the requested scopes (default: `openid email profile roles`).
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Client authentication at the token endpoint (default `client_secret_basic`).
    #[must_use]
    pub fn with_token_endpoint_auth_method(mut self, method: TokenEndpointAuthMethod) -> Self {
        self.auth_method = method;
        self
    }

    /// Algorithm the issuer signs ID tokens with (default `RS256`).
    ///
    /// HMAC algorithms are verified with the client secret, all others against
    /// the issuer's JWKS.
    #[must_use]
    pub fn with_id_token_signed_response_alg(mut self, alg: Algorithm) -> Self {
        self.id_token_alg = alg;
        self
    }

    /// Leeway for `exp`, `iat` and `nbf` checks (default 60 seconds).
    #[must_use]
    pub fn with_clock_tolerance(mut self, tolerance: Duration) -> Self {
        self.clock_tolerance = tolerance;
        self
    }

    /// Normalized issuer base URL, the expected `iss` claim.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// `OAuth2` client ID.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Callback URI registered at the issuer.
    #[must_use]
    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    /// Scopes sent with the authorization request.
    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Client authentication method at the token endpoint.
    #[must_use]
    pub fn token_endpoint_auth_method(&self) -> TokenEndpointAuthMethod {
        self.auth_method
    }

    /// Expected ID token signing algorithm.
    #[must_use]
    pub fn id_token_signed_response_alg(&self) -> Algorithm {
        self.id_token_alg
    }

    /// Leeway applied to ID token time checks.
    #[must_use]
    pub fn clock_tolerance(&self) -> Duration {
        self.clock_tolerance
    }
}

impl std::fmt::Debug for SsoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsoConfig")
            .field("issuer", &self.issuer)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri.as_str())
            .field("scopes", &self.scopes)
            .field("auth_method", &self.auth_method)
            .field("id_token_alg", &self.id_token_alg)
            .finish_non_exhaustive()
    }
}

fn normalize_issuer(raw: &str) -> Result<String, Error> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::Config("issuer is required".into()));
    }

    let with_scheme = if raw.contains("://") {
        raw.to_owned()
    } else {
        format!("https://{raw}")
    };
    let issuer = with_scheme.trim_end_matches('/').to_owned();

    let url: Url = issuer
        .parse()
        .map_err(|e| Error::Config(format!("issuer: {e}")))?;

    match url.scheme() {
        "https" => {}
        "http" if is_loopback(&url) => {}
        scheme => {
            return Err(Error::Config(format!(
                "issuer must use https, got '{scheme}://'"
            )));
        }
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(Error::Config(
            "issuer must not contain a query or fragment".into(),
        ));
    }

    Ok(issuer)
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}
