use std::sync::{Arc, OnceLock};

use reqwest::header::ACCEPT;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use url::form_urlencoded;

use crate::callback::IntoCallbackParams;
use crate::config::{SsoConfig, TokenEndpointAuthMethod};
use crate::error::Error;
use crate::jwks::KeyStore;
use crate::pkce::{CODE_CHALLENGE_METHOD, PkcePair};
use crate::token::{self, Grant, TokenResponse, TokenSet};
use crate::types::{Claims, CodeVerifier};
use crate::user::User;
use crate::well_known::IssuerMetadata;

/// Authorization URL plus the PKCE verifier the caller must keep until the callback.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Redirector {
    /// Where to send the user agent.
    pub redirect_uri: String,
    /// Secret to persist (session, encrypted cookie) and pass to [`SsoClient::fetch`].
    pub code_verifier: CodeVerifier,
}

/// Issuer state resolved by [`SsoClient::init`].
#[derive(Debug)]
struct Provider {
    metadata: IssuerMetadata,
    keys: Option<KeyStore>,
}

#[derive(Debug)]
struct Inner {
    config: SsoConfig,
    http: reqwest::Client,
    provider: OnceLock<Provider>,
    init_lock: Mutex<()>,
}

/// OpenID Connect client for one IServ issuer.
///
/// Cheap to clone: clones share configuration, HTTP connection pool and
/// issuer keys. Every [`User`] keeps a clone to refresh its tokens.
///
/// ```rust,ignore
/// let client = SsoClient::new(SsoConfig::from_env()?);
/// client.init().await?;
///
/// // login handler
/// let redirector = client.redirector()?;
/// session.insert("pkce", redirector.code_verifier.as_str());
/// // -> redirect to redirector.redirect_uri
///
/// // callback handler
/// let user = client.fetch(&request, session.get("pkce")?).await?;
/// ```
#[derive(Debug, Clone)]
pub struct SsoClient {
    inner: Arc<Inner>,
}

impl SsoClient {
    /// Create a client. No network traffic until [`init`](Self::init).
    #[must_use]
    pub fn new(config: SsoConfig) -> Self {
        Self::with_http_client(config, reqwest::Client::new())
    }

    /// Create a client on a custom HTTP client (timeouts, proxy, connection
    /// pool reuse, testing).
    #[must_use]
    pub fn with_http_client(config: SsoConfig, http: reqwest::Client) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                http,
                provider: OnceLock::new(),
                init_lock: Mutex::new(()),
            }),
        }
    }

    /// [`new`](Self::new) followed by [`init`](Self::init).
    ///
    /// # Errors
    ///
    /// See [`init`](Self::init).
    pub async fn initialize(config: SsoConfig) -> Result<Self, Error> {
        let client = Self::new(config);
        client.init().await?;
        Ok(client)
    }

    /// Resolves the issuer endpoints and loads its signing keys.
    ///
    /// Must complete once before any other operation; every other operation
    /// fails with [`Error::Config`] until it has.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the client is already initialized or the
    /// JWKS endpoint answers with something unusable, [`Error::Transport`]
    /// if it cannot be reached or answers with a server error. A failed init
    /// can be retried.
    pub async fn init(&self) -> Result<(), Error> {
        let _guard = self.inner.init_lock.lock().await;
        if self.inner.provider.get().is_some() {
            return Err(Error::Config("SSO client is already initialized".into()));
        }

        let config = &self.inner.config;
        let metadata = IssuerMetadata::for_issuer(&config.issuer)?;

        let keys = if token::is_hmac(config.id_token_alg) {
            None
        } else {
            Some(KeyStore::fetch(&self.inner.http, metadata.jwks_uri.clone()).await?)
        };

        tracing::info!(issuer = %metadata.issuer, client_id = %config.client_id, "SSO client initialized");

        self.inner
            .provider
            .set(Provider { metadata, keys })
            .map_err(|_| Error::Config("SSO client is already initialized".into()))
    }

    /// `true` once [`init`](Self::init) has completed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.provider.get().is_some()
    }

    /// The configuration this client was built with.
    #[must_use]
    pub fn config(&self) -> &SsoConfig {
        &self.inner.config
    }

    /// Issuer endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] before [`init`](Self::init).
    pub fn metadata(&self) -> Result<&IssuerMetadata, Error> {
        self.provider().map(|p| &p.metadata)
    }

    fn provider(&self) -> Result<&Provider, Error> {
        self.inner
            .provider
            .get()
            .ok_or_else(|| Error::Config("SSO client is not initialized; call init() first".into()))
    }

    /// Builds the authorization URL for a new login attempt.
    ///
    /// Each call draws a fresh PKCE pair. Nothing is kept on the client: the
    /// returned `code_verifier` is the caller's to store until the callback.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] before [`init`](Self::init).
    pub fn redirector(&self) -> Result<Redirector, Error> {
        let provider = self.provider()?;
        let config = &self.inner.config;
        let pkce = PkcePair::generate();

        let mut url = provider.metadata.authorization_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &config.client_id)
            .append_pair("scope", &config.scopes.join(" "))
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", config.redirect_uri.as_str())
            .append_pair("resource", &config.issuer)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", CODE_CHALLENGE_METHOD);

        Ok(Redirector {
            redirect_uri: url.into(),
            code_verifier: pkce.verifier,
        })
    }

    /// Exchanges the authorization callback for a [`User`].
    ///
    /// `code_verifier` must be the one returned by the [`redirector`](Self::redirector)
    /// call that started this login.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] before [`init`](Self::init).
    /// - [`Error::AuthorizationExchange`] if the callback carries an error or
    ///   no code, the token endpoint rejects the grant (used or expired code,
    ///   verifier mismatch) or the ID token fails verification.
    /// - [`Error::Transport`] if the issuer cannot be reached.
    pub async fn fetch(
        &self,
        request: impl IntoCallbackParams,
        code_verifier: impl AsRef<str>,
    ) -> Result<User, Error> {
        let provider = self.provider()?;

        let result = self
            .exchange(provider, request, code_verifier.as_ref())
            .await;
        match &result {
            Ok(user) => tracing::info!(username = %user.username(), "SSO login successful"),
            Err(e) => tracing::warn!(error = %e, "SSO authorization exchange failed"),
        }
        result
    }

    async fn exchange(
        &self,
        provider: &Provider,
        request: impl IntoCallbackParams,
        code_verifier: &str,
    ) -> Result<User, Error> {
        let params = request.into_callback_params()?;
        let code = params.authorization_code(&provider.metadata.issuer)?;
        if code_verifier.is_empty() {
            return Err(Error::exchange("code verifier is missing"));
        }

        let config = &self.inner.config;
        let token_set = self
            .token_request(
                provider,
                Grant::AuthorizationCode,
                &[
                    ("code", code),
                    ("redirect_uri", config.redirect_uri.as_str()),
                    ("code_verifier", code_verifier),
                ],
            )
            .await?;

        let id_token = token_set
            .id_token
            .as_deref()
            .ok_or_else(|| Error::exchange("id_token not present in token response"))?;
        let claims = self
            .verify_id_token(provider, id_token, Grant::AuthorizationCode)
            .await?;

        Ok(User::new(self.clone(), token_set, claims))
    }

    /// Redeems a refresh token for a new token set.
    ///
    /// A returned ID token is verified before the set is handed out.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] before [`init`](Self::init).
    /// - [`Error::Refresh`] if the refresh token is rejected or the new ID
    ///   token fails verification.
    /// - [`Error::Transport`] if the issuer cannot be reached.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, Error> {
        self.refresh_with_claims(refresh_token)
            .await
            .map(|(token_set, _)| token_set)
    }

    /// Like [`refresh`](Self::refresh), also returning the verified ID token claims.
    pub(crate) async fn refresh_with_claims(
        &self,
        refresh_token: &str,
    ) -> Result<(TokenSet, Option<Claims>), Error> {
        let provider = self.provider()?;
        if refresh_token.is_empty() {
            return Err(Error::refresh("refresh token is empty"));
        }

        let token_set = self
            .token_request(
                provider,
                Grant::RefreshToken,
                &[("refresh_token", refresh_token)],
            )
            .await?;

        let claims = match token_set.id_token.as_deref() {
            Some(id_token) => Some(
                self.verify_id_token(provider, id_token, Grant::RefreshToken)
                    .await?,
            ),
            None => None,
        };

        Ok((token_set, claims))
    }

    /// Fetches the subject's claims from the userinfo endpoint.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] before [`init`](Self::init).
    /// - [`Error::Userinfo`] if the endpoint answers with an error status or
    ///   a body that does not contain the expected claims.
    /// - [`Error::Transport`] if the issuer cannot be reached.
    pub async fn userinfo(&self, access_token: &str) -> Result<Claims, Error> {
        let provider = self.provider()?;

        let response = self
            .inner
            .http
            .get(provider.metadata.userinfo_endpoint.clone())
            .header(ACCEPT, "application/json")
            .bearer_auth(access_token)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(Error::Userinfo {
                status: Some(status.as_u16()),
                detail: token::error_detail(&body),
            });
        }

        serde_json::from_str(&body).map_err(|e| Error::Userinfo {
            status: None,
            detail: format!("invalid userinfo response: {e}"),
        })
    }

    /// Posts a grant to the token endpoint.
    ///
    /// Any HTTP answer that is not a usable token response becomes the
    /// grant's error variant; only failing to get an answer is `Transport`.
    async fn token_request(
        &self,
        provider: &Provider,
        grant: Grant,
        params: &[(&str, &str)],
    ) -> Result<TokenSet, Error> {
        let config = &self.inner.config;

        let mut form: Vec<(&str, &str)> = Vec::with_capacity(params.len() + 3);
        form.push(("grant_type", grant.as_str()));
        form.extend_from_slice(params);

        let mut request = self
            .inner
            .http
            .post(provider.metadata.token_endpoint.clone())
            .header(ACCEPT, "application/json");

        match config.auth_method {
            TokenEndpointAuthMethod::ClientSecretBasic => {
                request = request.basic_auth(
                    form_encode(&config.client_id),
                    Some(form_encode(&config.client_secret)),
                );
            }
            TokenEndpointAuthMethod::ClientSecretPost => {
                form.push(("client_id", config.client_id.as_str()));
                form.push(("client_secret", config.client_secret.as_str()));
            }
        }

        let response = request.form(&form).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(grant.error(Some(status.as_u16()), token::error_detail(&body)));
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| grant.error(None, format!("invalid token response: {e}")))?;

        tracing::debug!(grant = grant.as_str(), "Token endpoint issued tokens");
        Ok(TokenSet::from_response(parsed, OffsetDateTime::now_utc()))
    }

    async fn verify_id_token(
        &self,
        provider: &Provider,
        id_token: &str,
        grant: Grant,
    ) -> Result<Claims, Error> {
        token::verify_id_token(
            &self.inner.config,
            provider.keys.as_ref(),
            &self.inner.http,
            id_token,
            grant,
        )
        .await
    }
}

/// RFC 6749 section 2.3.1: client credentials are form-encoded before Basic auth.
fn form_encode(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
