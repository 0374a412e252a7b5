use time::{Duration, OffsetDateTime};

use crate::client::SsoClient;
use crate::error::Error;
use crate::token::TokenSet;
use crate::types::Claims;

/// How long before the real expiry an access token counts as due for refresh.
pub const EXPIRY_SAFETY_MARGIN: Duration = Duration::minutes(5);

/// An authenticated IServ user: one token set and the claims it carries.
///
/// Obtained from [`SsoClient::fetch`]. All accessors are projections of the
/// current token set; [`refresh_access_token`](Self::refresh_access_token)
/// swaps in a new one and re-derives everything.
///
/// Refreshing takes `&mut self`, so two refreshes of the same `User` cannot
/// interleave. Share a `User` between tasks behind a `tokio::sync::Mutex`.
#[derive(Debug, Clone)]
pub struct User {
    client: SsoClient,
    token_set: TokenSet,
    claims: Claims,
    roles: Vec<String>,
    access_token_expire_date: Option<OffsetDateTime>,
}

impl User {
    pub(crate) fn new(client: SsoClient, token_set: TokenSet, claims: Claims) -> Self {
        let roles = claims.role_ids();
        let access_token_expire_date = token_set.expire_date();
        Self {
            client,
            token_set,
            claims,
            roles,
            access_token_expire_date,
        }
    }

    /// The `email` claim.
    #[must_use]
    pub fn email(&self) -> &str {
        &self.claims.email
    }

    /// The `preferred_username` claim.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.claims.preferred_username
    }

    /// Role identifiers in the order the issuer listed them.
    #[must_use]
    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    /// `true` if the user holds the role with this id.
    #[must_use]
    pub fn has_role(&self, id: &str) -> bool {
        self.roles.iter().any(|r| r == id)
    }

    /// Bearer token for calls to IServ APIs.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.token_set.access_token
    }

    /// Refresh token, if the issuer granted one.
    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.token_set.refresh_token.as_deref()
    }

    /// Absolute expiry of the access token, if the issuer sent one.
    #[must_use]
    pub fn access_token_expire_date(&self) -> Option<OffsetDateTime> {
        self.access_token_expire_date
    }

    /// Milliseconds until the access token should be refreshed.
    ///
    /// That is the time left until expiry minus [`EXPIRY_SAFETY_MARGIN`]. Zero
    /// or negative means: refresh now. `None` if the issuer sent no expiry.
    #[must_use]
    pub fn access_token_expire_countdown(&self) -> Option<i64> {
        self.expire_countdown_at(OffsetDateTime::now_utc())
    }

    fn expire_countdown_at(&self, now: OffsetDateTime) -> Option<i64> {
        self.access_token_expire_date.map(|expires| {
            let millis = (expires - now - EXPIRY_SAFETY_MARGIN).whole_milliseconds();
            i64::try_from(millis).unwrap_or(if millis < 0 { i64::MIN } else { i64::MAX })
        })
    }

    /// `true` once the countdown has run out.
    #[must_use]
    pub fn needs_refresh(&self) -> bool {
        self.access_token_expire_countdown()
            .is_some_and(|millis| millis <= 0)
    }

    /// All decoded claims.
    #[must_use]
    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    /// The raw token set, e.g. for persisting in a session store.
    #[must_use]
    pub fn token_set(&self) -> &TokenSet {
        &self.token_set
    }

    /// Redeems the refresh token and replaces the token set.
    ///
    /// Claims are taken from the new ID token, or from the userinfo endpoint
    /// when the issuer did not send one. A refresh token omitted from the
    /// response stays in use. On error nothing changes.
    ///
    /// # Errors
    ///
    /// - [`Error::Refresh`] if there is no refresh token, the issuer rejects
    ///   it (invalid, expired, revoked), the new claims cannot be verified or
    ///   they belong to a different subject.
    /// - [`Error::Transport`] if the issuer cannot be reached.
    pub async fn refresh_access_token(&mut self) -> Result<(), Error> {
        let result = self.refreshed().await;
        match result {
            Ok((token_set, claims)) => {
                *self = Self::new(self.client.clone(), token_set, claims);
                tracing::debug!(username = %self.username(), "Access token refreshed");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, username = %self.username(), "Access token refresh failed");
                Err(e)
            }
        }
    }

    async fn refreshed(&self) -> Result<(TokenSet, Claims), Error> {
        let refresh_token = self
            .refresh_token()
            .ok_or_else(|| Error::refresh("no refresh token available"))?;

        let (mut token_set, claims) = self.client.refresh_with_claims(refresh_token).await?;

        let claims = match claims {
            Some(claims) => claims,
            None => self
                .client
                .userinfo(&token_set.access_token)
                .await
                .map_err(|e| match e {
                    Error::Userinfo { status, detail } => Error::Refresh {
                        status,
                        detail: format!("userinfo: {detail}"),
                    },
                    other => other,
                })?,
        };

        if claims.sub != self.claims.sub {
            return Err(Error::refresh(format!(
                "subject changed from '{}' to '{}'",
                self.claims.sub, claims.sub
            )));
        }

        if token_set.refresh_token.is_none() {
            token_set.refresh_token = Some(refresh_token.to_owned());
        }

        Ok((token_set, claims))
    }
}
