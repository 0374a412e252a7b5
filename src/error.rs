/// Errors returned by the SSO client.
///
/// Every failure of the login flow maps to exactly one variant so callers can
/// branch on the cause: fix the configuration, send the user back to the login
/// page, or retry later because the issuer could not be reached.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Missing or invalid configuration, or the client was used before
    /// [`SsoClient::init`](crate::SsoClient::init) completed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The authorization callback could not be turned into a token set:
    /// provider error in the callback, missing code, rejected grant
    /// (expired or used code, code verifier mismatch) or an ID token that
    /// failed verification.
    #[error("Authorization exchange failed{}: {detail}", status_suffix(.status))]
    AuthorizationExchange { status: Option<u16>, detail: String },

    /// The refresh token was rejected (invalid, expired, revoked) or the
    /// refreshed token set failed verification.
    #[error("Token refresh failed{}: {detail}", status_suffix(.status))]
    Refresh { status: Option<u16>, detail: String },

    /// The userinfo endpoint answered with an error or an unreadable body.
    #[error("Userinfo request failed{}: {detail}", status_suffix(.status))]
    Userinfo { status: Option<u16>, detail: String },

    /// No answer could be obtained from an issuer endpoint.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl Error {
    pub(crate) fn exchange(detail: impl Into<String>) -> Self {
        Self::AuthorizationExchange {
            status: None,
            detail: detail.into(),
        }
    }

    pub(crate) fn refresh(detail: impl Into<String>) -> Self {
        Self::Refresh {
            status: None,
            detail: detail.into(),
        }
    }

    /// `true` for network level failures where retrying later may succeed.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// `true` when the current login attempt or session is unusable and the
    /// user has to go through the authorization redirect again.
    #[must_use]
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            Self::AuthorizationExchange { .. } | Self::Refresh { .. }
        )
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}
