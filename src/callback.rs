use serde::Deserialize;
use url::Url;

use crate::error::Error;

/// Parameters the issuer appends to the redirect URI.
///
/// Usually taken from the callback request's query string; issuers using
/// `response_mode=form_post` send them as a form body instead, see
/// [`CallbackParams::from_form_body`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[non_exhaustive]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub error_uri: Option<String>,
    pub iss: Option<String>,
    pub session_state: Option<String>,
}

impl CallbackParams {
    /// Parses a raw query string (without the leading `?`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthorizationExchange`] if the query is malformed,
    /// e.g. a parameter appears twice.
    pub fn from_query(query: &str) -> Result<Self, Error> {
        serde_urlencoded::from_str(query)
            .map_err(|e| Error::exchange(format!("malformed callback parameters: {e}")))
    }

    /// Parses an `application/x-www-form-urlencoded` callback body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthorizationExchange`] if the body is malformed.
    pub fn from_form_body(body: &[u8]) -> Result<Self, Error> {
        serde_urlencoded::from_bytes(body)
            .map_err(|e| Error::exchange(format!("malformed callback body: {e}")))
    }

    /// Checks the callback and returns the authorization code.
    pub(crate) fn authorization_code(&self, issuer: &str) -> Result<&str, Error> {
        if let Some(error) = &self.error {
            let detail = match &self.error_description {
                Some(description) => format!("{error}: {description}"),
                None => error.clone(),
            };
            return Err(Error::exchange(format!("issuer returned error {detail}")));
        }

        // No state is sent with the authorization request.
        if self.state.is_some() {
            return Err(Error::exchange("unexpected state parameter in callback"));
        }

        if let Some(iss) = &self.iss {
            if iss != issuer {
                return Err(Error::exchange(format!(
                    "iss mismatch: expected '{issuer}', got '{iss}'"
                )));
            }
        }

        self.code
            .as_deref()
            .filter(|code| !code.is_empty())
            .ok_or_else(|| Error::exchange("callback is missing the authorization code"))
    }
}

/// Anything the callback parameters can be read from.
///
/// Implemented for the `http` crate's request and URI types (what axum, hyper
/// and most Rust servers hand to handlers), for full URLs, and for
/// already-parsed [`CallbackParams`].
pub trait IntoCallbackParams {
    /// # Errors
    ///
    /// Returns [`Error::AuthorizationExchange`] if the parameters cannot be parsed.
    fn into_callback_params(self) -> Result<CallbackParams, Error>;
}

impl IntoCallbackParams for CallbackParams {
    fn into_callback_params(self) -> Result<CallbackParams, Error> {
        Ok(self)
    }
}

impl IntoCallbackParams for &CallbackParams {
    fn into_callback_params(self) -> Result<CallbackParams, Error> {
        Ok(self.clone())
    }
}

impl IntoCallbackParams for &http::Uri {
    fn into_callback_params(self) -> Result<CallbackParams, Error> {
        CallbackParams::from_query(self.query().unwrap_or_default())
    }
}

impl<B> IntoCallbackParams for &http::Request<B> {
    fn into_callback_params(self) -> Result<CallbackParams, Error> {
        self.uri().into_callback_params()
    }
}

impl IntoCallbackParams for &http::request::Parts {
    fn into_callback_params(self) -> Result<CallbackParams, Error> {
        (&self.uri).into_callback_params()
    }
}

impl IntoCallbackParams for &Url {
    fn into_callback_params(self) -> Result<CallbackParams, Error> {
        CallbackParams::from_query(self.query().unwrap_or_default())
    }
}
