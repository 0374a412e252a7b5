#![doc = include_str!("../README.md")]

pub mod callback;
pub mod client;
pub mod config;
pub mod error;
mod jwks;
pub mod pkce;
pub mod token;
pub mod types;
pub mod user;
pub mod well_known;

// Re-exports for convenient access
pub use callback::{CallbackParams, IntoCallbackParams};
pub use client::{Redirector, SsoClient};
pub use config::{SsoConfig, TokenEndpointAuthMethod};
pub use error::Error;
pub use pkce::{generate_code_challenge, generate_code_verifier};
pub use token::TokenSet;
pub use types::{Claims, CodeVerifier, Role};
pub use user::{EXPIRY_SAFETY_MARGIN, User};
pub use well_known::IssuerMetadata;

/// Re-export of the signing algorithm type used by
/// [`SsoConfig::with_id_token_signed_response_alg`].
pub use jsonwebtoken::Algorithm;
