use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::types::CodeVerifier;

/// The only challenge method this client sends.
pub const CODE_CHALLENGE_METHOD: &str = "S256";

/// A PKCE verifier together with the challenge derived from it.
///
/// The challenge goes into the authorization URL, the verifier stays with the
/// caller until the callback arrives.
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: CodeVerifier,
    pub challenge: String,
}

impl PkcePair {
    /// Draws a fresh verifier and derives its S256 challenge.
    #[must_use]
    pub fn generate() -> Self {
        let verifier = generate_code_verifier();
        let challenge = generate_code_challenge(&verifier);
        Self {
            verifier: CodeVerifier::from(verifier),
            challenge,
        }
    }
}

/// Random bytes behind each verifier; 48 bytes encode to 64 characters,
/// inside the 43..=128 range RFC 7636 allows.
const VERIFIER_ENTROPY_BYTES: usize = 48;

/// A new high-entropy code verifier (base64url, unpadded).
#[must_use]
pub fn generate_code_verifier() -> String {
    let mut entropy = [0u8; VERIFIER_ENTROPY_BYTES];
    rand::rng().fill(&mut entropy[..]);
    URL_SAFE_NO_PAD.encode(entropy)
}

/// The S256 challenge for `verifier`: `BASE64URL(SHA256(verifier))`.
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier))
}
