use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// Size of the random code verifier in bytes (64 base64url characters).
const VERIFIER_SIZE: usize = 48;
/// Size of the random `state` parameter in bytes.
const STATE_SIZE: usize = 16;

fn random_url_safe(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generates a random PKCE code verifier (RFC 7636, 43-128 chars).
pub fn generate_code_verifier() -> String {
    random_url_safe(VERIFIER_SIZE)
}

/// `BASE64URL(SHA256(verifier))`
pub fn generate_code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Generates the random `state` parameter binding a callback to its request.
pub fn generate_state() -> String {
    random_url_safe(STATE_SIZE)
}
