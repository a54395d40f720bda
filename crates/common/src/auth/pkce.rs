//! PKCE (Proof Key for Code Exchange) implementation for OAuth 2.0
//!
//! Implements RFC 7636 for secure OAuth authorization without client
//! secrets. Only the challenge/verifier contract lives here; browser
//! navigation and provider URL building belong to the platform layer.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Generate a cryptographically secure code verifier
///
/// Returns a URL-safe base64-encoded random string of 32 bytes (43
/// characters). Per RFC 7636, verifiers must be 43-128 characters long.
pub fn generate_code_verifier() -> Result<String, String> {
    let mut rng = rand::thread_rng();
    let random_bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
    Ok(URL_SAFE_NO_PAD.encode(random_bytes))
}

/// Generate code challenge from verifier using SHA256
///
/// Per RFC 7636, the challenge is BASE64URL(SHA256(ASCII(code_verifier))).
/// The verifier is validated first so malformed parameters fail before any
/// network call.
pub fn generate_code_challenge(verifier: &str) -> Result<String, String> {
    validate_verifier(verifier)?;
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    let hash = hasher.finalize();
    Ok(URL_SAFE_NO_PAD.encode(hash))
}

/// Validate a code verifier against the RFC 7636 constraints
///
/// Length must be 43-128 characters from the unreserved URL character set.
pub fn validate_verifier(verifier: &str) -> Result<(), String> {
    if verifier.len() < 43 || verifier.len() > 128 {
        return Err(format!(
            "Code verifier must be 43-128 characters, got {}",
            verifier.len()
        ));
    }
    if !verifier
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
    {
        return Err("Code verifier contains characters outside the unreserved set".to_string());
    }
    Ok(())
}

/// Generate a random state token for CSRF protection
pub fn generate_state() -> Result<String, String> {
    let mut rng = rand::thread_rng();
    let random_bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
    Ok(URL_SAFE_NO_PAD.encode(random_bytes))
}

/// Validate that the state token matches
///
/// # Returns
/// `true` if states match, `false` otherwise
#[must_use]
pub fn validate_state(expected: &str, actual: &str) -> bool {
    expected == actual
}

/// PKCE challenge pair for OAuth 2.0 authorization
///
/// Contains the code verifier (sent during token exchange) and the code
/// challenge (sent during the authorization request).
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// Random string (43-128 chars, base64url encoded)
    /// Kept secret until token exchange
    pub code_verifier: String,

    /// SHA256 hash of code_verifier (base64url encoded)
    /// Sent in authorization request for server validation
    pub code_challenge: String,

    /// Random CSRF protection token
    /// Must match between authorization request and callback
    pub state: String,
}

impl PkceChallenge {
    /// Generate a new PKCE challenge with cryptographically secure random
    /// values
    ///
    /// # Errors
    /// Returns error if cryptographic random number generation fails
    /// (extremely rare)
    pub fn generate() -> Result<Self, String> {
        let code_verifier = generate_code_verifier()?;
        let code_challenge = generate_code_challenge(&code_verifier)?;
        let state = generate_state()?;

        Ok(Self { code_verifier, code_challenge, state })
    }

    /// Get the challenge method (always "S256" for SHA256)
    #[must_use]
    pub fn challenge_method(&self) -> &'static str {
        "S256"
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for auth::pkce.
    use super::*;

    /// Validates generated verifiers satisfy the RFC 7636 length bounds.
    #[test]
    fn test_generate_code_verifier_length() {
        let verifier = generate_code_verifier().unwrap();
        assert!(verifier.len() >= 43);
        assert!(verifier.len() <= 128);
        assert!(validate_verifier(&verifier).is_ok());
    }

    /// Validates the challenge is deterministic for a given verifier.
    #[test]
    fn test_code_challenge_deterministic() {
        let verifier = generate_code_verifier().unwrap();
        let challenge1 = generate_code_challenge(&verifier).unwrap();
        let challenge2 = generate_code_challenge(&verifier).unwrap();
        assert_eq!(challenge1, challenge2);
        assert_ne!(challenge1, verifier);
    }

    /// Validates malformed verifiers are rejected before any network call.
    #[test]
    fn test_validate_verifier_rejects_malformed() {
        assert!(validate_verifier("too-short").is_err());
        assert!(validate_verifier(&"a".repeat(129)).is_err());
        assert!(validate_verifier(&format!("{}!", "a".repeat(43))).is_err());
        assert!(generate_code_challenge("short").is_err());
    }

    /// Validates state generation produces unique values and comparison
    /// works.
    #[test]
    fn test_state_generation_and_validation() {
        let state1 = generate_state().unwrap();
        let state2 = generate_state().unwrap();
        assert_ne!(state1, state2, "States should be unique");
        assert!(validate_state(&state1, &state1));
        assert!(!validate_state(&state1, &state2));
    }

    /// Validates `PkceChallenge::generate` produces a consistent pair.
    #[test]
    fn test_pkce_challenge_generate() {
        let challenge = PkceChallenge::generate().unwrap();
        assert!(challenge.code_verifier.len() >= 43);
        assert_eq!(
            challenge.code_challenge,
            generate_code_challenge(&challenge.code_verifier).unwrap()
        );
        assert_eq!(challenge.challenge_method(), "S256");
    }
}
