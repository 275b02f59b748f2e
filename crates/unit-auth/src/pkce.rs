//! Proof Key for Code Exchange (RFC 7636).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// `S256` challenge method.
pub const METHOD_S256: &str = "S256";
/// `plain` challenge method.
pub const METHOD_PLAIN: &str = "plain";

/// Minimum verifier length.
pub const MIN_VERIFIER_LEN: usize = 43;
/// Maximum verifier length.
pub const MAX_VERIFIER_LEN: usize = 128;

const VERIFIER_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

/// Whether `method` is a supported challenge method.
pub fn is_supported_method(method: &str) -> bool {
    method == METHOD_S256 || method == METHOD_PLAIN
}

/// Whether the verifier length is within 43..=128.
pub fn verifier_length_ok(verifier: &str) -> bool {
    (MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&verifier.len())
}

/// `BASE64URL(SHA256(verifier))` without padding.
pub fn s256_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Check a verifier against a stored challenge.
///
/// An empty method is treated as `plain`. Unknown methods never verify.
pub fn verify(verifier: &str, challenge: &str, method: &str) -> bool {
    let computed = match method {
        METHOD_S256 => s256_challenge(verifier),
        METHOD_PLAIN | "" => verifier.to_string(),
        _ => return false,
    };
    bool::from(computed.as_bytes().ct_eq(challenge.as_bytes()))
}

/// Random 64-character verifier.
pub fn generate_verifier() -> String {
    let mut rng = rand::thread_rng();
    (0..64)
        .map(|_| VERIFIER_CHARSET[rng.gen_range(0..VERIFIER_CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7636 appendix B
    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn test_rfc_vector() {
        assert_eq!(s256_challenge(VERIFIER), CHALLENGE);
        assert!(verify(VERIFIER, CHALLENGE, METHOD_S256));
        assert!(!verify("wrong-verifier", CHALLENGE, METHOD_S256));
    }

    #[test]
    fn test_plain_and_unknown() {
        assert!(verify(VERIFIER, VERIFIER, METHOD_PLAIN));
        assert!(verify(VERIFIER, VERIFIER, ""));
        assert!(!verify(VERIFIER, VERIFIER, "S512"));
    }

    #[test]
    fn test_verifier_length() {
        assert!(verifier_length_ok(VERIFIER));
        assert!(!verifier_length_ok(&"a".repeat(42)));
        assert!(verifier_length_ok(&"a".repeat(128)));
        assert!(!verifier_length_ok(&"a".repeat(129)));
    }

    #[test]
    fn test_generated_verifier() {
        let verifier = generate_verifier();
        assert!(verifier_length_ok(&verifier));
        assert!(verifier.bytes().all(|b| VERIFIER_CHARSET.contains(&b)));
        assert_ne!(verifier, generate_verifier());
    }
}
