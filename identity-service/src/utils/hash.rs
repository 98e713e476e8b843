use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest. Opaque secrets (verification tokens,
/// one-time codes) are stored and compared only in this form.
pub fn sha256_hex(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_stable_and_hex() {
        let digest = sha256_hex("123456");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, sha256_hex("123456"));
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_different_inputs_differ() {
        assert_ne!(sha256_hex("123456"), sha256_hex("123457"));
    }
}
