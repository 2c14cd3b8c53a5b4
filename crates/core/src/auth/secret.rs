//! Password secret encoding.
//!
//! Secrets are stored as `sha256:<hex digest>`.

use sha2::{Digest, Sha256};

const PREFIX: &str = "sha256:";

/// Encode a plaintext password for storage.
pub fn hash_secret(password: &str) -> String {
    let digest = Sha256::digest(password.as_bytes());
    let mut encoded = String::with_capacity(PREFIX.len() + digest.len() * 2);
    encoded.push_str(PREFIX);
    for byte in digest {
        encoded.push_str(&format!("{:02x}", byte));
    }
    encoded
}

/// Check a plaintext password against a stored secret.
pub fn verify_secret(password: &str, stored: &str) -> bool {
    if !stored.starts_with(PREFIX) {
        return false;
    }
    constant_time_eq(hash_secret(password).as_bytes(), stored.as_bytes())
}

/// Constant-time byte comparison to prevent timing attacks.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_format() {
        let secret = hash_secret("admin123");
        assert!(secret.starts_with("sha256:"));
        assert_eq!(secret.len(), 7 + 64);
        assert_eq!(
            hash_secret(""),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_verify() {
        let secret = hash_secret("clave");
        assert!(verify_secret("clave", &secret));
        assert!(!verify_secret("Clave", &secret));
        // Plaintext stored values never match.
        assert!(!verify_secret("clave", "clave"));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"hello", b"hell"));
        assert!(constant_time_eq(b"", b""));
    }
}
