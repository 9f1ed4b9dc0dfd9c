use sha2::{Digest, Sha256};

/// Hash a bearer token the way session rows store it (SHA-256 hex).
pub fn hash_access_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let out = hasher.finalize();
    hex::encode(out)
}

/// Exact comparison of the cron token against the configured secret.
///
/// An empty configured secret disables the trigger entirely.
pub fn cron_token_matches(provided: Option<&str>, expected: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    match provided {
        Some(p) => hash_access_token(p) == hash_access_token(expected),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_access_token_is_sha256_hex() {
        assert_eq!(
            hash_access_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_cron_token_matches() {
        assert!(cron_token_matches(Some("s3cret"), "s3cret"));
        assert!(!cron_token_matches(Some("s3cret "), "s3cret"));
        assert!(!cron_token_matches(Some("S3CRET"), "s3cret"));
        assert!(!cron_token_matches(None, "s3cret"));
        assert!(!cron_token_matches(Some(""), ""));
        assert!(!cron_token_matches(None, ""));
    }
}
