//! Content fingerprints for derived terminal state.

use sha2::{Digest, Sha256};

use terminal_capability::DerivedState;

/// Compute SHA256 hash of content.
pub fn compute_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Fingerprint of the fields derivation owns.
///
/// Capability maps and sets serialize in key order, so equal state always
/// hashes the same.
pub fn fingerprint(state: &DerivedState<'_>) -> Result<String, serde_json::Error> {
    let json = serde_json::to_vec(state)?;
    Ok(compute_hash(&json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use terminal_capability::Terminal;

    #[test]
    fn test_compute_hash() {
        let hash1 = compute_hash(b"hello");
        let hash2 = compute_hash(b"hello");
        let hash3 = compute_hash(b"world");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_fingerprint_ignores_provenance_and_version() {
        let terminal = Terminal::new("t-1");
        let mut stamped = terminal.clone();
        stamped.version = 7;
        stamped.provenance.has_been_refreshed = true;
        stamped.provenance.refreshed_by = Some("admin".to_string());

        assert_eq!(
            fingerprint(&terminal.derived()).unwrap(),
            fingerprint(&stamped.derived()).unwrap()
        );

        stamped.capabilities.contactless = Some(true);
        assert_ne!(
            fingerprint(&terminal.derived()).unwrap(),
            fingerprint(&stamped.derived()).unwrap()
        );
    }
}
