//! Checksum calculation for delivered files
//!
//! The delivery record and the archive manifest both carry the SHA-256 of the
//! rendered CSV so an archived copy can be matched against what the print
//! tool picked up.

use sha2::{Digest, Sha256};

/// Calculate SHA-256 checksum of raw bytes
///
/// Returns a hex-encoded SHA-256 checksum string (64 characters).
///
/// # Examples
///
/// ```
/// use labelbridge::core::checksum::calculate_checksum_bytes;
///
/// let checksum = calculate_checksum_bytes(b"batch_id,qty\n");
/// assert_eq!(checksum.len(), 64);
/// ```
pub fn calculate_checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    format!("{result:x}")
}

/// Whether `data` hashes to `expected` (hex, case-insensitive)
pub fn verify_checksum(data: &[u8], expected: &str) -> bool {
    calculate_checksum_bytes(data).eq_ignore_ascii_case(expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_checksum_known_value() {
        assert_eq!(
            calculate_checksum_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_calculate_checksum_bytes_deterministic() {
        let data = b"batch_id,site\nB1,1\n";
        assert_eq!(calculate_checksum_bytes(data), calculate_checksum_bytes(data));
        assert_ne!(
            calculate_checksum_bytes(data),
            calculate_checksum_bytes(b"batch_id,site\nB1,2\n")
        );
    }

    #[test]
    fn test_verify_checksum() {
        let sum = calculate_checksum_bytes(b"x");
        assert!(verify_checksum(b"x", &sum.to_uppercase()));
        assert!(!verify_checksum(b"y", &sum));
    }
}
