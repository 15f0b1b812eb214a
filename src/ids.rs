// ids.rs — deployment id generation.

use rand::rngs::OsRng;
use rand::RngCore;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const DEPLOYMENT_ID_LEN: usize = 16;

/// Generate a URL-safe, collision-resistant deployment id.
///
/// 16 characters of base-36 ≈ 82 bits of entropy. The id doubles as the
/// first path component of the mirrored build source and as the suffix of
/// the vault secret name, so the alphabet stays lowercase alphanumeric.
pub fn deployment_id() -> String {
    random_string(DEPLOYMENT_ID_LEN)
}

/// Random lowercase-alphanumeric string of the given length.
pub fn random_string(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
        .iter()
        .map(|b| ALPHABET[(*b as usize) % ALPHABET.len()] as char)
        .collect()
}

/// Opaque session id: 128+ bits of entropy, hex-encoded.
pub fn session_id() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn deployment_ids_are_url_safe_and_distinct() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let id = deployment_id();
            assert_eq!(id.len(), 16);
            assert!(id.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()));
            assert!(seen.insert(id));
        }
    }

    #[test]
    fn session_ids_are_64_hex_chars() {
        let id = session_id();
        assert_eq!(id.len(), 64);
        assert!(id.bytes().all(|b| b.is_ascii_hexdigit()));
    }
}
