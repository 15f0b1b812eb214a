// Property checks over the label normalizer and the upload token codec.

use berthd::subdomain;
use berthd::upload_token;
use proptest::prelude::*;

proptest! {
    /// Whatever goes in, a successful normalization yields a valid label:
    /// lowercase alnum with inner hyphens, length 3..=63.
    #[test]
    fn normalized_labels_are_always_valid(raw in "\\PC{0,80}") {
        if let Ok(label) = subdomain::normalize(&raw) {
            prop_assert!(label.len() >= 3 && label.len() <= 63);
            prop_assert!(label.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-'));
            prop_assert!(!label.starts_with('-') && !label.ends_with('-'));
        }
    }

    /// Normalization is idempotent: a valid output re-normalizes to itself.
    #[test]
    fn normalize_is_idempotent(raw in "[a-zA-Z0-9-]{3,63}") {
        if let Ok(label) = subdomain::normalize(&raw) {
            prop_assert_eq!(subdomain::normalize(&label).unwrap(), label);
        }
    }

    /// Tokens round-trip for arbitrary ids and filenames, and never verify
    /// against a different deployment id.
    #[test]
    fn upload_tokens_round_trip(
        id in "[a-z0-9]{8,24}",
        other in "[a-z0-9]{8,24}",
        filename in "[a-zA-Z0-9_.-]{1,40}",
    ) {
        let secret = "0123456789abcdef0123456789abcdef";
        let token = upload_token::mint(&id, &filename, 600, secret).unwrap();
        let claims = upload_token::verify(&token, &id, secret).unwrap();
        prop_assert_eq!(&claims.deployment_id, &id);
        prop_assert_eq!(&claims.filename, &filename);
        if other != id {
            prop_assert!(upload_token::verify(&token, &other, secret).is_err());
        }
    }
}
