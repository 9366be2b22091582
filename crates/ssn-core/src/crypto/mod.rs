//! Cryptographic primitives.
//!
//! - **RSA**: node identity keys (PKCS#1 DER/PEM)
//! - **RSA-OAEP (SHA-224)**: challenge encryption
//! - **SHA-256**: nonce and key witnesses, post hashes
//! - **SHA-1**: onion address derivation only
//!
//! Everything comes from the RustCrypto crates; nothing here is hand-rolled
//! beyond gluing them together.

pub mod auth;
pub mod keys;

pub use auth::{generate_challenge, generate_response, verify_response, Challenge, Response};
pub use keys::{generate_private_key, RSA_KEY_BITS};

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 over a sequence of length-delimited fields.
///
/// Each field is prefixed with its big-endian u32 length so that
/// `("ab", "c")` and `("a", "bc")` hash differently.
pub fn fields_hash<'a>(fields: impl IntoIterator<Item = &'a [u8]>) -> String {
    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update((field.len() as u32).to_be_bytes());
        hasher.update(field);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_hash_is_delimited() {
        let a = fields_hash([b"ab".as_slice(), b"c".as_slice()]);
        let b = fields_hash([b"a".as_slice(), b"bc".as_slice()]);
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fields_hash_is_deterministic() {
        let a = fields_hash([b"hello".as_slice()]);
        let b = fields_hash([b"hello".as_slice()]);
        assert_eq!(a, b);
    }
}
