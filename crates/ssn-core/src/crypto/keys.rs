//! RSA key handling.
//!
//! Node identities are RSA keys. Public keys travel as PKCS#1 DER (inside
//! challenges) or as modulus/exponent pairs (AUTH payload); private keys are
//! persisted as PKCS#1 PEM.

use crate::error::{Error, Result};
use rand::rngs::OsRng;
use rsa::pkcs1::{
    DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding,
};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use zeroize::Zeroizing;

/// Modulus size of identity keys generated by this node.
///
/// Peers may present other sizes; the challenge field is length-delimited.
pub const RSA_KEY_BITS: usize = 1024;

/// Upper bound on an encoded public key accepted from the network.
pub const MAX_PUBLIC_KEY_DER_SIZE: usize = 1024;

/// Generate a fresh identity key.
pub fn generate_private_key() -> Result<RsaPrivateKey> {
    RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
        .map_err(|e| Error::Crypto(format!("key generation failed: {}", e)))
}

/// Encode a public key as PKCS#1 `RSAPublicKey` DER.
pub fn public_key_to_der(key: &RsaPublicKey) -> Result<Vec<u8>> {
    key.to_pkcs1_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| Error::InvalidKey(e.to_string()))
}

/// Decode a PKCS#1 DER public key. Trailing bytes are rejected.
pub fn public_key_from_der(der: &[u8]) -> Result<RsaPublicKey> {
    if der.len() > MAX_PUBLIC_KEY_DER_SIZE {
        return Err(Error::InvalidKey("public key encoding too large".into()));
    }
    RsaPublicKey::from_pkcs1_der(der).map_err(|e| Error::InvalidKey(e.to_string()))
}

/// Build a public key from its decimal modulus and exponent.
pub fn public_key_from_parts(modulus: &str, exponent: u64) -> Result<RsaPublicKey> {
    let n = BigUint::parse_bytes(modulus.as_bytes(), 10)
        .ok_or_else(|| Error::InvalidKey("modulus is not a decimal integer".into()))?;
    RsaPublicKey::new(n, BigUint::from(exponent)).map_err(|e| Error::InvalidKey(e.to_string()))
}

/// Split a public key into its decimal modulus and exponent.
pub fn public_key_parts(key: &RsaPublicKey) -> Result<(String, u64)> {
    let bytes = key.e().to_bytes_be();
    if bytes.len() > 8 {
        return Err(Error::InvalidKey("exponent out of range".into()));
    }
    let e = bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
    Ok((key.n().to_str_radix(10), e))
}

/// Parse a PKCS#1 PEM private key.
pub fn private_key_from_pem(pem: &str) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs1_pem(pem).map_err(|e| Error::InvalidKey(e.to_string()))
}

/// Serialise a private key to PKCS#1 PEM. The buffer is zeroized on drop.
pub fn private_key_to_pem(key: &RsaPrivateKey) -> Result<Zeroizing<String>> {
    key.to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| Error::InvalidKey(e.to_string()))
}
