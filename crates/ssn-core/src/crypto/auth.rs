//! RSA challenge-response identity proof.
//!
//! The verifier picks a 32-byte nonce `r` and encrypts `r || SHA256(B)` to
//! the prover's public key with RSA-OAEP (SHA-224, empty label), where `B`
//! is the verifier's own public key. The prover decrypts, checks that `B`
//! belongs to the onion it dialed, checks both hashes, and returns `r`.
//!
//! Checks run in a fixed order so the first failing one decides the error:
//! identity, key integrity, nonce integrity.

use crate::crypto::keys::{public_key_from_der, public_key_to_der};
use crate::error::{Error, Result};
use crate::identity::OnionAddress;
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha224, Sha256};
use zeroize::Zeroizing;

/// Nonce length in bytes.
pub const NONCE_SIZE: usize = 32;

/// SHA-256 digest length in bytes.
pub const HASH_SIZE: usize = 32;

/// A challenge sent by the verifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Challenge {
    /// `SHA256(r)`, a witness for the nonce.
    pub hr: [u8; HASH_SIZE],
    /// The verifier's public key, PKCS#1 DER.
    pub pub_key: Vec<u8>,
    /// `RSA-OAEP(prover_key, r || SHA256(pub_key))`.
    pub enc: Vec<u8>,
}

/// The prover's answer: the recovered nonce.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    /// The nonce recovered from the challenge.
    pub r: [u8; NONCE_SIZE],
}

fn oaep() -> Oaep {
    Oaep::new::<Sha224>()
}

fn sha256(data: &[u8]) -> [u8; HASH_SIZE] {
    Sha256::digest(data).into()
}

/// Build a challenge for `prover`, identifying ourselves with `verifier`.
///
/// Returns the challenge and the nonce the response must echo. The caller
/// keeps the nonce and passes it to [`verify_response`].
pub fn generate_challenge(
    prover: &RsaPublicKey,
    verifier: &RsaPublicKey,
) -> Result<(Challenge, [u8; NONCE_SIZE])> {
    let mut r = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut r);

    let pub_key = public_key_to_der(verifier)?;

    let mut plaintext = Zeroizing::new(Vec::with_capacity(NONCE_SIZE + HASH_SIZE));
    plaintext.extend_from_slice(&r);
    plaintext.extend_from_slice(&sha256(&pub_key));

    let enc = prover
        .encrypt(&mut OsRng, oaep(), &plaintext)
        .map_err(|e| Error::Crypto(format!("challenge encryption failed: {}", e)))?;

    Ok((
        Challenge {
            hr: sha256(&r),
            pub_key,
            enc,
        },
        r,
    ))
}

/// Answer a challenge with our private key.
///
/// `dialed` is the onion we connected to; the challenge key must hash to it.
pub fn generate_response(
    challenge: &Challenge,
    key: &RsaPrivateKey,
    dialed: &OnionAddress,
) -> Result<Response> {
    let plaintext = Zeroizing::new(
        key.decrypt(oaep(), &challenge.enc)
            .map_err(|_| Error::Crypto("challenge decryption failed".into()))?,
    );
    if plaintext.len() != NONCE_SIZE + HASH_SIZE {
        return Err(Error::Crypto("challenge plaintext has wrong length".into()));
    }
    let (r, hb) = plaintext.split_at(NONCE_SIZE);

    let verifier = public_key_from_der(&challenge.pub_key)?;
    if OnionAddress::from_public_key(&verifier)? != *dialed {
        return Err(Error::IdentityMismatch);
    }

    if !constant_time_eq(&sha256(&challenge.pub_key), hb) {
        return Err(Error::KeyIntegrityFailure);
    }

    if !constant_time_eq(&sha256(r), &challenge.hr) {
        return Err(Error::NonceIntegrityFailure);
    }

    let mut out = [0u8; NONCE_SIZE];
    out.copy_from_slice(r);
    Ok(Response { r: out })
}

/// Check a response against the nonce we generated.
pub fn verify_response(response: &Response, expected: &[u8; NONCE_SIZE]) -> Result<()> {
    if constant_time_eq(&response.r, expected) {
        Ok(())
    } else {
        Err(Error::AuthenticationFailed)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
