//! Onion address derivation and node identity.
//!
//! An onion address is derived from an RSA public key:
//!
//! 1. Encode the key as PKCS#1 `RSAPublicKey` DER
//! 2. SHA-1 the encoding
//! 3. Base32 (RFC 4648) the digest, lowercase, keep the first 16 characters
//! 4. Append ".onion"
//!
//! Two peers are the same identity iff their onion strings match.

use crate::crypto::keys::{private_key_from_pem, private_key_to_pem, public_key_to_der};
use crate::error::{Error, Result};
use crate::logging::Redacted;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;
use zeroize::Zeroizing;

/// Number of base32 characters in the host part.
pub const ONION_HOST_LEN: usize = 16;

const ONION_SUFFIX: &str = ".onion";

/// A validated onion address, `^[a-z2-7]{16}\.onion$`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OnionAddress(String);

impl OnionAddress {
    /// Parse and validate an onion address string. Input is case-folded.
    pub fn from_string(s: impl Into<String>) -> Result<Self> {
        let s = s.into().to_ascii_lowercase();

        let host = s
            .strip_suffix(ONION_SUFFIX)
            .ok_or_else(|| Error::Identity("must end with .onion".into()))?;

        if host.len() != ONION_HOST_LEN {
            return Err(Error::Identity(format!(
                "host part must be {} characters",
                ONION_HOST_LEN
            )));
        }

        if !host.bytes().all(|c| matches!(c, b'a'..=b'z' | b'2'..=b'7')) {
            return Err(Error::Identity("invalid base32 character".into()));
        }

        Ok(Self(s))
    }

    /// Derive the onion address of an RSA public key.
    pub fn from_public_key(key: &RsaPublicKey) -> Result<Self> {
        let der = public_key_to_der(key)?;
        let digest = Sha1::digest(&der);
        let encoded = base32::encode(base32::Alphabet::Rfc4648 { padding: true }, &digest);
        let host = encoded[..ONION_HOST_LEN].to_ascii_lowercase();
        Ok(Self(format!("{}{}", host, ONION_SUFFIX)))
    }

    /// Get the full address as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get just the hostname (without .onion suffix).
    pub fn hostname(&self) -> &str {
        &self.0[..ONION_HOST_LEN]
    }
}

impl fmt::Display for OnionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for OnionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OnionAddress({})", self.0)
    }
}

impl TryFrom<String> for OnionAddress {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::from_string(s)
    }
}

impl From<OnionAddress> for String {
    fn from(addr: OnionAddress) -> Self {
        addr.0
    }
}

/// The local node's identity: its RSA key and the onion derived from it.
#[derive(Clone)]
pub struct NodeIdentity {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
    onion_address: OnionAddress,
}

impl NodeIdentity {
    /// Wrap an existing private key.
    pub fn from_private_key(private_key: RsaPrivateKey) -> Result<Self> {
        let public_key = private_key.to_public_key();
        let onion_address = OnionAddress::from_public_key(&public_key)?;
        Ok(Self {
            private_key,
            public_key,
            onion_address,
        })
    }

    /// Restore from a PKCS#1 PEM private key.
    pub fn from_pem(pem: &str) -> Result<Self> {
        Self::from_private_key(private_key_from_pem(pem)?)
    }

    /// Export the private key as PKCS#1 PEM.
    pub fn to_pem(&self) -> Result<Zeroizing<String>> {
        private_key_to_pem(&self.private_key)
    }

    /// Our onion address.
    pub fn onion_address(&self) -> &OnionAddress {
        &self.onion_address
    }

    /// Our public key.
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// Our private key.
    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }
}

impl fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeIdentity")
            .field("onion_address", &self.onion_address)
            .field("private_key", &Redacted(()))
            .finish()
    }
}
