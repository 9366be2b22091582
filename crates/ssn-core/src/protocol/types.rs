//! Packet types and payload definitions.
//!
//! Payloads are JSON objects with PascalCase field names; byte fields travel
//! as hex strings. TRIGGER and SUCCESS carry no payload.

use crate::crypto::keys::{public_key_from_parts, public_key_parts};
use crate::crypto::{Challenge, Response};
use crate::error::{Error, Result};
use crate::identity::OnionAddress;
use crate::storage::{IncomingPost, Post, ProfileField};
use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};

/// Serde helper for variable-length byte fields as hex.
mod serde_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

/// Serde helper for 32-byte fields (nonces, hashes) as hex.
mod serde_hex32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

/// Packet types. The discriminant is the ASCII tag sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Unknown or zero tag.
    Invalid = 0x00,
    /// Client presents its public key.
    Auth = b'A',
    /// Client asks for content newer than a timestamp.
    Pull = b'P',
    /// Client signals it has new content.
    Trigger = b'T',
    /// Server challenges the presented key.
    Challenge = b'C',
    /// Client answers a challenge.
    Response = b'R',
    /// One post of a pull reply.
    PushPost = b'Q',
    /// Acknowledgement, or end of a pull reply.
    Success = b'S',
    /// Request to become a contact.
    ContactRequest = b'B',
    /// One profile attribute of a pull reply.
    PushProfile = b'U',
}

impl PacketType {
    /// Map a raw tag to a packet type. Unknown tags map to `Invalid`.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            b'A' => Self::Auth,
            b'P' => Self::Pull,
            b'T' => Self::Trigger,
            b'C' => Self::Challenge,
            b'R' => Self::Response,
            b'Q' => Self::PushPost,
            b'S' => Self::Success,
            b'B' => Self::ContactRequest,
            b'U' => Self::PushProfile,
            _ => Self::Invalid,
        }
    }

    /// Convert to byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// AUTH payload: the client's RSA public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthPayload {
    /// Modulus, decimal.
    pub n: String,
    /// Public exponent.
    pub e: u64,
}

impl AuthPayload {
    /// Build from a public key.
    pub fn from_public_key(key: &RsaPublicKey) -> Result<Self> {
        let (n, e) = public_key_parts(key)?;
        Ok(Self { n, e })
    }

    /// Rebuild the public key.
    pub fn public_key(&self) -> Result<RsaPublicKey> {
        public_key_from_parts(&self.n, self.e)
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// CHALLENGE payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengePayload {
    #[serde(rename = "HR", with = "serde_hex32")]
    pub hr: [u8; 32],
    #[serde(rename = "PubKey", with = "serde_hex")]
    pub pub_key: Vec<u8>,
    #[serde(rename = "Enc", with = "serde_hex")]
    pub enc: Vec<u8>,
}

impl ChallengePayload {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl From<Challenge> for ChallengePayload {
    fn from(c: Challenge) -> Self {
        Self {
            hr: c.hr,
            pub_key: c.pub_key,
            enc: c.enc,
        }
    }
}

impl From<ChallengePayload> for Challenge {
    fn from(p: ChallengePayload) -> Self {
        Self {
            hr: p.hr,
            pub_key: p.pub_key,
            enc: p.enc,
        }
    }
}

/// RESPONSE payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePayload {
    #[serde(rename = "R", with = "serde_hex32")]
    pub r: [u8; 32],
}

impl ResponsePayload {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl From<Response> for ResponsePayload {
    fn from(r: Response) -> Self {
        Self { r: r.r }
    }
}

impl From<ResponsePayload> for Response {
    fn from(p: ResponsePayload) -> Self {
        Self { r: p.r }
    }
}

/// PULL payload: a bare JSON integer, seconds since the epoch.
pub struct PullPayload;

impl PullPayload {
    /// Serialize a timestamp.
    pub fn encode(since: i64) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&since)?)
    }

    /// Deserialize a timestamp.
    pub fn decode(bytes: &[u8]) -> Result<i64> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// PUSH_POST payload.
///
/// There is deliberately no originator field: the receiver binds it to the
/// peer the connection was opened to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PushPostPayload {
    pub message: String,
    pub posted_at: i64,
    pub published_at: i64,
    #[serde(rename = "TTL")]
    pub ttl: u8,
    pub author: String,
    pub hash: String,
    pub parent_hash: String,
}

impl PushPostPayload {
    /// Build from a stored post. The served TTL is already decremented.
    pub fn from_post(post: &Post) -> Self {
        Self {
            message: post.message.clone(),
            posted_at: post.posted_at,
            published_at: post.published_at,
            ttl: post.ttl.saturating_sub(1),
            author: post.author.to_string(),
            hash: post.hash.clone(),
            parent_hash: post.parent_hash.clone(),
        }
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode, binding the originator to `origin`.
    pub fn decode(bytes: &[u8], origin: &OnionAddress) -> Result<IncomingPost> {
        let p: Self = serde_json::from_slice(bytes)?;
        let author = OnionAddress::from_string(p.author)
            .map_err(|_| Error::Protocol("post author is not an onion address".into()))?;
        Ok(IncomingPost {
            message: p.message,
            posted_at: p.posted_at,
            published_at: p.published_at,
            ttl: p.ttl,
            author,
            originator: origin.clone(),
            hash: p.hash,
            parent_hash: p.parent_hash,
        })
    }
}

/// PUSH_PROFILE payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PushProfilePayload {
    pub key: String,
    pub value: String,
    pub changed_at: i64,
}

impl PushProfilePayload {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from bytes.
    pub fn decode(bytes: &[u8]) -> Result<ProfileField> {
        let p: Self = serde_json::from_slice(bytes)?;
        Ok(ProfileField {
            key: p.key,
            value: p.value,
            changed_at: p.changed_at,
        })
    }
}

impl From<&ProfileField> for PushProfilePayload {
    fn from(f: &ProfileField) -> Self {
        Self {
            key: f.key.clone(),
            value: f.value.clone(),
            changed_at: f.changed_at,
        }
    }
}

/// CONTACT_REQUEST payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContactRequestPayload {
    pub message: String,
    pub onion: String,
}

impl ContactRequestPayload {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// The requesting onion, validated.
    pub fn onion(&self) -> Result<OnionAddress> {
        OnionAddress::from_string(self.onion.as_str())
            .map_err(|_| Error::Protocol("contact request onion is invalid".into()))
    }
}
