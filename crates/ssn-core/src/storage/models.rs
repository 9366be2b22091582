//! Records owned by the storage layer.

use crate::crypto::fields_hash;
use crate::error::{Error, Result};
use crate::identity::OnionAddress;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the reserved circle that implicitly contains every contact.
pub const PUBLIC_CIRCLE: &str = "Public";

/// Relationship status of a contact.
///
/// Ordered: everything from `Pending` up counts as a friendly relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ContactStatus {
    /// Rejected by the user.
    Blocked = 0,
    /// Inbound request awaiting our action.
    Open = 1,
    /// We asked; awaiting their acknowledgement.
    Pending = 2,
    /// Mutually authenticated and synced.
    Success = 3,
    /// One-way follow.
    Following = 4,
}

impl ContactStatus {
    /// Parse from the stored integer value.
    pub fn from_i64(value: i64) -> Result<Self> {
        match value {
            0 => Ok(Self::Blocked),
            1 => Ok(Self::Open),
            2 => Ok(Self::Pending),
            3 => Ok(Self::Success),
            4 => Ok(Self::Following),
            other => Err(Error::Storage(format!("unknown contact status {}", other))),
        }
    }

    /// Stored integer value.
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    /// Whether the relationship is at least PENDING.
    pub fn is_friendly(self) -> bool {
        self >= Self::Pending
    }
}

impl fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Blocked => "BLOCKED",
            Self::Open => "OPEN",
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Following => "FOLLOWING",
        };
        f.pad(s)
    }
}

impl std::str::FromStr for ContactStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BLOCKED" => Ok(Self::Blocked),
            "OPEN" => Ok(Self::Open),
            "PENDING" => Ok(Self::Pending),
            "SUCCESS" => Ok(Self::Success),
            "FOLLOWING" => Ok(Self::Following),
            _ => Err(Error::NotFound(format!("contact status {}", s))),
        }
    }
}

/// A relationship with a remote identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub id: i64,
    pub onion: OnionAddress,
    pub alias: String,
    pub status: ContactStatus,
    pub request_message: String,
}

/// Who created a circle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircleCreator {
    /// Created through the UI.
    User,
    /// Created by the sync core (one per successful contact).
    App,
}

impl CircleCreator {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::App => "APP",
        }
    }

    pub(crate) fn parse(s: &str) -> Self {
        if s == "APP" {
            Self::App
        } else {
            Self::User
        }
    }
}

/// A named visibility and fan-out group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Circle {
    pub id: i64,
    pub name: String,
    pub creator: CircleCreator,
}

impl Circle {
    /// Whether this is the implicit all-contacts circle.
    pub fn is_public(&self) -> bool {
        self.name == PUBLIC_CIRCLE
    }
}

/// A stored post or comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: i64,
    pub message: String,
    pub posted_at: i64,
    /// Local publication time, 0 while unpublished.
    pub published_at: i64,
    /// Publication time announced by the peer we pulled it from.
    pub remote_published_at: i64,
    pub ttl: u8,
    pub author: OnionAddress,
    pub originator: OnionAddress,
    pub hash: String,
    /// Local id of the parent, 0 for top-level posts.
    pub parent_id: i64,
    pub parent_hash: String,
    pub published: bool,
    pub deleted: bool,
}

impl Post {
    /// Whether this is a comment on another post.
    pub fn is_comment(&self) -> bool {
        self.parent_id != 0
    }
}

/// Content hash over a post's immutable fields.
pub fn post_hash(
    message: &str,
    author: &OnionAddress,
    originator: &OnionAddress,
    posted_at: i64,
    parent_hash: &str,
) -> String {
    let posted_at = posted_at.to_be_bytes();
    fields_hash([
        message.as_bytes(),
        author.as_str().as_bytes(),
        originator.as_str().as_bytes(),
        posted_at.as_slice(),
        parent_hash.as_bytes(),
    ])
}

/// A post as received from a peer.
///
/// `originator` is the authenticated identity of the connection it arrived
/// on, never a value read from the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingPost {
    pub message: String,
    pub posted_at: i64,
    pub published_at: i64,
    pub ttl: u8,
    pub author: OnionAddress,
    pub originator: OnionAddress,
    pub hash: String,
    pub parent_hash: String,
}

impl IncomingPost {
    /// Recompute the content hash under the bound originator.
    pub fn content_hash(&self) -> String {
        post_hash(
            &self.message,
            &self.author,
            &self.originator,
            self.posted_at,
            &self.parent_hash,
        )
    }
}

/// A single profile attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileField {
    pub key: String,
    pub value: String,
    pub changed_at: i64,
}

/// Change flags read by the UI poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    Posts,
    Contacts,
}

impl PendingKind {
    pub(crate) fn column(self) -> &'static str {
        match self {
            Self::Posts => "posts",
            Self::Contacts => "contacts",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn onion(s: &str) -> OnionAddress {
        OnionAddress::from_string(s).expect("valid onion")
    }

    #[test]
    fn test_status_order() {
        assert!(!ContactStatus::Blocked.is_friendly());
        assert!(!ContactStatus::Open.is_friendly());
        assert!(ContactStatus::Pending.is_friendly());
        assert!(ContactStatus::Success.is_friendly());
        assert!(ContactStatus::Following.is_friendly());
    }

    #[test]
    fn test_status_roundtrip() {
        for v in 0..5 {
            let s = ContactStatus::from_i64(v).expect("known");
            assert_eq!(s.as_i64(), v);
            assert_eq!(s.to_string().parse::<ContactStatus>().expect("parse"), s);
        }
        assert!(ContactStatus::from_i64(9).is_err());
    }

    #[test]
    fn test_hash_depends_on_originator() {
        let a = onion("aaaaaaaaaaaaaaaa.onion");
        let b = onion("bbbbbbbbbbbbbbbb.onion");
        assert_eq!(post_hash("hi", &a, &a, 10, ""), post_hash("hi", &a, &a, 10, ""));
        assert_ne!(post_hash("hi", &a, &a, 10, ""), post_hash("hi", &a, &b, 10, ""));
        assert_ne!(post_hash("hi", &a, &a, 10, ""), post_hash("hi", &a, &a, 11, ""));
    }
}
