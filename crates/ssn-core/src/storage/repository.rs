//! The narrow storage interface the sync core depends on.

use super::models::{
    Circle, CircleCreator, Contact, ContactStatus, IncomingPost, PendingKind, Post, ProfileField,
};
use crate::error::Result;
use crate::identity::{NodeIdentity, OnionAddress};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared handle used by every concurrent task.
///
/// Methods are synchronous; never hold the lock across an `.await`.
pub type SharedRepository = Arc<Mutex<dyn Repository>>;

/// Storage operations consumed by the sync core.
pub trait Repository: Send {
    // identity

    /// Persist the local identity's private key and onion.
    fn store_identity_pem(&self, onion: &OnionAddress, pem: &str) -> Result<()>;

    /// Load the local identity, if one was stored.
    fn load_identity(&self) -> Result<Option<NodeIdentity>>;

    /// The local onion. Fails with `NotFound` before an identity is stored.
    fn self_onion(&self) -> Result<OnionAddress>;

    /// Row id of an onion, inserting it if unseen.
    fn get_or_create_onion(&self, onion: &OnionAddress) -> Result<i64>;

    // contacts

    fn add_contact(
        &self,
        onion: &OnionAddress,
        alias: &str,
        status: ContactStatus,
        request_message: &str,
    ) -> Result<Contact>;

    fn contact_by_onion(&self, onion: &OnionAddress) -> Result<Option<Contact>>;

    /// Contact with status PENDING or above.
    fn friendly_contact_by_onion(&self, onion: &OnionAddress) -> Result<Option<Contact>>;

    fn contacts_with_status(&self, statuses: &[ContactStatus]) -> Result<Vec<Contact>>;

    fn all_contacts(&self) -> Result<Vec<Contact>>;

    fn set_contact_status(&self, contact_id: i64, status: ContactStatus) -> Result<()>;

    /// Mark a contact SUCCESS, ensure a circle named after its alias
    /// containing it, and raise the contacts-pending flag.
    fn promote_to_success(&self, contact: &Contact) -> Result<Circle>;

    // circles

    fn circle_by_name(&self, name: &str) -> Result<Option<Circle>>;

    fn circle_by_id(&self, id: i64) -> Result<Option<Circle>>;

    fn create_circle(&self, name: &str, creator: CircleCreator) -> Result<Circle>;

    fn add_contact_to_circle(&self, circle_id: i64, contact_id: i64) -> Result<()>;

    /// Members of a circle. "Public" yields every contact.
    fn circle_contacts(&self, circle: &Circle) -> Result<Vec<Contact>>;

    fn post_circles(&self, post_id: i64) -> Result<Vec<Circle>>;

    // posts

    /// Author and publish a top-level post into the given circles.
    fn create_local_post(&self, message: &str, ttl: u8, circle_ids: &[i64]) -> Result<Post>;

    /// Author and publish a comment on a stored post.
    fn create_local_comment(&self, parent_id: i64, message: &str, ttl: u8) -> Result<Post>;

    /// Insert or update a pulled post, keyed by content hash.
    ///
    /// Returns `None` when the post names a parent we do not have.
    fn upsert_post(&self, post: &IncomingPost) -> Result<Option<Post>>;

    /// Publish a stored post. Returns false if it already was published.
    fn publish_post(&self, post_id: i64) -> Result<bool>;

    fn post_by_id(&self, post_id: i64) -> Result<Option<Post>>;

    fn post_by_hash(&self, hash: &str) -> Result<Option<Post>>;

    /// Posts served in reply to a PULL.
    fn posts_visible_to(&self, contact: Option<&Contact>, since: i64) -> Result<Vec<Post>>;

    // profiles

    fn set_local_profile(&self, key: &str, value: &str, circle_ids: &[i64]) -> Result<ProfileField>;

    /// Own profile fields visible to `contact`: all of them if any changed
    /// after `since`, otherwise none.
    fn profiles_visible_to(
        &self,
        contact: Option<&Contact>,
        since: i64,
    ) -> Result<Vec<ProfileField>>;

    /// Replace an identity's profile wholesale. An empty list is a no-op.
    fn replace_profiles(&self, onion: &OnionAddress, profiles: &[ProfileField]) -> Result<()>;

    fn profiles_of(&self, onion: &OnionAddress) -> Result<Vec<ProfileField>>;

    // sync bookkeeping

    /// Newest timestamp we hold from this contact, 0 if none.
    fn last_activity(&self, contact: &Contact) -> Result<i64>;

    fn mark_pending(&self, kind: PendingKind) -> Result<()>;

    /// Read and clear a pending flag.
    fn take_pending(&self, kind: PendingKind) -> Result<bool>;

    /// Store one pull reply atomically. Returns the posts that were stored.
    fn merge_pull(
        &self,
        onion: &OnionAddress,
        posts: &[IncomingPost],
        profiles: &[ProfileField],
    ) -> Result<Vec<Post>>;
}
