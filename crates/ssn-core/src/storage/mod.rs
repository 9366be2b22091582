//! Local storage.
//!
//! The sync core only sees the [`Repository`] trait; [`Database`] is the
//! SQLite implementation. Storage errors are ordinary `Err` values and never
//! bring the node down.

mod database;
mod models;
mod repository;
mod schema;

pub use database::{Database, DatabaseConfig};
pub use models::{
    post_hash, Circle, CircleCreator, Contact, ContactStatus, IncomingPost, PendingKind, Post,
    ProfileField, PUBLIC_CIRCLE,
};
pub use repository::{Repository, SharedRepository};

/// Default database filename.
pub const DEFAULT_DB_NAME: &str = "ssn.db";
