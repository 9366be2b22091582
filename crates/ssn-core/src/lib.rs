//! # ssn core library
//!
//! Synchronisation core of an onion-routed social network node. Each node
//! authenticates peers with an RSA challenge-response bound to the dialed
//! onion address, exchanges posts and profile fields over a length-prefixed
//! binary protocol tunnelled through a SOCKS4a proxy, and notifies the right
//! peers of new content through circle membership.
//!
//! ## Security Model
//!
//! - Peers are identified only by onion addresses derived from their keys
//! - A peer proves key ownership before any circle-scoped content is served
//! - Unauthenticated peers only ever see public content
//! - Inbound frames are size-bounded and out-of-sequence frames close the
//!   connection without a reply
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        sync (engine, client, server,    │
//! │        gossip, scheduler, daemon)       │
//! ├─────────────────────────────────────────┤
//! │     storage     │         tor           │
//! ├─────────────────────────────────────────┤
//! │           protocol (wire)               │
//! ├─────────────────────────────────────────┤
//! │    crypto    │       identity           │
//! └─────────────────────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod logging;
pub mod protocol;
pub mod storage;
pub mod sync;
pub mod tor;

pub use config::NodeConfig;
pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
