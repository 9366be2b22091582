//! Peer synchronisation.
//!
//! ```text
//! scheduler ─┐                       ┌─> client ──> dialer ──> peer's server
//! gossip ────┼─> SyncEngine ─────────┤
//! daemon ────┘   (identity, store,   └─> storage (Repository)
//!                 dialer, locks)
//! ```
//!
//! Outbound work goes through [`PeerClient`]; inbound connections are
//! served by [`serve_connection`]. A TRIGGER received by the server makes it
//! pull back from the sender on the same task.

mod client;
mod daemon;
mod engine;
mod gossip;
mod locks;
mod scheduler;
mod server;

pub use client::{PeerClient, PullReply};
pub use daemon::Daemon;
pub use engine::{SyncEngine, SyncOutcome};
pub use gossip::resolve_targets;
pub use locks::PeerLocks;
pub use scheduler::{ResyncReport, ResyncScheduler, RESYNC_STATUSES};
pub use server::{serve_connection, StateKind, ALLOWED};
