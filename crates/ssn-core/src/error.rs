//! Error types for the ssn synchronisation core.
//!
//! Messages are intentionally short: they end up in logs that may be shared,
//! so they never carry key material or payload bytes.

use thiserror::Error;

/// Core error type for ssn operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Dialing the proxy or the peer failed, or the socket broke mid-exchange.
    /// Retried by the next scheduled resync, never inline.
    #[error("transport error: {0}")]
    Transport(String),

    /// The SOCKS proxy answered with the "rejected or failed" status.
    #[error("proxy rejected connection to {0}")]
    ProxyRejected(String),

    /// A single read or write exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// Malformed or out-of-sequence frame. Terminal for the connection.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A peer announced a payload larger than the side's ceiling.
    #[error("payload of {length} bytes exceeds limit of {limit}")]
    ResourceLimitExceeded {
        /// Announced payload length.
        length: u32,
        /// Ceiling in force on this side of the connection.
        limit: u32,
    },

    /// The response nonce did not match the one we generated.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// The key in a challenge does not belong to the onion we dialed.
    #[error("challenge key does not match dialed onion")]
    IdentityMismatch,

    /// The key hash recovered from a challenge does not match its key field.
    #[error("challenge key integrity check failed")]
    KeyIntegrityFailure,

    /// The recovered nonce does not match the challenge witness.
    #[error("challenge nonce integrity check failed")]
    NonceIntegrityFailure,

    /// Cryptographic operation failed.
    /// Details are intentionally vague to prevent oracle attacks.
    #[error("cryptographic operation failed")]
    Crypto(String),

    /// Key parsing or validation failed.
    #[error("invalid key material")]
    InvalidKey(String),

    /// Onion address syntax or derivation error.
    #[error("identity error: {0}")]
    Identity(String),

    /// Payload (de)serialisation error.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Storage operation failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Result type alias using ssn's Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Errors raised by a failed identity proof.
    ///
    /// The client driver treats these as terminal for the AUTH attempt only.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Error::AuthenticationFailed
                | Error::IdentityMismatch
                | Error::KeyIntegrityFailure
                | Error::NonceIntegrityFailure
        )
    }

    /// Errors that must be reported on the security log target.
    pub fn is_security_event(&self) -> bool {
        self.is_auth_failure() || matches!(self, Error::ResourceLimitExceeded { .. })
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Encoding(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failures_are_security_events() {
        for e in [
            Error::AuthenticationFailed,
            Error::IdentityMismatch,
            Error::KeyIntegrityFailure,
            Error::NonceIntegrityFailure,
        ] {
            assert!(e.is_auth_failure());
            assert!(e.is_security_event());
        }
        assert!(!Error::Timeout.is_auth_failure());
        assert!(!Error::Transport("closed".into()).is_security_event());
    }

    #[test]
    fn test_limit_message() {
        let e = Error::ResourceLimitExceeded { length: 5000, limit: 4096 };
        assert_eq!(e.to_string(), "payload of 5000 bytes exceeds limit of 4096");
        assert!(e.is_security_event());
    }
}
