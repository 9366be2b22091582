//! Logging helpers.
//!
//! The library never installs a subscriber; binaries do. Per-connection and
//! per-peer context travels in `tracing` spans instead of a global logger.
//! Security-relevant events use the [`SECURITY_TARGET`] target so they can be
//! filtered or routed on their own.

use std::fmt;

/// Log target for security events (out-of-state frames, failed proofs).
pub const SECURITY_TARGET: &str = "ssn::security";

/// Emit a security event on [`SECURITY_TARGET`].
///
/// Accepts the same field syntax as `tracing::warn!`.
#[macro_export]
macro_rules! security_event {
    ($($arg:tt)+) => {
        ::tracing::warn!(target: $crate::logging::SECURITY_TARGET, $($arg)+)
    };
}

/// A wrapper that redacts sensitive data when displayed.
pub struct Redacted<T>(pub T);

impl<T: fmt::Display> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: fmt::Debug> fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

/// Shorten an onion address to its first and last four host characters.
pub struct RedactedOnion<'a>(pub &'a str);

impl<'a> fmt::Display for RedactedOnion<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let host = self.0.strip_suffix(".onion").unwrap_or(self.0);
        if host.len() >= 12 && host.is_ascii() {
            write!(f, "{}..{}.onion", &host[..4], &host[host.len() - 4..])
        } else {
            write!(f, "[REDACTED ONION]")
        }
    }
}

impl<'a> fmt::Debug for RedactedOnion<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Redact a byte slice, showing only length.
pub struct RedactedBytes<'a>(pub &'a [u8]);

impl<'a> fmt::Display for RedactedBytes<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} bytes]", self.0.len())
    }
}

impl<'a> fmt::Debug for RedactedBytes<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
