//! Identity management.
//!
//! A node is identified by nothing but its onion address, which is derived
//! from its RSA public key. There are no usernames on the wire.
//!
//! ```ignore
//! use ssn_core::identity::generate_identity;
//! let id = generate_identity()?;
//! println!("Your address: {}", id.onion_address());
//! ```

mod onion;

pub use onion::{NodeIdentity, OnionAddress, ONION_HOST_LEN};

use crate::crypto::keys::generate_private_key;
use crate::error::Result;

/// Generate a new random node identity.
pub fn generate_identity() -> Result<NodeIdentity> {
    NodeIdentity::from_private_key(generate_private_key()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_identity() {
        let identity = generate_identity().expect("should generate");
        let onion = identity.onion_address();
        assert!(onion.as_str().ends_with(".onion"));
        assert_eq!(onion.hostname().len(), ONION_HOST_LEN);
    }
}
