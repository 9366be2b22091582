//! Wire protocol.
//!
//! A length-prefixed binary framing carried over onion TCP streams. Every
//! connection realises a single logical exchange and is then closed.
//!
//! ## Packet Structure
//!
//! ```text
//! byte(type) ‖ uint32_BE(length) ‖ payload[length]
//! ```
//!
//! | Tag | Type            | Direction       | Payload                      |
//! |-----|-----------------|-----------------|------------------------------|
//! | `A` | AUTH            | client → server | `{N, E}`                     |
//! | `C` | CHALLENGE       | server → client | `{HR, PubKey, Enc}`          |
//! | `R` | RESPONSE        | client → server | `{R}`                        |
//! | `P` | PULL            | client → server | timestamp                    |
//! | `Q` | PUSH_POST       | server → client | post                         |
//! | `U` | PUSH_PROFILE    | server → client | `{Key, Value, ChangedAt}`    |
//! | `T` | TRIGGER         | client → server | empty                        |
//! | `B` | CONTACT_REQUEST | client → server | `{Message, Onion}`           |
//! | `S` | SUCCESS         | server → client | empty                        |

mod codec;
mod packet;
mod types;

pub use codec::{
    read_header, read_payload, write_framed, write_packet, Frame, FrameReader,
    DEFAULT_IO_TIMEOUT, INBOUND_PAYLOAD_LIMIT, PULL_INITIAL_BUFFER, PULL_PAYLOAD_LIMIT,
    WRITE_CHUNK_SIZE,
};
pub use packet::{encode, PacketHeader, HEADER_SIZE};
pub use types::{
    AuthPayload, ChallengePayload, ContactRequestPayload, PacketType, PullPayload,
    PushPostPayload, PushProfilePayload, ResponsePayload,
};
