//! Protocol module containing the message type, the binary codec, and the
//! discovery announcement payload.

pub mod codec;
pub mod discovery;
pub mod messages;

pub use codec::{decode_message, encode_message, read_message, write_message, ProtocolError};
pub use discovery::DiscoveryAnnouncement;
pub use messages::*;
