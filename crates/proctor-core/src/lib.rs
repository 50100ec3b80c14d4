//! # proctor-core
//!
//! Shared library for the exam proctor containing the wire message type, the
//! binary codec, the UDP discovery payload, and the exam content types.
//!
//! This crate is used by the server and by any student client.  It has no
//! dependencies on sockets, UI frameworks, or storage.
//!
//! # Architecture overview
//!
//! A proctor runs the server on a classroom machine.  Students start a client
//! which listens for the server's UDP discovery broadcast, connects over TCP,
//! authenticates with a one-time token, and then pulls exam tasks one at a
//! time while the proctor controls the run (start, pause, resume, extend, end).
//!
//! - **`protocol`** – How bytes travel over the network.  A [`Message`] is a
//!   sender, an open string type tag, a token, and ordered string arguments,
//!   encoded as length-prefixed UTF-8 fields.  The discovery payload is a
//!   `key=value;` text line.
//!
//! - **`domain`** – The immutable content snapshot a run works against:
//!   a [`Test`] with its ordered [`Task`]s.

pub mod domain;
pub mod protocol;

pub use domain::exam::{Task, Test};
pub use protocol::codec::{decode_message, encode_message, read_message, write_message, ProtocolError};
pub use protocol::discovery::DiscoveryAnnouncement;
pub use protocol::messages::{Message, MessageType};
