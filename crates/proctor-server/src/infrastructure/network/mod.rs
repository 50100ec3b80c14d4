//! Network adapters of the exam server.
//!
//! # Sub-modules
//!
//! - `acceptor`: binds the TCP port and spawns one task per student connection.
//! - `connection`: runs the reader loop and writer task of one connection and
//!   feeds decoded messages into a
//!   [`SessionHandler`](crate::application::session::SessionHandler).
//! - `discovery`: UDP broadcaster implementing
//!   [`DiscoveryService`](crate::application::ports::DiscoveryService).
//! - `interfaces`: picks the LAN address to bind and advertise.
//!
//! # Ports
//!
//! | Port | Protocol | Purpose                                  |
//! |------|----------|------------------------------------------|
//! | 5050 | TCP      | Student sessions (framed messages)       |
//! | 5051 | UDP      | Discovery announcements (broadcast)      |

pub mod acceptor;
pub mod connection;
pub mod discovery;
pub mod interfaces;
