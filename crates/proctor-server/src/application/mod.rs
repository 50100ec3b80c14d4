//! Application layer of the exam server.
//!
//! # What lives here? (for beginners)
//!
//! This layer holds every rule of a live exam but none of the plumbing.  It
//! never opens a socket or a file: storage, LAN discovery and the token-list
//! archive are reached through the traits in [`ports`], and sessions talk to
//! their connection through an in-memory queue.  That is what lets the tests
//! run whole exam rounds without a network.
//!
//! # Sub-modules
//!
//! - **`dashboard`** – The global state machine the proctor drives
//!   (select, host, start, pause, resume, extend, end) and the countdown task.
//!
//! - **`session`** – The per-connection protocol handler: authentication and
//!   every request a student client can make.
//!
//! - **`context`** – The shared `ServerContext` and the session registry,
//!   including the hand-raise ordering shown to the proctor.
//!
//! - **`timer`** – Pure countdown arithmetic with pause/resume/extend.
//!
//! - **`tokens`** – One-time six-digit tokens of a hosting round.
//!
//! - **`warnings`** – Warnings reported by clients until dismissed.
//!
//! - **`content`** – Turns storage rows into tests, classes and students, and
//!   stores answers.
//!
//! - **`ports`** – Traits implemented by the infrastructure layer.

pub mod content;
pub mod context;
pub mod dashboard;
pub mod ports;
pub mod session;
pub mod timer;
pub mod tokens;
pub mod warnings;
