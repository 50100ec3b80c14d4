//! Infrastructure layer of the exam server.
//!
//! Contains OS-facing adapters: TCP and UDP sockets, the TOML data and
//! configuration files, the token-list archive, and the UI command bridge.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `proctor_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod storage;
pub mod ui_bridge;
