//! Storage adapters.
//!
//! - `config`: reads and writes the server's TOML configuration file.
//! - `row_store`: the TOML-backed [`RowStore`](crate::application::ports::RowStore)
//!   holding tests, classes, students and answers.
//! - `token_archive`: writes the per-round token lists handed to students.

pub mod config;
pub mod row_store;
pub mod token_archive;
