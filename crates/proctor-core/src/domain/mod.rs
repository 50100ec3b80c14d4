//! Exam content domain types.
//!
//! Content is loaded from the storage collaborator once per hosting round and
//! is never mutated afterwards; sessions share it through an `Arc<Test>`.

pub mod exam;

pub use exam::{Task, Test};
