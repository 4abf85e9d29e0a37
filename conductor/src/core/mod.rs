//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod completion;
pub mod contracts;
pub mod extract;
pub mod feedback;
pub mod graph;
pub mod production;
pub mod proposals;
pub mod transitions;
pub mod types;
