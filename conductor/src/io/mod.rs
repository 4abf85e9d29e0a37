//! I/O helpers for the orchestrator: persistence, processes and the agent seam.

pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod docs;
pub mod events;
pub mod git;
pub mod init;
pub mod jobs;
pub mod notes;
pub mod process;
pub mod prompt;
pub mod store;
pub mod verify;
