//! Goal-driven orchestration of an external coding agent.
//!
//! The crate runs a Planner/Actor/Critic loop over a dependency-aware task
//! graph until every core goal is met, no work can be produced, or the step
//! budget is spent. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (graph, state machine, proposal
//!   decoding, completion gate). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, git, processes, the
//!   agent adapter, verification checks). Isolated behind traits for tests.
//! - **[`agents`]**: Oracle roles built on the agent adapter.
//!
//! [`planner`], [`parallel`] and [`orchestrator`] coordinate these into the
//! control loop behind `conductor run`.

pub mod agents;
pub mod core;
pub mod evaluators;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod parallel;
pub mod planner;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
