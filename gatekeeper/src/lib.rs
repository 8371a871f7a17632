//! Trust layer for an autonomous task-execution agent.
//!
//! Every state transition and tool invocation of a task is recorded in a
//! tamper-evident, hash-chained ledger before it takes effect. Tools run
//! only inside a bounded workspace scope, and a task can only reach
//! COMPLETE through a passing verdict written by a role distinct from the
//! executor.
//!
//! - **[`core`]**: Pure logic (digests, identifiers, scope checks, the state
//!   table). No I/O.
//! - **[`io`]**: Ledger, tool gateway, process runner, workspace, config.
//!
//! [`orchestrator`] sequences a task over both; [`verifier`] is the only code
//! path that can write a `VERIFY` event.

pub mod cancel;
pub mod core;
pub mod error;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod plan;
mod recorder;
pub mod task;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod verifier;

pub use cancel::CancelToken;
pub use error::{Error, FailureKind, Result};
pub use orchestrator::{Orchestrator, RunOutcome, RunRequest};
pub use plan::{PlannedAction, TaskPlan};
