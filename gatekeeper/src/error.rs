//! Error type for the trust layer.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::core::types::{Actor, EventType, TaskState};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse classification callers use to decide what went wrong.
///
/// A verification BLOCK is never reported as an infrastructure failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The task's own actions failed or were refused (tool failure, scope).
    TaskLogic,
    /// The verifier refused to let the task complete.
    VerificationBlocked,
    /// Ledger, process plumbing, or workspace preparation failed.
    Infrastructure,
    /// The caller aborted the task.
    Cancelled,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("path out of scope: {} (allowed root {})", path.display(), allowed_root.display())]
    ScopeViolation {
        path: PathBuf,
        allowed_root: PathBuf,
    },

    #[error("verification script not registered: {}", .0.display())]
    UnregisteredScript(PathBuf),

    #[error("{tool} timed out after {timeout:?}")]
    TimeoutExceeded { tool: String, timeout: Duration },

    #[error("{tool} failed (exit_code={exit_code})")]
    ToolExecutionFailed { tool: String, exit_code: i32 },

    #[error("verification blocked completion (exit_code={exit_code})")]
    VerificationBlocked { exit_code: i32 },

    #[error("ledger io failed: {context}")]
    LedgerIo {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger serialization failed")]
    LedgerSerialization(#[source] serde_json::Error),

    #[error("ledger chain corrupted at {} line {line}: {reason}", path.display())]
    ChainCorruption {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("{actor} may not record {event_type} events")]
    UnauthorizedActor { actor: Actor, event_type: EventType },

    #[error("invalid configuration: {0:#}")]
    Config(#[source] anyhow::Error),

    #[error("workspace preparation failed: {0:#}")]
    PreparationFailed(#[source] anyhow::Error),

    #[error("resolve workspace path {}", path.display())]
    WorkspaceResolve {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} process plumbing failed")]
    Process {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid state transition {from} -> {to}")]
    InvalidTransition { from: TaskState, to: TaskState },

    #[error("task cancelled")]
    Cancelled,
}

impl Error {
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::ScopeViolation { .. }
            | Error::UnregisteredScript(_)
            | Error::TimeoutExceeded { .. }
            | Error::ToolExecutionFailed { .. } => FailureKind::TaskLogic,
            Error::VerificationBlocked { .. } => FailureKind::VerificationBlocked,
            Error::LedgerIo { .. }
            | Error::LedgerSerialization(_)
            | Error::ChainCorruption { .. }
            | Error::UnauthorizedActor { .. }
            | Error::Config(_)
            | Error::PreparationFailed(_)
            | Error::WorkspaceResolve { .. }
            | Error::Process { .. }
            | Error::InvalidTransition { .. } => FailureKind::Infrastructure,
            Error::Cancelled => FailureKind::Cancelled,
        }
    }

    /// True when the ledger itself can no longer be trusted to take writes.
    pub fn is_ledger_failure(&self) -> bool {
        matches!(
            self,
            Error::LedgerIo { .. } | Error::LedgerSerialization(_) | Error::ChainCorruption { .. }
        )
    }

    pub(crate) fn ledger_io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::LedgerIo {
            context: context.into(),
            source,
        }
    }
}
