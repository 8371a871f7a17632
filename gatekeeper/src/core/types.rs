//! Shared deterministic types for the trust layer.
//!
//! These types define stable contracts between the ledger, the gateway and the
//! orchestrator. Their serialized spellings are part of the ledger file format
//! and must not change.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::digest::hash_bytes;

/// Exit code reported when a process could not report one of its own
/// (killed, timed out, cancelled, failed to start, rejected before start).
pub const EXIT_CODE_UNAVAILABLE: i32 = 127;

/// Logical principal credited with an event.
///
/// This is an accountability role, not a process identity. Only the verifier
/// role may record `VERIFY` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    Executor,
    Verifier,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Executor => f.write_str("executor"),
            Actor::Verifier => f.write_str("verifier"),
        }
    }
}

/// Kind of ledger event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    State,
    ToolCall,
    ToolResult,
    Claim,
    Verify,
}

impl EventType {
    /// The only actor allowed to record this kind of event.
    pub fn authorized_actor(self) -> Actor {
        match self {
            EventType::Verify => Actor::Verifier,
            EventType::State | EventType::ToolCall | EventType::ToolResult | EventType::Claim => {
                Actor::Executor
            }
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventType::State => "STATE",
            EventType::ToolCall => "TOOL_CALL",
            EventType::ToolResult => "TOOL_RESULT",
            EventType::Claim => "CLAIM",
            EventType::Verify => "VERIFY",
        };
        f.write_str(name)
    }
}

/// Position of a task in the state machine.
///
/// ```text
/// INTAKE -> EXECUTE -> VERIFY -> COMPLETE
///    \          \          \
///     +----------+----------+--> FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Intake,
    Execute,
    Verify,
    Complete,
    Failed,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Intake => "INTAKE",
            TaskState::Execute => "EXECUTE",
            TaskState::Verify => "VERIFY",
            TaskState::Complete => "COMPLETE",
            TaskState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Complete | TaskState::Failed)
    }

    /// Whether the transition table permits `self -> next`.
    ///
    /// `VERIFY -> COMPLETE` is listed here but is additionally gated on a
    /// passing verdict by [`crate::task::Task::complete`].
    pub fn allows(self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (TaskState::Intake, TaskState::Execute)
                | (TaskState::Execute, TaskState::Verify)
                | (TaskState::Verify, TaskState::Complete)
                | (
                    TaskState::Intake | TaskState::Execute | TaskState::Verify,
                    TaskState::Failed
                )
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a gateway subprocess ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The process exited on its own (possibly killed by a signal).
    Exited,
    /// The wall-clock bound expired; the process was killed and reaped.
    TimedOut,
    /// The caller cancelled the task; the process was killed and reaped.
    Cancelled,
    /// The process could not be started.
    SpawnFailed,
    /// The gateway refused the invocation before starting anything.
    Rejected,
}

/// Outcome of one gateway invocation.
///
/// Raw output lives only in memory and may be capped; the ledger stores the
/// digests, which always cover every byte the child wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_hash: String,
    pub stderr_hash: String,
    /// Captured output is shorter than what the child wrote.
    pub truncated: bool,
    pub exit_code: i32,
    pub termination: Termination,
}

impl ToolResult {
    /// Result whose output was captured in full.
    pub fn new(
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        exit_code: i32,
        termination: Termination,
    ) -> Self {
        Self {
            stdout_hash: hash_bytes(&stdout),
            stderr_hash: hash_bytes(&stderr),
            stdout,
            stderr,
            truncated: false,
            exit_code,
            termination,
        }
    }

    /// Result recorded for an invocation the gateway refused to start.
    pub fn rejected(reason: &str) -> Self {
        Self::new(
            Vec::new(),
            reason.as_bytes().to_vec(),
            EXIT_CODE_UNAVAILABLE,
            Termination::Rejected,
        )
    }

    pub fn success(&self) -> bool {
        self.termination == Termination::Exited && self.exit_code == 0
    }
}
