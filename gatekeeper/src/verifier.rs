//! The verifier role: the only writer of `VERIFY` events and the only source
//! of the [`Pass`] that unlocks COMPLETE.

use tracing::{info, warn};

use crate::core::types::{Termination, ToolResult};
use crate::error::Result;
use crate::io::ledger::{EventContext, EventDraft, Ledger};

/// Proof that a verification run exited 0 and was recorded as PASS.
///
/// Only the verifier can construct one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pass {
    verify_event_hash: String,
}

impl Pass {
    /// Hash of the `VERIFY` event this pass was recorded as.
    pub fn verify_event_hash(&self) -> &str {
        &self.verify_event_hash
    }
}

/// The verifier's recorded decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass(Pass),
    Block { exit_code: i32 },
}

pub(crate) struct Verifier<'a> {
    ledger: &'a Ledger,
    context: &'a EventContext,
}

impl<'a> Verifier<'a> {
    pub(crate) fn new(ledger: &'a Ledger, context: &'a EventContext) -> Self {
        Self { ledger, context }
    }

    /// Record PASS or BLOCK for a verification run. Exit code 0 is the only PASS.
    pub(crate) fn judge(&self, result: &ToolResult) -> Result<Verdict> {
        let message = verdict_message(result);
        let hash = self
            .ledger
            .append(self.context, EventDraft::verdict(message, result))?;
        if result.exit_code == 0 {
            info!(task_id = %self.context.task_id, "verification passed");
            return Ok(Verdict::Pass(Pass {
                verify_event_hash: hash,
            }));
        }
        warn!(
            task_id = %self.context.task_id,
            exit_code = result.exit_code,
            termination = ?result.termination,
            "verification blocked completion"
        );
        Ok(Verdict::Block {
            exit_code: result.exit_code,
        })
    }
}

fn verdict_message(result: &ToolResult) -> String {
    if result.exit_code == 0 {
        return "PASS: verification script exited 0; completion allowed".to_string();
    }
    let exit_code = result.exit_code;
    match result.termination {
        Termination::Exited => {
            format!("BLOCK: verification script failed (exit_code={exit_code})")
        }
        Termination::TimedOut => {
            format!("BLOCK: verification script timed out (exit_code={exit_code})")
        }
        Termination::SpawnFailed => {
            format!("BLOCK: verification script could not start (exit_code={exit_code})")
        }
        Termination::Rejected => {
            format!("BLOCK: verification run refused by gateway (exit_code={exit_code})")
        }
        Termination::Cancelled => {
            format!("BLOCK: verification run cancelled (exit_code={exit_code})")
        }
    }
}
