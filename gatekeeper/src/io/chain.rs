//! Read-side helpers for auditing a ledger file.

use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::io::ledger::{Event, corruption};

/// Summary of a successfully verified chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReport {
    /// Number of events in the chain.
    pub length: usize,
    /// Hash of the last event, `None` for an empty chain.
    pub head: Option<String>,
}

/// Parse every event in the ledger at `path`, in file order.
///
/// Blank lines are skipped. A missing file is an empty ledger.
pub fn read_events(path: &Path) -> Result<Vec<Event>> {
    Ok(read_numbered(path)?
        .into_iter()
        .map(|(_, event)| event)
        .collect())
}

/// Replay the ledger at `path`, recomputing every hash and link.
///
/// Fails with [`Error::ChainCorruption`] naming the first offending line.
pub fn verify_chain(path: &Path) -> Result<ChainReport> {
    let events = read_numbered(path)?;
    let mut prev: Option<&str> = None;
    for (line, event) in &events {
        let expected_prev = prev.unwrap_or("");
        if event.prev_event_hash != expected_prev {
            warn!(line, "prev_event_hash mismatch");
            return Err(corruption(path, *line, "prev_event_hash mismatch"));
        }
        if event.compute_hash()? != event.event_hash {
            warn!(line, "event_hash mismatch");
            return Err(corruption(path, *line, "event_hash mismatch"));
        }
        prev = Some(&event.event_hash);
    }
    debug!(length = events.len(), "chain verified");
    Ok(ChainReport {
        length: events.len(),
        head: prev.map(str::to_string),
    })
}

fn read_numbered(path: &Path) -> Result<Vec<(usize, Event)>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(Error::ledger_io(format!("open {}", path.display()), err)),
    };
    let mut events = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line_no = index + 1;
        let line = line.map_err(|e| corruption(path, line_no, &format!("unreadable line: {e}")))?;
        if line.trim().is_empty() {
            continue;
        }
        let event: Event = serde_json::from_str(&line)
            .map_err(|e| corruption(path, line_no, &format!("event does not parse: {e}")))?;
        events.push((line_no, event));
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TaskState;
    use crate::io::ledger::{EventContext, EventDraft, Ledger};
    use std::fs;

    fn write_chain(path: &Path, states: &[TaskState]) -> Vec<String> {
        let ledger = Ledger::open(path).expect("open");
        let context = EventContext {
            task_id: "t".to_string(),
            workspace_id: "w".to_string(),
            policy_version: String::new(),
        };
        states
            .iter()
            .map(|state| {
                ledger
                    .append(&context, EventDraft::state(*state))
                    .expect("append")
            })
            .collect()
    }

    #[test]
    fn missing_file_is_empty_valid_chain() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = verify_chain(&temp.path().join("none.jsonl")).expect("verify");
        assert_eq!(
            report,
            ChainReport {
                length: 0,
                head: None
            }
        );
    }

    #[test]
    fn verifies_untouched_chain() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ledger.jsonl");
        let hashes = write_chain(
            &path,
            &[TaskState::Intake, TaskState::Execute, TaskState::Verify],
        );
        let report = verify_chain(&path).expect("verify");
        assert_eq!(report.length, 3);
        assert_eq!(report.head.as_deref(), hashes.last().map(String::as_str));
        assert_eq!(read_events(&path).expect("read").len(), 3);
    }

    #[test]
    fn detects_edited_middle_event() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ledger.jsonl");
        write_chain(
            &path,
            &[TaskState::Intake, TaskState::Execute, TaskState::Verify],
        );
        let raw = fs::read_to_string(&path).expect("read");
        fs::write(&path, raw.replacen("EXECUTE", "COMPLETE", 1)).expect("write");

        let err = verify_chain(&path).unwrap_err();
        match err {
            Error::ChainCorruption { line, reason, .. } => {
                assert_eq!(line, 2);
                assert_eq!(reason, "event_hash mismatch");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn detects_dropped_event() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ledger.jsonl");
        write_chain(
            &path,
            &[TaskState::Intake, TaskState::Execute, TaskState::Verify],
        );
        let raw = fs::read_to_string(&path).expect("read");
        let kept: Vec<&str> = raw
            .lines()
            .enumerate()
            .filter(|(index, _)| *index != 1)
            .map(|(_, line)| line)
            .collect();
        fs::write(&path, kept.join("\n") + "\n").expect("write");

        let err = verify_chain(&path).unwrap_err();
        match err {
            Error::ChainCorruption { line, reason, .. } => {
                assert_eq!(line, 2);
                assert_eq!(reason, "prev_event_hash mismatch");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
