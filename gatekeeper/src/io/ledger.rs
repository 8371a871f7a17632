//! Append-only, hash-chained event log (`.gatekeeper/ledger.jsonl`).
//!
//! Each line is one [`Event`] serialized as compact JSON. An event's
//! `event_hash` is the SHA-256 of its own canonical serialization with
//! `event_hash` set to the empty string; `prev_event_hash` links it to the
//! line before. Recomputing the chain detects any edited, dropped or
//! reordered line.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::digest::hash_bytes;
use crate::core::types::{Actor, EventType, TaskState, Termination, ToolResult};
use crate::error::{Error, Result};

/// One immutable ledger record.
///
/// Field order is the canonical serialization order and is part of the file
/// format. Empty optional fields are omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: String,
    pub task_id: String,
    pub workspace_id: String,
    pub actor: Actor,
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub args_hash: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stdout_hash: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub diff_hash: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub policy_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prev_event_hash: String,
    pub event_hash: String,
}

impl Event {
    /// Bytes the event hash is computed over: the event with `event_hash` cleared.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let mut unsealed = self.clone();
        unsealed.event_hash.clear();
        serde_json::to_vec(&unsealed).map_err(Error::LedgerSerialization)
    }

    /// Recompute this event's hash from its fields.
    pub fn compute_hash(&self) -> Result<String> {
        Ok(hash_bytes(&self.canonical_bytes()?))
    }
}

/// Identity stamped on every event a run writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventContext {
    pub task_id: String,
    pub workspace_id: String,
    pub policy_version: String,
}

/// An event before the ledger seals it (timestamp, chain link and hash).
///
/// Drafts are only built through the typed constructors. `VERIFY` drafts can
/// only be built inside the crate, by the verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
    actor: Actor,
    event_type: EventType,
    message: String,
    tool_name: String,
    args_hash: String,
    stdout_hash: String,
    stderr_hash: String,
    exit_code: Option<i32>,
    diff_hash: String,
}

impl EventDraft {
    fn executor(event_type: EventType) -> Self {
        Self {
            actor: Actor::Executor,
            event_type,
            message: String::new(),
            tool_name: String::new(),
            args_hash: String::new(),
            stdout_hash: String::new(),
            stderr_hash: String::new(),
            exit_code: None,
            diff_hash: String::new(),
        }
    }

    pub fn state(state: TaskState) -> Self {
        Self {
            message: state.as_str().to_string(),
            ..Self::executor(EventType::State)
        }
    }

    /// Intent to invoke `tool`; only the digest of its argument payload is kept.
    pub fn tool_call(tool: &str, args_hash: &str) -> Self {
        Self {
            tool_name: tool.to_string(),
            args_hash: args_hash.to_string(),
            ..Self::executor(EventType::ToolCall)
        }
    }

    /// Outcome of invoking `tool`; raw output is reduced to digests.
    pub fn tool_result(tool: &str, args_hash: &str, result: &ToolResult) -> Self {
        Self {
            message: result_note(result),
            tool_name: tool.to_string(),
            args_hash: args_hash.to_string(),
            stdout_hash: result.stdout_hash.clone(),
            stderr_hash: result.stderr_hash.clone(),
            exit_code: Some(result.exit_code),
            ..Self::executor(EventType::ToolResult)
        }
    }

    /// The executor's self-reported outcome.
    pub fn claim(message: &str, diff_hash: &str) -> Self {
        Self {
            message: message.to_string(),
            diff_hash: diff_hash.to_string(),
            ..Self::executor(EventType::Claim)
        }
    }

    pub(crate) fn verdict(message: String, result: &ToolResult) -> Self {
        Self {
            actor: Actor::Verifier,
            event_type: EventType::Verify,
            message,
            tool_name: String::new(),
            args_hash: String::new(),
            stdout_hash: result.stdout_hash.clone(),
            stderr_hash: result.stderr_hash.clone(),
            exit_code: Some(result.exit_code),
            diff_hash: String::new(),
        }
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    fn authorize(&self) -> Result<()> {
        if self.event_type.authorized_actor() != self.actor {
            return Err(Error::UnauthorizedActor {
                actor: self.actor,
                event_type: self.event_type,
            });
        }
        Ok(())
    }
}

fn termination_note(termination: Termination) -> &'static str {
    match termination {
        Termination::Exited => "",
        Termination::TimedOut => "timed out",
        Termination::Cancelled => "cancelled",
        Termination::SpawnFailed => "spawn failed",
        Termination::Rejected => "rejected",
    }
}

fn result_note(result: &ToolResult) -> String {
    let note = termination_note(result.termination);
    match (note.is_empty(), result.truncated) {
        (_, false) => note.to_string(),
        (true, true) => "output truncated".to_string(),
        (false, true) => format!("{note}, output truncated"),
    }
}

#[derive(Debug, Default)]
struct ChainHead {
    last_hash: Option<String>,
    last_timestamp: Option<DateTime<Utc>>,
}

/// Handle to one ledger file.
///
/// Appends are serialized by an internal lock, so a ledger can be shared
/// between threads (e.g. behind an `Arc`) without breaking the chain.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    head: Mutex<ChainHead>,
}

impl Ledger {
    /// Open (or prepare to create) the ledger at `path`, resuming its chain.
    ///
    /// A missing or empty file starts a fresh chain. A last line that does not
    /// parse, or whose hash does not recompute, is [`Error::ChainCorruption`];
    /// the ledger never silently starts a disconnected chain.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| Error::ledger_io(format!("create {}", parent.display()), e))?;
        }
        let head = recover_head(&path)?;
        info!(head = ?head.last_hash, "ledger opened");
        Ok(Self {
            path,
            head: Mutex::new(head),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hash of the most recent event, or `None` for an empty chain.
    pub fn head(&self) -> Option<String> {
        self.lock_head().last_hash.clone()
    }

    /// Seal `draft` onto the chain and durably append it. Returns its `event_hash`.
    ///
    /// On any failure nothing is recorded and the chain head does not move.
    #[instrument(skip_all, fields(task_id = %context.task_id, event_type = %draft.event_type))]
    pub fn append(&self, context: &EventContext, draft: EventDraft) -> Result<String> {
        draft.authorize()?;

        let mut head = self.lock_head();
        let now = Utc::now();
        // Keep timestamps non-decreasing even if the wall clock steps back.
        let stamped = match head.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };

        let mut event = Event {
            timestamp: stamped.to_rfc3339_opts(SecondsFormat::Nanos, true),
            task_id: context.task_id.clone(),
            workspace_id: context.workspace_id.clone(),
            actor: draft.actor,
            event_type: draft.event_type,
            message: draft.message,
            tool_name: draft.tool_name,
            args_hash: draft.args_hash,
            stdout_hash: draft.stdout_hash,
            stderr_hash: draft.stderr_hash,
            exit_code: draft.exit_code,
            diff_hash: draft.diff_hash,
            policy_version: context.policy_version.clone(),
            prev_event_hash: head.last_hash.clone().unwrap_or_default(),
            event_hash: String::new(),
        };
        event.event_hash = event.compute_hash()?;

        let mut line = serde_json::to_vec(&event).map_err(Error::LedgerSerialization)?;
        line.push(b'\n');
        self.write_line(&line)?;

        debug!(event_hash = %event.event_hash, "event appended");
        head.last_hash = Some(event.event_hash.clone());
        head.last_timestamp = Some(stamped);
        Ok(event.event_hash)
    }

    fn write_line(&self, line: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::ledger_io(format!("open {}", self.path.display()), e))?;
        write_whole_line(&mut file, line)
            .map_err(|e| Error::ledger_io(format!("append {}", self.path.display()), e))
    }

    fn lock_head(&self) -> std::sync::MutexGuard<'_, ChainHead> {
        // The head only moves after a successful write, so a poisoned lock still holds a
        // consistent value.
        self.head.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Sink that can be cut back to an earlier length.
trait Rollback: Write {
    fn len(&self) -> io::Result<u64>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl Rollback for File {
    fn len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Write `line` completely or not at all. A failed write is cut back so no
/// fragment is left for the next append to link onto.
fn write_whole_line<W: Rollback>(out: &mut W, line: &[u8]) -> io::Result<()> {
    let start = out.len()?;
    let written = out.write_all(line).and_then(|()| out.flush());
    if let Err(err) = written {
        if let Err(rollback) = out.truncate(start) {
            warn!(err = %rollback, "could not remove partial ledger line");
        }
        return Err(err);
    }
    Ok(())
}

fn recover_head(path: &Path) -> Result<ChainHead> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!("no ledger yet, starting fresh chain");
            return Ok(ChainHead::default());
        }
        Err(err) => return Err(Error::ledger_io(format!("open {}", path.display()), err)),
    };

    let mut last: Option<(usize, String)> = None;
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| corruption(path, index + 1, &format!("unreadable line: {e}")))?;
        if !line.trim().is_empty() {
            last = Some((index + 1, line));
        }
    }
    let Some((line_no, line)) = last else {
        return Ok(ChainHead::default());
    };

    let event: Event = serde_json::from_str(&line)
        .map_err(|e| corruption(path, line_no, &format!("last event does not parse: {e}")))?;
    if event.compute_hash()? != event.event_hash {
        return Err(corruption(path, line_no, "last event hash does not recompute"));
    }
    let timestamp = DateTime::parse_from_rfc3339(&event.timestamp)
        .map_err(|e| corruption(path, line_no, &format!("bad timestamp: {e}")))?
        .with_timezone(&Utc);

    Ok(ChainHead {
        last_hash: Some(event.event_hash),
        last_timestamp: Some(timestamp),
    })
}

pub(crate) fn corruption(path: &Path, line: usize, reason: &str) -> Error {
    Error::ChainCorruption {
        path: path.to_path_buf(),
        line,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::digest::is_digest;

    fn context() -> EventContext {
        EventContext {
            task_id: "task-1".to_string(),
            workspace_id: "ws-1".to_string(),
            policy_version: "test".to_string(),
        }
    }

    fn read_lines(path: &Path) -> Vec<Event> {
        fs::read_to_string(path)
            .expect("read ledger")
            .lines()
            .map(|line| serde_json::from_str(line).expect("parse event"))
            .collect()
    }

    #[test]
    fn open_creates_parent_directories_lazily() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("ledger.jsonl");
        let ledger = Ledger::open(&path).expect("open");
        assert!(path.parent().expect("parent").is_dir());
        assert!(!path.exists());
        assert_eq!(ledger.head(), None);
    }

    #[test]
    fn genesis_event_has_no_previous_hash() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ledger.jsonl");
        let ledger = Ledger::open(&path).expect("open");
        let hash = ledger
            .append(&context(), EventDraft::state(TaskState::Intake))
            .expect("append");

        let raw = fs::read_to_string(&path).expect("read");
        assert!(!raw.contains("prev_event_hash"));
        let events = read_lines(&path);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_hash, hash);
        assert_eq!(events[0].message, "INTAKE");
        assert_eq!(events[0].policy_version, "test");
        assert_eq!(ledger.head(), Some(hash));
    }

    #[test]
    fn appends_link_to_previous_hash() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ledger.jsonl");
        let ledger = Ledger::open(&path).expect("open");
        let first = ledger
            .append(&context(), EventDraft::state(TaskState::Intake))
            .expect("append");
        ledger
            .append(&context(), EventDraft::state(TaskState::Execute))
            .expect("append");

        let events = read_lines(&path);
        assert_eq!(events[1].prev_event_hash, first);
        for event in &events {
            assert_eq!(event.compute_hash().expect("hash"), event.event_hash);
            assert!(is_digest(&event.event_hash));
        }
    }

    #[test]
    fn canonical_bytes_are_reproducible_and_exclude_own_hash() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ledger.jsonl");
        let ledger = Ledger::open(&path).expect("open");
        ledger
            .append(&context(), EventDraft::claim("did it", &hash_bytes(b"diff")))
            .expect("append");

        let event = read_lines(&path).remove(0);
        let first = event.canonical_bytes().expect("bytes");
        let second = event.canonical_bytes().expect("bytes");
        assert_eq!(first, second);
        let text = String::from_utf8(first).expect("utf8");
        assert!(text.contains("\"event_hash\":\"\""));
        assert!(text.starts_with("{\"timestamp\":"));
    }

    #[test]
    fn executor_cannot_forge_verify_events() {
        let mut draft = EventDraft::claim("PASS: trust me", "");
        draft.event_type = EventType::Verify;

        let temp = tempfile::tempdir().expect("tempdir");
        let ledger = Ledger::open(temp.path().join("ledger.jsonl")).expect("open");
        let err = ledger.append(&context(), draft).unwrap_err();
        assert!(matches!(
            err,
            Error::UnauthorizedActor {
                actor: Actor::Executor,
                event_type: EventType::Verify
            }
        ));
        assert_eq!(ledger.head(), None);
    }

    #[test]
    fn verifier_cannot_record_state_events() {
        let mut draft = EventDraft::state(TaskState::Complete);
        draft.actor = Actor::Verifier;

        let temp = tempfile::tempdir().expect("tempdir");
        let ledger = Ledger::open(temp.path().join("ledger.jsonl")).expect("open");
        assert!(ledger.append(&context(), draft).is_err());
    }

    #[test]
    fn tool_result_stores_digests_only() {
        let result = ToolResult::new(
            b"secret output".to_vec(),
            b"secret error".to_vec(),
            1,
            Termination::Exited,
        );
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ledger.jsonl");
        let ledger = Ledger::open(&path).expect("open");
        ledger
            .append(
                &context(),
                EventDraft::tool_result("git.status", &hash_bytes(b"args"), &result),
            )
            .expect("append");

        let raw = fs::read_to_string(&path).expect("read");
        assert!(!raw.contains("secret"));
        let event = read_lines(&path).remove(0);
        assert_eq!(event.stdout_hash, hash_bytes(b"secret output"));
        assert_eq!(event.exit_code, Some(1));
    }

    #[test]
    fn tool_result_notes_truncated_output() {
        let mut result = ToolResult::new(vec![0; 16], Vec::new(), 0, Termination::Exited);
        result.stdout_hash = hash_bytes(&[0; 4096]);
        result.truncated = true;

        let draft = EventDraft::tool_result("test.run_script_only", &hash_bytes(b"a"), &result);
        assert_eq!(draft.message, "output truncated");
        assert_eq!(draft.stdout_hash, hash_bytes(&[0; 4096]));

        result.termination = Termination::TimedOut;
        let draft = EventDraft::tool_result("test.run_script_only", &hash_bytes(b"a"), &result);
        assert_eq!(draft.message, "timed out, output truncated");
    }

    /// Accepts `accept` bytes, then fails every write.
    struct ShortWriter {
        data: Vec<u8>,
        accept: usize,
    }

    impl Write for ShortWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.accept == 0 {
                return Err(io::Error::other("disk full"));
            }
            let n = buf.len().min(self.accept);
            self.data.extend_from_slice(&buf[..n]);
            self.accept -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Rollback for ShortWriter {
        fn len(&self) -> io::Result<u64> {
            Ok(self.data.len() as u64)
        }

        fn truncate(&mut self, len: u64) -> io::Result<()> {
            self.data.truncate(len as usize);
            Ok(())
        }
    }

    #[test]
    fn partial_write_is_rolled_back() {
        let mut out = ShortWriter {
            data: b"{\"first\":1}\n".to_vec(),
            accept: 5,
        };
        let err = write_whole_line(&mut out, b"{\"second\":2}\n").unwrap_err();
        assert_eq!(err.to_string(), "disk full");
        assert_eq!(out.data, b"{\"first\":1}\n");

        out.accept = usize::MAX;
        write_whole_line(&mut out, b"{\"second\":2}\n").expect("write");
        assert_eq!(out.data, b"{\"first\":1}\n{\"second\":2}\n");
    }

    #[test]
    fn failed_write_leaves_head_unchanged() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ledger.jsonl");
        let ledger = Ledger::open(&path).expect("open");
        // A directory where the file should be makes the append open fail.
        fs::create_dir(&path).expect("mkdir");

        let err = ledger
            .append(&context(), EventDraft::state(TaskState::Intake))
            .unwrap_err();
        assert!(err.is_ledger_failure(), "{err}");
        assert_eq!(ledger.head(), None);
    }

    #[test]
    fn reopen_resumes_from_last_event() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ledger.jsonl");
        let last = {
            let ledger = Ledger::open(&path).expect("open");
            ledger
                .append(&context(), EventDraft::state(TaskState::Intake))
                .expect("append");
            ledger
                .append(&context(), EventDraft::state(TaskState::Execute))
                .expect("append")
        };

        let reopened = Ledger::open(&path).expect("reopen");
        assert_eq!(reopened.head(), Some(last.clone()));
        reopened
            .append(&context(), EventDraft::state(TaskState::Verify))
            .expect("append");
        let events = read_lines(&path);
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].prev_event_hash, last);
    }

    #[test]
    fn empty_file_starts_fresh_chain() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ledger.jsonl");
        fs::write(&path, "").expect("write");
        let ledger = Ledger::open(&path).expect("open");
        assert_eq!(ledger.head(), None);
    }

    #[test]
    fn unparsable_last_line_is_corruption() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ledger.jsonl");
        {
            let ledger = Ledger::open(&path).expect("open");
            ledger
                .append(&context(), EventDraft::state(TaskState::Intake))
                .expect("append");
        }
        let mut file = OpenOptions::new().append(true).open(&path).expect("open");
        file.write_all(b"{\"timestamp\":\"2026-").expect("write");

        let err = Ledger::open(&path).unwrap_err();
        assert!(matches!(err, Error::ChainCorruption { line: 2, .. }), "{err}");
    }

    #[test]
    fn tampered_last_line_is_corruption() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ledger.jsonl");
        {
            let ledger = Ledger::open(&path).expect("open");
            ledger
                .append(&context(), EventDraft::claim("applied", ""))
                .expect("append");
        }
        let raw = fs::read_to_string(&path).expect("read");
        fs::write(&path, raw.replace("applied", "applied twice")).expect("write");

        let err = Ledger::open(&path).unwrap_err();
        assert!(matches!(err, Error::ChainCorruption { line: 1, .. }), "{err}");
    }
}
