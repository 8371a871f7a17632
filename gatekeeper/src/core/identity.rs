//! Identifiers binding ledger events to a task and a workspace.

use std::path::Path;

use rand::RngCore;
use rand::rngs::OsRng;

use crate::core::digest::hash_bytes;

/// Length of a workspace id (a truncated path digest).
pub const WORKSPACE_ID_LEN: usize = 12;

/// Number of random bytes behind a task id.
const TASK_ID_BYTES: usize = 8;

/// Deterministic id for an absolute workspace path.
///
/// Stable across runs against the same path, so it can be used to correlate
/// ledger lines by eye.
pub fn workspace_id(absolute_path: &Path) -> String {
    let mut digest = hash_bytes(absolute_path.as_os_str().as_encoded_bytes());
    digest.truncate(WORKSPACE_ID_LEN);
    digest
}

/// Fresh random id for one task attempt.
pub fn new_task_id() -> String {
    let mut bytes = [0u8; TASK_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn workspace_id_is_stable_and_short() {
        let a = workspace_id(Path::new("/srv/work/repo"));
        let b = workspace_id(Path::new("/srv/work/repo"));
        assert_eq!(a, b);
        assert_eq!(a.len(), WORKSPACE_ID_LEN);
    }

    #[test]
    fn workspace_id_differs_per_path() {
        assert_ne!(
            workspace_id(Path::new("/srv/work/repo")),
            workspace_id(Path::new("/srv/work/repo-other"))
        );
    }

    #[test]
    fn task_ids_are_hex_and_unique() {
        let ids: HashSet<String> = (0..64).map(|_| new_task_id()).collect();
        assert_eq!(ids.len(), 64);
        for id in &ids {
            assert_eq!(id.len(), TASK_ID_BYTES * 2);
            assert!(id.bytes().all(|b| b.is_ascii_hexdigit()));
        }
    }
}
