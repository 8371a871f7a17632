//! Path containment for the workspace sandbox.
//!
//! Containment is decided on path components, never on string prefixes:
//! `/work/repo` contains `/work/repo/src` but not `/work/repo-other`.

use std::path::{Component, Path, PathBuf};

/// Lexically normalize `path`: drop `.` and fold `..` into its parent.
///
/// Does not touch the filesystem and does not resolve symlinks. A `..` that
/// would climb above the root is dropped.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            Component::Normal(name) => out.push(name),
        }
    }
    out
}

/// True if `candidate` equals `root` or is a proper descendant of it.
///
/// Both paths are normalized first so that `root/a/../b` is judged by where it
/// lands rather than how it is spelled.
pub fn is_within(root: &Path, candidate: &Path) -> bool {
    normalize_lexically(candidate).starts_with(normalize_lexically(root))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_contains_itself() {
        assert!(is_within(Path::new("/work/repo"), Path::new("/work/repo")));
        assert!(is_within(Path::new("/work/repo"), Path::new("/work/repo/")));
    }

    #[test]
    fn root_contains_descendants() {
        assert!(is_within(
            Path::new("/work/repo"),
            Path::new("/work/repo/src/lib.rs")
        ));
    }

    #[test]
    fn sibling_sharing_a_string_prefix_is_outside() {
        assert!(!is_within(
            Path::new("/work/repo"),
            Path::new("/work/repo-other")
        ));
        assert!(!is_within(Path::new("/foo"), Path::new("/foobar")));
    }

    #[test]
    fn parent_traversal_is_resolved_before_comparing() {
        assert!(!is_within(
            Path::new("/work/repo"),
            Path::new("/work/repo/../secrets")
        ));
        assert!(is_within(
            Path::new("/work/repo"),
            Path::new("/work/repo/a/../b")
        ));
    }

    #[test]
    fn normalize_folds_dots() {
        assert_eq!(
            normalize_lexically(Path::new("/a/./b/../c")),
            PathBuf::from("/a/c")
        );
        assert_eq!(normalize_lexically(Path::new("/../a")), PathBuf::from("/a"));
        assert_eq!(normalize_lexically(Path::new("../a")), PathBuf::from("../a"));
    }
}
