//! Computing the difference between two manifests.

use std::collections::BTreeMap;

use super::entry::Entry;
use super::manifest::Manifest;

/// What changed at a single path between two manifests.
#[derive(Clone, Debug, PartialEq)]
pub enum DiffKind {
    /// The path exists in both manifests with identical mode and digest.
    Unchanged,
    /// The path exists only in the second manifest.
    Added,
    /// The path exists only in the first manifest.
    Removed,
    /// The path exists in both manifests but its mode, kind, or digest differs.
    Changed,
}

/// One path's worth of diff result, carrying the entries it was computed from.
#[derive(Clone, Debug, PartialEq)]
pub struct Diff {
    /// The path the diff applies to, as produced by [`Manifest::walk`].
    pub path: String,
    /// What changed at this path.
    pub kind: DiffKind,
    /// The entry as it appeared in the first (older) manifest, if present.
    pub before: Option<Entry>,
    /// The entry as it appeared in the second (newer) manifest, if present.
    pub after: Option<Entry>,
}

/// Computes a path-by-path diff between two manifests.
///
/// The result is always derived fresh from `a` and `b`; nothing about a diff is ever stored
/// independently of the manifests it was computed from.
pub fn diff(a: &Manifest, b: &Manifest) -> Vec<Diff> {
    let before: BTreeMap<String, Entry> = a.walk().map(|(p, e)| (p, e.clone())).collect();
    let after: BTreeMap<String, Entry> = b.walk().map(|(p, e)| (p, e.clone())).collect();

    let mut paths: Vec<&String> = before.keys().chain(after.keys()).collect();
    paths.sort();
    paths.dedup();

    paths
        .into_iter()
        .map(|path| {
            let before_entry = before.get(path).cloned();
            let after_entry = after.get(path).cloned();

            let kind = match (&before_entry, &after_entry) {
                (Some(_), None) => DiffKind::Removed,
                (None, Some(_)) => DiffKind::Added,
                (Some(b), Some(a)) if entries_equal(b, a) => DiffKind::Unchanged,
                (Some(_), Some(_)) => DiffKind::Changed,
                (None, None) => unreachable!("path came from the union of both key sets"),
            };

            Diff {
                path: path.clone(),
                kind,
                before: before_entry,
                after: after_entry,
            }
        })
        .collect()
}

fn entries_equal(a: &Entry, b: &Entry) -> bool {
    a.kind == b.kind && a.mode == b.mode && a.digest == b.digest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::manifest::compute_manifest;

    fn write_file(path: &std::path::Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn detects_additions_removals_and_changes() {
        let dir_a = tempfile::tempdir().unwrap();
        write_file(&dir_a.path().join("stays.txt"), "same");
        write_file(&dir_a.path().join("removed.txt"), "bye");
        write_file(&dir_a.path().join("changed.txt"), "old");

        let dir_b = tempfile::tempdir().unwrap();
        write_file(&dir_b.path().join("stays.txt"), "same");
        write_file(&dir_b.path().join("changed.txt"), "new");
        write_file(&dir_b.path().join("added.txt"), "hi");

        let a = compute_manifest(dir_a.path()).unwrap();
        let b = compute_manifest(dir_b.path()).unwrap();

        let diffs = diff(&a, &b);
        let find = |path: &str| diffs.iter().find(|d| d.path == path).unwrap().kind.clone();

        assert_eq!(find("/stays.txt"), DiffKind::Unchanged);
        assert_eq!(find("/removed.txt"), DiffKind::Removed);
        assert_eq!(find("/changed.txt"), DiffKind::Changed);
        assert_eq!(find("/added.txt"), DiffKind::Added);
    }

    #[test]
    fn identical_trees_are_fully_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("a.txt"), "data");
        let manifest = compute_manifest(dir.path()).unwrap();

        let diffs = diff(&manifest, &manifest);
        assert!(diffs.iter().all(|d| d.kind == DiffKind::Unchanged));
    }
}
