//! Content-addressed comparison of two directory trees.

use std::collections::BTreeMap;
use std::path::Path;

use super::hash::{file_digest, walk_files};
use super::{Change, ChangeKind, SyncError};

/// Relative path → content digest for every regular file beneath `root`.
fn snapshot(root: &Path) -> Result<BTreeMap<String, String>, SyncError> {
    let mut digests = BTreeMap::new();
    for rel in walk_files(root)? {
        let digest = file_digest(&root.join(&rel))?;
        digests.insert(rel, digest);
    }
    Ok(digests)
}

/// Compare tree `a` against tree `b`, producing `New` for paths only in `a`,
/// `Del` for paths only in `b`, and `Mod` for paths whose digests differ.
/// Output is sorted lexicographically by path and free of duplicates,
/// independent of filesystem enumeration order.
pub fn diff_trees(root_a: &Path, root_b: &Path) -> Result<Vec<Change>, SyncError> {
    let side_a = snapshot(root_a)?;
    let side_b = snapshot(root_b)?;

    let mut changes = Vec::new();
    let mut all_paths: Vec<&String> = side_a.keys().chain(side_b.keys()).collect();
    all_paths.sort();
    all_paths.dedup();

    for path in all_paths {
        match (side_a.get(path), side_b.get(path)) {
            (Some(_), None) => changes.push(Change::new(path.clone(), ChangeKind::New)),
            (None, Some(_)) => changes.push(Change::new(path.clone(), ChangeKind::Del)),
            (Some(da), Some(db)) if da != db => {
                changes.push(Change::new(path.clone(), ChangeKind::Mod))
            }
            _ => {}
        }
    }

    tracing::debug!(
        "Diffed {:?} against {:?}: {} changes",
        root_a,
        root_b,
        changes.len()
    );
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tree(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (path, content) in files {
            let full = dir.path().join(path);
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(full, content).unwrap();
        }
        dir
    }

    #[test]
    fn mixed_changes_sorted() {
        // A has a new file, a modified file, another new file; B has one
        // file A lacks.
        let a = tree(&[("a.txt", "x"), ("b.txt", "y2"), ("c.txt", "z")]);
        let b = tree(&[("b.txt", "y1"), ("d.txt", "w")]);

        let changes = diff_trees(a.path(), b.path()).unwrap();
        assert_eq!(
            changes,
            vec![
                Change::new("a.txt", ChangeKind::New),
                Change::new("b.txt", ChangeKind::Mod),
                Change::new("c.txt", ChangeKind::New),
                Change::new("d.txt", ChangeKind::Del),
            ]
        );
    }

    #[test]
    fn identical_trees_diff_empty() {
        let a = tree(&[("x/y.txt", "same"), ("z.txt", "same too")]);
        let b = tree(&[("x/y.txt", "same"), ("z.txt", "same too")]);
        assert!(diff_trees(a.path(), b.path()).unwrap().is_empty());
    }

    #[test]
    fn tree_against_itself_is_empty() {
        let a = tree(&[("a.txt", "1"), ("b/c.txt", "2")]);
        assert!(diff_trees(a.path(), a.path()).unwrap().is_empty());
    }

    #[test]
    fn diff_is_inverse_with_kinds_swapped() {
        let a = tree(&[("a.txt", "x"), ("b.txt", "y2")]);
        let b = tree(&[("b.txt", "y1"), ("d.txt", "w")]);

        let forward = diff_trees(a.path(), b.path()).unwrap();
        let backward = diff_trees(b.path(), a.path()).unwrap();

        let swapped: Vec<Change> = backward
            .into_iter()
            .map(|c| {
                let kind = match c.kind {
                    ChangeKind::New => ChangeKind::Del,
                    ChangeKind::Del => ChangeKind::New,
                    ChangeKind::Mod => ChangeKind::Mod,
                };
                Change::new(c.path, kind)
            })
            .collect();
        assert_eq!(forward, swapped);
    }

    #[test]
    fn nested_paths_use_forward_slashes() {
        let a = tree(&[("deep/nested/file.txt", "content")]);
        let b = tree(&[]);
        let changes = diff_trees(a.path(), b.path()).unwrap();
        assert_eq!(changes[0].path, "deep/nested/file.txt");
    }

    #[test]
    fn unwalkable_root_is_an_error() {
        let a = tree(&[]);
        let missing = a.path().join("does-not-exist");
        assert!(diff_trees(&missing, a.path()).is_err());
    }
}
