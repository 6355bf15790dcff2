//! Content-addressed tree diff and sync.
//!
//! Two rooted trees are compared by SHA-256 digest, the differences become a
//! plan of create/update/delete actions filtered by glob patterns, and the
//! plan is either displayed (dry-run) or applied file by file. A canonical
//! manifest of the synced tree can be regenerated deterministically.

pub mod diff;
pub mod hash;
pub mod manifest;
pub mod pattern;
pub mod plan;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::error::{Classify, ErrorKind};

pub use diff::diff_trees;
pub use manifest::{regenerate_manifest, ManifestEntry, MANIFEST_FILE};
pub use pattern::{matches_any, matches_pattern, validate_pattern};
pub use plan::{apply_plan, build_plan, ActionStatus, SyncAction, SyncPlan, SyncSummary};

/// Canonical source tree for sync operations, relative to the project root.
pub const SYSTEM_SOURCE_DIR: &str = "internal/config/system";

/// Sandbox mirror kept in sync with the canonical tree.
pub const SANDBOX_DIR: &str = ".wm/sandbox/claude";

/// Installed configuration tree, also a sync source for import-local.
pub const INSTALLED_CONFIG_DIR: &str = ".claude";

/// Options for one end-to-end sync run.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub dry_run: bool,
    pub allow_delete: bool,
    /// Keep only changes matching at least one pattern; empty keeps all.
    pub patterns: Vec<String>,
    /// Rewrite the destination manifest after a fully successful apply.
    pub regenerate_manifest: bool,
}

/// Diff source against destination, build and (unless dry-run) apply the
/// plan, then regenerate the destination manifest when requested and no
/// per-file failure occurred.
pub fn sync_trees(
    source: &std::path::Path,
    dest: &std::path::Path,
    options: &SyncOptions,
) -> Result<(SyncPlan, SyncSummary), SyncError> {
    let changes = diff_trees(source, dest)?;
    let mut plan = build_plan(changes, &options.patterns, options.allow_delete);
    let summary = apply_plan(&mut plan, source, dest, options.dry_run);

    if options.regenerate_manifest && !options.dry_run && summary.failed == 0 {
        regenerate_manifest(dest)?;
    }
    Ok((plan, summary))
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to walk {path:?}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Malformed pattern: {0}")]
    Pattern(String),
}

impl SyncError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }
}

impl Classify for SyncError {
    fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Io { .. } | SyncError::Walk { .. } => ErrorKind::Io,
            SyncError::Pattern(_) => ErrorKind::Pattern,
        }
    }

    fn remediation(&self) -> Option<&'static str> {
        match self {
            SyncError::Io { .. } => Some("check filesystem permissions on the sync roots"),
            SyncError::Walk { .. } => Some("verify the tree root exists and is readable"),
            SyncError::Pattern(_) => Some("fix the --only pattern syntax"),
        }
    }
}

/// Kind of difference for a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    New,
    Mod,
    Del,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::New => "new",
            ChangeKind::Mod => "mod",
            ChangeKind::Del => "del",
        }
    }
}

/// A single-file difference between two trees. `path` is forward-slash
/// relative to the diff root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub path: String,
    pub kind: ChangeKind,
}

impl Change {
    pub fn new(path: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn change_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ChangeKind::New).unwrap(), "\"new\"");
        assert_eq!(serde_json::to_string(&ChangeKind::Mod).unwrap(), "\"mod\"");
        assert_eq!(serde_json::to_string(&ChangeKind::Del).unwrap(), "\"del\"");
    }

    #[test]
    fn sync_errors_carry_remediation_hints() {
        let pattern = SyncError::Pattern("[unclosed".to_string());
        assert_eq!(pattern.kind(), ErrorKind::Pattern);
        assert!(pattern.remediation().unwrap().contains("--only"));

        let io = SyncError::io("a.txt", std::io::Error::other("denied"));
        assert_eq!(io.kind(), ErrorKind::Io);
        assert!(io.remediation().unwrap().contains("permissions"));
    }

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
    fn sync_trees_applies_and_regenerates_manifest() {
        let source = tree(&[("commands/run.md", "run"), ("agents/a.json", "{}")]);
        let dest = tree(&[]);

        let (plan, summary) = sync_trees(
            source.path(),
            dest.path(),
            &SyncOptions {
                regenerate_manifest: true,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(plan.actions.len(), 2);
        assert_eq!(summary.applied, 2);
        assert!(dest.path().join(MANIFEST_FILE).exists());

        let raw = fs::read_to_string(dest.path().join(MANIFEST_FILE)).unwrap();
        let entries: Vec<ManifestEntry> = serde_json::from_str(&raw).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn sync_trees_dry_run_writes_nothing() {
        let source = tree(&[("a.txt", "x")]);
        let dest = tree(&[]);

        let (_plan, summary) = sync_trees(
            source.path(),
            dest.path(),
            &SyncOptions {
                dry_run: true,
                regenerate_manifest: true,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(summary.applied, 0);
        assert!(!dest.path().join("a.txt").exists());
        assert!(!dest.path().join(MANIFEST_FILE).exists());
    }

    #[test]
    fn sync_trees_never_deletes_unless_allowed() {
        let source = tree(&[("keep.txt", "k")]);
        let dest = tree(&[("keep.txt", "k"), ("extra.txt", "e")]);

        let (_plan, summary) =
            sync_trees(source.path(), dest.path(), &SyncOptions::default()).unwrap();
        assert_eq!(summary.skipped, 1);
        assert!(dest.path().join("extra.txt").exists());
    }
}
