//! Sync plan construction and application.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use super::pattern::matches_any;
use super::{Change, ChangeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Planned,
    Applied,
    Skipped,
    Failed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Planned => "planned",
            ActionStatus::Applied => "applied",
            ActionStatus::Skipped => "skipped",
            ActionStatus::Failed => "failed",
        }
    }
}

/// One planned file operation with its outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncAction {
    pub change: Change,
    pub status: ActionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-kind and per-outcome counts for a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub new: usize,
    pub modified: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub applied: usize,
    pub failed: usize,
}

impl std::fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} new, {} modified, {} deleted, {} skipped ({} applied, {} failed)",
            self.new, self.modified, self.deleted, self.skipped, self.applied, self.failed
        )
    }
}

/// Ordered set of actions realizing a sync. Ordering follows the sorted
/// diff output.
#[derive(Debug, Clone, Serialize)]
pub struct SyncPlan {
    pub actions: Vec<SyncAction>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Kind counts exclude skipped actions; Skipped/Applied/Failed count
    /// outcomes.
    pub fn summary(&self) -> SyncSummary {
        let mut summary = SyncSummary::default();
        for action in &self.actions {
            if action.status == ActionStatus::Skipped {
                summary.skipped += 1;
                continue;
            }
            match action.change.kind {
                ChangeKind::New => summary.new += 1,
                ChangeKind::Mod => summary.modified += 1,
                ChangeKind::Del => summary.deleted += 1,
            }
            match action.status {
                ActionStatus::Applied => summary.applied += 1,
                ActionStatus::Failed => summary.failed += 1,
                ActionStatus::Planned | ActionStatus::Skipped => {}
            }
        }
        summary
    }
}

/// Turn diff output into a plan, filtering by patterns and re-labeling
/// deletions as Skipped when they are disallowed.
pub fn build_plan(changes: Vec<Change>, patterns: &[String], allow_delete: bool) -> SyncPlan {
    let actions = changes
        .into_iter()
        .filter(|c| matches_any(&c.path, patterns))
        .map(|change| {
            let status = if change.kind == ChangeKind::Del && !allow_delete {
                ActionStatus::Skipped
            } else {
                ActionStatus::Planned
            };
            SyncAction {
                change,
                status,
                error: None,
            }
        })
        .collect();
    SyncPlan { actions }
}

/// Realize a plan against the destination tree. Each file is its own unit:
/// a failure marks that action Failed and processing continues. Dry-run
/// leaves every action and the filesystem untouched.
pub fn apply_plan(
    plan: &mut SyncPlan,
    source_root: &Path,
    dest_root: &Path,
    dry_run: bool,
) -> SyncSummary {
    if dry_run {
        tracing::info!("Dry-run: {} actions left unapplied", plan.actions.len());
        return plan.summary();
    }

    for action in &mut plan.actions {
        if action.status != ActionStatus::Planned {
            continue;
        }
        let result = match action.change.kind {
            ChangeKind::New | ChangeKind::Mod => {
                copy_file(source_root, dest_root, &action.change.path)
            }
            ChangeKind::Del => delete_file(dest_root, &action.change.path),
        };
        match result {
            Ok(()) => action.status = ActionStatus::Applied,
            Err(e) => {
                tracing::warn!("Sync of {} failed: {}", action.change.path, e);
                action.status = ActionStatus::Failed;
                action.error = Some(e);
            }
        }
    }

    let summary = plan.summary();
    tracing::info!(
        "Applied plan: {} applied, {} skipped, {} failed",
        summary.applied,
        summary.skipped,
        summary.failed
    );
    summary
}

/// Copy preserving mode; parent directories are created as needed.
fn copy_file(source_root: &Path, dest_root: &Path, rel: &str) -> Result<(), String> {
    let src = source_root.join(rel);
    let dst = dest_root.join(rel);
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("create {:?}: {}", parent, e))?;
    }
    fs::copy(&src, &dst).map_err(|e| format!("copy {:?}: {}", src, e))?;
    Ok(())
}

/// Remove the destination file; a missing file is not an error.
fn delete_file(dest_root: &Path, rel: &str) -> Result<(), String> {
    let dst = dest_root.join(rel);
    match fs::remove_file(&dst) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(format!("remove {:?}: {}", dst, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::diff_trees;
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

    fn mixed_trees() -> (TempDir, TempDir) {
        let a = tree(&[("a.txt", "x"), ("b.txt", "y2"), ("c.txt", "z")]);
        let b = tree(&[("b.txt", "y1"), ("d.txt", "w")]);
        (a, b)
    }

    #[test]
    fn deletions_disallowed_become_skipped() {
        let (a, b) = mixed_trees();
        let changes = diff_trees(a.path(), b.path()).unwrap();
        let plan = build_plan(changes, &["**".to_string()], false);

        let statuses: Vec<(&str, ActionStatus)> = plan
            .actions
            .iter()
            .map(|x| (x.change.path.as_str(), x.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("a.txt", ActionStatus::Planned),
                ("b.txt", ActionStatus::Planned),
                ("c.txt", ActionStatus::Planned),
                ("d.txt", ActionStatus::Skipped),
            ]
        );

        let summary = plan.summary();
        assert_eq!(summary.new, 2);
        assert_eq!(summary.modified, 1);
        assert_eq!(summary.deleted, 0);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn dry_run_touches_nothing() {
        let (a, b) = mixed_trees();
        let changes = diff_trees(a.path(), b.path()).unwrap();
        let mut plan = build_plan(changes, &["**".to_string()], false);

        let summary = apply_plan(&mut plan, a.path(), b.path(), true);
        assert_eq!(summary.applied, 0);
        assert!(plan
            .actions
            .iter()
            .all(|x| x.status == ActionStatus::Planned || x.status == ActionStatus::Skipped));

        // Destination unchanged: d.txt still present, a.txt still absent.
        assert!(b.path().join("d.txt").exists());
        assert!(!b.path().join("a.txt").exists());
    }

    #[test]
    fn apply_then_diff_is_empty() {
        let (a, b) = mixed_trees();
        let changes = diff_trees(a.path(), b.path()).unwrap();
        let mut plan = build_plan(changes, &[], true);

        let summary = apply_plan(&mut plan, a.path(), b.path(), false);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.applied, 4);

        assert!(diff_trees(a.path(), b.path()).unwrap().is_empty());
    }

    #[test]
    fn apply_creates_missing_parents() {
        let a = tree(&[("deep/nested/file.txt", "content")]);
        let b = tree(&[]);
        let changes = diff_trees(a.path(), b.path()).unwrap();
        let mut plan = build_plan(changes, &[], true);

        apply_plan(&mut plan, a.path(), b.path(), false);
        assert_eq!(
            fs::read_to_string(b.path().join("deep/nested/file.txt")).unwrap(),
            "content"
        );
    }

    #[test]
    fn missing_delete_target_is_not_a_failure() {
        let mut plan = SyncPlan {
            actions: vec![SyncAction {
                change: Change::new("ghost.txt", ChangeKind::Del),
                status: ActionStatus::Planned,
                error: None,
            }],
        };
        let dest = TempDir::new().unwrap();
        let src = TempDir::new().unwrap();
        let summary = apply_plan(&mut plan, src.path(), dest.path(), false);
        assert_eq!(summary.applied, 1);
        assert_eq!(summary.failed, 0);
    }

    #[test]
    fn per_file_failure_does_not_stop_the_plan() {
        let a = tree(&[("ok.txt", "fine")]);
        let b = tree(&[]);
        let mut changes = diff_trees(a.path(), b.path()).unwrap();
        // Inject a change whose source does not exist.
        changes.insert(0, Change::new("missing.txt", ChangeKind::New));
        let mut plan = build_plan(changes, &[], true);

        let summary = apply_plan(&mut plan, a.path(), b.path(), false);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.applied, 1);
        assert!(b.path().join("ok.txt").exists());

        let failed = &plan.actions[0];
        assert_eq!(failed.status, ActionStatus::Failed);
        assert!(failed.error.is_some());
    }

    #[test]
    fn summary_displays_on_one_line() {
        let summary = SyncSummary {
            new: 2,
            modified: 1,
            deleted: 0,
            skipped: 1,
            applied: 3,
            failed: 0,
        };
        assert_eq!(
            summary.to_string(),
            "2 new, 1 modified, 0 deleted, 1 skipped (3 applied, 0 failed)"
        );
    }

    #[test]
    fn pattern_filter_limits_the_plan() {
        let (a, b) = mixed_trees();
        let changes = diff_trees(a.path(), b.path()).unwrap();
        let plan = build_plan(changes, &["a.txt".to_string()], true);
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].change.path, "a.txt");
    }
}
