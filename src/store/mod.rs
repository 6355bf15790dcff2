//! Epic collection persistence.
//!
//! The collection lives at `docs/1-project/epics.json` under the project
//! root. Writes go through a sibling temp file and a rename so readers never
//! observe a partially written document. Loading transparently migrates the
//! legacy array shape and rewrites the document before returning.

pub mod context;
pub mod models;

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::error::{Classify, ErrorKind};
pub use models::*;

/// Collection document location relative to the project root.
pub const EPICS_RELATIVE_PATH: &str = "docs/1-project/epics.json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse epic document: {0}")]
    Parse(String),
}

impl StoreError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

impl Classify for StoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Io { .. } => ErrorKind::Io,
            StoreError::Parse(_) => ErrorKind::InvalidInput,
        }
    }

    fn remediation(&self) -> Option<&'static str> {
        match self {
            StoreError::Io { .. } => Some("check filesystem permissions under docs/1-project"),
            StoreError::Parse(_) => Some("inspect docs/1-project/epics.json for manual edits"),
        }
    }
}

/// Legacy collection shape: a bare array of epics with lowercase priority
/// words and the old status vocabulary.
#[derive(Debug, serde::Deserialize)]
struct LegacyEpic {
    id: String,
    title: String,
    #[serde(default)]
    priority: String,
    #[serde(default)]
    status: String,
}

#[derive(Clone)]
pub struct EpicStore {
    project_root: PathBuf,
    doc_path: PathBuf,
}

impl EpicStore {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        let doc_path = project_root.join(EPICS_RELATIVE_PATH);
        Self {
            project_root,
            doc_path,
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn doc_path(&self) -> &Path {
        &self.doc_path
    }

    /// Load the collection, migrating the legacy shape if encountered.
    ///
    /// A missing document yields an empty collection named after the project
    /// root directory.
    pub fn load(&self) -> Result<EpicCollection, StoreError> {
        if !self.doc_path.exists() {
            return Ok(EpicCollection::new(self.default_project_id()));
        }

        let raw = fs::read_to_string(&self.doc_path)
            .map_err(|e| StoreError::io(&self.doc_path, e))?;

        match serde_json::from_str::<EpicCollection>(&raw) {
            Ok(collection) => Ok(collection),
            Err(current_err) => {
                // Attempt the legacy array shape before giving up.
                let legacy: Vec<LegacyEpic> = serde_json::from_str(&raw).map_err(|_| {
                    StoreError::Parse(format!(
                        "document matches neither current nor legacy shape: {}",
                        current_err
                    ))
                })?;

                tracing::info!(
                    "Migrating legacy epic document with {} entries at {:?}",
                    legacy.len(),
                    self.doc_path
                );
                let mut migrated = self.migrate_legacy(legacy);
                self.save(&mut migrated)?;
                Ok(migrated)
            }
        }
    }

    /// Serialize to pretty JSON and atomically replace the document.
    ///
    /// Collection metadata is refreshed as part of the write.
    pub fn save(&self, collection: &mut EpicCollection) -> Result<(), StoreError> {
        collection.touch();

        let dir = self
            .doc_path
            .parent()
            .unwrap_or_else(|| Path::new("."));
        create_dir_all_mode(dir).map_err(|e| StoreError::io(dir, e))?;

        let mut payload = serde_json::to_vec_pretty(collection)
            .map_err(|e| StoreError::Parse(e.to_string()))?;
        payload.push(b'\n');

        let tmp_path = dir.join(format!(".epics.{}.tmp", Uuid::new_v4()));
        fs::write(&tmp_path, &payload).map_err(|e| StoreError::io(&tmp_path, e))?;
        set_file_mode(&tmp_path, 0o644).map_err(|e| StoreError::io(&tmp_path, e))?;

        if let Err(e) = fs::rename(&tmp_path, &self.doc_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(StoreError::io(&self.doc_path, e));
        }
        Ok(())
    }

    fn migrate_legacy(&self, legacy: Vec<LegacyEpic>) -> EpicCollection {
        let now = chrono::Utc::now();
        let mut collection = EpicCollection::new(self.default_project_id());

        for entry in legacy {
            let epic = Epic {
                id: entry.id.clone(),
                title: entry.title,
                description: String::new(),
                priority: Priority::from_legacy(&entry.priority).unwrap_or_default(),
                status: EpicStatus::from_legacy(&entry.status),
                start_date: None,
                end_date: None,
                duration: None,
                tags: vec![],
                dependencies: vec![],
                user_stories: vec![],
                progress: ProgressMetrics::default(),
                created_at: now,
                updated_at: now,
            };
            collection.epics.insert(entry.id, epic);
        }
        collection
    }

    fn default_project_id(&self) -> String {
        self.project_root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "project".to_string())
    }
}

#[cfg(unix)]
fn create_dir_all_mode(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    if dir.exists() {
        return Ok(());
    }
    fs::DirBuilder::new().recursive(true).mode(0o755).create(dir)
}

#[cfg(not(unix))]
fn create_dir_all_mode(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)
}

#[cfg(unix)]
fn set_file_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_file_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
