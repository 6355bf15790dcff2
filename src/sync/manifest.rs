//! Deterministic manifest regeneration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use super::hash::{file_digest, walk_files};
use super::SyncError;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Namespace prefixed to every manifest path.
pub const MANIFEST_NAMESPACE: &str = "system/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub size: u64,
    pub sha256: String,
}

/// True for paths excluded from the manifest: anything under a `hooks/`
/// segment and any `manifest.json`.
fn excluded(rel: &str) -> bool {
    if rel == MANIFEST_FILE || rel.ends_with(&format!("/{}", MANIFEST_FILE)) {
        return true;
    }
    rel.starts_with("hooks/") || rel.contains("/hooks/")
}

/// Walk the tree, hash every included file, and rewrite `manifest.json` at
/// the root as a sorted, two-space pretty-printed array. Returns the
/// entries written.
pub fn regenerate_manifest(root: &Path) -> Result<Vec<ManifestEntry>, SyncError> {
    let mut entries = Vec::new();
    for rel in walk_files(root)? {
        if excluded(&rel) {
            continue;
        }
        let full = root.join(&rel);
        let metadata = fs::metadata(&full).map_err(|e| SyncError::io(&full, e))?;
        entries.push(ManifestEntry {
            path: format!("{}{}", MANIFEST_NAMESPACE, rel),
            size: metadata.len(),
            sha256: file_digest(&full)?,
        });
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));

    let mut payload = serde_json::to_vec_pretty(&entries)
        .map_err(|e| SyncError::io(root, std::io::Error::other(e)))?;
    payload.push(b'\n');

    let manifest_path = root.join(MANIFEST_FILE);
    fs::write(&manifest_path, payload).map_err(|e| SyncError::io(&manifest_path, e))?;

    tracing::info!("Regenerated manifest with {} entries", entries.len());
    Ok(entries)
}
