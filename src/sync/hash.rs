//! File digests and canonical tree walks.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use walkdir::WalkDir;

use super::SyncError;

/// Hex-encoded SHA-256 of a file's content, computed in 8 KiB chunks.
pub fn file_digest(path: &Path) -> Result<String, SyncError> {
    let mut file = File::open(path).map_err(|e| SyncError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf).map_err(|e| SyncError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Enumerate regular files beneath `root` as forward-slash relative paths,
/// sorted lexicographically. Symlinks are not followed; directories produce
/// no entries.
pub fn walk_files(root: &Path) -> Result<Vec<String>, SyncError> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| SyncError::Walk {
            path: root.to_path_buf(),
            source: e,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        paths.push(relative_path(root, entry.path()));
    }
    paths.sort();
    Ok(paths)
}

/// Forward-slash path of `path` relative to `root`, with no leading slash.
pub fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let joined = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    joined.trim_start_matches('/').to_string()
}
