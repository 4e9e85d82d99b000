use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::errors::{HarnessError, Result};

/// True for `test-*.yml`, `test_*.yaml` and friends.
pub fn is_scenario_document(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let has_prefix = name.starts_with("test-") || name.starts_with("test_");
    let has_extension = path
        .extension()
        .map(|ext| ext == "yml" || ext == "yaml")
        .unwrap_or(false);
    has_prefix && has_extension
}

/// Recursively scans for scenario documents.
///
/// A path that names a file is taken as-is, whatever its name. The returned
/// list is sorted for a deterministic run order.
pub fn discover_documents<P: AsRef<Path>>(root: P) -> Result<Vec<PathBuf>> {
    let root = root.as_ref();
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| HarnessError::Document {
            path: e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf()),
            message: format!("failed to walk directory: {}", e),
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if !is_scenario_document(path) {
            continue;
        }

        files.push(path.to_path_buf());
    }
    files.sort();
    Ok(files)
}
