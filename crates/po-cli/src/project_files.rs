use std::collections::BTreeMap;
use std::path::Path;

use color_eyre::eyre::{eyre, WrapErr};
use walkdir::{DirEntry, WalkDir};

/// Directories that are build output or tooling state, never sources.
const SKIPPED_DIRS: &[&str] = &["node_modules", ".git", "dist", ".next", "build"];

fn is_skipped(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIPPED_DIRS.contains(&name))
}

/// Read a generated project from disk into a relative-path to content map.
/// Paths use `/` separators. Non-UTF-8 files are skipped.
pub fn read_project_dir(dir: &Path) -> color_eyre::Result<BTreeMap<String, String>> {
    if !dir.is_dir() {
        return Err(eyre!("{} is not a directory", dir.display()));
    }

    let mut files = BTreeMap::new();
    for entry in WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped(e))
    {
        let entry = entry.wrap_err_with(|| format!("failed to walk {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dir)
            .wrap_err("walked outside the project directory")?;
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        match std::fs::read_to_string(entry.path()) {
            Ok(content) => {
                files.insert(key, content);
            }
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                tracing::warn!(file = %key, "skipping non-UTF-8 file");
            }
            Err(e) => {
                return Err(e).wrap_err_with(|| format!("failed to read {}", entry.path().display()))
            }
        }
    }
    Ok(files)
}
