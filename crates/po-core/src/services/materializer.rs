use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use crate::error::{OrchestratorError, Result};

use super::stack_registry::{StackDescriptor, DOCKERFILE};

const DOCKERIGNORE: &str = ".dockerignore";
const DOCKERIGNORE_CONTENT: &str = "node_modules\ndist\n.next\n.git\n";

/// Writes generated file maps into per-project build directories under a
/// single root.
#[derive(Debug, Clone)]
pub struct Materializer {
    root: PathBuf,
}

impl Materializer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_dir(&self, project_id: i64) -> PathBuf {
        self.root.join(format!("project-{project_id}"))
    }

    /// Recreate the project's directory from `files`, always (re)writing the
    /// stack's Dockerfile and filling in the fallback app when a required
    /// file is still missing. The returned directory always passes
    /// [`has_required_files`].
    pub async fn materialize(
        &self,
        project_id: i64,
        project_name: &str,
        files: &BTreeMap<String, String>,
        descriptor: &StackDescriptor,
    ) -> Result<PathBuf> {
        let dir = self.project_dir(project_id);
        if dir.exists() {
            tokio::fs::remove_dir_all(&dir)
                .await
                .map_err(|e| write_error(&dir, e))?;
        }
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| write_error(&dir, e))?;

        for (relative, content) in files {
            let target = dir.join(checked_relative(relative)?);
            write_file(&target, content).await?;
        }

        write_file(&dir.join(DOCKERFILE), &(descriptor.dockerfile)()).await?;
        if !dir.join(DOCKERIGNORE).exists() {
            write_file(&dir.join(DOCKERIGNORE), DOCKERIGNORE_CONTENT).await?;
        }

        if !has_required_files(&dir, descriptor) {
            let written = create_basic_fallback(&dir, project_name, descriptor).await?;
            tracing::info!(
                project_id,
                stack = %descriptor.kind,
                files = written,
                "generated tree incomplete, wrote fallback app"
            );
        }

        Ok(dir)
    }
}

/// Existence check over the descriptor's required files.
pub fn has_required_files(dir: &Path, descriptor: &StackDescriptor) -> bool {
    descriptor
        .required_files
        .iter()
        .all(|file| dir.join(file).is_file())
}

/// Number of regular files under `dir`, recursively. A missing directory
/// counts as empty.
pub async fn count_files(dir: &Path) -> Result<usize> {
    let mut count = 0;
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(OrchestratorError::Io(e)),
        };
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else {
                count += 1;
            }
        }
    }
    Ok(count)
}

/// Write the descriptor's minimal app into `dir`, skipping files that already
/// exist, plus the Dockerfile. Returns the number of files written.
pub async fn create_basic_fallback(
    dir: &Path,
    project_name: &str,
    descriptor: &StackDescriptor,
) -> Result<usize> {
    let mut written = 0;
    for (relative, content) in (descriptor.fallback_files)(project_name) {
        let target = dir.join(relative);
        if target.exists() {
            continue;
        }
        write_file(&target, &content).await?;
        written += 1;
    }
    let dockerfile = dir.join(DOCKERFILE);
    if !dockerfile.exists() {
        write_file(&dockerfile, &(descriptor.dockerfile)()).await?;
        written += 1;
    }
    Ok(written)
}

/// Reject absolute paths and `..` so generated paths stay inside the
/// project directory.
fn checked_relative(relative: &str) -> Result<PathBuf> {
    let trimmed = relative.trim_start_matches("./");
    let path = Path::new(trimmed);
    let escapes = trimmed.is_empty()
        || path.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
    if escapes {
        return Err(OrchestratorError::MaterializationFailed(format!(
            "refusing to write outside the project directory: '{relative}'"
        )));
    }
    Ok(path.to_path_buf())
}

async fn write_file(target: &Path, content: &str) -> Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| write_error(parent, e))?;
    }
    tokio::fs::write(target, content)
        .await
        .map_err(|e| write_error(target, e))
}

fn write_error(path: &Path, e: std::io::Error) -> OrchestratorError {
    OrchestratorError::MaterializationFailed(format!("{}: {e}", path.display()))
}
