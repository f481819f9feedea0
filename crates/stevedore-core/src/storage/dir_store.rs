//! Filesystem-backed artifact storage with one generation of rollback.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use super::{ArtifactStore, tree_digest};

/// Stages a source directory (or single file) into a private work area.
///
/// Layout under the work directory:
/// - `current/` — the staged tree handed to lifecycle adapters
/// - `previous/` — the generation the last `synchronize` replaced
///
/// `roll_back` swaps `previous` back in; `delete` drops the whole work
/// area. The source itself is never modified.
pub struct DirArtifactStore {
    source: PathBuf,
    work_dir: PathBuf,
    current: PathBuf,
    previous: PathBuf,
}

impl DirArtifactStore {
    /// Prepare a work area for the unit at `source`. Nothing is staged
    /// until the first `synchronize`.
    pub fn new(source: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let source = source.into();
        let work_dir = work_dir.into();
        if !source.exists() {
            anyhow::bail!("Artifact source does not exist: {}", source.display());
        }
        fs::create_dir_all(&work_dir)
            .with_context(|| format!("Failed to create work area: {}", work_dir.display()))?;
        let current = work_dir.join("current");
        let previous = work_dir.join("previous");
        Ok(Self {
            source,
            work_dir,
            current,
            previous,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

impl ArtifactStore for DirArtifactStore {
    fn artifact_fs(&self) -> &Path {
        &self.current
    }

    fn synchronize(&self) -> anyhow::Result<()> {
        if !self.source.exists() {
            anyhow::bail!(
                "Artifact source disappeared: {}",
                self.source.display()
            );
        }
        if self.current.exists() {
            remove_if_exists(&self.previous)?;
            fs::rename(&self.current, &self.previous).with_context(|| {
                format!(
                    "Failed to rotate staged generation: {}",
                    self.current.display()
                )
            })?;
        }
        copy_tree(&self.source, &self.current)
            .with_context(|| format!("Failed to stage artifact from {}", self.source.display()))
    }

    fn roll_back(&self) -> anyhow::Result<()> {
        if !self.previous.exists() {
            anyhow::bail!(
                "No previous generation to roll back to: {}",
                self.work_dir.display()
            );
        }
        remove_if_exists(&self.current)?;
        fs::rename(&self.previous, &self.current).with_context(|| {
            format!(
                "Failed to restore previous generation: {}",
                self.previous.display()
            )
        })
    }

    fn delete(&self) -> anyhow::Result<()> {
        remove_if_exists(&self.work_dir).map(|_| ())
    }

    fn content_hash(&self) -> anyhow::Result<String> {
        tree_digest(&self.current)
    }
}

/// Remove a file or directory tree. `Ok(false)` when nothing was there.
fn remove_if_exists(path: &Path) -> anyhow::Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    let meta = fs::symlink_metadata(path)
        .with_context(|| format!("Failed to read metadata: {}", path.display()))?;
    if meta.is_dir() {
        fs::remove_dir_all(path)
            .with_context(|| format!("Failed to remove directory: {}", path.display()))?;
    } else {
        fs::remove_file(path)
            .with_context(|| format!("Failed to remove file: {}", path.display()))?;
    }
    Ok(true)
}

/// Copy `src` (file or directory) into a fresh directory at `dst`. A single
/// file lands inside `dst` under its own name, so the staged tree is always
/// a directory.
fn copy_tree(src: &Path, dst: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(dst)
        .with_context(|| format!("Failed to create directory: {}", dst.display()))?;

    if src.is_file() {
        let name = src
            .file_name()
            .with_context(|| format!("Source has no file name: {}", src.display()))?;
        fs::copy(src, dst.join(name))
            .with_context(|| format!("Failed to copy file: {}", src.display()))?;
        return Ok(());
    }

    for entry in
        fs::read_dir(src).with_context(|| format!("Failed to read directory: {}", src.display()))?
    {
        let entry =
            entry.with_context(|| format!("Failed to read entry under {}", src.display()))?;
        let path = entry.path();
        let target = dst.join(entry.file_name());
        if path.is_dir() {
            copy_tree(&path, &target)?;
        } else {
            fs::copy(&path, &target)
                .with_context(|| format!("Failed to copy file: {}", path.display()))?;
        }
    }
    Ok(())
}
