//! Deterministic content hashing for staged artifact trees.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

/// Compute a stable blake3 digest of a directory tree.
///
/// Entries are visited breadth-first with each directory's children sorted,
/// so the digest depends only on relative paths and file contents, never on
/// creation order. Each file contributes `path, length, bytes`; each
/// directory contributes its path. Symlinks are rejected: staged artifact
/// trees are always plain copies.
pub fn tree_digest(root: &Path) -> anyhow::Result<String> {
    let mut hasher = blake3::Hasher::new();
    let mut queue = VecDeque::from([root.to_path_buf()]);

    while let Some(dir) = queue.pop_front() {
        let mut entries: Vec<PathBuf> = fs::read_dir(&dir)
            .with_context(|| format!("Failed to read directory: {}", dir.display()))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<_, _>>()
            .with_context(|| format!("Failed to list directory: {}", dir.display()))?;
        entries.sort();

        for path in entries {
            let rel = path.strip_prefix(root).unwrap_or(&path);
            let meta = fs::symlink_metadata(&path)
                .with_context(|| format!("Failed to stat: {}", path.display()))?;

            if meta.is_dir() {
                hasher.update(rel.to_string_lossy().as_bytes());
                hasher.update(b"/");
                queue.push_back(path);
            } else if meta.is_file() {
                hasher.update(rel.to_string_lossy().as_bytes());
                hasher.update(b"=");
                hasher.update(&meta.len().to_le_bytes());
                let content = fs::read(&path)
                    .with_context(|| format!("Failed to read file: {}", path.display()))?;
                hasher.update(&content);
            } else {
                anyhow::bail!("Unsupported entry in artifact tree: {}", path.display());
            }
        }
    }

    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_file(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create_dir_all should succeed");
        }
        fs::write(path, content).expect("write should succeed");
    }

    #[test]
    fn digest_is_independent_of_creation_order() {
        let first = TempDir::new().expect("tempdir should succeed");
        write_file(&first.path().join("a.txt"), "alpha");
        write_file(&first.path().join("sub/b.txt"), "beta");

        let second = TempDir::new().expect("tempdir should succeed");
        write_file(&second.path().join("sub/b.txt"), "beta");
        write_file(&second.path().join("a.txt"), "alpha");

        assert_eq!(
            tree_digest(first.path()).unwrap(),
            tree_digest(second.path()).unwrap()
        );
    }

    #[test]
    fn digest_changes_with_content_and_name() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        write_file(&tmp.path().join("a.txt"), "alpha");
        let original = tree_digest(tmp.path()).unwrap();

        write_file(&tmp.path().join("a.txt"), "beta");
        let edited = tree_digest(tmp.path()).unwrap();
        assert_ne!(original, edited);

        fs::remove_file(tmp.path().join("a.txt")).unwrap();
        write_file(&tmp.path().join("b.txt"), "beta");
        let renamed = tree_digest(tmp.path()).unwrap();
        assert_ne!(edited, renamed);
    }

    #[test]
    fn empty_directories_are_significant() {
        let plain = TempDir::new().expect("tempdir should succeed");
        write_file(&plain.path().join("a.txt"), "alpha");

        let with_dir = TempDir::new().expect("tempdir should succeed");
        write_file(&with_dir.path().join("a.txt"), "alpha");
        fs::create_dir(with_dir.path().join("empty")).unwrap();

        assert_ne!(
            tree_digest(plain.path()).unwrap(),
            tree_digest(with_dir.path()).unwrap()
        );
    }

    #[test]
    fn missing_root_fails() {
        assert!(tree_digest(Path::new("/nonexistent/artifact/tree")).is_err());
    }
}
