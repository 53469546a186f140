//! Content-hashed directory snapshot and diff (spec §4.A).

use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::PluginResult;

/// Bytes past this cutoff are not hashed; the truncation itself is folded into the hash
/// input so a truncated read and a full read of the same prefix still differ.
pub const HASH_CUTOFF_BYTES: u64 = 16 * 1024 * 1024;

/// File extensions ignored by a directory walk (compiled-bytecode artifacts, caches).
const IGNORED_EXTENSIONS: &[&str] = &["pyc", "pyo", "o", "so", "dll", "class"];

/// Base names ignored by a directory walk (VCS metadata, cache directories).
const IGNORED_NAMES: &[&str] = &[".git", "__pycache__", ".DS_Store", "node_modules", ".hg"];

/// A content hash for one file, or a marker that the file could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileDigest {
    Hash(String),
    Unreadable,
}

/// Content-hashed map of a directory tree at one point in time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: HashMap<PathBuf, FileDigest>,
}

impl Snapshot {
    /// Walk `root` and hash every file that survives the extension/name filters.
    /// Symlinks are followed at most once; cycles (by canonical path) are broken.
    pub fn take(root: &Path) -> PluginResult<Self> {
        let mut entries = HashMap::new();
        let mut seen_canonical = HashSet::new();
        walk(root, root, &mut entries, &mut seen_canonical)?;
        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.entries.keys()
    }

    pub fn get(&self, path: &Path) -> Option<&FileDigest> {
        self.entries.get(path)
    }

    /// Top-level directory component of `path` relative to the snapshot root, used to
    /// group changed files by owning plugin (spec §4.H step 3).
    pub fn top_level(path: &Path) -> Option<&std::ffi::OsStr> {
        path.components().next().map(|c| c.as_os_str())
    }

    /// Compare two snapshots. Returns `(added, removed, modified)`, pairwise disjoint,
    /// whose union is the symmetric difference of keys plus changed-value keys.
    pub fn diff(a: &Snapshot, b: &Snapshot) -> (Vec<PathBuf>, Vec<PathBuf>, Vec<PathBuf>) {
        let mut added = Vec::new();
        let mut removed = Vec::new();
        let mut modified = Vec::new();

        for (path, digest) in &b.entries {
            match a.entries.get(path) {
                None => added.push(path.clone()),
                Some(prev) => {
                    // Unreadable files are reported as modified on every pass, never
                    // silently dropped (spec §4.A).
                    if prev != digest || matches!(digest, FileDigest::Unreadable) {
                        modified.push(path.clone());
                    }
                }
            }
        }
        for path in a.entries.keys() {
            if !b.entries.contains_key(path) {
                removed.push(path.clone());
            }
        }

        (added, removed, modified)
    }
}

fn walk(
    root: &Path,
    dir: &Path,
    entries: &mut HashMap<PathBuf, FileDigest>,
    seen_canonical: &mut HashSet<PathBuf>,
) -> PluginResult<()> {
    let read_dir = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(_) => return Ok(()),
    };

    for entry in read_dir.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        let name_str = name.to_string_lossy();

        if IGNORED_NAMES.iter().any(|ignored| name_str == *ignored) {
            continue;
        }

        let file_type = match entry.file_type() {
            Ok(ft) => ft,
            Err(_) => continue,
        };

        if file_type.is_symlink() {
            let canonical = match std::fs::canonicalize(&path) {
                Ok(c) => c,
                Err(_) => continue,
            };
            if !seen_canonical.insert(canonical.clone()) {
                continue;
            }
            if canonical.is_dir() {
                walk(root, &canonical, entries, seen_canonical)?;
                continue;
            }
        } else if file_type.is_dir() {
            walk(root, &path, entries, seen_canonical)?;
            continue;
        }

        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if IGNORED_EXTENSIONS.contains(&ext) {
                continue;
            }
        }

        let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        let digest = hash_file(&path);
        entries.insert(relative, digest);
    }

    Ok(())
}

fn hash_file(path: &Path) -> FileDigest {
    use std::io::Read;

    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return FileDigest::Unreadable,
    };

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total_read: u64 = 0;
    let mut truncated = false;

    loop {
        let remaining = HASH_CUTOFF_BYTES.saturating_sub(total_read);
        if remaining == 0 {
            // Confirm there is more data beyond the cutoff before declaring truncation.
            truncated = file.read(&mut buf[..1]).map(|n| n > 0).unwrap_or(false);
            break;
        }
        let want = remaining.min(buf.len() as u64) as usize;
        match file.read(&mut buf[..want]) {
            Ok(0) => break,
            Ok(n) => {
                hasher.update(&buf[..n]);
                total_read += n as u64;
            }
            Err(_) => return FileDigest::Unreadable,
        }
    }

    hasher.update(if truncated { b"truncated" } else { b"full" });
    FileDigest::Hash(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_diff_disjoint() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let snap_a = Snapshot::take(dir.path()).unwrap();

        std::fs::remove_file(dir.path().join("a.txt")).unwrap();
        std::fs::write(dir.path().join("b.txt"), b"world").unwrap();
        let snap_b = Snapshot::take(dir.path()).unwrap();

        let (added, removed, modified) = Snapshot::diff(&snap_a, &snap_b);
        assert_eq!(added, vec![PathBuf::from("b.txt")]);
        assert_eq!(removed, vec![PathBuf::from("a.txt")]);
        assert!(modified.is_empty());
    }

    #[test]
    fn test_modification_detected_regardless_of_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"v1").unwrap();
        let snap_a = Snapshot::take(dir.path()).unwrap();

        // Overwrite with different content but do not touch mtime semantics the test
        // relies on — the hash must differ purely from the content change.
        let mut f = std::fs::OpenOptions::new().write(true).truncate(true).open(&path).unwrap();
        f.write_all(b"v2").unwrap();
        let snap_b = Snapshot::take(dir.path()).unwrap();

        let (added, removed, modified) = Snapshot::diff(&snap_a, &snap_b);
        assert!(added.is_empty());
        assert!(removed.is_empty());
        assert_eq!(modified, vec![PathBuf::from("a.txt")]);
    }

    #[test]
    fn test_ignored_names_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), b"ref: refs/heads/main").unwrap();
        std::fs::write(dir.path().join("plugin.yaml"), b"name: x").unwrap();

        let snap = Snapshot::take(dir.path()).unwrap();
        assert_eq!(snap.paths().count(), 1);
    }
}
