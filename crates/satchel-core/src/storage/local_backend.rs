use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use crate::error::{Result, SatchelError};
use crate::storage::{Backend, FileInfo};

/// Storage backend for a local directory (fixed disk, removable media mount,
/// or a synced cloud folder) using `std::fs` directly.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a backend rooted at the given directory path.
    pub fn new(root: &Path) -> Result<Self> {
        // Canonicalize if the path already exists for clearer errors and
        // correct strip_prefix behavior with symlinked roots.
        let root = if root.exists() {
            fs::canonicalize(root)?
        } else {
            root.to_path_buf()
        };
        Ok(Self { root })
    }

    /// Reject storage keys that could escape the repository root.
    fn validate_key(key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(SatchelError::InvalidFormat(
                "unsafe storage key: empty".into(),
            ));
        }
        if key.starts_with('/') || key.starts_with('\\') {
            return Err(SatchelError::InvalidFormat(format!(
                "unsafe storage key: absolute path '{key}'"
            )));
        }
        if key.contains('\\') {
            return Err(SatchelError::InvalidFormat(format!(
                "unsafe storage key: contains backslash '{key}'"
            )));
        }
        for component in Path::new(key).components() {
            if component == Component::ParentDir {
                return Err(SatchelError::InvalidFormat(format!(
                    "unsafe storage key: parent traversal '{key}'"
                )));
            }
        }
        Ok(())
    }

    /// Resolve a `/`-separated storage key to a filesystem path under the root.
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        Self::validate_key(key)?;
        Ok(self.root.join(key))
    }

    /// Write data to a temp file in the same directory, then atomically rename
    /// into place. Readers never see a partial file.
    fn atomic_write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let dir = path.parent().unwrap_or(&self.root);
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(data)?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Recursively list all files under `dir` as `/`-separated keys relative
    /// to the root, with their sizes.
    fn list_recursive(&self, dir: &Path, out: &mut Vec<FileInfo>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                self.list_recursive(&entry.path(), out)?;
            } else if file_type.is_file() {
                if let Ok(rel) = entry.path().strip_prefix(&self.root) {
                    let key = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    let size = entry.metadata()?.len();
                    out.push(FileInfo { key, size });
                }
            }
        }
        Ok(())
    }
}

impl Backend for LocalBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(key)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        match self.atomic_write(&path, data) {
            Err(SatchelError::Io(ref e)) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                self.atomic_write(&path, data)
            }
            other => other,
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<FileInfo>> {
        let dir = if prefix.is_empty() {
            self.root.clone()
        } else {
            self.resolve(prefix.trim_end_matches('/'))?
        };
        match fs::metadata(&dir) {
            Ok(meta) if meta.is_dir() => {
                let mut out = Vec::new();
                self.list_recursive(&dir, &mut out)?;
                Ok(out)
            }
            Ok(_) => Ok(Vec::new()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn rename_scope(&self, old_scope: &str, new_scope: &str) -> Result<()> {
        let old_path = self.resolve(old_scope)?;
        let new_path = self.resolve(new_scope)?;
        match fs::rename(&old_path, &new_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_backend() -> (tempfile::TempDir, LocalBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path()).unwrap();
        (dir, backend)
    }

    #[test]
    fn validate_key_rejects_unsafe_keys() {
        assert!(LocalBackend::validate_key("/etc/passwd").is_err());
        assert!(LocalBackend::validate_key("\\Windows\\System32").is_err());
        assert!(LocalBackend::validate_key("../../outside").is_err());
        assert!(LocalBackend::validate_key("foo/../../etc/passwd").is_err());
        assert!(LocalBackend::validate_key("foo\\bar").is_err());
        assert!(LocalBackend::validate_key("").is_err());
    }

    #[test]
    fn validate_key_accepts_safe_keys() {
        assert!(LocalBackend::validate_key("scope/blobs/deadbeef").is_ok());
        assert!(LocalBackend::validate_key("scope/snapshots/abc123").is_ok());
    }

    #[test]
    fn get_returns_none_for_missing_key() {
        let (_dir, backend) = test_backend();
        assert!(backend.get("no/such/key").unwrap().is_none());
    }

    #[test]
    fn put_creates_parent_dirs_on_demand() {
        let (_dir, backend) = test_backend();
        backend.put("scope/blobs/abc", b"data").unwrap();
        assert_eq!(backend.get("scope/blobs/abc").unwrap().unwrap(), b"data");
    }

    #[test]
    fn put_overwrites_existing_key() {
        let (_dir, backend) = test_backend();
        backend.put("obj", b"version1").unwrap();
        backend.put("obj", b"version2").unwrap();
        assert_eq!(backend.get("obj").unwrap().unwrap(), b"version2");
    }

    #[test]
    fn delete_missing_key_is_ok() {
        let (_dir, backend) = test_backend();
        assert!(backend.delete("missing").is_ok());
    }

    #[test]
    fn list_reports_keys_and_sizes() {
        let (_dir, backend) = test_backend();
        backend.put("scope/blobs/aa", b"12345").unwrap();
        backend.put("scope/blobs/bb", b"6789").unwrap();
        backend.put("scope/snapshots/cc", b"x").unwrap();

        let mut infos = backend.list("scope/blobs/").unwrap();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].key, "scope/blobs/aa");
        assert_eq!(infos[0].size, 5);
        assert_eq!(infos[1].key, "scope/blobs/bb");
        assert_eq!(infos[1].size, 4);
    }

    #[test]
    fn list_returns_empty_for_missing_dir() {
        let (_dir, backend) = test_backend();
        assert!(backend.list("nothing/here/").unwrap().is_empty());
    }

    #[test]
    fn rename_scope_moves_all_objects() {
        let (_dir, backend) = test_backend();
        backend.put("old/blobs/aa", b"1").unwrap();
        backend.put("old/snapshots/bb", b"2").unwrap();
        backend.rename_scope("old", "new").unwrap();
        assert!(backend.get("old/blobs/aa").unwrap().is_none());
        assert_eq!(backend.get("new/blobs/aa").unwrap().unwrap(), b"1");
        assert_eq!(backend.get("new/snapshots/bb").unwrap().unwrap(), b"2");
    }

    #[test]
    fn resolve_rejects_traversal() {
        let (_dir, backend) = test_backend();
        assert!(backend.get("../../etc/passwd").is_err());
        assert!(backend.put("../escape", b"bad").is_err());
        assert!(backend.delete("/absolute").is_err());
    }
}
