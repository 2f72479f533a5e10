use std::path::{Path, PathBuf};

/// Base directory for local, best-effort caches belonging to one repository
/// scope: platform cache dir + `satchel/<scope>`
/// (Linux: `~/.cache/satchel/<scope>`, macOS: `~/Library/Caches/satchel/<scope>`).
///
/// `override_dir` takes precedence when set (tests, sandboxed environments).
/// Returns `None` when no cache location is available; all callers treat
/// that as "caching disabled", never as an error.
pub fn cache_base_dir(scope: &str, override_dir: Option<&Path>) -> Option<PathBuf> {
    match override_dir {
        Some(dir) => Some(dir.join(scope)),
        None => dirs::cache_dir().map(|base| base.join("satchel").join(scope)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let path = cache_base_dir("abc123", Some(dir.path())).unwrap();
        assert!(path.starts_with(dir.path()));
        assert!(path.ends_with("abc123"));
    }
}
