pub mod gcs;
pub mod local;
#[cfg(feature = "s3")]
pub mod s3;

use crate::backup::cancel::CancelToken;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use dyn_iter::DynIter;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Moves artifacts between the local work dir and a storage backend.
///
/// Keys are relative, `/`-separated names. Each backend maps them under its
/// own root or prefix, and `list` reports them relative to that root again.
pub trait Transport: Send + Sync {
    fn name(&self) -> Arc<str>;

    /// Uploads `local` as `key` and returns a backend-specific locator
    /// (absolute path, `s3://…`, `gs://…`) for the stored object.
    fn put(&self, local: &Path, key: &str, cancel: &CancelToken) -> Result<String>;

    /// Downloads `key` into `local` and returns the written path.
    fn get(&self, key: &str, local: &Path, cancel: &CancelToken) -> Result<PathBuf>;

    /// Lazily lists keys starting with `prefix`.
    fn list<'a>(&'a self, prefix: &str, cancel: &CancelToken) -> Result<DynIter<'a, Result<String>>>;
}

/// Rejects keys that could escape the backend root.
pub fn check_key(key: &str) -> Result<()> {
    let path = Path::new(key);
    let escapes = key.trim().is_empty()
        || key.starts_with('/')
        || path.is_absolute()
        || path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        Err(Error::invalid_key(key))
    } else {
        Ok(())
    }
}

/// Joins a configured prefix and a key with exactly one `/` between them.
pub fn join_key(prefix: Option<&str>, key: &str) -> String {
    match prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        Some(p) => format!("{}/{}", p, key),
        None => key.to_string(),
    }
}

/// Inverse of [`join_key`], `None` for keys outside the prefix.
pub fn strip_key_prefix<'k>(prefix: Option<&str>, full: &'k str) -> Option<&'k str> {
    match prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        Some(p) => full.strip_prefix(p).and_then(|rest| rest.strip_prefix('/')),
        None => Some(full),
    }
}
