use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Anything that names the file extension of the artifacts it produces.
pub trait FileExtProvider {
    fn file_ext(&self) -> Option<Arc<str>>;
}

/// Appends `.ext` to the full file name, keeping any existing extension.
pub fn with_appended_ext<P: AsRef<Path>>(path: P, ext: &str) -> PathBuf {
    let mut s = path.as_ref().as_os_str().to_owned();
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

/// Strips a trailing `.ext`, returning `None` when the file name does not end with it.
pub fn strip_ext<P: AsRef<Path>>(path: P, ext: &str) -> Option<PathBuf> {
    let path = path.as_ref();
    let file_name = path.file_name()?.to_str()?;
    let stem = file_name.strip_suffix(ext)?.strip_suffix('.')?;
    if stem.is_empty() {
        return None;
    }
    Some(path.with_file_name(stem))
}
