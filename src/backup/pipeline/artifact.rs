use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::AddMsg;
use chrono::{DateTime, Local};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tempfile::TempPath;

/// Microsecond resolution keeps names unique across back-to-back runs.
pub fn timestamp(now: DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M%S_%6f").to_string()
}

/// `<stem>_<timestamp>.<ext>`, or without the extension when there is none.
pub fn backup_file_name(stem: &str, ext: Option<&str>, timestamp: &str) -> String {
    match ext {
        Some(ext) => format!("{}_{}.{}", stem, timestamp, ext),
        None => format!("{}_{}", stem, timestamp),
    }
}

/// `restore_<timestamp>_<basename of key>`.
pub fn restore_file_name(key: &str, timestamp: &str) -> Option<String> {
    let base = Path::new(key).file_name()?.to_str()?;
    Some(format!("restore_{}_{}", timestamp, base))
}

/// A local file owned by the pipeline. Deleted by [`discard`](Self::discard),
/// or on drop as a last resort.
#[derive(Debug)]
pub struct Artifact {
    path: TempPath,
}

impl Artifact {
    /// Takes ownership of `path` whether or not anything has been written there yet.
    pub fn reserve<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: TempPath::from_path(path.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deletes the file. A file that was never written is not an error.
    pub fn discard(self) -> Result<()> {
        let path = self.path.to_path_buf();
        match self.path.close() {
            Ok(()) => {
                tracing::debug!("Removed artifact {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::from(e)).add_msg(format!("Failed to remove artifact {:?}", path)),
        }
    }
}

/// Every artifact a single pipeline run has created so far.
#[derive(Debug, Default)]
pub struct Artifacts {
    live: Vec<Artifact>,
}

impl Artifacts {
    /// Registers `path` before a stage writes to it, so a partial output is
    /// cleaned up as well.
    pub fn reserve(&mut self, path: PathBuf) -> PathBuf {
        self.live.push(Artifact::reserve(path.clone()));
        path
    }

    /// Registers a path a stage produced on its own, if not already tracked.
    pub fn adopt(&mut self, path: &Path) {
        if !self.live.iter().any(|a| a.path() == path) {
            self.reserve(path.to_path_buf());
        }
    }

    /// Deletes one artifact once the next stage no longer needs it.
    pub fn release(&mut self, path: &Path) -> Result<()> {
        match self.live.iter().position(|a| a.path() == path) {
            Some(i) => self.live.remove(i).discard(),
            None => Ok(()),
        }
    }

    /// Deletes everything still tracked, newest first, collecting every failure.
    pub fn cleanup(&mut self) -> Result<()> {
        let errors = self
            .live
            .drain(..)
            .rev()
            .filter_map(|a| a.discard().err())
            .collect();
        convert_error_vec(errors)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}
