use crate::backup::app_config::TargetConfig;
use crate::backup::cancel::CancelToken;
use crate::backup::capture::{artifact_stem, CaptureAdapter};
use crate::backup::file_ext::FileExtProvider;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use crate::backup::validate::validate_non_empty_path;
use bon::Builder;
use getset::Getters;
use rusqlite::backup::{Backup, StepResult};
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;

/// Pages copied per backup step; the token is checked between steps.
const PAGES_PER_STEP: i32 = 256;
const BUSY_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct SqliteConfig {
    #[validate(custom(function = validate_non_empty_path))]
    #[builder(into)]
    path: PathBuf,
}

/// Uses the SQLite online backup API in both directions, so the snapshot is
/// consistent even while other connections write, and a restore replaces
/// every page of the target database.
#[derive(Debug)]
pub struct SqliteAdapter {
    config: SqliteConfig,
}

impl SqliteAdapter {
    pub fn new(config: SqliteConfig) -> Self {
        Self { config }
    }

    pub fn from_target(target: &TargetConfig) -> Result<Self> {
        target.parse_fields().map(Self::new)
    }

    fn open_read_only(path: &Path) -> Result<Connection> {
        Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(Error::from)
        .add_msg(format!("Failed to open sqlite database {:?}", path))
    }
}

fn copy_database(src: &Connection, dst: &mut Connection, cancel: &CancelToken) -> Result<()> {
    let backup = Backup::new(src, dst)?;
    loop {
        cancel.check()?;
        match backup.step(PAGES_PER_STEP)? {
            StepResult::Done => return Ok(()),
            StepResult::More => {}
            _ => {
                tracing::debug!("sqlite database busy, retrying");
                std::thread::sleep(BUSY_RETRY_DELAY)
            }
        }
    }
}

impl FileExtProvider for SqliteAdapter {
    fn file_ext(&self) -> Option<Arc<str>> {
        Some("db".into())
    }
}

impl CaptureAdapter for SqliteAdapter {
    fn name(&self) -> Arc<str> {
        "sqlite".into()
    }

    fn artifact_stem(&self) -> String {
        artifact_stem(
            self.config
                .path
                .file_name()
                .map(|n| n.to_string_lossy())
                .unwrap_or_default(),
        )
    }

    fn capture(&self, output: &Path, cancel: &CancelToken) -> Result<PathBuf> {
        tracing::info!("Snapshotting sqlite database {:?}", self.config.path);
        let src = Self::open_read_only(&self.config.path)?;
        let mut dst = Connection::open(output)?;
        copy_database(&src, &mut dst, cancel)?;
        dst.close().map_err(|(_, e)| Error::from(e))?;
        Ok(output.to_path_buf())
    }

    fn restore(&self, artifact: &Path, cancel: &CancelToken) -> Result<()> {
        tracing::info!("Restoring sqlite database {:?} from {:?}", self.config.path, artifact);
        let src = Self::open_read_only(artifact)?;
        if let Some(parent) = self.config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut dst = Connection::open(&self.config.path)?;
        copy_database(&src, &mut dst, cancel)?;
        dst.close().map_err(|(_, e)| Error::from(e))?;
        Ok(())
    }

    fn test_connection(&self, _cancel: &CancelToken) -> Result<()> {
        let conn = Self::open_read_only(&self.config.path)?;
        let tables: i64 = conn.query_row("SELECT count(*) FROM sqlite_master", [], |r| r.get(0))?;
        tracing::debug!("sqlite database {:?} has {} schema entries", self.config.path, tables);
        Ok(())
    }
}
