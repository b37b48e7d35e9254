pub mod command;
pub mod mongo;
pub mod mysql;
pub mod postgres;
pub mod sqlite;

use crate::backup::cancel::CancelToken;
use crate::backup::file_ext::FileExtProvider;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::result::Result;
use crate::backup::validate::validate_non_empty_path;
use bon::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use validator::Validate;

/// Snapshot and restore capability for one database engine.
///
/// Adapters are built from a [`TargetConfig`](crate::backup::app_config::TargetConfig)
/// by the registry; construction parses and validates the engine's typed
/// config, so an adapter that exists is always fully configured.
pub trait CaptureAdapter: FileExtProvider + Send + Sync {
    /// Engine tag, used to attribute errors.
    fn name(&self) -> Arc<str>;

    /// Target-derived prefix for artifact file names.
    fn artifact_stem(&self) -> String;

    /// Writes a snapshot to `output` and returns that path.
    fn capture(&self, output: &Path, cancel: &CancelToken) -> Result<PathBuf>;

    /// Replaces the data store's content with the snapshot at `artifact`.
    fn restore(&self, artifact: &Path, cancel: &CancelToken) -> Result<()>;

    fn test_connection(&self, cancel: &CancelToken) -> Result<()>;
}

/// Connection settings shared by the dump/restore-via-subprocess engines.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    #[builder(into)]
    host: String,
    #[validate(range(min = 1))]
    port: u16,
    #[validate(length(min = 1))]
    #[builder(into)]
    user: String,
    #[builder(into)]
    password: Option<RedactedString>,
    #[validate(length(min = 1))]
    #[builder(into)]
    database: String,
    /// Directory holding the engine's client binaries, `$PATH` lookup when unset
    #[validate(custom(function = validate_non_empty_path))]
    #[builder(into)]
    bin_dir: Option<PathBuf>,
}

impl ServerConfig {
    pub fn program(&self, name: &str) -> PathBuf {
        match &self.bin_dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }
}

/// File-name-safe stem: anything but ASCII alphanumerics, `-` and `_` becomes `_`.
pub fn artifact_stem<S: AsRef<str>>(raw: S) -> String {
    let stem: String = sanitize_filename::sanitize(raw.as_ref())
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "backup".to_string()
    } else {
        stem
    }
}
