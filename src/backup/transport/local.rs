use crate::backup::app_config::StorageConfig;
use crate::backup::cancel::{copy_with_cancel, CancelToken};
use crate::backup::file_ext::with_appended_ext;
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::transport::{check_key, Transport};
use crate::backup::validate::validate_non_empty_path;
use bon::Builder;
use dyn_iter::{DynIter, IntoDynIterator};
use function_name::named;
use getset::Getters;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use validator::Validate;
use walkdir::WalkDir;

#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct LocalConfig {
    #[validate(custom(function = validate_non_empty_path))]
    #[builder(into)]
    path: PathBuf,
}

/// Stores artifacts as plain files under a root directory.
///
/// Uploads go through a `.part` sibling that is renamed into place, so a
/// listed key always refers to a complete file.
#[derive(Debug)]
pub struct LocalTransport {
    config: LocalConfig,
}

impl LocalTransport {
    pub fn new(config: LocalConfig) -> Self {
        Self { config }
    }

    pub fn from_storage(storage: &StorageConfig) -> Result<Self> {
        storage.parse_fields().map(Self::new)
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        check_key(key)?;
        Ok(self.config.path.join(key))
    }
}

fn copy_file(src: &Path, dst: &Path, cancel: &CancelToken) -> Result<u64> {
    let mut reader = File::open(src)
        .map_err(Error::from)
        .add_msg(format!("Failed to open {:?}", src))?;
    let mut writer = File::create(dst)
        .map_err(Error::from)
        .add_msg(format!("Failed to create {:?}", dst))?;
    let written = copy_with_cancel(&mut reader, &mut writer, cancel)?;
    writer.flush()?;
    writer.sync_all()?;
    Ok(written)
}

impl Transport for LocalTransport {
    fn name(&self) -> Arc<str> {
        "local".into()
    }

    #[named]
    fn put(&self, local: &Path, key: &str, cancel: &CancelToken) -> Result<String> {
        let dst = self.resolve(key)?;
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)
                .map_err(Error::from)
                .add_msg(format!("Failed to create directory {:?}", parent))?;
        }

        let part = with_appended_ext(&dst, "part");
        let copied = copy_file(local, &part, cancel)
            .and_then(|n| std::fs::rename(&part, &dst).map(|_| n).map_err(Error::from));
        let written = match copied {
            Ok(n) => n,
            Err(e) => {
                if let Err(cleanup) = std::fs::remove_file(&part) {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        return Err(e.chain(cleanup.into())).add_fn_name(function_path!());
                    }
                }
                return Err(e).add_fn_name(function_path!());
            }
        };

        tracing::info!("Stored {} bytes at {:?}", written, dst);
        let locator = std::path::absolute(&dst)?;
        Ok(locator.to_string_lossy().into_owned())
    }

    fn get(&self, key: &str, local: &Path, cancel: &CancelToken) -> Result<PathBuf> {
        let src = self.resolve(key)?;
        if !src.is_file() {
            return Err(Error::from(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no stored artifact {:?} under {:?}", key, self.config.path),
            )));
        }
        let written = copy_file(&src, local, cancel)?;
        tracing::info!("Fetched {} bytes from {:?}", written, src);
        Ok(local.to_path_buf())
    }

    #[named]
    fn list<'a>(&'a self, prefix: &str, cancel: &CancelToken) -> Result<DynIter<'a, Result<String>>> {
        cancel.check()?;
        let root = self.config.path.clone();
        if !root.is_dir() {
            tracing::debug!("Storage root {:?} does not exist yet, nothing to list", root);
            return Ok(std::iter::empty().into_dyn_iter());
        }

        let prefix = prefix.to_string();
        let cancel = cancel.clone();
        let keys = WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(move |res| {
                if let Err(e) = cancel.check() {
                    return Some(Err(e));
                }
                let entry = match res {
                    Ok(entry) => entry,
                    Err(e) => return Some(Err(Error::from(e))),
                };
                if !entry.file_type().is_file() {
                    return None;
                }
                let relative = entry.path().strip_prefix(&root).ok()?;
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                (key.starts_with(&prefix) && !key.ends_with(".part")).then_some(Ok(key))
            })
            .map(move |res| res.add_fn_name(function_path!()));

        Ok(keys.into_dyn_iter())
    }
}
