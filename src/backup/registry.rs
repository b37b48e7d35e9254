use crate::backup::app_config::{StorageConfig, TargetConfig};
use crate::backup::capture::mongo::MongoAdapter;
use crate::backup::capture::mysql::MysqlAdapter;
use crate::backup::capture::postgres::PostgresAdapter;
use crate::backup::capture::sqlite::SqliteAdapter;
use crate::backup::capture::CaptureAdapter;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::transport::gcs::GcsTransport;
use crate::backup::transport::local::LocalTransport;
use crate::backup::transport::Transport;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

type Factory<C, T> = Box<dyn Fn(&C) -> Result<Box<T>> + Send + Sync>;

/// Maps a config `type` tag to the constructor of the matching adapter.
///
/// Built once at startup and read-only afterwards. Adding an engine or a
/// backend means registering one more factory, nothing else changes.
pub struct AdapterRegistry<C, T: ?Sized> {
    family: &'static str,
    factories: BTreeMap<Arc<str>, Factory<C, T>>,
}

pub type CaptureRegistry = AdapterRegistry<TargetConfig, dyn CaptureAdapter>;
pub type TransportRegistry = AdapterRegistry<StorageConfig, dyn Transport>;

impl<C, T: ?Sized> AdapterRegistry<C, T> {
    pub fn new(family: &'static str) -> Self {
        Self {
            family,
            factories: BTreeMap::new(),
        }
    }

    pub fn register<S, F>(&mut self, tag: S, factory: F) -> Result<()>
    where
        S: Into<Arc<str>>,
        F: Fn(&C) -> Result<Box<T>> + Send + Sync + 'static,
    {
        let tag = tag.into();
        if self.factories.contains_key(&tag) {
            return Err(Error::config(format!(
                "{} type {:?} is already registered",
                self.family, tag
            )));
        }
        self.factories.insert(tag, Box::new(factory));
        Ok(())
    }

    /// Builds the adapter for `tag` from `config`.
    pub fn resolve(&self, tag: &str, config: &C) -> Result<Box<T>> {
        let factory = self.factories.get(tag).ok_or_else(|| {
            Error::config(format!(
                "unsupported {} type {:?} (known: {})",
                self.family,
                tag,
                itertools::join(self.tags(), ", ")
            ))
        })?;
        factory(config)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(|k| k.as_ref())
    }
}

impl<C, T: ?Sized> Debug for AdapterRegistry<C, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("family", &self.family)
            .field("tags", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CaptureRegistry {
    /// Registry of the database engines shipped with the crate.
    pub fn with_builtin() -> Result<Self> {
        let mut registry = Self::new("database");
        registry.register("sqlite", |t: &TargetConfig| {
            SqliteAdapter::from_target(t).map(|a| Box::new(a) as Box<dyn CaptureAdapter>)
        })?;
        registry.register("mysql", |t: &TargetConfig| {
            MysqlAdapter::from_target(t).map(|a| Box::new(a) as Box<dyn CaptureAdapter>)
        })?;
        registry.register("postgres", |t: &TargetConfig| {
            PostgresAdapter::from_target(t).map(|a| Box::new(a) as Box<dyn CaptureAdapter>)
        })?;
        registry.register("mongo", |t: &TargetConfig| {
            MongoAdapter::from_target(t).map(|a| Box::new(a) as Box<dyn CaptureAdapter>)
        })?;
        Ok(registry)
    }

    pub fn resolve_target(&self, target: &TargetConfig) -> Result<Box<dyn CaptureAdapter>> {
        self.resolve(target.kind(), target)
    }
}

impl TransportRegistry {
    /// Registry of the storage backends compiled into the crate. `s3` is only
    /// present with the `s3` feature.
    pub fn with_builtin() -> Result<Self> {
        let mut registry = Self::new("storage");
        registry.register("local", |s: &StorageConfig| {
            LocalTransport::from_storage(s).map(|t| Box::new(t) as Box<dyn Transport>)
        })?;
        registry.register("gcs", |s: &StorageConfig| {
            GcsTransport::from_storage(s).map(|t| Box::new(t) as Box<dyn Transport>)
        })?;
        #[cfg(feature = "s3")]
        registry.register("s3", |s: &StorageConfig| {
            crate::backup::transport::s3::S3Transport::from_storage(s)
                .map(|t| Box::new(t) as Box<dyn Transport>)
        })?;
        Ok(registry)
    }

    pub fn resolve_storage(&self, storage: &StorageConfig) -> Result<Box<dyn Transport>> {
        self.resolve(storage.kind(), storage)
    }
}
