use crate::backup::compress::CompressorConfig;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use crate::backup::validate::validate_writable_dir;
use getset::Getters;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::skip_serializing_none;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use validator::{Validate, ValidationError};

pub static DEFAULT_CONFIG_FILE: &str = "db_backup_config.yaml";

pub static SAMPLE_CONFIG: &str = r#"# db_backup configuration
#
# work_dir: /var/tmp/db-backup   # local scratch space for artifacts (default: OS temp dir)
# timeout: 30m                   # abort any run that takes longer than this
compressor:
  compressor_type: gzip          # none | gzip | xz
  level: 6

databases:
  sqlitedb:
    type: sqlite
    path: /data/app.db
  # main:
  #   type: postgres             # mysql | postgres | mongo
  #   host: localhost
  #   port: 5432
  #   user: app
  #   password: change-me
  #   database: app

storage:
  type: local                    # local | s3 | gcs
  path: ./backups
  # type: s3
  # bucket: my-backups
  # region: eu-west-1
  # path: prod

# notifications:
#   slack_webhook: https://hooks.slack.com/services/XXX/YYY/ZZZ
"#;

/// A named target: the `type` tag selecting the capture adapter plus the
/// engine specific fields, kept untyped until the adapter parses them.
#[derive(Clone, Serialize, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct TargetConfig {
    #[serde(skip, default = "unnamed")]
    name: Arc<str>,
    #[serde(rename = "type")]
    kind: Arc<str>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

/// The storage section: the `type` tag selecting the transport adapter plus
/// the backend specific fields.
#[derive(Clone, Serialize, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct StorageConfig {
    #[serde(rename = "type")]
    kind: Arc<str>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

fn unnamed() -> Arc<str> {
    "".into()
}

/// Parses an untyped section into an adapter's typed config and runs its
/// validation rules. Errors name the offending field.
fn parse_section<T: DeserializeOwned + Validate>(
    fields: &Map<String, Value>,
) -> std::result::Result<T, String> {
    let typed: T = serde_json::from_value(Value::Object(fields.clone())).map_err(|e| e.to_string())?;
    typed.validate().map_err(|e| e.to_string())?;
    Ok(typed)
}

impl TargetConfig {
    pub fn new<N: Into<Arc<str>>, K: Into<Arc<str>>>(name: N, kind: K, fields: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            fields,
        }
    }

    pub fn parse_fields<T: DeserializeOwned + Validate>(&self) -> Result<T> {
        parse_section(&self.fields).map_err(|e| {
            Error::config(format!(
                "invalid config for database {:?} (type {}): {}",
                self.name, self.kind, e
            ))
        })
    }
}

impl StorageConfig {
    pub fn new<K: Into<Arc<str>>>(kind: K, fields: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            fields,
        }
    }

    pub fn parse_fields<T: DeserializeOwned + Validate>(&self) -> Result<T> {
        parse_section(&self.fields).map_err(|e| {
            Error::config(format!("invalid storage config (type {}): {}", self.kind, e))
        })
    }
}

// Field values may hold credentials, only the keys are printed.
impl Debug for TargetConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetConfig")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Debug for StorageConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("kind", &self.kind)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct NotificationsConfig {
    #[validate(url)]
    pub slack_webhook: Option<String>,
}

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[validate(custom(function = validate_writable_dir))]
    pub work_dir: Option<PathBuf>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    #[validate(custom(function = validate_section))]
    pub compressor: CompressorConfig,
    #[serde(default)]
    pub databases: BTreeMap<String, TargetConfig>,
    pub storage: StorageConfig,
    #[serde(default)]
    #[validate(custom(function = validate_section))]
    pub notifications: NotificationsConfig,
}

fn validate_section<V: Validate>(section: &V) -> std::result::Result<(), ValidationError> {
    section.validate().map_err(|e| {
        ValidationError::new("InvalidSection").with_message(e.to_string().into())
    })
}

impl AppConfig {
    /// Reads and validates a YAML config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        File::open(path)
            .map_err(Error::from)
            .add_msg(format!("Open config failed: {:?}", path))
            .and_then(|f| {
                serde_yml::from_reader::<_, AppConfig>(f)
                    .map_err(Error::from)
                    .add_msg(format!("Parse YAML config failed: {:?}", path))
            })
            .and_then(|c| {
                c.validate()
                    .map_err(Error::from)
                    .map(|_| c)
                    .add_msg(format!("Config validation failed: {:?}", path))
            })
    }

    /// Resolves a target by name. The returned config knows its own name.
    pub fn target(&self, name: &str) -> Result<TargetConfig> {
        self.databases
            .get(name)
            .map(|t| TargetConfig {
                name: name.into(),
                ..t.clone()
            })
            .ok_or_else(|| Error::config(format!("database config not found: {:?}", name)))
    }

    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn slack_webhook(&self) -> Option<&str> {
        self.notifications
            .slack_webhook
            .as_deref()
            .filter(|s| !s.trim().is_empty())
    }
}
