use crate::backup::app_config::StorageConfig;
use crate::backup::cancel::CancelToken;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use crate::backup::transport::{check_key, join_key, Transport};
use crate::backup::validate::validate_bucket_name;
use bon::Builder;
use dyn_iter::DynIter;
use getset::Getters;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;

pub static DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";
pub static ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";
/// Upper bound on one upload when the run has no deadline of its own.
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60 * 60);

fn upload_timeout(cancel: &CancelToken) -> Duration {
    cancel.remaining().unwrap_or(UPLOAD_TIMEOUT)
}

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct GcsConfig {
    #[validate(custom(function = validate_bucket_name))]
    #[builder(into)]
    bucket: String,
    /// Object name prefix inside the bucket
    #[builder(into)]
    path: Option<String>,
    /// OAuth2 bearer token, falls back to `$GOOGLE_OAUTH_ACCESS_TOKEN`
    #[builder(into)]
    access_token: Option<RedactedString>,
    #[validate(url)]
    #[builder(into)]
    endpoint: Option<String>,
}

/// Upload-only Google Cloud Storage backend using the JSON API media upload.
#[derive(Debug)]
pub struct GcsTransport {
    config: GcsConfig,
}

impl GcsTransport {
    pub fn new(config: GcsConfig) -> Self {
        Self { config }
    }

    pub fn from_storage(storage: &StorageConfig) -> Result<Self> {
        storage.parse_fields().map(Self::new)
    }

    fn token(&self) -> Result<String> {
        if let Some(token) = &self.config.access_token {
            return Ok(token.inner().clone());
        }
        std::env::var(ACCESS_TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                Error::config(format!(
                    "gcs storage needs access_token or ${} to be set",
                    ACCESS_TOKEN_ENV
                ))
            })
    }

    fn upload_url(&self) -> String {
        format!(
            "{}/upload/storage/v1/b/{}/o",
            self.config
                .endpoint
                .as_deref()
                .unwrap_or(DEFAULT_ENDPOINT)
                .trim_end_matches('/'),
            self.config.bucket
        )
    }
}

impl Transport for GcsTransport {
    fn name(&self) -> Arc<str> {
        "gcs".into()
    }

    fn put(&self, local: &Path, key: &str, cancel: &CancelToken) -> Result<String> {
        check_key(key)?;
        let token = self.token()?;
        let object = join_key(self.config.path.as_deref(), key);
        cancel.check()?;

        let file = File::open(local)
            .map_err(Error::from)
            .add_msg(format!("Failed to open {:?}", local))?;
        // the blocking client cannot be interrupted, the deadline bounds it instead
        let client = Client::builder().timeout(upload_timeout(cancel)).build()?;
        tracing::info!("Uploading {:?} to gs://{}/{}", local, self.config.bucket, object);
        let response = client
            .post(self.upload_url())
            .query(&[("uploadType", "media"), ("name", object.as_str())])
            .bearer_auth(token)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(file)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::remote(format!(
                "upload of {:?} rejected with status {}: {}",
                object,
                status,
                body.trim()
            )));
        }
        cancel.check()?;
        Ok(format!("gs://{}/{}", self.config.bucket, object))
    }

    fn get(&self, _key: &str, _local: &Path, _cancel: &CancelToken) -> Result<PathBuf> {
        Err(Error::unsupported(self.name(), "download"))
    }

    fn list<'a>(&'a self, _prefix: &str, _cancel: &CancelToken) -> Result<DynIter<'a, Result<String>>> {
        Err(Error::unsupported(self.name(), "list"))
    }
}
