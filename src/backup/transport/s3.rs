use crate::backup::app_config::StorageConfig;
use crate::backup::cancel::CancelToken;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use crate::backup::transport::{check_key, join_key, strip_key_prefix, Transport};
use crate::backup::validate::validate_bucket_name;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bon::Builder;
use dyn_iter::{DynIter, IntoDynIterator};
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::VecDeque;
use std::fs::File;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Runtime;
use validator::Validate;

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct S3Config {
    #[validate(custom(function = validate_bucket_name))]
    #[builder(into)]
    bucket: String,
    #[builder(into)]
    region: Option<String>,
    /// Key prefix inside the bucket
    #[builder(into)]
    path: Option<String>,
    /// S3-compatible endpoint such as MinIO
    #[validate(url)]
    #[builder(into)]
    endpoint: Option<String>,
    #[serde(default)]
    #[builder(default)]
    force_path_style: bool,
    /// Static credentials; the default AWS provider chain is used when unset
    #[builder(into)]
    access_key_id: Option<String>,
    #[builder(into)]
    secret_access_key: Option<RedactedString>,
}

/// Amazon S3 backend.
///
/// The SDK is async, so the transport owns a private current-thread runtime
/// and drives every call to completion on the calling thread, racing it
/// against the cancel token.
pub struct S3Transport {
    config: S3Config,
    client: Client,
    runtime: Runtime,
}

impl S3Transport {
    pub fn new(config: S3Config) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::from)
            .add_msg("Failed to start s3 runtime")?;

        let client = runtime.block_on(async {
            let mut loader = aws_config::defaults(BehaviorVersion::latest());
            if let Some(region) = &config.region {
                loader = loader.region(aws_config::Region::new(region.clone()));
            }
            if let Some(endpoint) = &config.endpoint {
                loader = loader.endpoint_url(endpoint);
            }
            let sdk_config = loader.load().await;

            let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
            if config.force_path_style {
                builder = builder.force_path_style(true);
            }
            if let (Some(id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
                builder = builder.credentials_provider(Credentials::new(
                    id,
                    secret.inner(),
                    None,
                    None,
                    "db_backup-config",
                ));
            }
            Client::from_conf(builder.build())
        });

        Ok(Self {
            config,
            client,
            runtime,
        })
    }

    pub fn from_storage(storage: &StorageConfig) -> Result<Self> {
        storage.parse_fields().and_then(Self::new)
    }

    fn block_on<T, F: Future<Output = Result<T>>>(&self, cancel: &CancelToken, fut: F) -> Result<T> {
        cancel.check()?;
        self.runtime.block_on(async {
            tokio::select! {
                res = fut => res,
                _ = cancel.cancelled() => Err(Error::Cancelled),
            }
        })
    }

    fn fetch_page(&self, prefix: &str, token: Option<String>, cancel: &CancelToken) -> Result<(Vec<String>, Option<String>)> {
        let full_prefix = join_key(self.config.path.as_deref(), prefix);
        self.block_on(cancel, async {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.config.bucket)
                .prefix(full_prefix)
                .set_continuation_token(token)
                .send()
                .await
                .map_err(|e| Error::remote(format!("list failed: {}", DisplayErrorContext(e))))?;

            let keys = page
                .contents()
                .iter()
                .filter_map(|o| o.key())
                .filter_map(|k| strip_key_prefix(self.config.path.as_deref(), k))
                .map(str::to_string)
                .collect();
            let next = match page.is_truncated() {
                Some(true) => page.next_continuation_token().map(str::to_string),
                _ => None,
            };
            Ok((keys, next))
        })
    }
}

/// Fetches one listing page at a time as the caller iterates.
struct KeyPages<'a> {
    transport: &'a S3Transport,
    prefix: String,
    cancel: CancelToken,
    buffer: VecDeque<String>,
    next_token: Option<String>,
    exhausted: bool,
}

impl Iterator for KeyPages<'_> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(key) = self.buffer.pop_front() {
                return Some(Ok(key));
            }
            if self.exhausted {
                return None;
            }
            match self
                .transport
                .fetch_page(&self.prefix, self.next_token.take(), &self.cancel)
            {
                Ok((keys, next)) => {
                    self.exhausted = next.is_none();
                    self.next_token = next;
                    self.buffer.extend(keys);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl Transport for S3Transport {
    fn name(&self) -> Arc<str> {
        "s3".into()
    }

    fn put(&self, local: &Path, key: &str, cancel: &CancelToken) -> Result<String> {
        check_key(key)?;
        let object = join_key(self.config.path.as_deref(), key);
        tracing::info!("Uploading {:?} to s3://{}/{}", local, self.config.bucket, object);
        self.block_on(cancel, async {
            let body = ByteStream::from_path(local)
                .await
                .map_err(|e| Error::remote(format!("cannot read {:?}: {}", local, e)))?;
            self.client
                .put_object()
                .bucket(&self.config.bucket)
                .key(&object)
                .body(body)
                .send()
                .await
                .map_err(|e| Error::remote(format!("upload failed: {}", DisplayErrorContext(e))))?;
            Ok(())
        })?;
        Ok(format!("s3://{}/{}", self.config.bucket, object))
    }

    fn get(&self, key: &str, local: &Path, cancel: &CancelToken) -> Result<PathBuf> {
        check_key(key)?;
        let object = join_key(self.config.path.as_deref(), key);
        tracing::info!("Downloading s3://{}/{} to {:?}", self.config.bucket, object, local);
        self.block_on(cancel, async {
            let output = self
                .client
                .get_object()
                .bucket(&self.config.bucket)
                .key(&object)
                .send()
                .await
                .map_err(|e| Error::remote(format!("download failed: {}", DisplayErrorContext(e))))?;

            let mut body = output.body;
            let mut file = File::create(local)
                .map_err(Error::from)
                .add_msg(format!("Failed to create {:?}", local))?;
            while let Some(chunk) = body
                .try_next()
                .await
                .map_err(|e| Error::remote(format!("download interrupted: {}", e)))?
            {
                file.write_all(&chunk)?;
            }
            file.sync_all()?;
            Ok(())
        })?;
        Ok(local.to_path_buf())
    }

    fn list<'a>(&'a self, prefix: &str, cancel: &CancelToken) -> Result<DynIter<'a, Result<String>>> {
        cancel.check()?;
        Ok(KeyPages {
            transport: self,
            prefix: prefix.to_string(),
            cancel: cancel.clone(),
            buffer: VecDeque::new(),
            next_token: None,
            exhausted: false,
        }
        .into_dyn_iter())
    }
}
