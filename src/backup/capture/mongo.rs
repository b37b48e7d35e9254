use crate::backup::app_config::TargetConfig;
use crate::backup::cancel::CancelToken;
use crate::backup::capture::command::run;
use crate::backup::capture::{artifact_stem, CaptureAdapter, ServerConfig};
use crate::backup::file_ext::FileExtProvider;
use crate::backup::result_error::result::Result;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

/// Everything outside the RFC 3986 unreserved set is escaped.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Single-file `mongodump --archive` snapshots.
///
/// The mongo tools take credentials inside the connection URI, so the URI is
/// built per call and never logged.
#[derive(Debug)]
pub struct MongoAdapter {
    name: Arc<str>,
    config: ServerConfig,
}

impl MongoAdapter {
    pub fn new<N: Into<Arc<str>>>(name: N, config: ServerConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    pub fn from_target(target: &TargetConfig) -> Result<Self> {
        target
            .parse_fields()
            .map(|config| Self::new(target.name().clone(), config))
    }

    fn uri(&self) -> String {
        let user = utf8_percent_encode(self.config.user(), URI_COMPONENT);
        let credentials = match self.config.password() {
            Some(password) => format!("{}:{}", user, utf8_percent_encode(password.inner(), URI_COMPONENT)),
            None => user.to_string(),
        };
        format!(
            "mongodb://{}@{}:{}/{}",
            credentials,
            self.config.host(),
            self.config.port(),
            utf8_percent_encode(self.config.database(), URI_COMPONENT)
        )
    }

    fn command(&self, program: &str) -> Command {
        let mut command = Command::new(self.config.program(program));
        command.stdin(Stdio::null()).stdout(Stdio::null());
        command
    }
}

impl FileExtProvider for MongoAdapter {
    fn file_ext(&self) -> Option<Arc<str>> {
        Some("archive".into())
    }
}

impl CaptureAdapter for MongoAdapter {
    fn name(&self) -> Arc<str> {
        "mongo".into()
    }

    fn artifact_stem(&self) -> String {
        artifact_stem(&self.name)
    }

    fn capture(&self, output: &Path, cancel: &CancelToken) -> Result<PathBuf> {
        tracing::info!(
            "Dumping mongo database {:?} on {}:{}",
            self.config.database(),
            self.config.host(),
            self.config.port()
        );
        let mut command = self.command("mongodump");
        command
            .arg(format!("--uri={}", self.uri()))
            .arg(format!("--archive={}", output.display()));
        run(command, cancel)?;
        Ok(output.to_path_buf())
    }

    fn restore(&self, artifact: &Path, cancel: &CancelToken) -> Result<()> {
        tracing::info!("Restoring mongo database {:?}", self.config.database());
        let mut command = self.command("mongorestore");
        command
            .arg(format!("--uri={}", self.uri()))
            .arg(format!("--archive={}", artifact.display()))
            .arg("--drop");
        run(command, cancel)
    }

    fn test_connection(&self, cancel: &CancelToken) -> Result<()> {
        let mut command = self.command("mongosh");
        command
            .arg(self.uri())
            .arg("--quiet")
            .args(["--eval", "db.runCommand({ ping: 1 })"]);
        run(command, cancel)
    }
}
