use crate::backup::app_config::TargetConfig;
use crate::backup::cancel::CancelToken;
use crate::backup::capture::command::{run, run_to_file};
use crate::backup::capture::{artifact_stem, CaptureAdapter, ServerConfig};
use crate::backup::file_ext::FileExtProvider;
use crate::backup::result_error::result::Result;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

/// Plain-SQL dumps through `pg_dump`, replayed with `psql`.
#[derive(Debug)]
pub struct PostgresAdapter {
    name: Arc<str>,
    config: ServerConfig,
}

impl PostgresAdapter {
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

    fn command(&self, program: &str) -> Command {
        let mut command = Command::new(self.config.program(program));
        command
            .arg("-h")
            .arg(self.config.host())
            .arg("-p")
            .arg(self.config.port().to_string())
            .arg("-U")
            .arg(self.config.user());
        if let Some(password) = self.config.password() {
            command.env("PGPASSWORD", password.inner());
        }
        command
    }
}

impl FileExtProvider for PostgresAdapter {
    fn file_ext(&self) -> Option<Arc<str>> {
        Some("sql".into())
    }
}

impl CaptureAdapter for PostgresAdapter {
    fn name(&self) -> Arc<str> {
        "postgres".into()
    }

    fn artifact_stem(&self) -> String {
        artifact_stem(&self.name)
    }

    fn capture(&self, output: &Path, cancel: &CancelToken) -> Result<PathBuf> {
        tracing::info!(
            "Dumping postgres database {:?} on {}:{}",
            self.config.database(),
            self.config.host(),
            self.config.port()
        );
        let mut command = self.command("pg_dump");
        // -w: never prompt, fail instead
        command.arg("-w").arg(self.config.database());
        run_to_file(command, output, cancel)?;
        Ok(output.to_path_buf())
    }

    fn restore(&self, artifact: &Path, cancel: &CancelToken) -> Result<()> {
        tracing::info!("Restoring postgres database {:?}", self.config.database());
        let mut command = self.command("psql");
        command
            .arg("-w")
            .args(["-v", "ON_ERROR_STOP=1"])
            .arg("-d")
            .arg(self.config.database())
            .arg("-f")
            .arg(artifact)
            .stdin(Stdio::null())
            .stdout(Stdio::null());
        run(command, cancel)
    }

    fn test_connection(&self, cancel: &CancelToken) -> Result<()> {
        let mut command = self.command("pg_isready");
        command
            .arg("-d")
            .arg(self.config.database())
            .stdin(Stdio::null())
            .stdout(Stdio::null());
        run(command, cancel)
    }
}
