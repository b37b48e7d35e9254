use crate::backup::app_config::TargetConfig;
use crate::backup::cancel::CancelToken;
use crate::backup::capture::command::{run, run_from_file, run_to_file};
use crate::backup::capture::{artifact_stem, CaptureAdapter, ServerConfig};
use crate::backup::file_ext::FileExtProvider;
use crate::backup::result_error::result::Result;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

#[derive(Debug)]
pub struct MysqlAdapter {
    name: Arc<str>,
    config: ServerConfig,
}

impl MysqlAdapter {
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

    /// Connection flags common to every mysql client tool. The password goes
    /// through `MYSQL_PWD` so it never shows up in the process list.
    fn command(&self, program: &str) -> Command {
        let mut command = Command::new(self.config.program(program));
        command
            .arg(format!("-u{}", self.config.user()))
            .arg(format!("-h{}", self.config.host()))
            .arg(format!("-P{}", self.config.port()));
        if let Some(password) = self.config.password() {
            command.env("MYSQL_PWD", password.inner());
        }
        command
    }
}

impl FileExtProvider for MysqlAdapter {
    fn file_ext(&self) -> Option<Arc<str>> {
        Some("sql".into())
    }
}

impl CaptureAdapter for MysqlAdapter {
    fn name(&self) -> Arc<str> {
        "mysql".into()
    }

    fn artifact_stem(&self) -> String {
        artifact_stem(&self.name)
    }

    fn capture(&self, output: &Path, cancel: &CancelToken) -> Result<PathBuf> {
        tracing::info!(
            "Dumping mysql database {:?} on {}:{}",
            self.config.database(),
            self.config.host(),
            self.config.port()
        );
        let mut command = self.command("mysqldump");
        command
            .arg("--single-transaction")
            .arg(self.config.database());
        run_to_file(command, output, cancel)?;
        Ok(output.to_path_buf())
    }

    fn restore(&self, artifact: &Path, cancel: &CancelToken) -> Result<()> {
        tracing::info!("Restoring mysql database {:?}", self.config.database());
        let mut command = self.command("mysql");
        command.arg(self.config.database());
        run_from_file(command, artifact, cancel)
    }

    fn test_connection(&self, cancel: &CancelToken) -> Result<()> {
        let mut command = self.command("mysqladmin");
        command.arg("ping").stdin(Stdio::null()).stdout(Stdio::null());
        run(command, cancel)
    }
}
