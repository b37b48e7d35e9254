//! Backup and restore orchestration.
//!
//! A backup runs capture, compress and upload in order. A restore runs
//! download, decompress (when the key carries a codec suffix) and restore.
//! Every local file a run creates is tracked in [`Artifacts`] and removed
//! before the run reports its outcome, whichever stage failed.

pub mod artifact;
pub mod state;

use crate::backup::app_config::AppConfig;
use crate::backup::cancel::CancelToken;
use crate::backup::capture::CaptureAdapter;
use crate::backup::compress::CompressorConfig;
use crate::backup::notifications::{self, Notifier};
use crate::backup::pipeline::artifact::{backup_file_name, restore_file_name, timestamp, Artifacts};
use crate::backup::pipeline::state::{Operation, PipelineState, Stage, StateTrail};
use crate::backup::registry::{CaptureRegistry, TransportRegistry};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::transport::Transport;
use bon::Builder;
use dyn_iter::{DynIter, IntoDynIterator};
use getset::Getters;
use std::path::Path;
use tracing::Span;

/// Terminal report of one backup or restore run.
#[derive(Debug, Getters)]
#[getset(get = "pub")]
pub struct OperationResult {
    operation: Operation,
    target: String,
    /// Status line, identical to what is sent to the notifier.
    message: String,
    states: Vec<PipelineState>,
    /// Remote locator (backup) or key (restore) on success.
    outcome: Result<String>,
}

impl OperationResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn into_outcome(self) -> Result<String> {
        self.outcome
    }
}

#[derive(Builder)]
pub struct Pipeline {
    config: AppConfig,
    captures: CaptureRegistry,
    transport: Box<dyn Transport>,
    notifier: Option<Box<dyn Notifier>>,
    #[builder(default = Span::none())]
    span: Span,
}

fn in_stage<T>(stage: Stage, res: Result<T>) -> Result<T> {
    res.map_err(|e| Error::stage(stage, e))
}

impl Pipeline {
    /// Wires the built-in adapters, the configured storage backend and the
    /// configured notifier. Fails if the storage section is invalid.
    pub fn from_config(config: AppConfig, span: Span) -> Result<Self> {
        let captures = CaptureRegistry::with_builtin()?;
        let transport = TransportRegistry::with_builtin()?.resolve_storage(&config.storage)?;
        let notifier = notifications::from_config(&config);
        Ok(Self::builder()
            .config(config)
            .captures(captures)
            .transport(transport)
            .maybe_notifier(notifier)
            .span(span)
            .build())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn adapter(&self, target_name: &str) -> Result<Box<dyn CaptureAdapter>> {
        let target = self.config.target(target_name)?;
        self.captures.resolve_target(&target)
    }

    pub fn backup(&self, target_name: &str, cancel: &CancelToken) -> OperationResult {
        let span = tracing::info_span!(parent: &self.span, "backup", target = %target_name);
        let _entered = span.enter();
        tracing::info!("Starting backup of {:?}", target_name);

        let failed = |e: &Error| format!("Backup failed for {}: {}", target_name, e);
        let adapter = match self.adapter(target_name) {
            Ok(adapter) => adapter,
            Err(e) => return self.reject(Operation::Backup, target_name, failed(&e), e),
        };

        let mut trail = StateTrail::default();
        let mut artifacts = Artifacts::default();
        let res = self.backup_stages(adapter.as_ref(), cancel, &mut trail, &mut artifacts);
        let outcome = self.cleanup(res, &mut trail, &mut artifacts);
        let message = match &outcome {
            Ok(locator) => format!("Backup successful for {}. Uploaded to: {}", target_name, locator),
            Err(e) => failed(e),
        };
        self.finish(Operation::Backup, target_name, message, trail, outcome)
    }

    fn backup_stages(
        &self,
        adapter: &dyn CaptureAdapter,
        cancel: &CancelToken,
        trail: &mut StateTrail,
        artifacts: &mut Artifacts,
    ) -> Result<String> {
        let work_dir = self.config.work_dir();
        let file_name = backup_file_name(
            &adapter.artifact_stem(),
            adapter.file_ext().as_deref(),
            &timestamp(chrono::Local::now()),
        );

        trail.enter(Stage::Capture);
        let raw = artifacts.reserve(work_dir.join(&file_name));
        let captured = in_stage(
            Stage::Capture,
            cancel
                .check()
                .and_then(|_| adapter.capture(&raw, cancel))
                .map_err(|e| Error::capture(adapter.name(), e)),
        )?;
        artifacts.adopt(&captured);
        tracing::info!("Captured {:?}", captured);

        let compressor = &self.config.compressor;
        let upload = match compressor.compressed_path(&captured) {
            Some(dst) => {
                trail.enter(Stage::Compress);
                artifacts.reserve(dst);
                let dst = in_stage(
                    Stage::Compress,
                    cancel
                        .check()
                        .and_then(|_| compressor.compress(&captured, cancel)),
                )?;
                tracing::info!("Compressed with {} into {:?}", compressor.codec_name(), dst);
                self.release(artifacts, &captured);
                dst
            }
            None => captured,
        };

        trail.enter(Stage::Upload);
        let key = file_key(&upload)?;
        let locator = in_stage(
            Stage::Upload,
            cancel
                .check()
                .and_then(|_| self.transport.put(&upload, &key, cancel))
                .map_err(|e| Error::transport(self.transport.name(), e)),
        )?;
        tracing::info!("Uploaded {:?} to {}", key, locator);
        Ok(locator)
    }

    pub fn restore(&self, key: &str, target_name: &str, cancel: &CancelToken) -> OperationResult {
        let span = tracing::info_span!(parent: &self.span, "restore", target = %target_name, key = %key);
        let _entered = span.enter();
        tracing::info!("Starting restore of {:?} from {:?}", target_name, key);

        let failed = |e: &Error| format!("Restore failed for {}: {}", target_name, e);
        let resolved = self.adapter(target_name).and_then(|adapter| {
            restore_file_name(key, &timestamp(chrono::Local::now()))
                .map(|file_name| (adapter, file_name))
                .ok_or_else(|| Error::invalid_key(key))
        });
        let (adapter, file_name) = match resolved {
            Ok(resolved) => resolved,
            Err(e) => return self.reject(Operation::Restore, target_name, failed(&e), e),
        };

        let mut trail = StateTrail::default();
        let mut artifacts = Artifacts::default();
        let res = self
            .restore_stages(key, adapter.as_ref(), &file_name, cancel, &mut trail, &mut artifacts)
            .map(|_| key.to_string());
        let outcome = self.cleanup(res, &mut trail, &mut artifacts);
        let message = match &outcome {
            Ok(_) => format!("Restore successful for {} from {}", target_name, key),
            Err(e) => failed(e),
        };
        self.finish(Operation::Restore, target_name, message, trail, outcome)
    }

    fn restore_stages(
        &self,
        key: &str,
        adapter: &dyn CaptureAdapter,
        file_name: &str,
        cancel: &CancelToken,
        trail: &mut StateTrail,
        artifacts: &mut Artifacts,
    ) -> Result<()> {
        trail.enter(Stage::Download);
        let local = artifacts.reserve(self.config.work_dir().join(file_name));
        let downloaded = in_stage(
            Stage::Download,
            cancel
                .check()
                .and_then(|_| self.transport.get(key, &local, cancel))
                .map_err(|e| Error::transport(self.transport.name(), e)),
        )?;
        artifacts.adopt(&downloaded);
        tracing::info!("Downloaded {:?} to {:?}", key, downloaded);

        let source = match CompressorConfig::for_path(&downloaded) {
            Some(codec) => {
                trail.enter(Stage::Decompress);
                artifacts.reserve(in_stage(Stage::Decompress, codec.decompressed_path(&downloaded))?);
                let dst = in_stage(
                    Stage::Decompress,
                    cancel
                        .check()
                        .and_then(|_| codec.decompress(&downloaded, cancel)),
                )?;
                tracing::info!("Decompressed {} artifact into {:?}", codec.codec_name(), dst);
                self.release(artifacts, &downloaded);
                dst
            }
            None => downloaded,
        };

        trail.enter(Stage::Restore);
        in_stage(
            Stage::Restore,
            cancel
                .check()
                .and_then(|_| adapter.restore(&source, cancel))
                .map_err(|e| Error::restore(adapter.name(), e)),
        )?;
        tracing::info!("Restored {:?} into {}", source, adapter.name());
        Ok(())
    }

    /// Lists stored keys under `prefix`, straight from the storage backend.
    pub fn list<'a>(&'a self, prefix: &str, cancel: &CancelToken) -> Result<DynIter<'a, Result<String>>> {
        let backend = self.transport.name();
        let keys = self
            .transport
            .list(prefix, cancel)
            .map_err(|e| Error::transport(backend.clone(), e))?;
        Ok(keys
            .map(move |res| res.map_err(|e| Error::transport(backend.clone(), e)))
            .into_dyn_iter())
    }

    /// Checks that the target is reachable with its configured credentials.
    pub fn test_connection(&self, target_name: &str, cancel: &CancelToken) -> Result<()> {
        let span = tracing::info_span!(parent: &self.span, "check", target = %target_name);
        let _entered = span.enter();
        let adapter = self.adapter(target_name)?;
        adapter
            .test_connection(cancel)
            .map_err(|e| Error::capture(adapter.name(), e))?;
        tracing::info!("Connection to {:?} ok", target_name);
        Ok(())
    }

    /// Drops an intermediate the next stage has replaced. A failure here is
    /// retried by the final cleanup.
    fn release(&self, artifacts: &mut Artifacts, path: &Path) {
        if let Err(e) = artifacts.release(path) {
            tracing::warn!("Failed to remove intermediate artifact {:?}: {}", path, e);
            artifacts.adopt(path);
        }
    }

    fn cleanup(
        &self,
        res: Result<String>,
        trail: &mut StateTrail,
        artifacts: &mut Artifacts,
    ) -> Result<String> {
        if res.is_ok() {
            trail.advance(PipelineState::Cleanup);
        }
        match (res, artifacts.cleanup()) {
            (Ok(v), Ok(())) => Ok(v),
            (Ok(v), Err(e)) => {
                tracing::warn!("Cleanup after successful run failed: {}", e);
                Ok(v)
            }
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup)) => Err(e.chain(cleanup)),
        }
    }

    /// Ends a run that failed before touching files, processes or the
    /// network. Nothing is sent to the notifier.
    fn reject(
        &self,
        operation: Operation,
        target_name: &str,
        message: String,
        error: Error,
    ) -> OperationResult {
        tracing::error!("{}", message);
        let mut trail = StateTrail::default();
        trail.advance(PipelineState::Failed);
        OperationResult {
            operation,
            target: target_name.to_string(),
            message,
            states: trail.into_states(),
            outcome: Err(error),
        }
    }

    fn finish(
        &self,
        operation: Operation,
        target_name: &str,
        message: String,
        mut trail: StateTrail,
        outcome: Result<String>,
    ) -> OperationResult {
        match &outcome {
            Ok(_) => {
                trail.advance(PipelineState::Done);
                tracing::info!("{}", message);
            }
            Err(_) => {
                trail.advance(PipelineState::Failed);
                tracing::error!("{}", message);
            }
        }
        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.notify(&message) {
                tracing::warn!("Failed to deliver {} notification: {}", operation, e);
            }
        }
        OperationResult {
            operation,
            target: target_name.to_string(),
            message,
            states: trail.into_states(),
            outcome,
        }
    }
}

fn file_key(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| Error::invalid_key(path.to_string_lossy()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::app_config::TargetConfig;
    use crate::backup::file_ext::FileExtProvider;
    use crate::backup::notifications::tests::RecordingNotifier;
    use crate::backup::result_error::error::ErrorKind;
    use crate::backup::transport::gcs::{GcsConfig, GcsTransport};
    use crate::backup::transport::local::{LocalConfig, LocalTransport};
    use rusqlite::Connection;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;
    use PipelineState::*;

    #[derive(Clone, Copy, Debug)]
    enum Behaviour {
        Succeed,
        /// writes half a dump, then fails
        Fail,
        /// reports success without producing the file
        Vanish,
        /// captures fine, refuses every restore
        RejectRestore,
    }

    #[derive(Debug)]
    struct FakeCapture {
        behaviour: Behaviour,
    }

    impl FileExtProvider for FakeCapture {
        fn file_ext(&self) -> Option<Arc<str>> {
            Some("bin".into())
        }
    }

    impl CaptureAdapter for FakeCapture {
        fn name(&self) -> Arc<str> {
            "fake".into()
        }

        fn artifact_stem(&self) -> String {
            "fake".to_string()
        }

        fn capture(&self, output: &Path, _cancel: &CancelToken) -> Result<PathBuf> {
            match self.behaviour {
                Behaviour::Succeed | Behaviour::RejectRestore => {
                    std::fs::write(output, b"fake dump")?;
                    Ok(output.to_path_buf())
                }
                Behaviour::Fail => {
                    std::fs::write(output, b"fake du")?;
                    Err(Error::config("connection reset"))
                }
                Behaviour::Vanish => Ok(output.to_path_buf()),
            }
        }

        fn restore(&self, artifact: &Path, _cancel: &CancelToken) -> Result<()> {
            match self.behaviour {
                Behaviour::RejectRestore => Err(Error::config(format!("cannot load {:?}", artifact))),
                _ => Ok(()),
            }
        }

        fn test_connection(&self, _cancel: &CancelToken) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Debug)]
    struct BrokenNotifier;

    impl Notifier for BrokenNotifier {
        fn notify(&self, _message: &str) -> Result<()> {
            Err(Error::webhook_status(502u16))
        }
    }

    struct Fixture {
        dir: TempDir,
        notifier: RecordingNotifier,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            std::fs::create_dir(dir.path().join("work")).unwrap();
            Self {
                dir,
                notifier: RecordingNotifier::default(),
            }
        }

        fn work_dir(&self) -> PathBuf {
            self.dir.path().join("work")
        }

        fn storage_dir(&self) -> PathBuf {
            self.dir.path().join("backups")
        }

        fn db_path(&self) -> PathBuf {
            self.dir.path().join("app.db")
        }

        fn config(&self, compressor: &str) -> AppConfig {
            serde_yml::from_str(&format!(
                r#"
work_dir: {:?}
compressor: {{ compressor_type: {} }}
databases:
  sqlitedb:
    type: sqlite
    path: {:?}
  flaky:
    type: fake
storage:
  type: local
  path: {:?}
"#,
                self.work_dir(),
                compressor,
                self.db_path(),
                self.storage_dir()
            ))
            .unwrap()
        }

        fn captures(behaviour: Behaviour) -> CaptureRegistry {
            let mut captures = CaptureRegistry::with_builtin().unwrap();
            captures
                .register("fake", move |_: &TargetConfig| {
                    Ok(Box::new(FakeCapture { behaviour }) as Box<dyn CaptureAdapter>)
                })
                .unwrap();
            captures
        }

        fn pipeline_with(&self, compressor: &str, behaviour: Behaviour, transport: Box<dyn Transport>) -> Pipeline {
            Pipeline::builder()
                .config(self.config(compressor))
                .captures(Self::captures(behaviour))
                .transport(transport)
                .notifier(Box::new(self.notifier.clone()))
                .build()
        }

        fn pipeline(&self, compressor: &str, behaviour: Behaviour) -> Pipeline {
            let local = LocalTransport::new(LocalConfig::builder().path(self.storage_dir()).build());
            self.pipeline_with(compressor, behaviour, Box::new(local))
        }

        fn assert_work_dir_empty(&self) {
            let left: Vec<_> = std::fs::read_dir(self.work_dir())
                .unwrap()
                .map(|e| e.unwrap().file_name())
                .collect();
            assert!(left.is_empty(), "artifacts left behind: {left:?}");
        }

        fn create_db(&self, rows: &[&str]) {
            let conn = Connection::open(self.db_path()).unwrap();
            conn.execute_batch("CREATE TABLE IF NOT EXISTS notes (id INTEGER PRIMARY KEY, body TEXT NOT NULL);")
                .unwrap();
            for row in rows {
                conn.execute("INSERT INTO notes (body) VALUES (?1)", [row]).unwrap();
            }
        }

        fn rows(&self) -> Vec<String> {
            let conn = Connection::open(self.db_path()).unwrap();
            let mut stmt = conn.prepare("SELECT body FROM notes ORDER BY id").unwrap();
            stmt.query_map([], |r| r.get(0))
                .unwrap()
                .collect::<std::result::Result<_, _>>()
                .unwrap()
        }
    }

    fn is_timestamped(name: &str, stem: &str, ext: &str) -> bool {
        name.strip_prefix(stem)
            .and_then(|rest| rest.strip_prefix('_'))
            .and_then(|rest| rest.strip_suffix(ext))
            .is_some_and(|ts| {
                ts.len() == 22
                    && ts
                        .chars()
                        .enumerate()
                        .all(|(i, c)| if i == 8 || i == 15 { c == '_' } else { c.is_ascii_digit() })
            })
    }

    #[test]
    fn test_sqlite_backup_then_restore() {
        let fx = Fixture::new();
        fx.create_db(&["first", "second"]);
        let pipeline = fx.pipeline("gzip", Behaviour::Succeed);

        let result = pipeline.backup("sqlitedb", &CancelToken::new());
        assert!(result.is_success(), "{}", result.message());
        assert_eq!(
            result.states(),
            &[Idle, Capturing, Compressing, Transporting, Cleanup, Done]
        );
        let locator = result.outcome().as_ref().unwrap().clone();
        assert!(Path::new(&locator).starts_with(fx.storage_dir()));
        let key = Path::new(&locator).file_name().unwrap().to_str().unwrap().to_string();
        assert!(is_timestamped(&key, "app_db", ".db.gz"), "{key}");
        assert_eq!(
            result.message(),
            &format!("Backup successful for sqlitedb. Uploaded to: {}", locator)
        );
        fx.assert_work_dir_empty();
        assert_eq!(fx.notifier.messages(), vec![result.message().clone()]);

        fx.create_db(&["third"]);
        let restored = pipeline.restore(&key, "sqlitedb", &CancelToken::new());
        assert!(restored.is_success(), "{}", restored.message());
        assert_eq!(
            restored.states(),
            &[Idle, Downloading, Decompressing, Restoring, Cleanup, Done]
        );
        assert_eq!(
            restored.message(),
            &format!("Restore successful for sqlitedb from {}", key)
        );
        assert_eq!(fx.rows(), vec!["first", "second"]);
        fx.assert_work_dir_empty();
        assert_eq!(fx.notifier.messages().len(), 2);
    }

    #[test]
    fn test_uncompressed_backup_skips_both_codec_stages() {
        let fx = Fixture::new();
        fx.create_db(&["row"]);
        let pipeline = fx.pipeline("none", Behaviour::Succeed);

        let result = pipeline.backup("sqlitedb", &CancelToken::new());
        assert_eq!(result.states(), &[Idle, Capturing, Transporting, Cleanup, Done]);
        let locator = result.into_outcome().unwrap();
        let key = Path::new(&locator).file_name().unwrap().to_str().unwrap().to_string();
        assert!(key.ends_with(".db"));

        let restored = pipeline.restore(&key, "sqlitedb", &CancelToken::new());
        assert_eq!(restored.states(), &[Idle, Downloading, Restoring, Cleanup, Done]);
        fx.assert_work_dir_empty();
    }

    #[test]
    fn test_unknown_target_fails_before_any_side_effect() {
        let fx = Fixture::new();
        let result = fx
            .pipeline("gzip", Behaviour::Succeed)
            .backup("unknown", &CancelToken::new());

        let err = result.outcome().as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(err.failed_stage(), None);
        assert!(err.to_string().contains("database config not found"));
        assert_eq!(result.states(), &[Idle, Failed]);
        assert!(result.message().starts_with("Backup failed for unknown: "));
        assert!(!fx.storage_dir().exists());
        fx.assert_work_dir_empty();
        assert!(fx.notifier.messages().is_empty());
    }

    #[test]
    fn test_restore_rejected_before_download() {
        let fx = Fixture::new();
        let pipeline = fx.pipeline("gzip", Behaviour::Succeed);

        let result = pipeline.restore("app_db_1.db.gz", "unknown", &CancelToken::new());
        let err = result.outcome().as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(err.failed_stage(), None);
        assert_eq!(result.states(), &[Idle, Failed]);
        assert!(result.message().starts_with("Restore failed for unknown: "));

        // a key with no file name cannot name a local artifact
        let result = pipeline.restore("", "sqlitedb", &CancelToken::new());
        assert!(!result.is_success());
        assert_eq!(result.states(), &[Idle, Failed]);

        fx.assert_work_dir_empty();
        assert!(fx.notifier.messages().is_empty());
    }

    #[test]
    fn test_restore_failure_cleans_up() {
        let fx = Fixture::new();
        let pipeline = fx.pipeline("gzip", Behaviour::RejectRestore);
        let locator = pipeline.backup("flaky", &CancelToken::new()).into_outcome().unwrap();
        let key = Path::new(&locator).file_name().unwrap().to_str().unwrap().to_string();

        let result = pipeline.restore(&key, "flaky", &CancelToken::new());
        let err = result.outcome().as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Restore);
        assert_eq!(err.failed_stage(), Some(Stage::Restore));
        assert!(err.to_string().contains("cannot load"));
        assert_eq!(
            result.states(),
            &[Idle, Downloading, Decompressing, Restoring, Failed]
        );
        fx.assert_work_dir_empty();
        let messages = fx.notifier.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[1].starts_with("Restore failed for flaky: "));
    }

    #[test]
    fn test_corrupt_download_fails_decompression() {
        let fx = Fixture::new();
        fx.create_db(&["kept"]);
        std::fs::create_dir(fx.storage_dir()).unwrap();
        std::fs::write(fx.storage_dir().join("app_db_1.db.gz"), b"definitely not gzip").unwrap();

        let result = fx
            .pipeline("gzip", Behaviour::Succeed)
            .restore("app_db_1.db.gz", "sqlitedb", &CancelToken::new());
        let err = result.outcome().as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Compression);
        assert_eq!(err.failed_stage(), Some(Stage::Decompress));
        assert_eq!(result.states(), &[Idle, Downloading, Decompressing, Failed]);
        fx.assert_work_dir_empty();
        assert_eq!(fx.rows(), vec!["kept"]);
        assert_eq!(fx.notifier.messages().len(), 1);
    }

    #[test]
    fn test_capture_failure_cleans_partial_output() {
        let fx = Fixture::new();
        let result = fx
            .pipeline("gzip", Behaviour::Fail)
            .backup("flaky", &CancelToken::new());

        let err = result.outcome().as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Capture);
        assert_eq!(err.failed_stage(), Some(Stage::Capture));
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(result.states(), &[Idle, Capturing, Failed]);
        fx.assert_work_dir_empty();
        assert_eq!(fx.notifier.messages().len(), 1);
    }

    #[test]
    fn test_compress_failure_cleans_up() {
        let fx = Fixture::new();
        let result = fx
            .pipeline("gzip", Behaviour::Vanish)
            .backup("flaky", &CancelToken::new());

        let err = result.outcome().as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Compression);
        assert_eq!(err.failed_stage(), Some(Stage::Compress));
        assert_eq!(result.states(), &[Idle, Capturing, Compressing, Failed]);
        fx.assert_work_dir_empty();
    }

    #[test]
    fn test_transport_failure_cleans_up() {
        let fx = Fixture::new();
        // a file where the storage root should be
        std::fs::write(fx.storage_dir(), b"not a dir").unwrap();
        let result = fx
            .pipeline("xz", Behaviour::Succeed)
            .backup("flaky", &CancelToken::new());

        let err = result.outcome().as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(err.failed_stage(), Some(Stage::Upload));
        assert_eq!(
            result.states(),
            &[Idle, Capturing, Compressing, Transporting, Failed]
        );
        fx.assert_work_dir_empty();
        assert_eq!(fx.notifier.messages().len(), 1);
    }

    #[test]
    fn test_cancelled_run_cleans_up() {
        let fx = Fixture::new();
        let token = CancelToken::new();
        token.cancel();
        let result = fx
            .pipeline("gzip", Behaviour::Succeed)
            .backup("flaky", &token);

        let err = result.outcome().as_ref().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.kind(), ErrorKind::Capture);
        fx.assert_work_dir_empty();
    }

    #[test]
    fn test_unsupported_restore_and_list() {
        let fx = Fixture::new();
        let gcs = GcsTransport::new(
            GcsConfig::builder()
                .bucket("backups")
                .access_token("token")
                .build(),
        );
        let pipeline = fx.pipeline_with("gzip", Behaviour::Succeed, Box::new(gcs));

        let result = pipeline.restore("app_db_1.db.gz", "sqlitedb", &CancelToken::new());
        let err = result.outcome().as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert_eq!(err.failed_stage(), Some(Stage::Download));
        assert_eq!(result.states(), &[Idle, Downloading, Failed]);
        fx.assert_work_dir_empty();

        let err = pipeline.list("", &CancelToken::new()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn test_restore_missing_key_is_transport_error() {
        let fx = Fixture::new();
        fx.create_db(&[]);
        let result = fx
            .pipeline("gzip", Behaviour::Succeed)
            .restore("app_db_missing.db.gz", "sqlitedb", &CancelToken::new());
        let err = result.outcome().as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(result.message().starts_with("Restore failed for sqlitedb: "));
        fx.assert_work_dir_empty();
    }

    #[test]
    fn test_list_passes_through() {
        let fx = Fixture::new();
        let pipeline = fx.pipeline("gzip", Behaviour::Succeed);
        assert!(pipeline.backup("flaky", &CancelToken::new()).is_success());
        assert!(pipeline.backup("flaky", &CancelToken::new()).is_success());
        std::fs::write(fx.storage_dir().join("other.sql.gz"), b"").unwrap();

        let keys: Vec<String> = pipeline
            .list("fake_", &CancelToken::new())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.iter().all(|k| is_timestamped(k, "fake", ".bin.gz")));
    }

    #[test]
    fn test_notifier_failure_keeps_outcome() {
        let fx = Fixture::new();
        let local = LocalTransport::new(LocalConfig::builder().path(fx.storage_dir()).build());
        let pipeline = Pipeline::builder()
            .config(fx.config("gzip"))
            .captures(Fixture::captures(Behaviour::Succeed))
            .transport(Box::new(local))
            .notifier(Box::new(BrokenNotifier))
            .build();
        assert!(pipeline.backup("flaky", &CancelToken::new()).is_success());
    }

    #[test]
    fn test_no_notifier_configured() {
        let fx = Fixture::new();
        let local = LocalTransport::new(LocalConfig::builder().path(fx.storage_dir()).build());
        let pipeline = Pipeline::builder()
            .config(fx.config("gzip"))
            .captures(Fixture::captures(Behaviour::Succeed))
            .transport(Box::new(local))
            .build();
        assert!(pipeline.backup("flaky", &CancelToken::new()).is_success());
        assert!(fx.notifier.messages().is_empty());
    }

    #[test]
    fn test_connection_check() {
        let fx = Fixture::new();
        fx.create_db(&[]);
        let pipeline = fx.pipeline("gzip", Behaviour::Succeed);
        assert!(pipeline.test_connection("sqlitedb", &CancelToken::new()).is_ok());
        assert_eq!(
            pipeline
                .test_connection("nope", &CancelToken::new())
                .unwrap_err()
                .kind(),
            ErrorKind::Config
        );
        assert!(fx.notifier.messages().is_empty());
    }

    #[test]
    fn test_from_config_resolves_storage() {
        let fx = Fixture::new();
        assert!(Pipeline::from_config(fx.config("gzip"), Span::none()).is_ok());

        let mut config = fx.config("gzip");
        config.storage = serde_yml::from_str("{type: ftp, host: x}").unwrap();
        let err = Pipeline::from_config(config, Span::none()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_dump_aborts_before_compression() {
        use crate::backup::capture::tests::fake_program;

        let fx = Fixture::new();
        let bin = fx.dir.path().join("bin");
        std::fs::create_dir(&bin).unwrap();
        fake_program(
            &bin,
            "pg_dump",
            "echo 'partial' ; echo 'pg_dump: error: connection refused' >&2; exit 3",
        );
        let mut config = fx.config("gzip");
        config.databases.insert(
            "main".to_string(),
            serde_yml::from_str(&format!(
                "{{type: postgres, host: db, port: 5432, user: app, database: app, bin_dir: {:?}}}",
                bin
            ))
            .unwrap(),
        );
        let local = LocalTransport::new(LocalConfig::builder().path(fx.storage_dir()).build());
        let pipeline = Pipeline::builder()
            .config(config)
            .captures(CaptureRegistry::with_builtin().unwrap())
            .transport(Box::new(local))
            .build();

        let result = pipeline.backup("main", &CancelToken::new());
        let err = result.outcome().as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Capture);
        assert!(err.to_string().contains("exited with"));
        assert!(err.to_string().contains("connection refused"));
        assert!(!result.states().contains(&Compressing));
        fx.assert_work_dir_empty();
        assert!(!fx.storage_dir().exists());
    }
}
