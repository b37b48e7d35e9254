use crate::backup::pipeline::state::Stage;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use derive_more::Display;
use itertools::Itertools;
use std::fmt::Debug;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use thiserror::Error;
use thiserror_ext::Construct;

#[derive(Error, Debug, Construct)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Rusqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    LiblzmaStream(#[from] liblzma::stream::Error),
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Config(String),
    #[error("{} exited with {}{}", program, status, format_stderr(stderr))]
    ProcessExit {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("{backend} does not support {operation}")]
    Unsupported {
        backend: Arc<str>,
        operation: Arc<str>,
    },
    #[error("invalid storage key {0:?}")]
    InvalidKey(String),
    #[error("{0:?} does not carry the .{1} suffix")]
    SuffixMismatch(PathBuf, Arc<str>),
    #[error("{0}")]
    Remote(String),
    #[error("webhook responded with status {0}")]
    WebhookStatus(u16),
    #[error("operation cancelled")]
    Cancelled,
    #[error("{} capture failed:\n{}", adapter, indent::indent_all_with("  ", error.to_string()))]
    Capture { adapter: Arc<str>, error: Box<Error> },
    #[error("{} restore failed:\n{}", adapter, indent::indent_all_with("  ", error.to_string()))]
    Restore { adapter: Arc<str>, error: Box<Error> },
    #[error("{} compression failed:\n{}", codec, indent::indent_all_with("  ", error.to_string()))]
    Compression { codec: Arc<str>, error: Box<Error> },
    #[error("{} transport failed:\n{}", backend, indent::indent_all_with("  ", error.to_string()))]
    Transport { backend: Arc<str>, error: Box<Error> },
    #[error("{} stage failed:\n{}", stage, indent::indent_all_with("  ", error.to_string()))]
    Stage { stage: Stage, error: Box<Error> },
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{} failed:\n{}", fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithFnName { fn_name: String, error: Box<Error> },
    #[error("{}", itertools::join(.0, "\n\n"))]
    LotsOfError(Vec<Error>),
}

/// Coarse classification used by callers that need to branch on the
/// failure family rather than on the concrete cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ErrorKind {
    Config,
    Capture,
    Compression,
    Transport,
    Unsupported,
    Restore,
    Cancelled,
    Notification,
    Other,
}

fn format_stderr(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(":\n{}", indent::indent_all_with("  ", stderr))
    }
}

impl<S: Into<String>> AddMsg<S> for Error {
    fn add_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl<S: Into<String>> AddFunctionName<S> for Error {
    fn add_fn_name(self, fn_name: S) -> Self {
        Self::WithFnName {
            fn_name: fn_name.into(),
            error: Box::new(self),
        }
    }
}

impl From<Vec<Error>> for Error {
    fn from(errors: Vec<Error>) -> Self {
        if errors.is_empty() {
            panic!("Should not create lots of errors when error is empty")
        }
        Self::LotsOfError(errors.into_iter().flat_map(Error::into_iter).collect_vec())
    }
}

impl Error {
    pub fn into_iter(self) -> Box<dyn Iterator<Item = Error>> {
        match self {
            Error::LotsOfError(v) => Box::new(v.into_iter().flat_map(Error::into_iter)),
            e => Box::new(std::iter::once(e)),
        }
    }

    pub fn chain(self, other: Error) -> Error {
        Error::LotsOfError(self.into_iter().chain(other.into_iter()).collect_vec())
    }

    /// Classifies the error by looking through context wrappers. A transport
    /// failure whose cause is an unsupported operation reports `Unsupported`.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) | Error::ValidationError(_) | Error::SerdeYml(_) => ErrorKind::Config,
            Error::Unsupported { .. } => ErrorKind::Unsupported,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Http(_) | Error::WebhookStatus(_) => ErrorKind::Notification,
            Error::Capture { .. } => ErrorKind::Capture,
            Error::Restore { .. } => ErrorKind::Restore,
            Error::Compression { .. } => ErrorKind::Compression,
            Error::Transport { error, .. } => match error.kind() {
                ErrorKind::Unsupported => ErrorKind::Unsupported,
                _ => ErrorKind::Transport,
            },
            Error::Stage { error, .. }
            | Error::WithMsg { error, .. }
            | Error::WithFnName { error, .. } => error.kind(),
            Error::LotsOfError(v) => v.first().map(Error::kind).unwrap_or(ErrorKind::Other),
            _ => ErrorKind::Other,
        }
    }

    /// The pipeline stage this error was attributed to, if any.
    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            Error::Stage { stage, .. } => Some(*stage),
            Error::WithMsg { error, .. } | Error::WithFnName { error, .. } => error.failed_stage(),
            Error::LotsOfError(v) => v.iter().find_map(Error::failed_stage),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::Capture { error, .. }
            | Error::Restore { error, .. }
            | Error::Compression { error, .. }
            | Error::Transport { error, .. }
            | Error::Stage { error, .. }
            | Error::WithMsg { error, .. }
            | Error::WithFnName { error, .. } => error.is_cancelled(),
            Error::LotsOfError(v) => v.iter().any(Error::is_cancelled),
            _ => false,
        }
    }
}
