//! # db_backup
//!
//! Database backup and restore pipeline.
//!
//! ## Features
//!
//! - **Engines**: SQLite (online backup API), MySQL, PostgreSQL and MongoDB
//!   (through their dump/restore client tools)
//! - **Compression**: gzip or XZ (LZMA, optionally multi-threaded)
//! - **Storage**: local directory, Amazon S3 (`s3` feature, on by default), Google Cloud
//!   Storage (upload only)
//! - **Cleanup**: every local artifact is removed whatever stage fails
//! - **Notifications**: Slack incoming webhook
//!
//! ## Quick Start
//!
//! ```no_run
//! use db_backup::backup::app_config::AppConfig;
//! use db_backup::backup::cancel::CancelToken;
//! use db_backup::backup::pipeline::Pipeline;
//!
//! let config = AppConfig::load("db_backup_config.yaml")?;
//! let cancel = CancelToken::with_timeout(config.timeout);
//! let pipeline = Pipeline::from_config(config, tracing::Span::none())?;
//!
//! let result = pipeline.backup("sqlitedb", &cancel);
//! println!("{}", result.message());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
