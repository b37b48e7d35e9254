use clap::{Parser, Subcommand};
use db_backup::backup::app_config::{AppConfig, DEFAULT_CONFIG_FILE, SAMPLE_CONFIG};
use db_backup::backup::cancel::CancelToken;
use db_backup::backup::pipeline::Pipeline;
use db_backup::backup::result_error::error::Error;
use db_backup::backup::result_error::result::Result;
use db_backup::backup::result_error::AddMsg;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::exit;
use tracing::error;

/// Back up and restore databases to local or object storage
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a commented sample config file
    Init,
    /// Snapshot a database and upload it
    Backup { database: String },
    /// Download a stored artifact and load it into a database
    Restore { key: String, database: String },
    /// List stored artifacts
    List { prefix: Option<String> },
    /// Check that a database is reachable
    Check { database: String },
}

fn init(path: &Path) -> Result<()> {
    let mut file = File::create_new(path)
        .map_err(Error::from)
        .add_msg(format!("Refusing to create config {:?}", path))?;
    file.write_all(SAMPLE_CONFIG.as_bytes())?;
    println!("Sample config written to {:?}", path);
    Ok(())
}

fn run(args: Args) -> Result<()> {
    if let Command::Init = args.command {
        return init(&args.config);
    }

    let config = AppConfig::load(&args.config)?;
    let cancel = CancelToken::with_timeout(config.timeout);
    let pipeline = Pipeline::from_config(config, tracing::info_span!("db_backup"))?;

    match args.command {
        Command::Init => Ok(()),
        Command::Backup { database } => {
            let result = pipeline.backup(&database, &cancel);
            println!("{}", result.message());
            result.into_outcome().map(|_| ())
        }
        Command::Restore { key, database } => {
            let result = pipeline.restore(&key, &database, &cancel);
            println!("{}", result.message());
            result.into_outcome().map(|_| ())
        }
        Command::List { prefix } => {
            let mut count = 0usize;
            for key in pipeline.list(prefix.as_deref().unwrap_or(""), &cancel)? {
                println!("{}", key?);
                count += 1;
            }
            tracing::info!("{} artifact(s) listed", count);
            Ok(())
        }
        Command::Check { database } => {
            pipeline.test_connection(&database, &cancel)?;
            println!("Connection to {} ok", database);
            Ok(())
        }
    }
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    if let Err(e) = run(args) {
        error!("{e}");
        exit(1);
    }
}
