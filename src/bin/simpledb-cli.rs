use std::{
    error::Error,
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use simpledb_core::{DbConfig, FileManager, LogManager, LogRecord, SimpleDB};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "simpledb-cli")]
#[command(author, version, about = "Inspect and maintain a SimpleDB database directory", long_about = None)]
struct Cli {
    /// Path to the database directory
    #[arg(long, value_name = "DIR")]
    dir: PathBuf,

    /// Block size the database was created with
    #[arg(long, default_value_t = 400)]
    block_size: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the log records, newest first
    Dump {
        /// Stop after this many records
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Undo every unfinished transaction and write a quiescent checkpoint
    Recover,

    /// Write a non-quiescent checkpoint
    Checkpoint,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = DbConfig::default().with_block_size(cli.block_size);

    match cli.command {
        Commands::Dump { limit } => dump_log(&cli.dir, &config, limit)?,
        Commands::Recover => {
            let db = SimpleDB::new(&cli.dir, config)?;
            let tx = db.new_tx()?;
            tx.recover()?;
            tx.commit()?;
            println!("Database recovery completed successfully.");
        }
        Commands::Checkpoint => {
            let db = SimpleDB::new(&cli.dir, config)?;
            let lsn = db.checkpoint()?;
            println!("Checkpoint written at LSN {lsn}");
        }
    }
    Ok(())
}

/// Read the log directly so that opening the database does not run recovery first
fn dump_log(dir: &Path, config: &DbConfig, limit: Option<usize>) -> Result<(), Box<dyn Error>> {
    let file_manager = Arc::new(Mutex::new(FileManager::new(dir, config.block_size)?));
    let mut log_manager = LogManager::new(file_manager, &config.log_file)?;
    let records = log_manager.iterator()?.take(limit.unwrap_or(usize::MAX));
    let mut count = 0;
    for bytes in records {
        let record = LogRecord::try_from(bytes?.as_slice())?;
        println!("{record}");
        count += 1;
    }
    println!("{count} records");
    Ok(())
}
