//! Shelf - command host for the personal document library.
//!
//! Loads the user config, sets up logging and a GitHub-backed remote store,
//! and hands each subcommand to the shelf-core orchestrator.

mod commands;

use clap::{Args as ClapArgs, Parser, Subcommand};
use shelf_core::ShelfError;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "shelf")]
#[command(about = "Keep a document catalog, its release assets and a local cache in step")]
pub struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Config file (defaults to <config_dir>/shelf/config.json)
    #[arg(long, global = true, env = "SHELF_CONFIG")]
    config: Option<PathBuf>,

    /// Shelf to operate on (defaults to the configured default shelf)
    #[arg(short, long, global = true)]
    shelf: Option<String>,

    /// Attempts per remote read before giving up (1 disables retries)
    #[arg(long, global = true, env = "SHELF_RETRIES")]
    retries: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Register a shelf in the config file
    Register {
        name: String,
        /// Remote repository as owner/repo
        repository: String,
        #[arg(long)]
        release: Option<String>,
        #[arg(long)]
        catalog_path: Option<String>,
        /// Make this the default shelf
        #[arg(long)]
        default: bool,
    },
    /// List books with their cache state
    List {
        #[arg(long)]
        json: bool,
    },
    /// Print the local path of a book, downloading it if needed
    Get { id: String },
    /// Add files or URLs to the shelf
    Add {
        #[arg(required = true)]
        sources: Vec<String>,
        #[command(flatten)]
        meta: AddMeta,
    },
    /// Change metadata of one or more books
    Edit {
        #[arg(required = true)]
        ids: Vec<String>,
        #[command(flatten)]
        patch: PatchArgs,
    },
    /// Remove books from catalog, remote and cache
    Rm {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Move a book to another release or shelf
    Mv {
        id: String,
        /// Destination shelf (defaults to the current shelf)
        #[arg(long)]
        to: Option<String>,
        /// Destination release (defaults to the destination's default release)
        #[arg(long)]
        release: Option<String>,
        /// Leave the source asset in place
        #[arg(long)]
        keep_source: bool,
    },
    /// Upload locally modified books
    Sync {
        /// Limit to these ids
        ids: Vec<String>,
        /// Sync every configured shelf
        #[arg(long, conflicts_with = "ids")]
        all: bool,
    },
    /// Copy books from another shelf
    Import {
        /// Foreign shelf to read from
        #[arg(long)]
        from: String,
        ids: Vec<String>,
        #[arg(long)]
        release: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Check catalog and release for orphans
    Verify {
        /// Remove orphaned records and assets
        #[arg(long)]
        fix: bool,
        #[arg(long)]
        json: bool,
    },
    /// Ingest every source listed in a file, one per line
    Migrate {
        list: PathBuf,
        /// Re-process sources already recorded in the ledger
        #[arg(long)]
        redo: bool,
        #[arg(long)]
        release: Option<String>,
    },
    /// Inspect or clear the local cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(ClapArgs, Debug, Default)]
pub struct AddMeta {
    #[arg(long)]
    id: Option<String>,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    author: Option<String>,
    #[arg(long)]
    year: Option<i32>,
    #[arg(long = "tag")]
    tags: Vec<String>,
    #[arg(long)]
    release: Option<String>,
    /// Accept duplicate content and replace a same-named asset
    #[arg(long)]
    force: bool,
}

#[derive(ClapArgs, Debug, Default)]
pub struct PatchArgs {
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    author: Option<String>,
    #[arg(long)]
    year: Option<i32>,
    #[arg(long)]
    format: Option<String>,
    #[arg(long = "add-tag")]
    add_tags: Vec<String>,
    #[arg(long = "remove-tag")]
    remove_tags: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List cached files
    List,
    /// Remove cached files of a book
    Clear { id: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let log_level = if args.debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match commands::run(args).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!("{:#}", err);
            let code = err
                .downcast_ref::<ShelfError>()
                .map(ShelfError::exit_code)
                .unwrap_or(1);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}
