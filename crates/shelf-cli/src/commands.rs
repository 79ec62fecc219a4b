//! Subcommand dispatch.

use crate::{AddMeta, Args, CacheAction, Command, PatchArgs};
use anyhow::{bail, Context, Result};
use shelf_core::config::github_token;
use shelf_core::remote::RetryConfig;
use shelf_core::{
    BatchReport, BookPatch, CacheManager, CancellationToken, GitHubStore, ImportOptions,
    IngestRequest, IngestSource, Ledger, Orchestrator, ProgressCallback, Shelf, ShelfConfig,
    TransferProgress,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub async fn run(args: Args) -> Result<ExitCode> {
    let config_path = match args.config {
        Some(path) => path,
        None => ShelfConfig::default_path()?,
    };
    let mut config = ShelfConfig::load(&config_path)?;

    let command = match args.command {
        Command::Register {
            name,
            repository,
            release,
            catalog_path,
            default,
        } => {
            let Some((owner, repo)) = repository.split_once('/') else {
                bail!("Repository must be given as owner/repo, got '{}'", repository);
            };
            let mut shelf = Shelf::new(&name, owner, repo);
            if let Some(release) = release {
                shelf = shelf.with_default_release(release);
            }
            if let Some(path) = catalog_path {
                shelf = shelf.with_catalog_path(path);
            }
            config.upsert_shelf(shelf);
            if default {
                config.default_shelf = Some(name.clone());
            }
            config.save(&config_path)?;
            info!("Registered shelf {} in {}", name, config_path.display());
            return Ok(ExitCode::SUCCESS);
        }
        command => command,
    };

    let shelf = config.resolve_shelf(args.shelf.as_deref())?.clone();
    let orchestrator = build_orchestrator(&config, args.retries)?;

    match command {
        Command::Register { .. } => Ok(ExitCode::SUCCESS),
        Command::List { json } => {
            let entries = orchestrator.list(&shelf).await?;
            if json {
                let books: Vec<_> = entries.iter().map(|e| &e.book).collect();
                println!("{}", serde_json::to_string_pretty(&books)?);
            } else {
                for entry in entries {
                    println!(
                        "{:<24} {:<12} {}",
                        entry.book.id, entry.cache, entry.book.title
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Get { id } => {
            let path = orchestrator.retrieve(&shelf, &id).await?;
            println!("{}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Add { sources, meta } => {
            let requests: Vec<_> = sources
                .iter()
                .map(|source| add_request(source, &meta, sources.len() == 1))
                .collect();
            let report = orchestrator.ingest_many(&shelf, &requests).await;
            Ok(finish(report))
        }
        Command::Edit { ids, patch } => {
            let patch = book_patch(patch);
            if patch.is_empty() {
                bail!("Nothing to change");
            }
            let report = orchestrator.edit_many(&shelf, &ids, &patch).await;
            Ok(finish(report))
        }
        Command::Rm { ids } => {
            let report = orchestrator.delete_many(&shelf, &ids).await;
            Ok(finish(report))
        }
        Command::Mv {
            id,
            to,
            release,
            keep_source,
        } => {
            let destination = match to {
                Some(name) => config.shelf(&name)?.clone(),
                None => shelf.clone(),
            };
            let book = orchestrator
                .move_book(&shelf, &id, &destination, release.as_deref(), keep_source)
                .await?;
            println!("{} -> {}/{}", book.id, destination.name, book.source.release);
            Ok(ExitCode::SUCCESS)
        }
        Command::Sync { ids, all } => {
            let report = if all {
                orchestrator.sync(&config.shelves).await?
            } else if ids.is_empty() {
                orchestrator.sync_shelf(&shelf, None).await?
            } else {
                orchestrator.sync_shelf(&shelf, Some(ids.as_slice())).await?
            };
            Ok(finish(report))
        }
        Command::Import {
            from,
            ids,
            release,
            limit,
        } => {
            let foreign = config.shelf(&from)?.clone();
            let options = ImportOptions {
                release,
                limit,
                ids: (!ids.is_empty()).then_some(ids),
            };
            let report = orchestrator.import(&foreign, &shelf, &options).await?;
            Ok(finish(report))
        }
        Command::Verify { fix, json } => {
            let report = orchestrator.verify(&shelf, fix).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for entry in &report.orphaned_entries {
                    println!("orphaned entry: {} ({}/{})", entry.id, entry.release, entry.asset);
                }
                for asset in &report.orphaned_assets {
                    println!("orphaned asset: {}/{}", asset.release, asset.name);
                }
                for failure in &report.fix_failures {
                    println!("repair failed: {}", failure);
                }
                println!(
                    "{} books, {} assets checked{}",
                    report.books_checked,
                    report.assets_checked,
                    if report.fixed { ", repaired" } else { "" }
                );
            }
            let clean = if fix {
                report.fix_failures.is_empty()
            } else {
                report.is_consistent()
            };
            Ok(if clean {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Migrate { list, redo, release } => {
            let requests = read_source_list(&list, release.as_deref())?;
            let ledger = Ledger::new(config.ledger_path()?);
            let report = orchestrator
                .migrate(&shelf, &requests, &ledger, !redo)
                .await;
            Ok(finish(report))
        }
        Command::Cache { action } => match action {
            CacheAction::List => {
                for entry in orchestrator.cache().entries()? {
                    println!(
                        "{}/{} {:<24} {:>12}  {}",
                        entry.owner,
                        entry.repo,
                        entry.book_id,
                        entry.size,
                        entry.path.display()
                    );
                }
                Ok(ExitCode::SUCCESS)
            }
            CacheAction::Clear { id } => {
                if !orchestrator
                    .cache()
                    .clear_book(&shelf.owner, &shelf.repo, &id)?
                {
                    warn!("{} is not cached", id);
                }
                Ok(ExitCode::SUCCESS)
            }
        },
    }
}

fn build_orchestrator(config: &ShelfConfig, retries: Option<u32>) -> Result<Orchestrator> {
    let token = github_token();
    if token.is_none() {
        debug!("No GitHub token in the environment; writes will fail");
    }
    let mut store = GitHubStore::new(token.as_deref())?;
    if let Some(attempts) = retries {
        store = store.with_retry(RetryConfig::new().with_max_attempts(attempts));
    }
    let remote = Arc::new(store);
    let cache = CacheManager::new(config.cache_dir()?);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if on_signal.cancel() {
                warn!("Interrupted, stopping after the current step (Ctrl-C again to abort)");
            } else {
                std::process::exit(130);
            }
        }
    });

    let progress: ProgressCallback = Arc::new(|label: &str, progress: TransferProgress| {
        match progress.percent() {
            Some(percent) => debug!("{}: {:.0}%", label, percent),
            None => debug!("{}: {} bytes", label, progress.bytes_transferred),
        }
    });

    Ok(Orchestrator::new(remote, cache)
        .with_cancellation(cancel)
        .with_progress(progress))
}

fn source_from_arg(arg: &str) -> IngestSource {
    if arg.starts_with("http://") || arg.starts_with("https://") {
        IngestSource::Url(arg.to_string())
    } else {
        IngestSource::File(PathBuf::from(arg))
    }
}

/// Per-book metadata (id, title) only applies when a single source is added.
fn add_request(source: &str, meta: &AddMeta, single: bool) -> IngestRequest {
    let mut request = IngestRequest::new(source_from_arg(source)).force(meta.force);
    if single {
        request.id = meta.id.clone();
        request.title = meta.title.clone();
    }
    request.author = meta.author.clone();
    request.year = meta.year;
    request.tags = meta.tags.clone();
    request.release = meta.release.clone();
    request
}

fn book_patch(args: PatchArgs) -> BookPatch {
    BookPatch {
        title: args.title,
        author: args.author,
        year: args.year,
        format: args.format,
        add_tags: args.add_tags,
        remove_tags: args.remove_tags,
    }
}

/// One source per line; blank lines and `#` comments are ignored.
fn read_source_list(path: &Path, release: Option<&str>) -> Result<Vec<IngestRequest>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read source list {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            let request = IngestRequest::new(source_from_arg(line));
            match release {
                Some(tag) => request.with_release(tag),
                None => request,
            }
        })
        .collect())
}

fn finish(report: BatchReport) -> ExitCode {
    for failure in &report.failed {
        println!("failed: {}: {}", failure.item, failure.error);
    }
    info!("{}", report.summary());
    if report.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
