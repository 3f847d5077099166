//! CLI entry point for the chapter downloader.

use std::io::{self, IsTerminal};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chapterdl_core::{
    ChapterNumber, ChapterResult, ChapterStatus, DedupEngine, FetchOptions, FetchOrchestrator,
    FetchRequest, HtmlChapterResolver, HttpClient, HttpPageLoader, OutputFormat, OutputLayout,
    Pipeline, ProgressSink, RenameNormalizer, ZipCodec,
};
use tracing::{debug, info, warn};

mod app_config;
mod cli;
mod progress_ui;

use app_config::{FileConfig, load_config, resolve_default_config_path};
use cli::{Cli, Command, FetchArgs};
use progress_ui::SpinnerProgressSink;

/// What a command left behind for the caller to act on.
#[derive(Debug, Default)]
struct Outcome {
    /// Subscription state changed and must be written back.
    state_changed: bool,
    /// Chapters that ended in error.
    failed: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let (cli, sources) = cli::parse_cli_with_sources();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?cli, "CLI arguments parsed");

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => resolve_default_config_path()
            .context("Cannot locate the config file: pass --config or set XDG_CONFIG_HOME/HOME")?,
    };
    let file_config = load_config(&config_path)
        .with_context(|| format!("Failed to load config '{}'", config_path.display()))?;
    let mut config = file_config.clone();
    config.apply_cli(&cli, sources);
    debug!(path = %config_path.display(), "config loaded");

    let outcome = run_command(&cli, &mut config).await?;

    if let Some(persisted) = config_to_save(file_config, config, &outcome, cli.save) {
        persisted
            .save(&config_path)
            .with_context(|| format!("Failed to save config '{}'", config_path.display()))?;
        debug!(path = %config_path.display(), "config saved");
    }

    if outcome.failed > 0 {
        bail!("{} chapter(s) failed", outcome.failed);
    }
    Ok(())
}

async fn run_command(cli: &Cli, config: &mut FileConfig) -> Result<Outcome> {
    match &cli.command {
        Command::Fetch(args) => {
            let request = fetch_request(args, config);
            let mut options = config.fetch_options();
            if args.zip {
                options.output_format = OutputFormat::Zip;
            }
            let results = run_pipeline(cli, config, options, &[request]).await?;
            Ok(Outcome {
                state_changed: false,
                failed: count_failed(&results),
            })
        }
        Command::Update { collections, force } => {
            let requests =
                config
                    .state
                    .plan_updates(collections, &config.library_folders(), *force);
            if requests.is_empty() {
                info!("Nothing to update");
                return Ok(Outcome::default());
            }
            let results = run_pipeline(cli, config, config.fetch_options(), &requests).await?;
            config.state.record_progress(&results);
            Ok(Outcome {
                state_changed: true,
                failed: count_failed(&results),
            })
        }
        Command::Subscribe { names, url } => {
            let added = config.state.subscribe(names, url.as_deref())?;
            info!(added, total = config.state.subscriptions.len(), "Subscribed");
            Ok(Outcome {
                state_changed: added > 0,
                failed: 0,
            })
        }
        Command::Unsubscribe { names } => {
            let removed = config.state.unsubscribe(names);
            if removed == 0 {
                warn!(?names, "No matching subscription");
            }
            info!(removed, total = config.state.subscriptions.len(), "Unsubscribed");
            Ok(Outcome {
                state_changed: removed > 0,
                failed: 0,
            })
        }
        Command::Clean { folders } => {
            let report = build_dedup(config)
                .await?
                .clean_folders(folders)
                .await
                .context("Cleaning failed")?;
            info!(
                credits = report.credits_removed,
                duplicates = report.duplicates_removed,
                "Clean complete"
            );
            Ok(Outcome::default())
        }
        Command::Rename {
            folders,
            only_node_dirs,
        } => {
            let only_node_dirs = *only_node_dirs || config.only_node_dirs.unwrap_or(false);
            let report = RenameNormalizer::new()
                .rename_tree(folders, only_node_dirs)
                .await;
            for failure in &report.failures {
                warn!(dir = %failure.directory.display(), error = %failure.error, "Rename failed");
            }
            info!(
                directories = report.directories,
                renamed = report.renamed,
                failed = report.failures.len(),
                "Rename complete"
            );
            Ok(Outcome::default())
        }
    }
}

/// The config to write back, if any.
///
/// `--save` persists the merged settings. Otherwise only subscription state
/// changes are written, on top of the settings as they were read.
fn config_to_save(
    file: FileConfig,
    runtime: FileConfig,
    outcome: &Outcome,
    save: bool,
) -> Option<FileConfig> {
    if save {
        Some(runtime)
    } else if outcome.state_changed {
        Some(FileConfig {
            state: runtime.state,
            ..file
        })
    } else {
        None
    }
}

/// Explicit chapters when `-c` is given, otherwise resume after the latest
/// local chapter.
fn fetch_request(args: &FetchArgs, config: &FileConfig) -> FetchRequest {
    let request = match args.start {
        Some(start) => FetchRequest::range(&args.collection, start, args.end.unwrap_or(start)),
        None => {
            let last_known = config
                .state
                .current_chapter(&args.collection, &config.library_folders())
                .unwrap_or(ChapterNumber::BEFORE_FIRST);
            FetchRequest::resume(&args.collection, last_known)
        }
    };
    request.with_source_ref(args.url.clone())
}

async fn build_dedup(config: &FileConfig) -> Result<DedupEngine> {
    let options = config.clean_options();
    match &config.credits_sample {
        Some(sample) => DedupEngine::from_sample(sample, options)
            .await
            .with_context(|| format!("Failed to read credits sample '{}'", sample.display())),
        None => {
            if options.remove_credits {
                warn!("cleanCredits is enabled but no creditsSample is configured, credits pages are kept");
            }
            Ok(DedupEngine::new(options))
        }
    }
}

async fn run_pipeline(
    cli: &Cli,
    config: &FileConfig,
    options: FetchOptions,
    requests: &[FetchRequest],
) -> Result<Vec<ChapterResult>> {
    let client = HttpClient::new();
    let orchestrator = FetchOrchestrator::new(
        options,
        Arc::new(HttpPageLoader::new(client.clone())),
        Arc::new(HtmlChapterResolver::new()?),
        Arc::new(ZipCodec),
        client,
    )?;
    let output_dir = config.output_dir();
    let pipeline = Pipeline::new(
        OutputLayout::new(&output_dir),
        orchestrator,
        build_dedup(config).await?,
        config.pipeline_options(),
    );

    info!(
        requests = requests.len(),
        output = %output_dir.display(),
        "Fetch starting"
    );
    let spinner = Arc::new(SpinnerProgressSink::new(
        !cli.quiet && io::stderr().is_terminal(),
    ));
    let sink: Arc<dyn ProgressSink> = spinner.clone();
    let result = pipeline.run(requests, sink).await;
    spinner.finish();
    let report = result?;

    log_results(&report.chapters);
    info!(
        credits = report.clean.credits_removed,
        duplicates = report.clean.duplicates_removed,
        renamed = report.rename.renamed,
        "Fetch complete"
    );
    Ok(report.chapters)
}

fn log_results(results: &[ChapterResult]) {
    for result in results {
        match result.status {
            ChapterStatus::Ok => {
                debug!(
                    collection = %result.collection_id,
                    chapter = %result.chapter,
                    path = ?result.output_path,
                    fallback = result.via_fallback,
                    "stored"
                );
            }
            ChapterStatus::Missing | ChapterStatus::Removed => {
                info!(
                    collection = %result.collection_id,
                    chapter = %result.chapter,
                    status = ?result.status,
                    "Chapter unavailable"
                );
            }
            ChapterStatus::Error => {
                warn!(
                    collection = %result.collection_id,
                    chapter = %result.chapter,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "Chapter failed"
                );
            }
        }
    }
}

fn count_failed(results: &[ChapterResult]) -> usize {
    results
        .iter()
        .filter(|r| r.status == ChapterStatus::Error)
        .count()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use clap::Parser;
    use tempfile::TempDir;

    use super::*;

    fn fetch_args(argv: &[&str]) -> FetchArgs {
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Fetch(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_fetch_request_explicit_range() {
        let args = fetch_args(&["chapterdl", "fetch", "Bleach", "-c", "3", "-C", "5", "--url", "B/b"]);
        let request = fetch_request(&args, &FileConfig::default());
        assert!(!request.resume_to_latest);
        assert_eq!(request.start_chapter, ChapterNumber::whole(3));
        assert_eq!(request.end_chapter, Some(ChapterNumber::whole(5)));
        assert_eq!(request.source_ref.as_deref(), Some("B/b"));
    }

    #[test]
    fn test_fetch_request_resumes_after_local_chapter() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("Bleach").join("Bleach 41")).unwrap();
        let config = FileConfig {
            output_directory: Some(dir.path().to_path_buf()),
            ..FileConfig::default()
        };

        let request = fetch_request(&fetch_args(&["chapterdl", "fetch", "Bleach"]), &config);
        assert!(request.resume_to_latest);
        assert_eq!(request.start_chapter, ChapterNumber::whole(41));

        let request = fetch_request(&fetch_args(&["chapterdl", "fetch", "Naruto"]), &config);
        assert_eq!(request.start_chapter, ChapterNumber::BEFORE_FIRST);
    }

    #[test]
    fn test_config_to_save_keeps_commandline_overrides_out_of_state_saves() {
        let file = FileConfig {
            concurrency: Some(3),
            ..FileConfig::default()
        };
        let mut runtime = FileConfig {
            concurrency: Some(42),
            output_directory: Some(PathBuf::from("/elsewhere")),
            ..file.clone()
        };
        runtime.state.subscribe(&["Naruto".to_string()], None).unwrap();
        let changed = Outcome {
            state_changed: true,
            failed: 0,
        };

        let saved = config_to_save(file.clone(), runtime.clone(), &changed, false).unwrap();
        assert_eq!(saved.concurrency, Some(3));
        assert_eq!(saved.output_directory, None);
        assert_eq!(saved.state.subscriptions.len(), 1);

        let saved = config_to_save(file.clone(), runtime.clone(), &Outcome::default(), true).unwrap();
        assert_eq!(saved.concurrency, Some(42));

        assert!(config_to_save(file, runtime, &Outcome::default(), false).is_none());
    }

    #[test]
    fn test_count_failed_counts_errors_only() {
        let mut ok = ChapterResult {
            collection_id: "A".to_string(),
            chapter: ChapterNumber::whole(1),
            status: ChapterStatus::Ok,
            output_path: None,
            error: None,
            via_fallback: false,
        };
        let missing = ChapterResult {
            status: ChapterStatus::Missing,
            ..ok.clone()
        };
        let failed = ChapterResult {
            status: ChapterStatus::Error,
            ..ok.clone()
        };
        ok.output_path = Some(PathBuf::from("/a"));
        assert_eq!(count_failed(&[ok, missing, failed]), 1);
    }
}
