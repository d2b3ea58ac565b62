//! Command implementations for the reindex CLI.
//!
//! `run` follows the process contract of the tool: with no store argument it
//! creates a fresh timestamp-named store seeded with the configured types,
//! otherwise it resumes the given store. Either way it repeats passes until no
//! errors remain and prints `Finished OK!`, or fails with the error count it
//! could not get below.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Local};
use reindex_core::{ConvergenceReport, ReindexError, Runner};
use reindex_store::{Outcome, Store};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::manifest::ManifestLister;
use crate::settings::Settings;
use crate::webhook::WebhookIndexTask;

/// File name for a new store created at `now`, e.g.
/// `reindex-20240131-235959.123.db`.
pub fn new_store_path(dir: &Path, now: DateTime<Local>) -> PathBuf {
    dir.join(format!("reindex-{}.db", now.format("%Y%m%d-%H%M%S%.3f")))
}

fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping after in-flight work...");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping after in-flight work...");
        }
    }
}

/// `reindex run`
pub async fn run_reindex(
    config_path: Option<&str>,
    log_level_override: Option<&str>,
    args: RunArgs,
) -> Result<()> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    settings.apply_run_args(&args);
    if let Some(log_level) = log_level_override {
        settings.log_level = log_level.to_string();
    }
    init_logging(&settings.log_level)?;

    let interrupt = CancellationToken::new();
    let watcher = {
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            interrupt.cancel();
        })
    };

    let result = execute_run(&settings, args.store.as_deref(), interrupt).await;
    watcher.abort();

    let report = result?;
    info!(passes = report.passes.len(), "Reindex finished");
    println!("Finished OK!");
    Ok(())
}

/// Open or create the store and run it to convergence.
pub async fn execute_run(
    settings: &Settings,
    store_path: Option<&Path>,
    interrupt: CancellationToken,
) -> Result<ConvergenceReport> {
    let manifest_dir = settings
        .manifest_dir
        .clone()
        .context("manifest_dir is not configured")?;
    let indexer_url = settings
        .indexer_url
        .clone()
        .context("indexer_url is not configured")?;

    let store = match store_path {
        Some(path) => {
            info!(path = %path.display(), "Resuming store");
            Store::open(path).with_context(|| format!("Failed to open store {}", path.display()))?
        }
        None => {
            if settings.types.is_empty() {
                bail!("No resource types configured; set `types` or pass --type");
            }
            fs::create_dir_all(&settings.store_dir)
                .with_context(|| format!("Failed to create {}", settings.store_dir))?;
            let path = new_store_path(Path::new(&settings.store_dir), Local::now());
            info!(path = %path.display(), types = settings.types.len(), "Creating store");
            Store::initialize(&path, &settings.types)
                .with_context(|| format!("Failed to create store {}", path.display()))?
        }
    };
    println!("Store: {}", store.path().display());
    let store = Arc::new(store);

    let lister = ManifestLister::new(manifest_dir);
    let task = WebhookIndexTask::new(indexer_url, settings.request_timeout())
        .context("Failed to build HTTP client")?;
    info!(
        manifests = %lister.dir().display(),
        indexer = task.url(),
        pool_size = settings.pool_size,
        "Starting reindex"
    );

    let runner = Runner::new(store.clone(), settings.runner_config(), interrupt)?;
    let result = runner
        .run_to_convergence(Arc::new(lister), Arc::new(task))
        .await;
    runner.shutdown().await;
    if let Err(e) = store.flush() {
        warn!(error = %e, "Failed to flush store");
    }

    match result {
        Ok(report) => Ok(report),
        Err(ReindexError::Unrecoverable { errors, .. }) => {
            Err(anyhow!("Cannot recover from {} errors", errors))
        }
        Err(e) => Err(e).context("Reindex failed"),
    }
}

/// `reindex status`
pub fn show_status(store_path: &Path) -> Result<()> {
    let store = Store::open(store_path)
        .with_context(|| format!("Failed to open store {}", store_path.display()))?;
    let meta = store.meta()?;
    let stats = store.stats()?;

    println!("Store: {}", store_path.display());
    println!("  Created:   {}", meta.created_at.to_rfc3339());
    println!(
        "  Types:     {} enqueued, {} running, {} done, {} failed",
        stats.types_enqueued, stats.types_running, stats.types_done, stats.types_failed
    );
    println!(
        "  Items:     {} enqueued, {} running, {} failed",
        stats.items_enqueued, stats.items_running, stats.items_failed
    );
    println!(
        "  Results:   {} succeeded, {} failed",
        stats.results_succeeded, stats.results_failed
    );
    println!("  Errors:    {}", stats.errors());
    Ok(())
}

/// `reindex clear-errors`
pub fn clear_errors(store_path: &Path) -> Result<()> {
    let store = Store::open(store_path)
        .with_context(|| format!("Failed to open store {}", store_path.display()))?;
    let cleared = store.clear_errors()?;
    store.flush()?;

    println!(
        "Cleared {} types and {} items; {} errors remain",
        cleared.types,
        cleared.items,
        store.error_count()?
    );
    Ok(())
}

/// `reindex results`, one JSON record per line.
pub fn show_results(store_path: &Path, failed_only: bool, limit: Option<usize>) -> Result<()> {
    let store = Store::open(store_path)
        .with_context(|| format!("Failed to open store {}", store_path.display()))?;
    let filter = failed_only.then_some(Outcome::Failure);

    for record in store.results(filter, limit)? {
        println!("{}", serde_json::to_string(&record)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_new_store_path() {
        let now = Local
            .with_ymd_and_hms(2024, 1, 31, 23, 59, 59)
            .unwrap()
            + chrono::Duration::milliseconds(123);
        let path = new_store_path(Path::new("/tmp"), now);
        assert_eq!(path, PathBuf::from("/tmp/reindex-20240131-235959.123.db"));
    }

    fn write_manifests(dir: &Path) {
        fs::write(dir.join("Grant.txt"), "grant:/1\ngrant:/2\n").unwrap();
        fs::write(dir.join("User.txt"), "user:/1\n").unwrap();
    }

    fn test_settings(temp: &TempDir, indexer: &MockServer) -> Settings {
        Settings {
            poll_interval_ms: 5,
            drain_interval_ms: 5,
            store_dir: temp.path().join("stores").to_string_lossy().into_owned(),
            types: vec!["Grant".to_string(), "User".to_string()],
            manifest_dir: Some(temp.path().to_string_lossy().into_owned()),
            indexer_url: Some(format!("{}/index", indexer.uri())),
            ..Default::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_creates_store_and_converges() {
        let temp = TempDir::new().unwrap();
        write_manifests(temp.path());
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/index"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(3)
            .mount(&server)
            .await;

        let settings = test_settings(&temp, &server);
        let report = execute_run(&settings, None, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.total_processed(), 3);
        let stores: Vec<_> = fs::read_dir(temp.path().join("stores"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(stores.len(), 1);

        let store = Store::open(&stores[0]).unwrap();
        assert_eq!(store.stats().unwrap().results_succeeded, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_reports_unrecoverable_errors() {
        let temp = TempDir::new().unwrap();
        write_manifests(temp.path());
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut settings = test_settings(&temp, &server);
        settings.types.push("Journal".to_string());

        let err = execute_run(&settings, None, CancellationToken::new())
            .await
            .unwrap_err();

        // Three failing items plus the missing Journal manifest.
        assert_eq!(err.to_string(), "Cannot recover from 4 errors");
    }

    #[tokio::test]
    async fn test_run_requires_types_for_new_store() {
        let temp = TempDir::new().unwrap();
        let server = MockServer::start().await;
        let mut settings = test_settings(&temp, &server);
        settings.types.clear();

        let err = execute_run(&settings, None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No resource types"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_resume_existing_store() {
        let temp = TempDir::new().unwrap();
        write_manifests(temp.path());
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let path = temp.path().join("resume.db");
        drop(Store::initialize(&path, &["User"]).unwrap());

        let settings = test_settings(&temp, &server);
        let report = execute_run(&settings, Some(&path), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.total_processed(), 1);
        assert_eq!(report.passes.len(), 1);
    }

    #[test]
    fn test_admin_commands_on_store() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("queue.db");
        {
            let store = Store::initialize(&path, &["Grant"]).unwrap();
            let mut tx = store.begin();
            tx.set_type_progress(0, reindex_store::Progress::Failed)
                .unwrap();
            tx.commit().unwrap();
        }

        show_status(&path).unwrap();
        clear_errors(&path).unwrap();
        show_results(&path, true, Some(10)).unwrap();

        let store = Store::open(&path).unwrap();
        assert_eq!(store.error_count().unwrap(), 0);
        assert!(store.stats().unwrap().types_enqueued >= 1);
    }

    #[test]
    fn test_request_timeout_from_settings() {
        let settings = Settings {
            request_timeout_secs: 3,
            ..Default::default()
        };
        assert_eq!(settings.request_timeout(), Duration::from_secs(3));
    }
}
