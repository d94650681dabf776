use std::time::Duration;

use anyhow::{Context, Result};
use heist_core::{DownloadEngine, EngineError, HttpClient, Job, TracingReporter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ProcessExit;
use crate::app::{config_runtime, exit_handler, terminal};
use crate::app_config;

pub(crate) async fn run_heist() -> Result<ProcessExit> {
    let (args, cli_sources) = config_runtime::parse_cli_with_sources();

    let loaded_config = app_config::load_config(args.config.as_deref())?;
    let args =
        config_runtime::apply_config_defaults(args, &cli_sources, loaded_config.config.as_ref());

    let default_level = config_runtime::resolve_default_log_level(&args);
    terminal::init_tracing(default_level, terminal::is_no_color_requested(&args));

    debug!(?args, "CLI arguments parsed");
    if loaded_config.loaded_from_file()
        && let Some(path) = &loaded_config.path
    {
        debug!(path = %path.display(), "loaded config file");
    }

    let template = args.url_template().unwrap_or_default();
    let job = Job::new(template, args.start, args.end).context("invalid job")?;
    let output_root = config_runtime::resolve_output_root(&args);
    let retry_policy = config_runtime::build_retry_policy(&args)?;
    let client = HttpClient::new(config_runtime::build_client_config(&args))
        .context("failed to build HTTP client")?;
    let engine = DownloadEngine::new(usize::from(args.concurrency), retry_policy)
        .context("invalid download engine configuration")?;

    info!("Downloading from: {}", job.url_template());
    info!("From: {} to {}", job.start(), job.end());
    info!(output_root = %output_root.display(), host = job.host(), "saving files");
    if !job.has_index_placeholder() {
        warn!("URL template has no ##num## placeholder; every index fetches the same URL");
    }

    let cancel = CancellationToken::new();
    let cancel_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping");
            cancel_signal.cancel();
        }
    });

    if args.start_delay > 0 {
        info!("Starting in {} seconds", args.start_delay);
        tokio::select! {
            () = cancel.cancelled() => {
                warn!("Cancelled before start");
                return Ok(ProcessExit::Failure);
            }
            () = tokio::time::sleep(Duration::from_secs(args.start_delay)) => {}
        }
    }

    let stats = match engine
        .run(&job, &client, &output_root, &TracingReporter, &cancel)
        .await
    {
        Ok(stats) => stats,
        Err(EngineError::Fatal(source)) => {
            error!(error = %source, "Aborting: destination is not writable");
            return Ok(ProcessExit::Failure);
        }
        Err(other) => return Err(other).context("download failed"),
    };

    info!(
        completed = stats.completed(),
        failed = stats.failed(),
        retried = stats.retried(),
        total = job.len(),
        "Download complete"
    );

    if stats.was_cancelled() {
        warn!(
            completed = stats.completed(),
            total = job.len(),
            "Interrupted before all indices were processed"
        );
    }

    Ok(exit_handler::exit_outcome_for(&stats))
}
