//! The download loop.
//!
//! [`DownloadEngine::run`] walks a [`Job`]'s index range. For each index it
//! binds the URL template, fetches the URL through the retry executor,
//! resolves a filename from the response and saves the body under
//! `<output-root>/<host>/`.
//!
//! # Concurrency Model
//!
//! - A bounded window of at most `concurrency` indices is in flight, driven by
//!   `buffer_unordered` on the caller's task (no spawning)
//! - With `concurrency = 1` (the default) indices run strictly in order
//! - Exhausted indices are counted and skipped; the loop moves on
//! - A fatal filesystem error stops scheduling new indices and is returned
//!   once in-flight work has drained
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use heist_core::Job;
//! use heist_core::download::{
//!     ClientConfig, DownloadEngine, HttpClient, RetryPolicy, TracingReporter,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let job = Job::new("https://example.com/files/##num##.png", 1, 10)?;
//! let engine = DownloadEngine::new(1, RetryPolicy::default())?;
//! let client = HttpClient::new(ClientConfig::default())?;
//! let stats = engine
//!     .run(&job, &client, Path::new("."), &TracingReporter, &CancellationToken::new())
//!     .await?;
//! println!("Completed: {}, Failed: {}", stats.completed(), stats.failed());
//! # Ok(())
//! # }
//! ```

mod persistence;

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{StreamExt, future, stream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::client::HttpFetch;
use super::constants::{MAX_CONCURRENCY, MIN_CONCURRENCY};
use super::error::DownloadError;
use super::filename::resolve_filename;
use super::reporter::DownloadReporter;
use super::retry::{self, RetryObserver, RetryOutcome, RetryPolicy};
use crate::job::Job;
use crate::template::{Binder, DEFAULT_MARKERS, PlaceholderRecord, TemplateError};

/// Error type for download engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// The placeholder markers could not be compiled.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// The destination became unusable; the batch was aborted.
    #[error("batch aborted: {0}")]
    Fatal(#[source] DownloadError),
}

/// Statistics from a download batch run.
///
/// Atomic counters, so the in-flight window can update them through a shared
/// reference.
#[derive(Debug, Default)]
pub struct DownloadStats {
    completed: AtomicUsize,
    failed: AtomicUsize,
    retried: AtomicUsize,
    cancelled: AtomicBool,
}

impl DownloadStats {
    /// Creates a new stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of indices saved to disk.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Returns the number of indices that exhausted their attempts.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Returns the number of retries scheduled across all indices.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    /// Returns `true` if the run stopped because of cancellation.
    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn increment_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_retried(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }

    fn mark_cancelled(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Drives a [`Job`] to completion.
#[derive(Debug)]
pub struct DownloadEngine {
    concurrency: usize,
    retry_policy: RetryPolicy,
    binder: Binder,
}

impl DownloadEngine {
    /// Creates an engine with the given in-flight bound and retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if the value is outside
    /// the valid range (1-100).
    ///
    /// # Example
    ///
    /// ```
    /// use heist_core::download::{DownloadEngine, RetryPolicy};
    ///
    /// let engine = DownloadEngine::new(4, RetryPolicy::default()).unwrap();
    /// assert_eq!(engine.concurrency(), 4);
    /// ```
    #[instrument(level = "debug", skip(retry_policy))]
    pub fn new(concurrency: usize, retry_policy: RetryPolicy) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(EngineError::InvalidConcurrency { value: concurrency });
        }

        debug!(
            concurrency,
            max_attempts = retry_policy.max_attempts(),
            delay_ms = retry_policy.delay().as_millis(),
            "creating download engine"
        );

        Ok(Self {
            concurrency,
            retry_policy,
            binder: Binder::new(DEFAULT_MARKERS)?,
        })
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Returns the configured retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Downloads every index of `job` into `output_root/<host>/`.
    ///
    /// Individual failures do NOT cause this method to error: they are
    /// reported and counted in the returned stats. Cancellation also returns
    /// `Ok`, with [`DownloadStats::was_cancelled`] set.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Fatal`] when saving fails with an error that
    /// makes the destination unusable (disk full, read-only filesystem,
    /// permission denied).
    #[instrument(
        skip(self, job, fetcher, reporter, cancel),
        fields(template = job.url_template(), output_root = %output_root.display())
    )]
    pub async fn run(
        &self,
        job: &Job,
        fetcher: &dyn HttpFetch,
        output_root: &Path,
        reporter: &dyn DownloadReporter,
        cancel: &CancellationToken,
    ) -> Result<DownloadStats, EngineError> {
        let stats = DownloadStats::new();
        let host_dir = output_root.join(job.host());
        // Child token: a fatal error stops this batch without touching the caller's token.
        let batch_cancel = cancel.child_token();
        let fatal: Mutex<Option<DownloadError>> = Mutex::new(None);

        reporter.on_job_start(job);
        info!(
            start = job.start(),
            end = job.end(),
            concurrency = self.concurrency,
            "starting batch"
        );

        let ctx = IndexContext {
            job,
            fetcher,
            host_dir: &host_dir,
            reporter,
            stats: &stats,
            cancel: &batch_cancel,
        };

        // Set only when indices were skipped or abandoned, not for a late cancel.
        let cut_short = AtomicBool::new(false);

        stream::iter(job.indices())
            .take_while(|_| {
                let proceed = !batch_cancel.is_cancelled();
                if !proceed {
                    cut_short.store(true, Ordering::SeqCst);
                }
                future::ready(proceed)
            })
            .map(|index| self.download_index(index, &ctx))
            .buffer_unordered(self.concurrency)
            .for_each(|outcome| {
                match outcome {
                    IndexOutcome::Fatal(error) => {
                        warn!(error = %error, "fatal error, aborting batch");
                        batch_cancel.cancel();
                        if let Ok(mut slot) = fatal.lock() {
                            slot.get_or_insert(error);
                        }
                    }
                    IndexOutcome::Cancelled => cut_short.store(true, Ordering::SeqCst),
                    IndexOutcome::Saved | IndexOutcome::Failed => {}
                }
                future::ready(())
            })
            .await;

        if let Some(error) = fatal.into_inner().ok().flatten() {
            return Err(EngineError::Fatal(error));
        }
        if cut_short.load(Ordering::SeqCst) {
            stats.mark_cancelled();
        }

        info!(
            completed = stats.completed(),
            failed = stats.failed(),
            retried = stats.retried(),
            cancelled = stats.was_cancelled(),
            "batch complete"
        );
        Ok(stats)
    }

    #[instrument(level = "debug", skip(self, ctx))]
    async fn download_index(&self, index: u64, ctx: &IndexContext<'_>) -> IndexOutcome {
        let url = self
            .binder
            .bind(ctx.job.url_template(), &PlaceholderRecord::for_index(index));
        ctx.reporter.on_request(index, &url);

        let observer = ReporterObserver {
            url: &url,
            reporter: ctx.reporter,
            stats: ctx.stats,
        };
        let fetcher = ctx.fetcher;
        let url_ref = url.as_str();
        let host_dir = ctx.host_dir;

        let outcome = retry::execute(
            &self.retry_policy,
            move |_attempt| fetch_and_save(fetcher, url_ref, host_dir),
            &observer,
            ctx.cancel,
        )
        .await;

        match outcome {
            RetryOutcome::Succeeded { value, .. } => {
                ctx.stats.increment_completed();
                ctx.reporter.on_saved(&url, &value.path, value.bytes);
                IndexOutcome::Saved
            }
            RetryOutcome::Exhausted { attempts, last_error } => {
                debug!(index, attempts, error = %last_error, "index failed");
                ctx.stats.increment_failed();
                IndexOutcome::Failed
            }
            RetryOutcome::Aborted { error, .. } => {
                ctx.stats.increment_failed();
                IndexOutcome::Fatal(error)
            }
            RetryOutcome::Cancelled { .. } => IndexOutcome::Cancelled,
        }
    }
}

/// Borrowed state shared by every index of one run.
struct IndexContext<'a> {
    job: &'a Job,
    fetcher: &'a dyn HttpFetch,
    host_dir: &'a Path,
    reporter: &'a dyn DownloadReporter,
    stats: &'a DownloadStats,
    cancel: &'a CancellationToken,
}

#[derive(Debug)]
enum IndexOutcome {
    Saved,
    Failed,
    Cancelled,
    Fatal(DownloadError),
}

#[derive(Debug)]
struct SavedFile {
    path: PathBuf,
    bytes: usize,
}

/// One attempt: GET, pick a filename, write the body.
async fn fetch_and_save(
    fetcher: &dyn HttpFetch,
    url: &str,
    host_dir: &Path,
) -> Result<SavedFile, DownloadError> {
    let response = fetcher.get(url).await?;
    if !response.is_success() {
        debug!(url, status = response.status, "saving non-success response body");
    }
    let filename = resolve_filename(url, &response.headers);
    let path = persistence::save_atomically(host_dir, &filename, &response.body).await?;
    Ok(SavedFile {
        path,
        bytes: response.body.len(),
    })
}

/// Forwards retry notifications to the reporter and counts retries.
struct ReporterObserver<'a> {
    url: &'a str,
    reporter: &'a dyn DownloadReporter,
    stats: &'a DownloadStats,
}

impl RetryObserver<DownloadError> for ReporterObserver<'_> {
    fn on_attempt_failure(
        &self,
        attempt: u32,
        max_attempts: u32,
        error: &DownloadError,
        next_delay: Option<Duration>,
    ) {
        if next_delay.is_some() {
            self.stats.increment_retried();
        }
        self.reporter
            .on_attempt_failure(self.url, attempt, max_attempts, error, next_delay);
    }

    fn on_final_failure(&self, attempts: u32) {
        self.reporter.on_final_failure(self.url, attempts);
    }
}
