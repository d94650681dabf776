//! Fetching and saving the files of a batch.
//!
//! - [`client`](HttpClient) - the `GET` capability behind [`HttpFetch`]
//! - [`retry`](execute) - bounded retries with observer callbacks
//! - [`filename`](resolve_filename) - destination names from Content-Disposition or the URL
//! - [`engine`](DownloadEngine) - the per-index loop tying it together
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
//! let job = Job::new("https://example.com/files/download/##num##.png", 1, 100)?;
//! let engine = DownloadEngine::new(1, RetryPolicy::default())?;
//! let client = HttpClient::new(ClientConfig::default())?;
//! let stats = engine
//!     .run(&job, &client, Path::new("./downloads"), &TracingReporter, &CancellationToken::new())
//!     .await?;
//! println!("Completed: {}", stats.completed());
//! # Ok(())
//! # }
//! ```

mod client;
mod constants;
mod engine;
mod error;
mod filename;
mod reporter;
mod retry;

pub use client::{ClientConfig, FetchedResponse, HttpClient, HttpFetch};
pub use constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_CONCURRENCY, MAX_CONCURRENCY, MIN_CONCURRENCY,
    READ_TIMEOUT_SECS,
};
pub use engine::{DownloadEngine, DownloadStats, EngineError};
pub use error::DownloadError;
pub use filename::{
    DEFAULT_FILENAME, fallback_filename_from_url, parse_content_disposition, resolve_filename,
    sanitize_filename,
};
pub use reporter::{DownloadReporter, TracingReporter};
pub use retry::{
    Backoff, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY, IsRetryable, NoopObserver,
    RetryConfigError, RetryObserver, RetryOutcome, RetryPolicy, execute,
};

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
