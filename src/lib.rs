//! Heist Core Library
//!
//! Batch-downloads numbered files: a URL template such as
//! `https://example.com/files/##num##.png` is expanded over an inclusive index
//! range and every resulting URL is fetched and saved under
//! `<output>/<host>/<filename>`.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`template`] - Named placeholder substitution (`##num##`)
//! - [`job`] - Validated batch description (template + range)
//! - [`download`] - HTTP client, retry executor, filename resolution and the download loop

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod download;
pub mod job;
pub mod template;
mod user_agent;

// Re-export commonly used types
pub use download::{
    Backoff, ClientConfig, DEFAULT_CONCURRENCY, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY,
    DownloadEngine, DownloadError, DownloadReporter, DownloadStats, EngineError, HttpClient,
    HttpFetch, RetryPolicy, TracingReporter,
};
pub use job::{Job, JobError};
pub use template::{Binder, PlaceholderRecord, PlaceholderSource, TemplateError, bind};
