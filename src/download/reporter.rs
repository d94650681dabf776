//! Progress reporting for the download loop.
//!
//! The loop never prints. It calls a [`DownloadReporter`], and the binary
//! plugs in [`TracingReporter`], which turns each notification into a
//! `tracing` event.

use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use super::error::DownloadError;
use crate::job::Job;

/// Receives notifications from [`super::DownloadEngine::run`].
///
/// Every method has an empty default body.
pub trait DownloadReporter: Send + Sync {
    /// Called once before the first index is processed.
    fn on_job_start(&self, _job: &Job) {}

    /// Called when an index has been bound to a concrete URL.
    fn on_request(&self, _index: u64, _url: &str) {}

    /// Called after each failed attempt. `next_delay` is `None` when no
    /// further attempt will follow.
    fn on_attempt_failure(
        &self,
        _url: &str,
        _attempt: u32,
        _max_attempts: u32,
        _error: &DownloadError,
        _next_delay: Option<Duration>,
    ) {
    }

    /// Called when every attempt for `url` has failed.
    fn on_final_failure(&self, _url: &str, _attempts: u32) {}

    /// Called after the body has been written to `path`.
    fn on_saved(&self, _url: &str, _path: &Path, _bytes: usize) {}
}

/// Reporter that emits `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl DownloadReporter for TracingReporter {
    fn on_job_start(&self, job: &Job) {
        info!(
            template = job.url_template(),
            start = job.start(),
            end = job.end(),
            "starting batch"
        );
    }

    fn on_request(&self, index: u64, url: &str) {
        info!(index, "Downloading: {url}");
    }

    fn on_attempt_failure(
        &self,
        url: &str,
        attempt: u32,
        max_attempts: u32,
        error: &DownloadError,
        next_delay: Option<Duration>,
    ) {
        warn!(
            attempt,
            max_attempts,
            error = %error,
            "Failed to download ({url}) after {attempt} attempt(s)"
        );
        if let Some(delay) = next_delay {
            info!(delay_ms = delay.as_millis(), "Retrying in {:.1} seconds", delay.as_secs_f64());
        }
    }

    fn on_final_failure(&self, url: &str, attempts: u32) {
        warn!(attempts, "giving up on {url}");
    }

    fn on_saved(&self, url: &str, path: &Path, bytes: usize) {
        info!(url, "Successfully downloaded {bytes} bytes => ({})", path.display());
    }
}
