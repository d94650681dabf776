//! Batch job description and validation.

use std::ops::RangeInclusive;

use thiserror::Error;
use url::Url;

use crate::template::{Binder, DEFAULT_MARKERS, INDEX_KEY};

/// Errors raised when a job description is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    /// The URL template is empty or whitespace.
    #[error("URL template is empty")]
    EmptyTemplate,

    /// The URL template is not an absolute URL with a host.
    #[error("invalid URL template {template}: {reason}")]
    InvalidTemplate {
        /// The rejected template.
        template: String,
        /// Why the template was rejected.
        reason: String,
    },

    /// A range bound is negative.
    #[error("range bounds must be non-negative (start = {start}, end = {end})")]
    NegativeRange {
        /// Requested start index.
        start: i64,
        /// Requested end index.
        end: i64,
    },

    /// The range ends before it starts.
    #[error("range end {end} is before start {start}")]
    ReversedRange {
        /// Requested start index.
        start: i64,
        /// Requested end index.
        end: i64,
    },
}

/// One batch run: a URL template and the inclusive index range to expand it over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    url_template: String,
    host: String,
    start: u64,
    end: u64,
}

impl Job {
    /// Validates and builds a job.
    ///
    /// # Errors
    ///
    /// Returns a [`JobError`] if the template is blank or not an absolute URL
    /// with a host, if either bound is negative, or if `end < start`.
    pub fn new(url_template: impl Into<String>, start: i64, end: i64) -> Result<Self, JobError> {
        let url_template = url_template.into();
        if url_template.trim().is_empty() {
            return Err(JobError::EmptyTemplate);
        }

        if start < 0 || end < 0 {
            return Err(JobError::NegativeRange { start, end });
        }
        if end < start {
            return Err(JobError::ReversedRange { start, end });
        }

        let invalid = |reason: &str| JobError::InvalidTemplate {
            template: url_template.clone(),
            reason: reason.to_string(),
        };
        let parsed = Url::parse(&url_template).map_err(|e| invalid(&e.to_string()))?;
        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("URL has no host"))?
            .to_string();

        Ok(Self {
            url_template,
            host,
            start: start.unsigned_abs(),
            end: end.unsigned_abs(),
        })
    }

    /// The raw URL template.
    #[must_use]
    pub fn url_template(&self) -> &str {
        &self.url_template
    }

    /// Host of the template URL; downloads land in a directory of this name.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// First index (inclusive).
    #[must_use]
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Last index (inclusive).
    #[must_use]
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Inclusive index range.
    #[must_use]
    pub fn indices(&self) -> RangeInclusive<u64> {
        self.start..=self.end
    }

    /// Number of URLs this job expands to.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Always `false`; a valid job covers at least one index.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether the template contains the `##num##` index placeholder.
    ///
    /// A template without it fetches the same URL for every index.
    #[must_use]
    pub fn has_index_placeholder(&self) -> bool {
        Binder::new(DEFAULT_MARKERS)
            .map(|binder| binder.placeholders(&self.url_template).contains(&INDEX_KEY))
            .unwrap_or(false)
    }
}
