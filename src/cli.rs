//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use serde::Deserialize;

use heist_core::{DEFAULT_CONCURRENCY, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY};

/// Default pause before the first request, in seconds.
pub const DEFAULT_START_DELAY_SECS: u64 = 2;

const USAGE_EXAMPLES: &str = "\
Examples:
  heist https://example.com/files/download/##num##.png -s 1 -e 100
  heist --start 59 --end 90 --url https://anotherexample.com/pages/##num##.html";

/// Batch downloads files from a website based on the template it is given.
///
/// Every `##num##` in the URL template is replaced with each index from
/// `--start` to `--end` (inclusive); the files are saved under
/// `<output-dir>/<host>/`.
#[derive(Parser, Debug, Clone)]
#[command(name = "heist")]
#[command(author, version, about, after_help = USAGE_EXAMPLES)]
pub struct Args {
    /// URL template containing the ##num## placeholder
    #[arg(
        value_name = "URL_TEMPLATE",
        required_unless_present = "url",
        conflicts_with = "url"
    )]
    pub template: Option<String>,

    /// URL template (alternative to the positional argument)
    #[arg(short = 'u', long, value_name = "URL_TEMPLATE")]
    pub url: Option<String>,

    /// First index to download (inclusive)
    #[arg(short = 's', long, allow_negative_numbers = true)]
    pub start: i64,

    /// Last index to download (inclusive)
    #[arg(short = 'e', long, allow_negative_numbers = true)]
    pub end: i64,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Disable colored log output (also honors NO_COLOR and TERM=dumb)
    #[arg(long)]
    pub no_color: bool,

    /// Root directory for downloads (files go to <dir>/<host>/)
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Maximum indices downloaded at once (1-100)
    #[arg(
        short = 'c',
        long,
        default_value_t = DEFAULT_CONCURRENCY as u8,
        value_parser = clap::value_parser!(u8).range(1..=100)
    )]
    pub concurrency: u8,

    /// Attempts per file, including the first (1-10)
    #[arg(
        short = 'r',
        long,
        default_value_t = DEFAULT_MAX_ATTEMPTS as u8,
        value_parser = clap::value_parser!(u8).range(1..=10)
    )]
    pub max_attempts: u8,

    /// Seconds to wait between attempts (0-3600)
    #[arg(
        short = 'd',
        long,
        value_name = "SECS",
        default_value_t = DEFAULT_RETRY_DELAY.as_secs(),
        value_parser = clap::value_parser!(u64).range(0..=3600)
    )]
    pub retry_delay: u64,

    /// Delay growth between attempts
    #[arg(long, value_enum, default_value_t = BackoffMode::Fixed)]
    pub backoff: BackoffMode,

    /// Seconds to wait before the first request (0-3600)
    #[arg(
        long,
        value_name = "SECS",
        default_value_t = DEFAULT_START_DELAY_SECS,
        value_parser = clap::value_parser!(u64).range(0..=3600)
    )]
    pub start_delay: u64,

    /// Treat non-2xx responses as failed attempts instead of saving them
    #[arg(long)]
    pub fail_on_status: bool,

    /// HTTP connect timeout in seconds (1-3600)
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub connect_timeout: Option<u64>,

    /// HTTP read timeout in seconds (1-3600)
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub read_timeout: Option<u64>,

    /// Config file path (default: $XDG_CONFIG_HOME/heist/config.toml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl Args {
    /// The URL template, from either the positional argument or `--url`.
    #[must_use]
    pub fn url_template(&self) -> Option<&str> {
        self.template.as_deref().or(self.url.as_deref())
    }
}

/// How the delay between attempts evolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffMode {
    /// Same delay before every retry
    Fixed,
    /// Doubling delay with jitter, capped
    Exponential,
}
