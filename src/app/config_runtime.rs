use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgMatches, CommandFactory, FromArgMatches, parser::ValueSource};
use heist_core::download::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use heist_core::{Backoff, ClientConfig, RetryPolicy};

use crate::app_config::{FileConfig, VerbositySetting};
use crate::cli::{Args, BackoffMode};

/// Which arguments were given explicitly on the command line.
///
/// Explicit values win over the config file; defaults do not.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CliValueSources {
    pub(crate) output_dir: bool,
    pub(crate) concurrency: bool,
    pub(crate) max_attempts: bool,
    pub(crate) retry_delay: bool,
    pub(crate) backoff: bool,
    pub(crate) start_delay: bool,
    pub(crate) fail_on_status: bool,
    pub(crate) connect_timeout: bool,
    pub(crate) read_timeout: bool,
    pub(crate) verbose: bool,
    pub(crate) quiet: bool,
}

pub(crate) fn parse_cli_with_sources() -> (Args, CliValueSources) {
    let matches = Args::command().get_matches();
    let args = Args::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    (args, sources_from_matches(&matches))
}

fn sources_from_matches(matches: &ArgMatches) -> CliValueSources {
    CliValueSources {
        output_dir: is_commandline_value(matches, "output_dir"),
        concurrency: is_commandline_value(matches, "concurrency"),
        max_attempts: is_commandline_value(matches, "max_attempts"),
        retry_delay: is_commandline_value(matches, "retry_delay"),
        backoff: is_commandline_value(matches, "backoff"),
        start_delay: is_commandline_value(matches, "start_delay"),
        fail_on_status: is_commandline_value(matches, "fail_on_status"),
        connect_timeout: is_commandline_value(matches, "connect_timeout"),
        read_timeout: is_commandline_value(matches, "read_timeout"),
        verbose: is_commandline_value(matches, "verbose"),
        quiet: is_commandline_value(matches, "quiet"),
    }
}

fn is_commandline_value(matches: &ArgMatches, id: &str) -> bool {
    matches.value_source(id) == Some(ValueSource::CommandLine)
}

/// Fills every argument not given on the command line from the config file.
pub(crate) fn apply_config_defaults(
    mut args: Args,
    cli_sources: &CliValueSources,
    file_config: Option<&FileConfig>,
) -> Args {
    let Some(file_config) = file_config else {
        return args;
    };

    if !cli_sources.output_dir
        && let Some(output_dir) = &file_config.output_dir
    {
        args.output_dir = Some(output_dir.clone());
    }

    if !cli_sources.concurrency
        && let Some(concurrency) = file_config.concurrency
    {
        args.concurrency = concurrency;
    }

    if !cli_sources.max_attempts
        && let Some(max_attempts) = file_config.max_attempts
    {
        args.max_attempts = max_attempts;
    }

    if !cli_sources.retry_delay
        && let Some(retry_delay) = file_config.retry_delay_secs
    {
        args.retry_delay = retry_delay;
    }

    if !cli_sources.backoff
        && let Some(backoff) = file_config.backoff
    {
        args.backoff = backoff;
    }

    if !cli_sources.start_delay
        && let Some(start_delay) = file_config.start_delay_secs
    {
        args.start_delay = start_delay;
    }

    if !cli_sources.fail_on_status
        && let Some(fail_on_status) = file_config.fail_on_status
    {
        args.fail_on_status = fail_on_status;
    }

    if !cli_sources.connect_timeout
        && let Some(connect_timeout) = file_config.connect_timeout_secs
    {
        args.connect_timeout = Some(connect_timeout);
    }

    if !cli_sources.read_timeout
        && let Some(read_timeout) = file_config.read_timeout_secs
    {
        args.read_timeout = Some(read_timeout);
    }

    if !cli_sources.verbose
        && !cli_sources.quiet
        && let Some(verbosity) = file_config.verbosity
    {
        apply_config_verbosity(&mut args, verbosity);
    }

    args
}

fn apply_config_verbosity(args: &mut Args, verbosity: VerbositySetting) {
    let (quiet, verbose) = match verbosity {
        VerbositySetting::Default => (false, 0),
        VerbositySetting::Verbose => (false, 1),
        VerbositySetting::Quiet => (true, 0),
        VerbositySetting::Debug => (false, 2),
    };
    args.quiet = quiet;
    args.verbose = verbose;
}

/// Level used when `RUST_LOG` is unset. Priority: quiet > verbose count > info.
pub(crate) fn resolve_default_log_level(args: &Args) -> &'static str {
    if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

pub(crate) fn resolve_output_root(args: &Args) -> PathBuf {
    args.output_dir.clone().unwrap_or_else(|| PathBuf::from("."))
}

pub(crate) fn build_retry_policy(args: &Args) -> Result<RetryPolicy> {
    let backoff = match args.backoff {
        BackoffMode::Fixed => Backoff::Fixed,
        BackoffMode::Exponential => Backoff::exponential(),
    };
    RetryPolicy::new(
        u32::from(args.max_attempts),
        Duration::from_secs(args.retry_delay),
    )
    .and_then(|policy| policy.with_backoff(backoff))
    .context("invalid retry configuration")
}

pub(crate) fn build_client_config(args: &Args) -> ClientConfig {
    ClientConfig {
        connect_timeout: Duration::from_secs(args.connect_timeout.unwrap_or(CONNECT_TIMEOUT_SECS)),
        read_timeout: Duration::from_secs(args.read_timeout.unwrap_or(READ_TIMEOUT_SECS)),
        fail_on_status: args.fail_on_status,
    }
}
