//! Exit code logic for the heist process.
//!
//! Single responsibility: map the batch result to the process exit outcome.

use heist_core::DownloadStats;

use crate::ProcessExit;

/// Determines the process exit outcome from completed and failed download counts.
pub(crate) fn determine_exit_outcome(completed: usize, failed: usize) -> ProcessExit {
    if failed == 0 {
        ProcessExit::Success
    } else if completed > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}

/// A cancelled run is a failure regardless of counts.
pub(crate) fn exit_outcome_for(stats: &DownloadStats) -> ProcessExit {
    if stats.was_cancelled() {
        ProcessExit::Failure
    } else {
        determine_exit_outcome(stats.completed(), stats.failed())
    }
}
