//! Measurement procedures.
//!
//! One module per bench protocol. Every procedure follows the same
//! lifecycle: validate the parameter form, open and initialize the
//! instrument sessions, build the sweep plan and run log, drive the
//! measurement loop, and end through the safety chain on every exit path.
//!
//! Instruments are held as capability trait objects, so the same procedure
//! code runs over VISA hardware (`instrument_visa` feature) and over the
//! capability mocks (`--mock`).

pub mod cv_sweep;
pub mod delta;
pub mod iv_sweep;
pub mod monitor;
pub mod rt_sweep;

use crate::error::RigResult;
use crate::run::{RunStatus, StopReason};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

/// What a finished (or faulted) run leaves behind for the operator.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub rows: usize,
    pub log_path: PathBuf,
}

impl RunReport {
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.status.stop_reason
    }
}

/// Settle the run result against the shutdown result.
///
/// The shutdown chain runs on every exit path; its outcome is reported but
/// never masks a run fault. A clean run followed by a failed shutdown is
/// itself a failure, so no instrument is silently left energized.
pub(crate) fn settle_exit(
    run_result: RigResult<()>,
    shutdown_result: RigResult<()>,
) -> RigResult<()> {
    match (run_result, shutdown_result) {
        (Ok(()), Ok(())) => Ok(()),
        (Ok(()), Err(shutdown_err)) => Err(shutdown_err),
        (Err(run_err), Ok(())) => Err(run_err),
        (Err(run_err), Err(shutdown_err)) => {
            warn!(%shutdown_err, "shutdown reported errors after a faulted run");
            Err(run_err)
        }
    }
}

pub(crate) fn log_report(report: &RunReport) {
    info!(
        state = %report.status.state,
        rows = report.rows,
        log = %report.log_path.display(),
        "run finished"
    );
}

/// When the real bus is compiled out and `--mock` was not requested, tell
/// the operator how to get it back instead of pretending to measure.
#[cfg(not(feature = "instrument_visa"))]
pub(crate) fn visa_unavailable() -> crate::error::RigError {
    crate::error::RigError::FeatureNotEnabled("instrument_visa".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RigError;
    use anyhow::anyhow;

    #[test]
    fn clean_run_with_failed_shutdown_is_a_failure() {
        let shutdown_err = RigError::ShutdownFailed(vec![RigError::Command(anyhow!("stuck"))]);
        let result = settle_exit(Ok(()), Err(shutdown_err));
        assert!(matches!(result, Err(RigError::ShutdownFailed(_))));
    }

    #[test]
    fn run_fault_wins_over_shutdown_fault() {
        let run_err = RigError::Read(anyhow!("timeout"));
        let shutdown_err = RigError::ShutdownFailed(vec![]);
        let result = settle_exit(Err(run_err), Err(shutdown_err));
        assert!(matches!(result, Err(RigError::Read(_))));
    }
}
