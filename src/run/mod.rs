//! Measurement loop.
//!
//! The loop is the one place run state lives: an explicit [`RunStatus`]
//! owned by [`MeasurementLoop`], not module globals. Each iteration is the
//! fixed sequential protocol every module shares:
//!
//! ```text
//! set stimulus -> fixed delay -> read -> record -> check stop condition
//! ```
//!
//! # State machine
//!
//! ```text
//! Idle ──start──> Running ──plan exhausted / threshold──> Completed
//!                    │  │
//!                    │  └──abort flag──> Stopping ──> Completed
//!                    └──any error──> Faulted
//! ```
//!
//! Errors are never retried; the first one faults the run and the caller
//! drives the shutdown handler. The abort flag is checked between
//! iterations only, so a stop request is not prompt mid-delay.

pub mod shutdown;

use crate::error::{RigError, RigResult};
use crate::plan::SweepPlan;
use crate::record::SampleRecord;
use crate::storage::RunLog;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Run lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    /// No run active.
    Idle,
    /// Iterating the plan.
    Running,
    /// Abort observed; winding down cleanly.
    Stopping,
    /// Run finished cleanly (plan exhausted, threshold, or abort).
    Completed,
    /// An error ended the run.
    Faulted,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Idle => write!(f, "Idle"),
            RunState::Running => write!(f, "Running"),
            RunState::Stopping => write!(f, "Stopping"),
            RunState::Completed => write!(f, "Completed"),
            RunState::Faulted => write!(f, "Faulted"),
        }
    }
}

impl RunState {
    pub fn can_begin(&self) -> bool {
        matches!(self, RunState::Idle | RunState::Completed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Faulted)
    }
}

/// Why a clean run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// Every planned stimulus value was applied.
    PlanExhausted,
    /// A monitored reading crossed the configured threshold.
    ThresholdCrossed,
    /// The operator requested a stop.
    Aborted,
}

/// Snapshot of a run's progress.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    pub state: RunState,
    pub run_id: Option<String>,
    pub rows_written: usize,
    pub stop_reason: Option<StopReason>,
    pub last_error: Option<String>,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self {
            state: RunState::Idle,
            run_id: None,
            rows_written: 0,
            stop_reason: None,
            last_error: None,
        }
    }
}

/// Shared stop-request flag, checked between iterations.
#[derive(Clone)]
pub struct AbortFlag {
    flag: Arc<AtomicBool>,
    reason: Arc<RwLock<Option<String>>>,
}

impl Default for AbortFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortFlag {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            reason: Arc::new(RwLock::new(None)),
        }
    }

    pub fn trigger(&self, reason: impl Into<String>) {
        self.flag.store(true, Ordering::SeqCst);
        if let Ok(mut slot) = self.reason.write() {
            *slot = Some(reason.into());
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.read().ok().and_then(|slot| slot.clone())
    }
}

/// One iteration's readings, as produced by a protocol.
#[derive(Debug, Clone, Default)]
pub struct Acquired {
    pub readings: Vec<f64>,
    pub annotations: Vec<String>,
}

impl Acquired {
    pub fn of(readings: Vec<f64>) -> Self {
        Self {
            readings,
            annotations: Vec::new(),
        }
    }
}

/// What a measurement module does per iteration. The loop owns sequencing,
/// timing, recording, and state; the protocol owns the instruments and the
/// row layout of its run log.
#[async_trait]
pub trait Protocol: Send {
    /// Run log column header, in row order.
    fn columns(&self) -> Vec<&'static str>;

    /// Apply one stimulus value.
    async fn apply(&mut self, level: f64) -> Result<()>;

    /// Query the instruments for this iteration's readings.
    async fn acquire(&mut self, level: f64, elapsed_s: f64) -> Result<Acquired>;

    /// Map a record onto the columns declared by `columns()`. The default
    /// layout is stimulus, elapsed time, then readings and annotations.
    fn format_row(&self, record: &SampleRecord) -> Vec<String> {
        let mut cells = vec![
            format_cell(record.stimulus),
            format_elapsed(record.elapsed_s),
        ];
        cells.extend(record.readings.iter().map(|v| format_cell(*v)));
        cells.extend(record.annotations.iter().cloned());
        cells
    }

    /// Inspect the completed record for a stop condition (e.g. a cutoff
    /// temperature). `None` keeps the loop running.
    fn check_stop(&self, _record: &SampleRecord) -> Option<StopReason> {
        None
    }
}

pub fn format_cell(value: f64) -> String {
    format!("{value:.6E}")
}

pub fn format_elapsed(seconds: f64) -> String {
    format!("{seconds:.2}")
}

/// Drives a [`Protocol`] over a [`SweepPlan`].
pub struct MeasurementLoop {
    plan: SweepPlan,
    settle: Duration,
    abort: AbortFlag,
    status: RunStatus,
    records: Vec<SampleRecord>,
    live_tx: watch::Sender<Option<SampleRecord>>,
}

impl MeasurementLoop {
    pub fn new(plan: SweepPlan, settle: Duration, abort: AbortFlag) -> Self {
        let (live_tx, _) = watch::channel(None);
        Self {
            plan,
            settle,
            abort,
            status: RunStatus::default(),
            records: Vec::new(),
            live_tx,
        }
    }

    /// Latest-record channel for a live display; dropping the receiver does
    /// not affect the run.
    pub fn subscribe(&self) -> watch::Receiver<Option<SampleRecord>> {
        self.live_tx.subscribe()
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    /// Records accumulated this run, one per completed iteration.
    pub fn records(&self) -> &[SampleRecord] {
        &self.records
    }

    /// Execute the run. On a clean exit the status is `Completed` with a
    /// stop reason; on error the status is `Faulted` and the error is
    /// returned for the caller to report after driving the shutdown chain.
    pub async fn run(&mut self, protocol: &mut dyn Protocol, log: &mut RunLog) -> RigResult<()> {
        if !self.status.state.can_begin() {
            return Err(RigError::Configuration(format!(
                "cannot start a run from the {} state",
                self.status.state
            )));
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        info!(run_id = %run_id, points = self.plan.len(), "run starting");
        self.status = RunStatus {
            state: RunState::Running,
            run_id: Some(run_id),
            ..RunStatus::default()
        };

        let started = tokio::time::Instant::now();
        let mut step = 0usize;

        let outcome: RigResult<StopReason> = loop {
            if self.abort.is_triggered() {
                self.status.state = RunState::Stopping;
                let reason = self.abort.reason().unwrap_or_else(|| "stop requested".into());
                info!(%reason, "abort observed; stopping run");
                break Ok(StopReason::Aborted);
            }

            let Some(level) = self.plan.stimulus(step) else {
                break Ok(StopReason::PlanExhausted);
            };

            if let Err(err) = protocol.apply(level).await {
                break Err(RigError::Command(err));
            }

            sleep(self.settle).await;

            let elapsed_s = started.elapsed().as_secs_f64();
            let acquired = match protocol.acquire(level, elapsed_s).await {
                Ok(acquired) => acquired,
                Err(err) => break Err(RigError::Read(err)),
            };

            let record = SampleRecord::new(elapsed_s, level, acquired.readings)
                .with_annotations(acquired.annotations);

            if let Err(err) = log.append(&protocol.format_row(&record)) {
                break Err(err);
            }

            self.records.push(record.clone());
            self.status.rows_written += 1;
            self.live_tx.send_replace(Some(record.clone()));

            if let Some(reason) = protocol.check_stop(&record) {
                break Ok(reason);
            }

            step += 1;
        };

        match outcome {
            Ok(reason) => {
                self.status.state = RunState::Completed;
                self.status.stop_reason = Some(reason);
                info!(
                    rows = self.status.rows_written,
                    reason = ?reason,
                    "run completed"
                );
                Ok(())
            }
            Err(err) => {
                self.status.state = RunState::Faulted;
                self.status.last_error = Some(err.to_string());
                error!(rows = self.status.rows_written, %err, "run faulted");
                Err(err)
            }
        }
    }
}

/// Wire Ctrl-C to an abort flag. The first signal requests a clean stop;
/// the run still finishes its current iteration.
pub fn abort_on_ctrl_c(abort: AbortFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received; requesting stop");
            abort.trigger("Ctrl-C");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_predicates() {
        assert!(RunState::Idle.can_begin());
        assert!(RunState::Completed.can_begin());
        assert!(!RunState::Running.can_begin());
        assert!(!RunState::Faulted.can_begin());
        assert!(RunState::Faulted.is_terminal());
    }

    #[test]
    fn abort_flag_carries_a_reason() {
        let abort = AbortFlag::new();
        assert!(!abort.is_triggered());
        abort.trigger("operator stop");
        assert!(abort.is_triggered());
        assert_eq!(abort.reason().as_deref(), Some("operator stop"));
    }

    #[test]
    fn cells_use_scientific_notation() {
        assert_eq!(format_cell(1e-6), "1.000000E-6");
        assert_eq!(format_elapsed(12.3456), "12.35");
    }
}
