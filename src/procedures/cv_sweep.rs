//! Capacitance-voltage sweep.
//!
//! Steps the E4980A's DC bias through the four-segment protocol
//! 0 -> +V (A), +V -> 0 (B), 0 -> -V (C), -V -> 0 (D), repeated for the
//! requested number of loops, fetching the parallel capacitance at every
//! bias point. Each row is tagged with its loop index and segment label so
//! branches of the hysteresis can be separated in analysis.

use crate::config::Settings;
use crate::error::RigResult;
use crate::instrument::{LcrMeter, SafeIdle};
use crate::metadata::RunMetadata;
use crate::params::{CvForm, RunForm};
use crate::plan::{self, SweepPlan};
use crate::run::shutdown::SafetyChain;
use crate::run::{Acquired, MeasurementLoop, Protocol};
use crate::storage::RunLog;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::{log_report, settle_exit, RunReport};

const COLUMNS: [&str; 5] = ["Bias (V)", "Time (s)", "Cp (F)", "Loop", "Segment"];

const SEGMENT_LABELS: [char; 4] = ['A', 'B', 'C', 'D'];

/// Bias schedule plus the (loop, segment) tag of every point. Segments are
/// inclusive on both ends, so joints are re-measured at the start of each
/// segment, matching how the rig has always logged these sweeps.
fn bias_protocol(amplitude: f64, step: f64, loops: usize) -> (SweepPlan, Vec<(usize, char)>) {
    let mut values = Vec::new();
    let mut tags = Vec::new();
    for loop_index in 1..=loops {
        let segments = [
            (0.0, amplitude),
            (amplitude, 0.0),
            (0.0, -amplitude),
            (-amplitude, 0.0),
        ];
        for (label, (from, to)) in SEGMENT_LABELS.iter().zip(segments) {
            for value in plan::segment(from, to, step) {
                values.push(value);
                tags.push((loop_index, *label));
            }
        }
    }
    (SweepPlan::from_values(values), tags)
}

struct CvProtocol {
    meter: Arc<dyn LcrMeter>,
    tags: Vec<(usize, char)>,
    index: usize,
}

#[async_trait]
impl Protocol for CvProtocol {
    fn columns(&self) -> Vec<&'static str> {
        COLUMNS.to_vec()
    }

    async fn apply(&mut self, level: f64) -> Result<()> {
        self.meter.set_bias(level).await
    }

    async fn acquire(&mut self, _level: f64, _elapsed_s: f64) -> Result<Acquired> {
        let cp = self.meter.read_cp().await?;
        let (loop_index, segment) = self
            .tags
            .get(self.index)
            .copied()
            .unwrap_or((0, '?'));
        self.index += 1;
        Ok(Acquired {
            readings: vec![cp],
            annotations: vec![loop_index.to_string(), segment.to_string()],
        })
    }
}

struct Bench {
    meter: Arc<dyn LcrMeter>,
    chain: SafetyChain,
    idns: Vec<(String, String)>,
}

fn mock_bench() -> Bench {
    use crate::instrument::mock::MockLcrMeter;

    let meter = Arc::new(MockLcrMeter::new(3.3e-11));
    let mut chain = SafetyChain::new();
    chain.register("lcr", Arc::clone(&meter) as Arc<dyn SafeIdle>);

    Bench {
        meter,
        chain,
        idns: vec![("lcr".into(), "LABRIG,MOCK E4980A,0,1.0".into())],
    }
}

#[cfg(not(feature = "instrument_visa"))]
async fn hardware_bench(_settings: &Settings, _form: &CvForm) -> RigResult<Bench> {
    Err(super::visa_unavailable())
}

#[cfg(feature = "instrument_visa")]
async fn hardware_bench(settings: &Settings, form: &CvForm) -> RigResult<Bench> {
    use crate::error::RigError;
    use crate::instrument::visa::VisaTransport;
    use crate::instrument::{KeysightE4980a, ScpiTransport};

    let io: Arc<dyn ScpiTransport> = Arc::new(VisaTransport::open(
        &settings.address("lcr")?,
        settings.visa.timeout,
    )?);
    let meter = Arc::new(KeysightE4980a::new(io));
    let idn = meter.idn().await.map_err(RigError::Command)?;
    meter
        .initialize(form.ac_level_v)
        .await
        .map_err(RigError::Command)?;

    let mut chain = SafetyChain::new();
    chain.register("lcr", Arc::clone(&meter) as Arc<dyn SafeIdle>);

    Ok(Bench {
        meter,
        chain,
        idns: vec![("lcr".into(), idn)],
    })
}

pub async fn run(
    settings: &Settings,
    run_form: &RunForm,
    form: &CvForm,
    mock: bool,
    abort: crate::run::AbortFlag,
) -> RigResult<RunReport> {
    run_form.validate()?;
    form.validate()?;

    let mut metadata = RunMetadata::new(
        &run_form.sample,
        "cv",
        serde_json::to_value(form).unwrap_or_default(),
    );

    let bench = if mock {
        mock_bench()
    } else {
        hardware_bench(settings, form).await?
    };
    for (id, idn) in &bench.idns {
        metadata.record_instrument(id, idn.clone());
    }

    let (sweep, tags) = bias_protocol(form.bias_v, form.step_v, form.loops);
    let mut log = RunLog::create(&settings.output_root, &metadata, &COLUMNS)?;
    let mut protocol = CvProtocol {
        meter: bench.meter,
        tags,
        index: 0,
    };

    let mut measurement = MeasurementLoop::new(sweep, form.settle, abort);
    let run_result = measurement.run(&mut protocol, &mut log).await;
    let shutdown_result = bench.chain.make_safe_all().await;

    let report = RunReport {
        status: measurement.status().clone(),
        rows: log.rows(),
        log_path: log.path().to_path_buf(),
    };
    log_report(&report);
    settle_exit(run_result, shutdown_result)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{AbortFlag, StopReason};
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn protocol_tags_every_point_and_repeats_per_loop() {
        let (sweep, tags) = bias_protocol(2.0, 1.0, 2);
        assert_eq!(sweep.len(), tags.len());
        // four segments of three points each, twice
        assert_eq!(sweep.len(), 24);
        assert_eq!(tags[0], (1, 'A'));
        assert_eq!(tags[11], (1, 'D'));
        assert_eq!(tags[12], (2, 'A'));
        // segment C walks into negative bias
        let c_points: Vec<f64> = sweep
            .values()
            .iter()
            .zip(&tags)
            .filter(|(_, (l, s))| *l == 1 && *s == 'C')
            .map(|(v, _)| *v)
            .collect();
        assert_eq!(c_points, vec![0.0, -1.0, -2.0]);
    }

    #[tokio::test]
    async fn mock_cv_sweep_logs_loop_and_segment_columns() {
        let dir = tempdir().unwrap();
        let settings = Settings {
            output_root: dir.path().to_path_buf(),
            visa: crate::config::VisaSettings {
                timeout: Duration::from_secs(1),
            },
            instruments: Default::default(),
        };
        let run_form = RunForm {
            sample: "cv_mock".into(),
        };
        let form = CvForm {
            bias_v: 2.0,
            step_v: 1.0,
            ac_level_v: 0.5,
            loops: 1,
            settle: Duration::from_millis(1),
        };

        let report = run(&settings, &run_form, &form, true, AbortFlag::new())
            .await
            .unwrap();
        assert_eq!(report.stop_reason(), Some(StopReason::PlanExhausted));
        assert_eq!(report.rows, 12);

        let text = std::fs::read_to_string(&report.log_path).unwrap();
        assert!(text.contains("Bias (V),Time (s),Cp (F),Loop,Segment"));
        assert!(text.lines().any(|l| l.ends_with(",1,A")));
        assert!(text.lines().any(|l| l.ends_with(",1,D")));
    }
}
