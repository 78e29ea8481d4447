//! Current-vs-time monitoring.
//!
//! Logs the Keithley 6517B electrometer at a fixed period, for leakage and
//! decay measurements where the stimulus never changes. Runs until the
//! point budget is spent or the operator stops it.

use crate::config::Settings;
use crate::error::RigResult;
use crate::instrument::{Readable, SafeIdle};
use crate::metadata::RunMetadata;
use crate::params::{MonitorForm, RunForm};
use crate::plan::SweepPlan;
use crate::record::SampleRecord;
use crate::run::shutdown::SafetyChain;
use crate::run::{format_cell, format_elapsed, Acquired, MeasurementLoop, Protocol};
use crate::storage::RunLog;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::{log_report, settle_exit, RunReport};

const COLUMNS: [&str; 2] = ["Time (s)", "Current (A)"];

struct MonitorProtocol {
    meter: Arc<dyn Readable>,
}

#[async_trait]
impl Protocol for MonitorProtocol {
    fn columns(&self) -> Vec<&'static str> {
        COLUMNS.to_vec()
    }

    async fn apply(&mut self, _level: f64) -> Result<()> {
        // nothing to drive; the electrometer just integrates
        Ok(())
    }

    async fn acquire(&mut self, _level: f64, _elapsed_s: f64) -> Result<Acquired> {
        let amps = self.meter.read().await?;
        Ok(Acquired::of(vec![amps]))
    }

    fn format_row(&self, record: &SampleRecord) -> Vec<String> {
        let mut cells = vec![format_elapsed(record.elapsed_s)];
        cells.extend(record.readings.iter().map(|v| format_cell(*v)));
        cells
    }
}

struct Bench {
    meter: Arc<dyn Readable>,
    chain: SafetyChain,
    idns: Vec<(String, String)>,
}

fn mock_bench() -> Bench {
    use crate::instrument::mock::{MockSource, MockVoltmeter};

    // a biased source behind a large resistor stands in for a leaky sample
    let source = Arc::new(MockSource::new());
    let meter = Arc::new(MockVoltmeter::across(Arc::clone(&source), 1.0));
    let mut chain = SafetyChain::new();
    chain.register("k6517b", Arc::clone(&meter) as Arc<dyn SafeIdle>);

    Bench {
        meter,
        chain,
        idns: vec![("k6517b".into(), "LABRIG,MOCK 6517B,0,1.0".into())],
    }
}

#[cfg(not(feature = "instrument_visa"))]
async fn hardware_bench(_settings: &Settings) -> RigResult<Bench> {
    Err(super::visa_unavailable())
}

#[cfg(feature = "instrument_visa")]
async fn hardware_bench(settings: &Settings) -> RigResult<Bench> {
    use crate::error::RigError;
    use crate::instrument::visa::VisaTransport;
    use crate::instrument::{Keithley6517b, ScpiTransport};

    let io: Arc<dyn ScpiTransport> = Arc::new(VisaTransport::open(
        &settings.address("k6517b")?,
        settings.visa.timeout,
    )?);
    let meter = Arc::new(Keithley6517b::new(io));
    let idn = meter.idn().await.map_err(RigError::Command)?;
    meter.initialize().await.map_err(RigError::Command)?;

    let mut chain = SafetyChain::new();
    chain.register("k6517b", Arc::clone(&meter) as Arc<dyn SafeIdle>);

    Ok(Bench {
        meter,
        chain,
        idns: vec![("k6517b".into(), idn)],
    })
}

pub async fn run(
    settings: &Settings,
    run_form: &RunForm,
    form: &MonitorForm,
    mock: bool,
    abort: crate::run::AbortFlag,
) -> RigResult<RunReport> {
    run_form.validate()?;
    form.validate()?;

    let mut metadata = RunMetadata::new(
        &run_form.sample,
        "monitor",
        serde_json::to_value(form).unwrap_or_default(),
    );

    let bench = if mock {
        mock_bench()
    } else {
        hardware_bench(settings).await?
    };
    for (id, idn) in &bench.idns {
        metadata.record_instrument(id, idn.clone());
    }

    let mut log = RunLog::create(&settings.output_root, &metadata, &COLUMNS)?;
    let mut protocol = MonitorProtocol { meter: bench.meter };

    let mut measurement =
        MeasurementLoop::new(SweepPlan::constant(0.0, form.points), form.period, abort);
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
