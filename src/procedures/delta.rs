//! Delta-mode resistance measurement.
//!
//! A Keithley 6221/2182 pair runs the current-reversal sequence on its own;
//! this module arms it, then polls the fresh-reading buffer at a fixed
//! period. Resistance is derived from the measured voltage and the
//! programmed reversal current. A Lakeshore can be polled alongside for a
//! temperature column, which turns the run into an R-T trace when the
//! cryostat is drifting.

use crate::config::Settings;
use crate::error::RigResult;
use crate::instrument::{DeltaSource, SafeIdle, TemperatureController};
use crate::metadata::RunMetadata;
use crate::params::{DeltaForm, RunForm};
use crate::record::SampleRecord;
use crate::run::shutdown::SafetyChain;
use crate::run::{format_cell, format_elapsed, Acquired, MeasurementLoop, Protocol};
use crate::storage::RunLog;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::{log_report, settle_exit, RunReport};

struct DeltaProtocol {
    source: Arc<dyn DeltaSource>,
    thermometer: Option<Arc<dyn TemperatureController>>,
}

#[async_trait]
impl Protocol for DeltaProtocol {
    fn columns(&self) -> Vec<&'static str> {
        let mut columns = vec![
            "Time (s)",
            "Current (A)",
            "Voltage (V)",
            "Resistance (Ohm)",
        ];
        if self.thermometer.is_some() {
            columns.push("Temperature (K)");
        }
        columns
    }

    async fn apply(&mut self, _level: f64) -> Result<()> {
        // the armed 6221/2182 pair free-runs; nothing to set per point
        Ok(())
    }

    async fn acquire(&mut self, level: f64, _elapsed_s: f64) -> Result<Acquired> {
        let (volts, _instrument_ohm) = self.source.read_fresh().await?;
        let resistance = volts / level;
        let mut readings = vec![volts, resistance];
        if let Some(thermometer) = &self.thermometer {
            readings.push(thermometer.read_kelvin().await?);
        }
        Ok(Acquired::of(readings))
    }

    fn format_row(&self, record: &SampleRecord) -> Vec<String> {
        // time leads in the delta logs
        let mut cells = vec![
            format_elapsed(record.elapsed_s),
            format_cell(record.stimulus),
        ];
        cells.extend(record.readings.iter().map(|v| format_cell(*v)));
        cells
    }
}

struct Bench {
    source: Arc<dyn DeltaSource>,
    thermometer: Option<Arc<dyn TemperatureController>>,
    chain: SafetyChain,
    idns: Vec<(String, String)>,
}

fn mock_bench(form: &DeltaForm) -> Bench {
    use crate::instrument::mock::{MockDeltaSource, MockTempController};

    let source = Arc::new(MockDeltaSource::new(form.current_a, 2.5e4));
    let mut chain = SafetyChain::new();
    chain.register("k6221", Arc::clone(&source) as Arc<dyn SafeIdle>);

    let thermometer = if form.with_temperature {
        let controller = Arc::new(MockTempController::starting_at(295.0));
        chain.register("lakeshore", Arc::clone(&controller) as Arc<dyn SafeIdle>);
        Some(controller as Arc<dyn TemperatureController>)
    } else {
        None
    };

    Bench {
        source,
        thermometer,
        chain,
        idns: vec![("k6221".into(), "LABRIG,MOCK 6221,0,1.0".into())],
    }
}

#[cfg(not(feature = "instrument_visa"))]
async fn hardware_bench(_settings: &Settings, _form: &DeltaForm) -> RigResult<Bench> {
    Err(super::visa_unavailable())
}

#[cfg(feature = "instrument_visa")]
async fn hardware_bench(settings: &Settings, form: &DeltaForm) -> RigResult<Bench> {
    use crate::error::RigError;
    use crate::instrument::visa::VisaTransport;
    use crate::instrument::{Keithley6221, Lakeshore, ScpiTransport};

    let timeout = settings.visa.timeout;
    let io: Arc<dyn ScpiTransport> =
        Arc::new(VisaTransport::open(&settings.address("k6221")?, timeout)?);
    let k6221 = Arc::new(Keithley6221::new(io));
    let mut idns = vec![("k6221".to_string(), k6221.idn().await.map_err(RigError::Command)?)];
    k6221
        .initialize_delta(form.current_a, form.compliance_v)
        .await
        .map_err(RigError::Command)?;

    let mut chain = SafetyChain::new();
    chain.register("k6221", Arc::clone(&k6221) as Arc<dyn SafeIdle>);

    let thermometer = if form.with_temperature {
        let io: Arc<dyn ScpiTransport> =
            Arc::new(VisaTransport::open(&settings.address("lakeshore")?, timeout)?);
        let lakeshore = Arc::new(Lakeshore::new(io));
        idns.push((
            "lakeshore".to_string(),
            lakeshore.idn().await.map_err(RigError::Command)?,
        ));
        chain.register("lakeshore", Arc::clone(&lakeshore) as Arc<dyn SafeIdle>);
        Some(lakeshore as Arc<dyn TemperatureController>)
    } else {
        None
    };

    Ok(Bench {
        source: k6221,
        thermometer,
        chain,
        idns,
    })
}

pub async fn run(
    settings: &Settings,
    run_form: &RunForm,
    form: &DeltaForm,
    mock: bool,
    abort: crate::run::AbortFlag,
) -> RigResult<RunReport> {
    run_form.validate()?;
    form.validate()?;

    let mut metadata = RunMetadata::new(
        &run_form.sample,
        "delta",
        serde_json::to_value(form).unwrap_or_default(),
    );

    let bench = if mock {
        mock_bench(form)
    } else {
        hardware_bench(settings, form).await?
    };
    for (id, idn) in &bench.idns {
        metadata.record_instrument(id, idn.clone());
    }

    let mut protocol = DeltaProtocol {
        source: bench.source,
        thermometer: bench.thermometer,
    };
    let columns = protocol.columns();
    let mut log = RunLog::create(&settings.output_root, &metadata, &columns)?;

    let mut measurement = MeasurementLoop::new(form.plan(), form.period, abort);
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
