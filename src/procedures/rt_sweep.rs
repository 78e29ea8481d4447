//! Resistance vs temperature with active temperature control.
//!
//! The Lakeshore ramps toward its setpoint while a Keithley 2400 sources a
//! fixed excitation current and a 2182 reads the sample voltage every poll
//! period. The run ends when the sample temperature crosses the configured
//! cutoff; the heater is turned off on every exit path, including faults.

use crate::config::Settings;
use crate::error::RigResult;
use crate::instrument::{Readable, SafeIdle, Sourceable, TemperatureController};
use crate::metadata::RunMetadata;
use crate::params::{RtForm, RunForm};
use crate::run::shutdown::SafetyChain;
use crate::run::{Acquired, MeasurementLoop, Protocol, StopReason};
use crate::record::SampleRecord;
use crate::storage::RunLog;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::{log_report, settle_exit, RunReport};

const COLUMNS: [&str; 4] = [
    "Current (A)",
    "Time (s)",
    "Temperature (K)",
    "Voltage (V)",
];

struct RtProtocol {
    source: Arc<dyn Sourceable>,
    meter: Arc<dyn Readable>,
    controller: Arc<dyn TemperatureController>,
    cutoff_k: f64,
}

#[async_trait]
impl Protocol for RtProtocol {
    fn columns(&self) -> Vec<&'static str> {
        COLUMNS.to_vec()
    }

    async fn apply(&mut self, level: f64) -> Result<()> {
        self.source.set_level(level).await
    }

    async fn acquire(&mut self, _level: f64, _elapsed_s: f64) -> Result<Acquired> {
        let volts = self.meter.read().await?;
        let kelvin = self.controller.read_kelvin().await?;
        Ok(Acquired::of(vec![kelvin, volts]))
    }

    fn check_stop(&self, record: &SampleRecord) -> Option<StopReason> {
        let kelvin = *record.readings.first()?;
        if kelvin > self.cutoff_k {
            tracing::info!(kelvin, cutoff = self.cutoff_k, "cutoff crossed; stopping");
            Some(StopReason::ThresholdCrossed)
        } else {
            None
        }
    }
}

struct Bench {
    source: Arc<dyn Sourceable>,
    meter: Arc<dyn Readable>,
    controller: Arc<dyn TemperatureController>,
    chain: SafetyChain,
    idns: Vec<(String, String)>,
}

fn mock_bench() -> Bench {
    use crate::instrument::mock::{MockSource, MockTempController, MockVoltmeter};

    let source = Arc::new(MockSource::new());
    let meter = Arc::new(MockVoltmeter::across(Arc::clone(&source), 1.0e3));
    let controller = Arc::new(MockTempController::starting_at(295.0).with_step(5.0));

    // sources first, heater last
    let mut chain = SafetyChain::new();
    chain.register("k2400", Arc::clone(&source) as Arc<dyn SafeIdle>);
    chain.register("k2182", Arc::clone(&meter) as Arc<dyn SafeIdle>);
    chain.register("lakeshore", Arc::clone(&controller) as Arc<dyn SafeIdle>);

    Bench {
        source,
        meter,
        controller,
        chain,
        idns: vec![("lakeshore".into(), "LABRIG,MOCK 350,0,1.0".into())],
    }
}

#[cfg(not(feature = "instrument_visa"))]
async fn hardware_bench(_settings: &Settings, _form: &RtForm) -> RigResult<Bench> {
    Err(super::visa_unavailable())
}

#[cfg(feature = "instrument_visa")]
async fn hardware_bench(settings: &Settings, form: &RtForm) -> RigResult<Bench> {
    use crate::error::RigError;
    use crate::instrument::keithley2400::SourceConfig;
    use crate::instrument::visa::VisaTransport;
    use crate::instrument::{Keithley2182, Keithley2400, Lakeshore, ScpiTransport};

    let timeout = settings.visa.timeout;

    let io: Arc<dyn ScpiTransport> =
        Arc::new(VisaTransport::open(&settings.address("k2400")?, timeout)?);
    let k2400 = Arc::new(Keithley2400::new(io));
    k2400
        .initialize(SourceConfig {
            range_a: (form.current_ma * 1e-3).abs().max(1e-6),
            compliance_v: form.compliance_v,
        })
        .await
        .map_err(RigError::Command)?;

    let io: Arc<dyn ScpiTransport> =
        Arc::new(VisaTransport::open(&settings.address("k2182")?, timeout)?);
    let k2182 = Arc::new(Keithley2182::new(io));
    k2182.initialize().await.map_err(RigError::Command)?;

    let io: Arc<dyn ScpiTransport> =
        Arc::new(VisaTransport::open(&settings.address("lakeshore")?, timeout)?);
    let lakeshore = Arc::new(Lakeshore::new(io));
    lakeshore.initialize().await.map_err(RigError::Command)?;
    lakeshore
        .set_ramp(form.ramp_k_per_min)
        .await
        .map_err(RigError::Command)?;
    lakeshore
        .set_setpoint(form.setpoint_k)
        .await
        .map_err(RigError::Command)?;
    lakeshore
        .set_heater_range(form.heater_range)
        .await
        .map_err(RigError::Command)?;

    let mut idns = Vec::new();
    idns.push(("k2400".into(), k2400.idn().await.map_err(RigError::Command)?));
    idns.push(("k2182".into(), k2182.idn().await.map_err(RigError::Command)?));
    idns.push((
        "lakeshore".into(),
        lakeshore.idn().await.map_err(RigError::Command)?,
    ));

    let mut chain = SafetyChain::new();
    chain.register("k2400", Arc::clone(&k2400) as Arc<dyn SafeIdle>);
    chain.register("k2182", Arc::clone(&k2182) as Arc<dyn SafeIdle>);
    chain.register("lakeshore", Arc::clone(&lakeshore) as Arc<dyn SafeIdle>);

    Ok(Bench {
        source: k2400,
        meter: k2182,
        controller: lakeshore,
        chain,
        idns,
    })
}

pub async fn run(
    settings: &Settings,
    run_form: &RunForm,
    form: &RtForm,
    mock: bool,
    abort: crate::run::AbortFlag,
) -> RigResult<RunReport> {
    run_form.validate()?;
    form.validate()?;

    let mut metadata = RunMetadata::new(
        &run_form.sample,
        "rt",
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

    // mock bench still honors the form's control settings so a dry run
    // exercises the same call sequence as hardware
    if mock {
        use crate::error::RigError;
        bench
            .controller
            .set_ramp(form.ramp_k_per_min)
            .await
            .map_err(RigError::Command)?;
        bench
            .controller
            .set_setpoint(form.setpoint_k)
            .await
            .map_err(RigError::Command)?;
        bench
            .controller
            .set_heater_range(form.heater_range)
            .await
            .map_err(RigError::Command)?;
    }

    let mut log = RunLog::create(&settings.output_root, &metadata, &COLUMNS)?;
    let mut protocol = RtProtocol {
        source: bench.source,
        meter: bench.meter,
        controller: Arc::clone(&bench.controller),
        cutoff_k: form.cutoff_k,
    };

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
