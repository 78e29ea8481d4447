//! I-V characterization.
//!
//! Sources a current with a Keithley 2400 and records the sample voltage at
//! every point of the sweep, either from the 2400's own meter or from a
//! 2182 nanovoltmeter. The default sweep is the five-segment hysteresis
//! loop; `--no-hysteresis` style forms give a single linear segment.

use crate::config::Settings;
use crate::error::RigResult;
use crate::instrument::{Readable, SafeIdle, Sourceable};
use crate::metadata::RunMetadata;
use crate::params::{IvForm, RunForm};
use crate::run::shutdown::SafetyChain;
use crate::run::{Acquired, MeasurementLoop, Protocol};
use crate::storage::RunLog;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::{log_report, settle_exit, RunReport};

const COLUMNS: [&str; 4] = [
    "Current (A)",
    "Time (s)",
    "Voltage (V)",
    "Resistance (Ohm)",
];

struct IvProtocol {
    source: Arc<dyn Sourceable>,
    meter: Arc<dyn Readable>,
}

#[async_trait]
impl Protocol for IvProtocol {
    fn columns(&self) -> Vec<&'static str> {
        COLUMNS.to_vec()
    }

    async fn apply(&mut self, level: f64) -> Result<()> {
        self.source.set_level(level).await
    }

    async fn acquire(&mut self, level: f64, _elapsed_s: f64) -> Result<Acquired> {
        let volts = self.meter.read().await?;
        let resistance = if level != 0.0 { volts / level } else { f64::NAN };
        Ok(Acquired::of(vec![volts, resistance]))
    }
}

struct Bench {
    source: Arc<dyn Sourceable>,
    meter: Arc<dyn Readable>,
    chain: SafetyChain,
    idns: Vec<(String, String)>,
}

fn mock_bench() -> Bench {
    use crate::instrument::mock::{MockSource, MockVoltmeter};

    let source = Arc::new(MockSource::new());
    let meter = Arc::new(MockVoltmeter::across(Arc::clone(&source), 1.0e3));

    let mut chain = SafetyChain::new();
    chain.register("k2400", Arc::clone(&source) as Arc<dyn SafeIdle>);
    chain.register("voltmeter", Arc::clone(&meter) as Arc<dyn SafeIdle>);

    Bench {
        source,
        meter,
        chain,
        idns: vec![("k2400".into(), "LABRIG,MOCK 2400,0,1.0".into())],
    }
}

#[cfg(not(feature = "instrument_visa"))]
async fn hardware_bench(_settings: &Settings, _form: &IvForm) -> RigResult<Bench> {
    Err(super::visa_unavailable())
}

#[cfg(feature = "instrument_visa")]
async fn hardware_bench(settings: &Settings, form: &IvForm) -> RigResult<Bench> {
    use crate::error::RigError;
    use crate::instrument::keithley2400::SourceConfig;
    use crate::instrument::visa::VisaTransport;
    use crate::instrument::{Keithley2182, Keithley2400, ScpiTransport};

    let timeout = settings.visa.timeout;
    let io: Arc<dyn ScpiTransport> =
        Arc::new(VisaTransport::open(&settings.address("k2400")?, timeout)?);
    let k2400 = Arc::new(Keithley2400::new(io));

    let range_a = form.start_ua.abs().max(form.stop_ua.abs()).max(1.0) * 1e-6;
    k2400
        .initialize(SourceConfig {
            range_a,
            compliance_v: form.compliance_v,
        })
        .await
        .map_err(RigError::Command)?;

    let mut idns = Vec::new();
    idns.push(("k2400".into(), k2400.idn().await.map_err(RigError::Command)?));

    let mut chain = SafetyChain::new();
    chain.register("k2400", Arc::clone(&k2400) as Arc<dyn SafeIdle>);

    let meter: Arc<dyn Readable> = if form.nanovoltmeter {
        let io: Arc<dyn ScpiTransport> =
            Arc::new(VisaTransport::open(&settings.address("k2182")?, timeout)?);
        let k2182 = Arc::new(Keithley2182::new(io));
        k2182.initialize().await.map_err(RigError::Command)?;
        idns.push(("k2182".into(), k2182.idn().await.map_err(RigError::Command)?));
        chain.register("k2182", Arc::clone(&k2182) as Arc<dyn SafeIdle>);
        k2182
    } else {
        Arc::clone(&k2400) as Arc<dyn Readable>
    };

    Ok(Bench {
        source: k2400,
        meter,
        chain,
        idns,
    })
}

pub async fn run(
    settings: &Settings,
    run_form: &RunForm,
    form: &IvForm,
    mock: bool,
    abort: crate::run::AbortFlag,
) -> RigResult<RunReport> {
    run_form.validate()?;
    form.validate()?;

    let mut metadata = RunMetadata::new(
        &run_form.sample,
        "iv",
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

    let mut log = RunLog::create(&settings.output_root, &metadata, &COLUMNS)?;
    let mut protocol = IvProtocol {
        source: bench.source,
        meter: bench.meter,
    };

    let mut measurement = MeasurementLoop::new(form.plan(), form.settle, abort);
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
    use crate::error::RigError;
    use crate::run::{AbortFlag, RunState, StopReason};
    use std::time::Duration;
    use tempfile::tempdir;

    fn settings(dir: &std::path::Path) -> Settings {
        Settings {
            output_root: dir.to_path_buf(),
            visa: crate::config::VisaSettings {
                timeout: Duration::from_secs(1),
            },
            instruments: Default::default(),
        }
    }

    fn forms() -> (RunForm, IvForm) {
        (
            RunForm {
                sample: "mock_sample".into(),
            },
            IvForm {
                start_ua: 0.0,
                stop_ua: 10.0,
                steps: 3,
                settle: Duration::from_millis(1),
                compliance_v: 210.0,
                hysteresis: false,
                nanovoltmeter: false,
            },
        )
    }

    #[tokio::test]
    async fn mock_sweep_writes_one_row_per_point() {
        let dir = tempdir().unwrap();
        let (run_form, form) = forms();
        let report = run(&settings(dir.path()), &run_form, &form, true, AbortFlag::new())
            .await
            .unwrap();

        assert_eq!(report.status.state, RunState::Completed);
        assert_eq!(report.stop_reason(), Some(StopReason::PlanExhausted));
        assert_eq!(report.rows, 3);

        let text = std::fs::read_to_string(&report.log_path).unwrap();
        assert!(text.contains("Current (A),Time (s),Voltage (V),Resistance (Ohm)"));
        let data_rows = text
            .lines()
            .filter(|l| !l.starts_with('#') && !l.starts_with("Current"))
            .count();
        assert_eq!(data_rows, 3);
    }

    #[tokio::test]
    async fn invalid_form_never_touches_the_bench() {
        let dir = tempdir().unwrap();
        let (run_form, mut form) = forms();
        form.steps = 1;
        let err = run(&settings(dir.path()), &run_form, &form, true, AbortFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RigError::Configuration(_)));
        // no run log was created either
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
