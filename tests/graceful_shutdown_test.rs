//! Shutdown handler guarantees: idempotence, collect-all error handling,
//! and de-energization after a mid-run fault.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use labrig::instrument::mock::{MockSource, MockTempController, MockVoltmeter};
use labrig::instrument::{SafeIdle, Sourceable, TemperatureController};
use labrig::metadata::RunMetadata;
use labrig::run::shutdown::SafetyChain;
use labrig::run::{Acquired, MeasurementLoop, Protocol};
use labrig::storage::RunLog;
use labrig::{AbortFlag, RigError, RunState, SweepPlan};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

#[tokio::test]
async fn calling_the_chain_twice_issues_no_extra_hardware_commands() {
    let source = Arc::new(MockSource::new());
    let controller = Arc::new(MockTempController::starting_at(300.0));

    let mut chain = SafetyChain::new();
    chain.register("source", Arc::clone(&source) as Arc<dyn SafeIdle>);
    chain.register("controller", Arc::clone(&controller) as Arc<dyn SafeIdle>);

    chain.make_safe_all().await.unwrap();
    let source_commands = source.safe_idle_commands();
    let heater_commands = controller.heater_commands();

    // idempotent: the second call is a no-op and not an error
    chain.make_safe_all().await.unwrap();
    assert_eq!(source.safe_idle_commands(), source_commands);
    assert_eq!(controller.heater_commands(), heater_commands);
}

#[tokio::test]
async fn a_failing_instrument_does_not_leave_the_heater_energized() {
    let stuck = Arc::new(MockSource::failing_on_safe_idle());
    let controller = Arc::new(MockTempController::starting_at(300.0));
    controller.set_heater_range(4).await.unwrap();

    let mut chain = SafetyChain::new();
    chain.register("source", Arc::clone(&stuck) as Arc<dyn SafeIdle>);
    chain.register("controller", Arc::clone(&controller) as Arc<dyn SafeIdle>);

    let err = chain.make_safe_all().await.unwrap_err();
    match err {
        RigError::ShutdownFailed(errors) => assert_eq!(errors.len(), 1),
        other => panic!("expected ShutdownFailed, got {other:?}"),
    }
    assert_eq!(controller.heater_range().await, 0);
}

/// Protocol whose reads fail after a set number of iterations, driving the
/// loop into the fault path while real mock instruments are energized.
struct FragileProtocol {
    source: Arc<MockSource>,
    meter: Arc<MockVoltmeter>,
    reads_before_fault: usize,
    reads: usize,
}

#[async_trait]
impl Protocol for FragileProtocol {
    fn columns(&self) -> Vec<&'static str> {
        vec!["Current (A)", "Time (s)", "Voltage (V)"]
    }

    async fn apply(&mut self, level: f64) -> Result<()> {
        self.source.set_level(level).await
    }

    async fn acquire(&mut self, _level: f64, _elapsed_s: f64) -> Result<Acquired> {
        if self.reads == self.reads_before_fault {
            return Err(anyhow!("bus dropped"));
        }
        self.reads += 1;
        use labrig::instrument::Readable;
        Ok(Acquired::of(vec![self.meter.read().await?]))
    }
}

#[tokio::test]
async fn fault_path_still_ends_with_every_instrument_safe() {
    let dir = tempdir().unwrap();
    let metadata = RunMetadata::new("fault_test", "test", serde_json::json!({}));
    let mut log = RunLog::create(
        dir.path(),
        &metadata,
        &["Current (A)", "Time (s)", "Voltage (V)"],
    )
    .unwrap();

    let source = Arc::new(MockSource::new());
    let meter = Arc::new(MockVoltmeter::across(Arc::clone(&source), 1.0e3));
    source.output_on().await.unwrap();

    let mut chain = SafetyChain::new();
    chain.register("source", Arc::clone(&source) as Arc<dyn SafeIdle>);
    chain.register("meter", Arc::clone(&meter) as Arc<dyn SafeIdle>);

    let mut protocol = FragileProtocol {
        source: Arc::clone(&source),
        meter,
        reads_before_fault: 2,
        reads: 0,
    };

    let mut measurement = MeasurementLoop::new(
        SweepPlan::linear(0.0, 10e-6, 5),
        Duration::from_millis(1),
        AbortFlag::new(),
    );
    let run_result = measurement.run(&mut protocol, &mut log).await;
    assert!(run_result.is_err());
    assert_eq!(measurement.status().state, RunState::Faulted);
    assert_eq!(log.rows(), 2);

    // the shutdown handler itself must not throw
    chain.make_safe_all().await.unwrap();
    assert!(!source.output_enabled().await);
    assert_eq!(source.level().await, 0.0);
}
