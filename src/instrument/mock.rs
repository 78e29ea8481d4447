//! Mock instruments.
//!
//! Two layers of simulation, mirroring the two seams drivers are written
//! against:
//!
//! - [`MockTransport`] answers SCPI queries from a scripted response table
//!   and journals every command, so driver tests can assert on the exact
//!   wire traffic without hardware.
//! - Capability-level mocks ([`MockSource`], [`MockVoltmeter`],
//!   [`MockTempController`], ...) simulate whole bench roles with plausible
//!   physics (an ohmic device, a controller ramping toward its setpoint) so
//!   `--mock` runs and the integration tests produce meaningful data.

use crate::instrument::{
    DeltaSource, LcrMeter, Readable, SafeIdle, ScpiTransport, Sourceable, TemperatureController,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::RwLock;

// =============================================================================
// MockTransport - scripted SCPI endpoint
// =============================================================================

/// Scripted SCPI endpoint.
///
/// Queries are answered by the longest matching registered prefix; a query
/// with no match is an error, which is exactly the malformed-reply path the
/// loop treats as fatal. `fail_after` injects a communication fault at a
/// chosen point in the run.
pub struct MockTransport {
    responses: Mutex<HashMap<String, String>>,
    journal: Mutex<Vec<String>>,
    io_budget: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            journal: Mutex::new(Vec::new()),
            io_budget: AtomicUsize::new(usize::MAX),
        }
    }

    /// Register a sticky reply for queries starting with `prefix`.
    pub fn respond(&self, prefix: &str, reply: &str) {
        if let Ok(mut map) = self.responses.lock() {
            map.insert(prefix.to_string(), reply.to_string());
        }
    }

    /// Every command or query after the first `n` fails, simulating a bus
    /// drop mid-run.
    pub fn fail_after(&self, n: usize) {
        self.io_budget.store(n, Ordering::SeqCst);
    }

    /// Everything written to the instrument, in order.
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().map(|j| j.clone()).unwrap_or_default()
    }

    pub fn commands_sent(&self) -> usize {
        self.journal.lock().map(|j| j.len()).unwrap_or(0)
    }

    fn record(&self, command: &str) -> Result<()> {
        let remaining = self.io_budget.load(Ordering::SeqCst);
        if remaining == 0 {
            return Err(anyhow!("simulated bus failure on '{command}'"));
        }
        if remaining != usize::MAX {
            self.io_budget.store(remaining - 1, Ordering::SeqCst);
        }
        if let Ok(mut journal) = self.journal.lock() {
            journal.push(command.to_string());
        }
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScpiTransport for MockTransport {
    async fn query(&self, command: &str) -> Result<String> {
        self.record(command)?;
        let responses = self
            .responses
            .lock()
            .map_err(|_| anyhow!("mock response table poisoned"))?;
        responses
            .iter()
            .filter(|(prefix, _)| command.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, reply)| reply.clone())
            .ok_or_else(|| anyhow!("no scripted reply for query '{command}'"))
    }

    async fn command(&self, command: &str) -> Result<()> {
        self.record(command)
    }
}

// =============================================================================
// Capability-level mocks
// =============================================================================

/// Simulated stimulus source. Tracks its level and output state and journals
/// the safe-idle sequence so shutdown tests can count hardware commands.
pub struct MockSource {
    level: RwLock<f64>,
    output: RwLock<bool>,
    safe_idle_commands: AtomicUsize,
    fail_safe_idle: bool,
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            level: RwLock::new(0.0),
            output: RwLock::new(false),
            safe_idle_commands: AtomicUsize::new(0),
            fail_safe_idle: false,
        }
    }

    /// A source whose safe-idle sequence itself errors, for exercising the
    /// collect-all shutdown path.
    pub fn failing_on_safe_idle() -> Self {
        Self {
            fail_safe_idle: true,
            ..Self::new()
        }
    }

    pub async fn level(&self) -> f64 {
        *self.level.read().await
    }

    pub async fn output_enabled(&self) -> bool {
        *self.output.read().await
    }

    /// Number of hardware commands the safe-idle path has issued.
    pub fn safe_idle_commands(&self) -> usize {
        self.safe_idle_commands.load(Ordering::SeqCst)
    }
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sourceable for MockSource {
    async fn set_level(&self, level: f64) -> Result<()> {
        *self.level.write().await = level;
        Ok(())
    }

    async fn output_on(&self) -> Result<()> {
        *self.output.write().await = true;
        Ok(())
    }

    async fn output_off(&self) -> Result<()> {
        *self.output.write().await = false;
        Ok(())
    }
}

#[async_trait]
impl SafeIdle for MockSource {
    async fn make_safe(&self) -> Result<()> {
        // zero then output off, like the hardware drivers
        self.safe_idle_commands.fetch_add(2, Ordering::SeqCst);
        if self.fail_safe_idle {
            return Err(anyhow!("simulated stuck output relay"));
        }
        *self.level.write().await = 0.0;
        *self.output.write().await = false;
        Ok(())
    }
}

/// Simulated voltmeter across an ohmic device: reads back `I * R` plus a
/// little noise, where `I` is whatever the paired [`MockSource`] last set.
pub struct MockVoltmeter {
    source: std::sync::Arc<MockSource>,
    resistance_ohm: f64,
    noise_v: f64,
}

impl MockVoltmeter {
    pub fn across(source: std::sync::Arc<MockSource>, resistance_ohm: f64) -> Self {
        Self {
            source,
            resistance_ohm,
            noise_v: 1e-6,
        }
    }
}

#[async_trait]
impl Readable for MockVoltmeter {
    async fn read(&self) -> Result<f64> {
        let current = self.source.level().await;
        let noise = rand::thread_rng().gen_range(-self.noise_v..=self.noise_v);
        Ok(current * self.resistance_ohm + noise)
    }
}

#[async_trait]
impl SafeIdle for MockVoltmeter {
    async fn make_safe(&self) -> Result<()> {
        // nothing energized on a voltmeter
        Ok(())
    }
}

/// Simulated temperature controller that moves a fixed increment toward the
/// setpoint on every poll, so ramp-to-cutoff runs terminate quickly in tests.
pub struct MockTempController {
    kelvin: RwLock<f64>,
    setpoint: RwLock<f64>,
    heater_range: RwLock<u8>,
    kelvin_per_poll: f64,
    heater_commands: AtomicUsize,
}

impl MockTempController {
    pub fn starting_at(kelvin: f64) -> Self {
        Self {
            kelvin: RwLock::new(kelvin),
            setpoint: RwLock::new(kelvin),
            heater_range: RwLock::new(0),
            kelvin_per_poll: 1.0,
            heater_commands: AtomicUsize::new(0),
        }
    }

    pub fn with_step(mut self, kelvin_per_poll: f64) -> Self {
        self.kelvin_per_poll = kelvin_per_poll;
        self
    }

    pub async fn heater_range(&self) -> u8 {
        *self.heater_range.read().await
    }

    pub fn heater_commands(&self) -> usize {
        self.heater_commands.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TemperatureController for MockTempController {
    async fn set_ramp(&self, _kelvin_per_min: f64) -> Result<()> {
        Ok(())
    }

    async fn set_setpoint(&self, kelvin: f64) -> Result<()> {
        *self.setpoint.write().await = kelvin;
        Ok(())
    }

    async fn set_heater_range(&self, range: u8) -> Result<()> {
        self.heater_commands.fetch_add(1, Ordering::SeqCst);
        *self.heater_range.write().await = range;
        Ok(())
    }

    async fn read_kelvin(&self) -> Result<f64> {
        let setpoint = *self.setpoint.read().await;
        let mut kelvin = self.kelvin.write().await;
        if *self.heater_range.read().await > 0 {
            let delta = (setpoint - *kelvin).clamp(-self.kelvin_per_poll, self.kelvin_per_poll);
            *kelvin += delta;
        }
        Ok(*kelvin)
    }
}

#[async_trait]
impl SafeIdle for MockTempController {
    async fn make_safe(&self) -> Result<()> {
        self.heater_commands.fetch_add(1, Ordering::SeqCst);
        *self.heater_range.write().await = 0;
        Ok(())
    }
}

/// Simulated delta-mode pair at fixed reversal current.
pub struct MockDeltaSource {
    current_a: f64,
    resistance_ohm: f64,
}

impl MockDeltaSource {
    pub fn new(current_a: f64, resistance_ohm: f64) -> Self {
        Self {
            current_a,
            resistance_ohm,
        }
    }
}

#[async_trait]
impl DeltaSource for MockDeltaSource {
    async fn read_fresh(&self) -> Result<(f64, f64)> {
        let noise = rand::thread_rng().gen_range(-1e-9..=1e-9);
        let voltage = self.current_a * self.resistance_ohm + noise;
        Ok((voltage, self.resistance_ohm))
    }
}

#[async_trait]
impl SafeIdle for MockDeltaSource {
    async fn make_safe(&self) -> Result<()> {
        Ok(())
    }
}

/// Simulated LCR meter with a bias-dependent capacitance, so C-V sweeps show
/// structure instead of a flat line.
pub struct MockLcrMeter {
    bias: RwLock<f64>,
    zero_bias_f: f64,
}

impl MockLcrMeter {
    pub fn new(zero_bias_f: f64) -> Self {
        Self {
            bias: RwLock::new(0.0),
            zero_bias_f,
        }
    }
}

#[async_trait]
impl LcrMeter for MockLcrMeter {
    async fn set_bias(&self, volts: f64) -> Result<()> {
        *self.bias.write().await = volts;
        Ok(())
    }

    async fn read_cp(&self) -> Result<f64> {
        let bias = *self.bias.read().await;
        // depletion-like roll-off away from zero bias
        Ok(self.zero_bias_f / (1.0 + 0.05 * bias * bias))
    }
}

#[async_trait]
impl SafeIdle for MockLcrMeter {
    async fn make_safe(&self) -> Result<()> {
        *self.bias.write().await = 0.0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn scripted_replies_match_longest_prefix() {
        let transport = MockTransport::new();
        transport.respond("*IDN?", "LABRIG,MOCK,0,1.0");
        transport.respond(":READ?", "1.5E-3");

        assert_eq!(transport.query("*IDN?").await.unwrap(), "LABRIG,MOCK,0,1.0");
        assert_eq!(transport.query(":READ?").await.unwrap(), "1.5E-3");
        assert!(transport.query(":UNKNOWN?").await.is_err());
        assert_eq!(transport.journal().len(), 3);
    }

    #[tokio::test]
    async fn fail_after_cuts_the_bus() {
        let transport = MockTransport::new();
        transport.respond("Q", "1");
        transport.fail_after(2);
        assert!(transport.query("Q1").await.is_ok());
        assert!(transport.command("C1").await.is_ok());
        assert!(transport.query("Q2").await.is_err());
    }

    #[tokio::test]
    async fn ohmic_voltmeter_follows_the_source() {
        let source = Arc::new(MockSource::new());
        let meter = MockVoltmeter::across(Arc::clone(&source), 1000.0);
        source.set_level(1e-3).await.unwrap();
        let volts = meter.read().await.unwrap();
        assert!((volts - 1.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn temp_controller_ramps_toward_setpoint_only_when_heating() {
        let controller = MockTempController::starting_at(300.0).with_step(2.0);
        controller.set_setpoint(305.0).await.unwrap();

        // heater off: no movement
        assert_eq!(controller.read_kelvin().await.unwrap(), 300.0);

        controller.set_heater_range(3).await.unwrap();
        assert_eq!(controller.read_kelvin().await.unwrap(), 302.0);
        assert_eq!(controller.read_kelvin().await.unwrap(), 304.0);
        assert_eq!(controller.read_kelvin().await.unwrap(), 305.0);
    }
}
