//! Instrument sessions.
//!
//! Drivers are written against two seams:
//!
//! - [`ScpiTransport`] abstracts the wire (VISA hardware or a scripted mock),
//!   so every driver and every test runs over the same code path.
//! - Small capability traits ([`Sourceable`], [`Readable`],
//!   [`TemperatureController`], [`SafeIdle`]) let the measurement loop and
//!   procedures work with whatever instrument fills a role, instead of a
//!   concrete model.
//!
//! All calls are awaited to completion in program order with no retry: a
//! single communication failure aborts the run.

use anyhow::{Context, Result};
use async_trait::async_trait;

pub mod keithley2182;
pub mod keithley2400;
pub mod keithley6221;
pub mod keithley6517b;
pub mod keysight_e4980a;
pub mod lakeshore;
pub mod mock;
#[cfg(feature = "instrument_visa")]
pub mod visa;

pub use keithley2182::Keithley2182;
pub use keithley2400::Keithley2400;
pub use keithley6221::Keithley6221;
pub use keithley6517b::Keithley6517b;
pub use keysight_e4980a::KeysightE4980a;
pub use lakeshore::Lakeshore;

/// Trait for SCPI communication transports.
#[async_trait]
pub trait ScpiTransport: Send + Sync {
    /// Send a query and return the instrument's reply, trimmed.
    async fn query(&self, command: &str) -> Result<String>;

    /// Send a command without expecting a response.
    async fn command(&self, command: &str) -> Result<()>;
}

/// Capability: stimulus source (current source, voltage source, DC bias).
///
/// Levels are in the instrument's native unit for the configured function.
#[async_trait]
pub trait Sourceable: Send + Sync {
    async fn set_level(&self, level: f64) -> Result<()>;
    async fn output_on(&self) -> Result<()>;
    async fn output_off(&self) -> Result<()>;
}

/// Capability: scalar readout (voltmeter, electrometer, power meter).
#[async_trait]
pub trait Readable: Send + Sync {
    async fn read(&self) -> Result<f64>;
}

/// Capability: closed-loop temperature control.
#[async_trait]
pub trait TemperatureController: Send + Sync {
    /// Ramp rate in K/min for the control loop.
    async fn set_ramp(&self, kelvin_per_min: f64) -> Result<()>;
    async fn set_setpoint(&self, kelvin: f64) -> Result<()>;
    /// Heater output range; 0 turns the heater off.
    async fn set_heater_range(&self, range: u8) -> Result<()>;
    async fn read_kelvin(&self) -> Result<f64>;
}

/// Capability: delta-mode reversal measurement (Keithley 6221 + 2182 pair).
#[async_trait]
pub trait DeltaSource: Send + Sync {
    /// Latest reading as `(voltage, instrument resistance)`.
    async fn read_fresh(&self) -> Result<(f64, f64)>;
}

/// Capability: LCR bias sweep.
#[async_trait]
pub trait LcrMeter: Send + Sync {
    async fn set_bias(&self, volts: f64) -> Result<()>;
    /// Trigger one measurement and return the primary parameter (Cp).
    async fn read_cp(&self) -> Result<f64>;
}

/// Every session ends through this: restore the instrument to a
/// de-energized state. Implementations issue their fixed safe-idle sequence
/// unconditionally; idempotence across a whole run is enforced by
/// [`crate::run::shutdown::SafetyChain`].
#[async_trait]
pub trait SafeIdle: Send + Sync {
    async fn make_safe(&self) -> Result<()>;
}

/// Parse a plain floating-point SCPI reply.
pub fn parse_f64_response(response: &str) -> Result<f64> {
    response
        .trim()
        .parse::<f64>()
        .with_context(|| format!("failed to parse reply as a number: '{response}'"))
}

/// Parse a two-field reply such as the 6221 delta-mode `"voltage,resistance"`.
pub fn parse_pair_response(response: &str) -> Result<(f64, f64)> {
    let mut fields = response.trim().split(',');
    let first = fields
        .next()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .with_context(|| format!("empty reply where a pair was expected: '{response}'"))?;
    let second = fields
        .next()
        .map(str::trim)
        .with_context(|| format!("reply has no second field: '{response}'"))?;
    Ok((
        first
            .parse::<f64>()
            .with_context(|| format!("bad first field in '{response}'"))?,
        second
            .parse::<f64>()
            .with_context(|| format!("bad second field in '{response}'"))?,
    ))
}

/// Parse a reply whose number carries a trailing unit code, as the 6517B
/// emits (`"+1.234567E-09NADC"`). Takes the longest leading slice that still
/// parses as a float.
pub fn parse_prefixed_f64(response: &str) -> Result<f64> {
    let trimmed = response.trim();
    let end = trimmed
        .char_indices()
        .find(|(i, c)| !matches!(c, '+' | '-' | '.' | '0'..='9') && !is_exponent_char(trimmed, *i))
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());
    trimmed[..end]
        .parse::<f64>()
        .with_context(|| format!("failed to parse numeric prefix of '{response}'"))
}

fn is_exponent_char(s: &str, index: usize) -> bool {
    let bytes = s.as_bytes();
    match bytes[index] {
        b'e' | b'E' => true,
        // sign directly after an exponent marker
        b'+' | b'-' => index > 0 && matches!(bytes[index - 1], b'e' | b'E'),
        _ => false,
    }
}
