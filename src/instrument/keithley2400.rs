//! Keithley 2400 SourceMeter driver.
//!
//! Used as the current source of the I-V and R-T modules: sources a current,
//! measures the voltage across the device, enforces a compliance voltage.
//! Safe idle ramps the source to zero and opens the output.

use crate::instrument::{parse_f64_response, Readable, SafeIdle, ScpiTransport, Sourceable};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Fixed source configuration applied during initialization.
#[derive(Clone, Copy, Debug)]
pub struct SourceConfig {
    /// Source range in amps.
    pub range_a: f64,
    /// Compliance (protection) voltage in volts.
    pub compliance_v: f64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        // 1 mA range, 210 V compliance: the bench defaults for thin-film
        // transport samples.
        Self {
            range_a: 1e-3,
            compliance_v: 210.0,
        }
    }
}

pub struct Keithley2400 {
    io: Arc<dyn ScpiTransport>,
}

impl Keithley2400 {
    pub fn new(io: Arc<dyn ScpiTransport>) -> Self {
        Self { io }
    }

    pub async fn idn(&self) -> Result<String> {
        self.io.query("*IDN?").await.context("2400 identification failed")
    }

    /// Fixed initialization sequence: reset, source current / sense voltage,
    /// range and compliance, output enabled at zero. Any command error aborts
    /// initialization.
    pub async fn initialize(&self, config: SourceConfig) -> Result<()> {
        self.io.command("*RST").await?;
        self.io.command(":SOUR:FUNC CURR").await?;
        self.io
            .command(&format!(":SOUR:CURR:RANG {:.6E}", config.range_a))
            .await?;
        self.io.command(":SENS:FUNC 'VOLT'").await?;
        self.io
            .command(&format!(":SENS:VOLT:PROT {:.6E}", config.compliance_v))
            .await?;
        self.io.command(":FORM:ELEM VOLT").await?;
        self.io.command(":SOUR:CURR 0").await?;
        self.io.command(":OUTP ON").await?;
        Ok(())
    }

    pub async fn set_current(&self, amps: f64) -> Result<()> {
        self.io
            .command(&format!(":SOUR:CURR {amps:.6E}"))
            .await
            .context("2400 set current failed")
    }

    pub async fn read_voltage(&self) -> Result<f64> {
        let reply = self.io.query(":READ?").await.context("2400 read failed")?;
        parse_f64_response(&reply)
    }
}

#[async_trait]
impl Sourceable for Keithley2400 {
    async fn set_level(&self, level: f64) -> Result<()> {
        self.set_current(level).await
    }

    async fn output_on(&self) -> Result<()> {
        self.io.command(":OUTP ON").await
    }

    async fn output_off(&self) -> Result<()> {
        self.io.command(":OUTP OFF").await
    }
}

#[async_trait]
impl Readable for Keithley2400 {
    async fn read(&self) -> Result<f64> {
        self.read_voltage().await
    }
}

#[async_trait]
impl SafeIdle for Keithley2400 {
    async fn make_safe(&self) -> Result<()> {
        self.io.command(":SOUR:CURR 0").await?;
        self.io.command(":OUTP OFF").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::mock::MockTransport;

    #[tokio::test]
    async fn initialization_sequence_is_fixed() {
        let transport = Arc::new(MockTransport::new());
        let driver = Keithley2400::new(transport.clone());
        driver.initialize(SourceConfig::default()).await.unwrap();

        let journal = transport.journal();
        assert_eq!(journal[0], "*RST");
        assert_eq!(journal[1], ":SOUR:FUNC CURR");
        assert!(journal.last().unwrap().starts_with(":OUTP ON"));
        assert!(journal.iter().any(|c| c.starts_with(":SENS:VOLT:PROT 2.1")));
    }

    #[tokio::test]
    async fn read_parses_voltage() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(":READ?", "+4.213000E-02");
        let driver = Keithley2400::new(transport);
        assert_eq!(driver.read_voltage().await.unwrap(), 4.213e-2);
    }

    #[tokio::test]
    async fn safe_idle_zeroes_then_opens_output() {
        let transport = Arc::new(MockTransport::new());
        let driver = Keithley2400::new(transport.clone());
        driver.make_safe().await.unwrap();
        assert_eq!(transport.journal(), vec![":SOUR:CURR 0", ":OUTP OFF"]);
    }
}
