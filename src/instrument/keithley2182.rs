//! Keithley 2182/2182A nanovoltmeter driver.
//!
//! Reads the sample voltage in the I-V and R-T modules when the SourceMeter's
//! own voltmeter is not sensitive enough.

use crate::instrument::{parse_f64_response, Readable, SafeIdle, ScpiTransport};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

pub struct Keithley2182 {
    io: Arc<dyn ScpiTransport>,
}

impl Keithley2182 {
    pub fn new(io: Arc<dyn ScpiTransport>) -> Self {
        Self { io }
    }

    pub async fn idn(&self) -> Result<String> {
        self.io.query("*IDN?").await.context("2182 identification failed")
    }

    pub async fn initialize(&self) -> Result<()> {
        self.io.command("*RST; STAT:PRES; *CLS").await?;
        self.io.command(":SENS:FUNC 'VOLT'").await?;
        self.io.command(":SENS:CHAN 1").await?;
        Ok(())
    }

    /// Latest reading without waiting for a fresh trigger cycle.
    pub async fn read_fresh(&self) -> Result<f64> {
        let reply = self
            .io
            .query(":SENS:DATA:FRESH?")
            .await
            .context("2182 fresh read failed")?;
        parse_f64_response(&reply)
    }

    /// Average of `count` triggered readings.
    pub async fn read_average(&self, count: usize) -> Result<f64> {
        self.io
            .command(&format!(":SAMP:COUN {count}"))
            .await
            .context("2182 sample count failed")?;
        let reply = self.io.query(":READ?").await.context("2182 read failed")?;
        let values = reply
            .split(',')
            .map(parse_f64_response)
            .collect::<Result<Vec<_>>>()?;
        if values.is_empty() {
            return Err(anyhow!("2182 returned no readings"));
        }
        Ok(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[async_trait]
impl Readable for Keithley2182 {
    async fn read(&self) -> Result<f64> {
        self.read_fresh().await
    }
}

#[async_trait]
impl SafeIdle for Keithley2182 {
    async fn make_safe(&self) -> Result<()> {
        // nothing energized on a voltmeter; leave it reset and clear
        self.io.command("*RST; STAT:PRES; *CLS").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::mock::MockTransport;

    #[tokio::test]
    async fn averages_triggered_readings() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(":READ?", "1.0E-3,3.0E-3");
        let driver = Keithley2182::new(transport);
        assert_eq!(driver.read_average(2).await.unwrap(), 2.0e-3);
    }

    #[tokio::test]
    async fn malformed_reply_is_an_error() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(":SENS:DATA:FRESH?", "garbled");
        let driver = Keithley2182::new(transport);
        assert!(driver.read_fresh().await.is_err());
    }
}
