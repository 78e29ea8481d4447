//! Keithley 6517B electrometer driver.
//!
//! Logs small currents over time in the monitoring module. The 6517B
//! appends a unit code to its readings (`+1.234567E-09NADC`), so replies go
//! through the prefixed parser. Safe idle re-engages zero check, which
//! disconnects the input stage.

use crate::instrument::{parse_prefixed_f64, Readable, SafeIdle, ScpiTransport};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

pub struct Keithley6517b {
    io: Arc<dyn ScpiTransport>,
}

impl Keithley6517b {
    pub fn new(io: Arc<dyn ScpiTransport>) -> Self {
        Self { io }
    }

    pub async fn idn(&self) -> Result<String> {
        self.io.query("*IDN?").await.context("6517B identification failed")
    }

    pub async fn initialize(&self) -> Result<()> {
        self.io.command("*RST").await?;
        self.io.command(":SYST:ZCH ON").await?;
        self.io.command(":SENS:FUNC 'CURR'").await?;
        self.io.command(":SENS:CURR:RANG:AUTO ON").await?;
        self.io.command(":SYST:ZCH OFF").await?;
        Ok(())
    }

    pub async fn read_current(&self) -> Result<f64> {
        let reply = self.io.query(":READ?").await.context("6517B read failed")?;
        parse_prefixed_f64(&reply)
    }
}

#[async_trait]
impl Readable for Keithley6517b {
    async fn read(&self) -> Result<f64> {
        self.read_current().await
    }
}

#[async_trait]
impl SafeIdle for Keithley6517b {
    async fn make_safe(&self) -> Result<()> {
        self.io.command(":SYST:ZCH ON").await?;
        Ok(())
    }
}
