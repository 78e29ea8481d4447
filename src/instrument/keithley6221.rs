//! Keithley 6221 current source driver.
//!
//! Drives the delta-mode modules together with a 2182 on its RS-232 link:
//! the 6221 reverses the current and reports averaged `voltage,resistance`
//! pairs. Safe idle aborts the sweep and clears the output.

use crate::instrument::{parse_pair_response, DeltaSource, SafeIdle, ScpiTransport};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Delay between arming the delta sequence and initiating it; the 6221
/// needs a moment to negotiate with the 2182.
const ARM_SETTLE: Duration = Duration::from_secs(1);

pub struct Keithley6221 {
    io: Arc<dyn ScpiTransport>,
}

impl Keithley6221 {
    pub fn new(io: Arc<dyn ScpiTransport>) -> Self {
        Self { io }
    }

    pub async fn idn(&self) -> Result<String> {
        self.io.query("*IDN?").await.context("6221 identification failed")
    }

    /// Fixed delta-mode bring-up: reset, compliance, delta high current,
    /// arm, then initiate. After this returns the pair is free-running and
    /// `read_fresh` polls it.
    pub async fn initialize_delta(&self, high_a: f64, compliance_v: f64) -> Result<()> {
        self.io.command("*RST; STAT:PRES; *CLS").await?;
        self.io
            .command(&format!("CURR:COMP {compliance_v:.6E}"))
            .await?;
        self.io.command("UNIT V").await?;
        self.io
            .command(&format!("SOUR:DELT:HIGH {high_a:.6E}"))
            .await?;
        self.io.command("SOUR:DELT:ARM").await?;
        tokio::time::sleep(ARM_SETTLE).await;
        self.io.command("INIT:IMM").await?;
        Ok(())
    }
}

#[async_trait]
impl DeltaSource for Keithley6221 {
    async fn read_fresh(&self) -> Result<(f64, f64)> {
        let reply = self
            .io
            .query("SENS:DATA:FRESH?")
            .await
            .context("6221 fresh read failed")?;
        parse_pair_response(&reply)
    }
}

#[async_trait]
impl SafeIdle for Keithley6221 {
    async fn make_safe(&self) -> Result<()> {
        self.io.command("SOUR:SWE:ABOR").await?;
        self.io.command("SOUR:CLE:IMM").await?;
        self.io.command("*CLS").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::mock::MockTransport;

    #[tokio::test]
    async fn delta_bringup_arms_before_initiating() {
        let transport = Arc::new(MockTransport::new());
        let driver = Keithley6221::new(transport.clone());
        driver.initialize_delta(1e-6, 50.0).await.unwrap();

        let journal = transport.journal();
        let arm = journal.iter().position(|c| c == "SOUR:DELT:ARM").unwrap();
        let init = journal.iter().position(|c| c == "INIT:IMM").unwrap();
        assert!(arm < init);
        assert!(journal.iter().any(|c| c.starts_with("SOUR:DELT:HIGH 1.0")));
    }

    #[tokio::test]
    async fn fresh_reading_is_a_voltage_resistance_pair() {
        let transport = Arc::new(MockTransport::new());
        transport.respond("SENS:DATA:FRESH?", "2.5E-4,2.5E+4");
        let driver = Keithley6221::new(transport);
        let (v, r) = driver.read_fresh().await.unwrap();
        assert_eq!(v, 2.5e-4);
        assert_eq!(r, 2.5e4);
    }

    #[tokio::test]
    async fn safe_idle_aborts_then_clears_output() {
        let transport = Arc::new(MockTransport::new());
        let driver = Keithley6221::new(transport.clone());
        driver.make_safe().await.unwrap();
        assert_eq!(
            transport.journal(),
            vec!["SOUR:SWE:ABOR", "SOUR:CLE:IMM", "*CLS"]
        );
    }
}
