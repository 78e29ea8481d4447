//! Keysight E4980A LCR meter driver.
//!
//! Runs the C-V module: sweeps the DC bias and fetches the formatted
//! impedance (Cp-D function, so the primary parameter is the parallel
//! capacitance). Safe idle zeroes and disables the bias.

use crate::instrument::{parse_pair_response, LcrMeter, SafeIdle, ScpiTransport};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

pub struct KeysightE4980a {
    io: Arc<dyn ScpiTransport>,
}

impl KeysightE4980a {
    pub fn new(io: Arc<dyn ScpiTransport>) -> Self {
        Self { io }
    }

    pub async fn idn(&self) -> Result<String> {
        self.io.query("*IDN?").await.context("E4980A identification failed")
    }

    /// Fixed bring-up: Cp-D function, auto range, medium aperture, AC drive
    /// level, bias output on (at whatever level the sweep sets first).
    pub async fn initialize(&self, ac_level_v: f64) -> Result<()> {
        self.io.command("*RST; *CLS").await?;
        self.io.command(":DISP:ENAB").await?;
        self.io.command(":FUNC:IMP CPD").await?;
        self.io.command(":FUNC:IMP:RANG:AUTO ON").await?;
        self.io.command(":APER MED").await?;
        self.io.command(&format!(":VOLT {ac_level_v}")).await?;
        self.io.command(":BIAS:STAT ON").await?;
        Ok(())
    }
}

#[async_trait]
impl LcrMeter for KeysightE4980a {
    async fn set_bias(&self, volts: f64) -> Result<()> {
        self.io
            .command(&format!(":BIAS:VOLT {volts:.6}"))
            .await
            .context("E4980A bias level failed")
    }

    async fn read_cp(&self) -> Result<f64> {
        self.io
            .command(":INIT:IMM")
            .await
            .context("E4980A trigger failed")?;
        let reply = self
            .io
            .query(":FETC:IMP:FORM?")
            .await
            .context("E4980A fetch failed")?;
        let (cp, _secondary) = parse_pair_response(&reply)?;
        Ok(cp)
    }
}

#[async_trait]
impl SafeIdle for KeysightE4980a {
    async fn make_safe(&self) -> Result<()> {
        self.io.command(":BIAS:VOLT 0").await?;
        self.io.command(":BIAS:STAT OFF").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::mock::MockTransport;

    #[tokio::test]
    async fn fetch_returns_primary_parameter() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(":FETC:IMP:FORM?", "+3.300000E-11,+1.200000E-02");
        let meter = KeysightE4980a::new(transport.clone());
        assert_eq!(meter.read_cp().await.unwrap(), 3.3e-11);
        // trigger precedes fetch
        assert_eq!(transport.journal(), vec![":INIT:IMM", ":FETC:IMP:FORM?"]);
    }

    #[tokio::test]
    async fn safe_idle_zeroes_bias_before_disabling() {
        let transport = Arc::new(MockTransport::new());
        let meter = KeysightE4980a::new(transport.clone());
        meter.make_safe().await.unwrap();
        assert_eq!(transport.journal(), vec![":BIAS:VOLT 0", ":BIAS:STAT OFF"]);
    }
}
