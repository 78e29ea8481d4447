//! Lakeshore 340/350 temperature controller driver.
//!
//! The command set the R-T modules use (RAMP/SETP/RANGE/KRDG?) is shared by
//! both models, so one driver covers either box on the rig. Safe idle turns
//! the heater off (`RANGE 0`).

use crate::instrument::{parse_f64_response, SafeIdle, ScpiTransport, TemperatureController};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

pub struct Lakeshore {
    io: Arc<dyn ScpiTransport>,
    /// Control loop the setpoint and ramp apply to.
    control_loop: u8,
    /// Sensor input queried for Kelvin readings.
    channel: char,
}

impl Lakeshore {
    pub fn new(io: Arc<dyn ScpiTransport>) -> Self {
        Self {
            io,
            control_loop: 1,
            channel: 'A',
        }
    }

    pub fn with_channel(mut self, channel: char) -> Self {
        self.channel = channel;
        self
    }

    pub async fn idn(&self) -> Result<String> {
        self.io
            .query("*IDN?")
            .await
            .context("Lakeshore identification failed")
    }

    pub async fn initialize(&self) -> Result<()> {
        self.io.command("*RST").await?;
        self.io.command("*CLS").await?;
        Ok(())
    }
}

#[async_trait]
impl TemperatureController for Lakeshore {
    async fn set_ramp(&self, kelvin_per_min: f64) -> Result<()> {
        self.io
            .command(&format!("RAMP {},1,{kelvin_per_min}", self.control_loop))
            .await
            .context("Lakeshore ramp setup failed")
    }

    async fn set_setpoint(&self, kelvin: f64) -> Result<()> {
        self.io
            .command(&format!("SETP {},{kelvin}", self.control_loop))
            .await
            .context("Lakeshore setpoint failed")
    }

    async fn set_heater_range(&self, range: u8) -> Result<()> {
        self.io
            .command(&format!("RANGE {range}"))
            .await
            .context("Lakeshore heater range failed")
    }

    async fn read_kelvin(&self) -> Result<f64> {
        let reply = self
            .io
            .query(&format!("KRDG? {}", self.channel))
            .await
            .context("Lakeshore temperature read failed")?;
        parse_f64_response(&reply)
    }
}

#[async_trait]
impl SafeIdle for Lakeshore {
    async fn make_safe(&self) -> Result<()> {
        self.io.command("RANGE 0").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::mock::MockTransport;

    #[tokio::test]
    async fn control_commands_target_the_configured_loop() {
        let transport = Arc::new(MockTransport::new());
        let controller = Lakeshore::new(transport.clone());
        controller.set_ramp(5.0).await.unwrap();
        controller.set_setpoint(312.0).await.unwrap();
        controller.set_heater_range(3).await.unwrap();

        assert_eq!(
            transport.journal(),
            vec!["RAMP 1,1,5", "SETP 1,312", "RANGE 3"]
        );
    }

    #[tokio::test]
    async fn reads_kelvin_from_the_configured_channel() {
        let transport = Arc::new(MockTransport::new());
        transport.respond("KRDG? B", "+2.95470E+02");
        let controller = Lakeshore::new(transport).with_channel('B');
        assert_eq!(controller.read_kelvin().await.unwrap(), 295.47);
    }

    #[tokio::test]
    async fn safe_idle_turns_the_heater_off() {
        let transport = Arc::new(MockTransport::new());
        let controller = Lakeshore::new(transport.clone());
        controller.make_safe().await.unwrap();
        assert_eq!(transport.journal(), vec!["RANGE 0"]);
    }
}
