//! Rig description loading.
//!
//! A rig file names the VISA resources of the bench instruments, the VISA
//! timeout, and where run logs land. Loaded from `config/default.toml` with
//! an optional named overlay (`config/<name>.toml`).

use crate::error::{RigError, RigResult};
use config::Config;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Directory run logs are created under.
    pub output_root: PathBuf,
    pub visa: VisaSettings,
    /// Per-instrument tables keyed by rig id (`k2400`, `lakeshore`, ...).
    pub instruments: HashMap<String, toml::Value>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VisaSettings {
    /// I/O timeout applied when opening a resource. No retry layer sits on
    /// top of this; a timeout surfaces as a read error and ends the run.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Settings {
    /// Load `config/default` plus an optional named overlay. Missing files
    /// fall back to built-in defaults so `--mock` runs work from a clean
    /// checkout.
    pub fn load(overlay: Option<&str>) -> RigResult<Self> {
        let mut builder = Config::builder()
            .set_default("output_root", "data")?
            .set_default("visa.timeout", "3s")?
            .set_default("instruments", config::Map::<String, config::Value>::new())?
            .add_source(config::File::with_name("config/default").required(false));

        if let Some(name) = overlay {
            builder =
                builder.add_source(config::File::with_name(&format!("config/{name}")).required(true));
        }

        let settings = builder.build()?;
        settings.try_deserialize().map_err(RigError::Config)
    }

    /// VISA resource string for a rig id.
    pub fn address(&self, id: &str) -> RigResult<String> {
        self.instruments
            .get(id)
            .and_then(|table| table.get("address"))
            .and_then(|value| value.as_str())
            .map(str::to_owned)
            .ok_or_else(|| {
                RigError::Configuration(format!(
                    "no address configured for instrument '{id}' (add [instruments.{id}] with an \
                     address to the rig file)"
                ))
            })
    }
}
