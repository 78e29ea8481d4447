//! Run metadata.
//!
//! Captured once at run start and written as `#`-prefixed header lines of
//! the run log, so the durable file records which sample, rig, and
//! parameters produced it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize)]
pub struct RunMetadata {
    pub run_id: String,
    pub sample: String,
    pub procedure: String,
    pub started: DateTime<Utc>,
    /// `*IDN?` replies keyed by rig id, for instruments that were probed.
    pub instruments: BTreeMap<String, String>,
    /// The validated parameter form, serialized as given.
    pub parameters: serde_json::Value,
}

impl RunMetadata {
    pub fn new(sample: &str, procedure: &str, parameters: serde_json::Value) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            sample: sample.to_string(),
            procedure: procedure.to_string(),
            started: Utc::now(),
            instruments: BTreeMap::new(),
            parameters,
        }
    }

    pub fn record_instrument(&mut self, id: &str, idn: String) {
        self.instruments.insert(id.to_string(), idn);
    }

    /// Render as the `# `-prefixed comment block of a run log.
    pub fn header_lines(&self) -> Vec<String> {
        let json = serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string());
        json.lines().map(|line| format!("# {line}")).collect()
    }
}
