//! Sample records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One completed loop iteration: the applied stimulus and everything read
/// back for it. Appended once per iteration, never mutated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SampleRecord {
    pub timestamp: DateTime<Utc>,
    /// Seconds since the run entered `Running`.
    pub elapsed_s: f64,
    /// The stimulus level applied for this iteration, in the procedure's
    /// source unit (amps, volts of bias, ...).
    pub stimulus: f64,
    /// Measured and derived values, in the procedure's column order.
    pub readings: Vec<f64>,
    /// Non-numeric columns (loop index, protocol segment label). Empty for
    /// most procedures.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<String>,
}

impl SampleRecord {
    pub fn new(elapsed_s: f64, stimulus: f64, readings: Vec<f64>) -> Self {
        Self {
            timestamp: Utc::now(),
            elapsed_s,
            stimulus,
            readings,
            annotations: Vec::new(),
        }
    }

    pub fn with_annotations(mut self, annotations: Vec<String>) -> Self {
        self.annotations = annotations;
        self
    }
}
