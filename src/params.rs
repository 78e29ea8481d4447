//! Parameter forms.
//!
//! One form per measurement module, filled in from the CLI and validated
//! before any instrument is opened. Validation collects every violation so
//! the operator fixes a bad entry once, not one field per attempt. A form
//! that fails validation never starts a loop.

use crate::error::{RigError, RigResult};
use crate::plan::SweepPlan;
use crate::validation;
use serde::Serialize;
use std::time::Duration;

fn check(violations: &mut Vec<String>, field: &str, result: Result<(), &'static str>) {
    if let Err(msg) = result {
        violations.push(format!("{field}: {msg}"));
    }
}

fn finish(violations: Vec<String>) -> RigResult<()> {
    if violations.is_empty() {
        Ok(())
    } else {
        Err(RigError::invalid_parameters(violations))
    }
}

/// Common run identity: the sample name becomes the run-log file stem.
#[derive(Clone, Debug, Serialize)]
pub struct RunForm {
    pub sample: String,
}

impl RunForm {
    pub fn validate(&self) -> RigResult<()> {
        let mut violations = Vec::new();
        check(
            &mut violations,
            "sample",
            validation::is_valid_file_stem(&self.sample),
        );
        finish(violations)
    }
}

/// I-V sweep (Keithley 2400, optional 2182 voltmeter).
#[derive(Clone, Debug, Serialize)]
pub struct IvForm {
    /// Sweep start, microamps.
    pub start_ua: f64,
    /// Sweep stop (the amplitude for hysteresis loops), microamps.
    pub stop_ua: f64,
    /// Number of points per segment, endpoints included.
    pub steps: usize,
    #[serde(with = "humantime_serde")]
    pub settle: Duration,
    pub compliance_v: f64,
    /// Sweep the five-segment 0 -> +A -> 0 -> -A -> 0 -> +A loop instead of
    /// a single linear segment.
    pub hysteresis: bool,
    /// Read the sample voltage on a 2182 instead of the 2400's own meter.
    pub nanovoltmeter: bool,
}

impl IvForm {
    pub fn validate(&self) -> RigResult<()> {
        let mut violations = Vec::new();
        check(&mut violations, "start", validation::is_finite(self.start_ua));
        check(&mut violations, "stop", validation::is_finite(self.stop_ua));
        check(
            &mut violations,
            "steps",
            validation::is_valid_step_count(self.steps),
        );
        check(
            &mut violations,
            "settle",
            validation::is_positive_duration(self.settle),
        );
        check(
            &mut violations,
            "compliance",
            validation::is_positive(self.compliance_v),
        );
        if self.hysteresis {
            if self.start_ua != 0.0 {
                violations.push("start: hysteresis loops start at zero".into());
            }
            check(&mut violations, "stop", validation::is_positive(self.stop_ua));
        } else if self.steps >= 2 && self.start_ua == self.stop_ua {
            violations.push("stop: sweep range is empty".into());
        }
        finish(violations)
    }

    /// Stimulus schedule in amps.
    pub fn plan(&self) -> SweepPlan {
        let scale = 1e-6;
        if self.hysteresis {
            let step_ua = self.stop_ua / (self.steps - 1) as f64;
            SweepPlan::hysteresis(self.stop_ua * scale, step_ua * scale)
        } else {
            SweepPlan::linear(self.start_ua * scale, self.stop_ua * scale, self.steps)
        }
    }
}

/// Delta-mode measurement (Keithley 6221 + 2182).
#[derive(Clone, Debug, Serialize)]
pub struct DeltaForm {
    /// Delta reversal current, amps.
    pub current_a: f64,
    /// Poll period.
    #[serde(with = "humantime_serde")]
    pub period: Duration,
    /// Number of points; 0 runs until the operator stops it.
    pub points: usize,
    pub compliance_v: f64,
    /// Log a Lakeshore temperature column alongside each reading.
    pub with_temperature: bool,
}

impl DeltaForm {
    pub fn validate(&self) -> RigResult<()> {
        let mut violations = Vec::new();
        check(
            &mut violations,
            "current",
            validation::is_positive(self.current_a),
        );
        check(
            &mut violations,
            "period",
            validation::is_positive_duration(self.period),
        );
        check(
            &mut violations,
            "compliance",
            validation::is_positive(self.compliance_v),
        );
        finish(violations)
    }

    pub fn plan(&self) -> SweepPlan {
        SweepPlan::constant(self.current_a, self.points)
    }
}

/// Resistance vs temperature with active temperature control
/// (Keithley 2400 + 2182 + Lakeshore).
#[derive(Clone, Debug, Serialize)]
pub struct RtForm {
    /// Excitation current, milliamps.
    pub current_ma: f64,
    pub setpoint_k: f64,
    pub ramp_k_per_min: f64,
    /// Lakeshore heater range, 1-5.
    pub heater_range: u8,
    /// The run stops once the sample temperature crosses this bound.
    pub cutoff_k: f64,
    #[serde(with = "humantime_serde")]
    pub period: Duration,
    pub compliance_v: f64,
}

impl RtForm {
    pub fn validate(&self) -> RigResult<()> {
        let mut violations = Vec::new();
        check(&mut violations, "current", validation::is_finite(self.current_ma));
        if self.current_ma == 0.0 {
            violations.push("current: excitation current cannot be zero".into());
        }
        check(
            &mut violations,
            "setpoint",
            validation::is_positive(self.setpoint_k),
        );
        check(
            &mut violations,
            "ramp",
            validation::is_positive(self.ramp_k_per_min),
        );
        if !(1..=5).contains(&self.heater_range) {
            violations.push("heater-range: must be between 1 and 5".into());
        }
        check(
            &mut violations,
            "cutoff",
            validation::is_positive(self.cutoff_k),
        );
        check(
            &mut violations,
            "period",
            validation::is_positive_duration(self.period),
        );
        check(
            &mut violations,
            "compliance",
            validation::is_positive(self.compliance_v),
        );
        finish(violations)
    }

    /// Fixed excitation in amps, applied until the cutoff stops the run.
    pub fn plan(&self) -> SweepPlan {
        SweepPlan::constant(self.current_ma * 1e-3, 0)
    }
}

/// Capacitance-voltage sweep (Keysight E4980A).
#[derive(Clone, Debug, Serialize)]
pub struct CvForm {
    /// Bias amplitude, volts.
    pub bias_v: f64,
    /// Bias increment, volts.
    pub step_v: f64,
    /// AC drive level, volts.
    pub ac_level_v: f64,
    /// Number of times the four-segment protocol repeats.
    pub loops: usize,
    #[serde(with = "humantime_serde")]
    pub settle: Duration,
}

impl CvForm {
    pub fn validate(&self) -> RigResult<()> {
        let mut violations = Vec::new();
        check(&mut violations, "bias", validation::is_positive(self.bias_v));
        check(&mut violations, "step", validation::is_positive(self.step_v));
        check(
            &mut violations,
            "ac-level",
            validation::is_positive(self.ac_level_v),
        );
        if self.loops == 0 {
            violations.push("loops: at least one loop".into());
        }
        if self.step_v > self.bias_v && self.bias_v > 0.0 {
            violations.push("step: larger than the bias amplitude".into());
        }
        check(
            &mut violations,
            "settle",
            validation::is_positive_duration(self.settle),
        );
        finish(violations)
    }
}

/// Current-vs-time monitoring (Keithley 6517B).
#[derive(Clone, Debug, Serialize)]
pub struct MonitorForm {
    #[serde(with = "humantime_serde")]
    pub period: Duration,
    /// Number of points; 0 runs until the operator stops it.
    pub points: usize,
}

impl MonitorForm {
    pub fn validate(&self) -> RigResult<()> {
        let mut violations = Vec::new();
        check(
            &mut violations,
            "period",
            validation::is_positive_duration(self.period),
        );
        finish(violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv_form() -> IvForm {
        IvForm {
            start_ua: 0.0,
            stop_ua: 10.0,
            steps: 3,
            settle: Duration::from_millis(100),
            compliance_v: 210.0,
            hysteresis: false,
            nanovoltmeter: false,
        }
    }

    #[test]
    fn single_step_sweep_is_rejected() {
        let form = IvForm {
            steps: 1,
            ..iv_form()
        };
        let err = form.validate().unwrap_err();
        match err {
            RigError::Configuration(msg) => assert!(msg.contains("step count")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn all_violations_are_reported_together() {
        let form = IvForm {
            steps: 1,
            settle: Duration::ZERO,
            compliance_v: -1.0,
            ..iv_form()
        };
        match form.validate().unwrap_err() {
            RigError::Configuration(msg) => {
                assert!(msg.contains("steps"));
                assert!(msg.contains("settle"));
                assert!(msg.contains("compliance"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn linear_plan_matches_the_form() {
        let plan = iv_form().plan();
        let expected: Vec<f64> = vec![0.0, 5e-6, 10e-6];
        for (a, b) in plan.values().iter().zip(expected) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn hysteresis_requires_zero_start() {
        let form = IvForm {
            hysteresis: true,
            start_ua: 2.0,
            ..iv_form()
        };
        assert!(form.validate().is_err());
    }

    #[test]
    fn rt_heater_range_bounds() {
        let form = RtForm {
            current_ma: 1.0,
            setpoint_k: 312.0,
            ramp_k_per_min: 5.0,
            heater_range: 6,
            cutoff_k: 360.0,
            period: Duration::from_secs(1),
            compliance_v: 210.0,
        };
        assert!(form.validate().is_err());
    }

    #[test]
    fn sample_names_cannot_escape_the_output_directory() {
        let form = RunForm {
            sample: "../etc/passwd".into(),
        };
        assert!(form.validate().is_err());
    }
}
