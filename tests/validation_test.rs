//! Parameter-form validation happens before anything touches the bench.

use labrig::params::{CvForm, DeltaForm, IvForm, MonitorForm, RtForm, RunForm};
use labrig::procedures;
use labrig::{AbortFlag, RigError, Settings};
use std::time::Duration;
use tempfile::tempdir;

fn settings(dir: &std::path::Path) -> Settings {
    Settings {
        output_root: dir.to_path_buf(),
        visa: labrig::config::VisaSettings {
            timeout: Duration::from_secs(1),
        },
        instruments: Default::default(),
    }
}

fn sample() -> RunForm {
    RunForm {
        sample: "validation".into(),
    }
}

#[tokio::test]
async fn single_step_sweep_is_rejected_before_any_instrument_opens() {
    let dir = tempdir().unwrap();
    let form = IvForm {
        start_ua: 0.0,
        stop_ua: 10.0,
        steps: 1,
        settle: Duration::from_millis(1),
        compliance_v: 210.0,
        hysteresis: false,
        nanovoltmeter: false,
    };

    // not even the mock bench is constructed: no run log appears
    let err = procedures::iv_sweep::run(&settings(dir.path()), &sample(), &form, true, AbortFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RigError::Configuration(_)));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn empty_sample_name_is_rejected() {
    let dir = tempdir().unwrap();
    let form = MonitorForm {
        period: Duration::from_millis(1),
        points: 1,
    };
    let err = procedures::monitor::run(
        &settings(dir.path()),
        &RunForm { sample: "".into() },
        &form,
        true,
        AbortFlag::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, RigError::Configuration(_)));
}

#[test]
fn delta_rejects_non_positive_current_and_period() {
    let form = DeltaForm {
        current_a: 0.0,
        period: Duration::ZERO,
        points: 0,
        compliance_v: 50.0,
        with_temperature: false,
    };
    match form.validate().unwrap_err() {
        RigError::Configuration(msg) => {
            assert!(msg.contains("current"));
            assert!(msg.contains("period"));
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn rt_rejects_nonsense_control_settings() {
    let form = RtForm {
        current_ma: 0.0,
        setpoint_k: -4.0,
        ramp_k_per_min: 0.0,
        heater_range: 9,
        cutoff_k: f64::NAN,
        period: Duration::from_secs(1),
        compliance_v: 210.0,
    };
    match form.validate().unwrap_err() {
        RigError::Configuration(msg) => {
            assert!(msg.contains("current"));
            assert!(msg.contains("setpoint"));
            assert!(msg.contains("ramp"));
            assert!(msg.contains("heater-range"));
            assert!(msg.contains("cutoff"));
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn cv_rejects_step_larger_than_amplitude() {
    let form = CvForm {
        bias_v: 1.0,
        step_v: 2.0,
        ac_level_v: 0.5,
        loops: 1,
        settle: Duration::from_millis(1),
    };
    assert!(form.validate().is_err());
}
