//! Validation helpers used by the parameter forms.

use std::time::Duration;

/// A numeric entry must be a real number (rejects NaN/inf from parsed input).
pub fn is_finite(value: f64) -> Result<(), &'static str> {
    if value.is_finite() {
        Ok(())
    } else {
        Err("value must be a finite number")
    }
}

/// A step count must cover at least both endpoints of a sweep.
pub fn is_valid_step_count(steps: usize) -> Result<(), &'static str> {
    if steps >= 2 {
        Ok(())
    } else {
        Err("step count must be at least 2")
    }
}

pub fn is_positive(value: f64) -> Result<(), &'static str> {
    is_finite(value)?;
    if value > 0.0 {
        Ok(())
    } else {
        Err("value must be positive")
    }
}

pub fn is_positive_duration(value: Duration) -> Result<(), &'static str> {
    if value > Duration::ZERO {
        Ok(())
    } else {
        Err("duration must be positive")
    }
}

pub fn is_not_empty(value: &str) -> Result<(), &'static str> {
    if value.trim().is_empty() {
        Err("value cannot be empty")
    } else {
        Ok(())
    }
}

/// Sample names become file name stems, so path separators and NULs are out.
pub fn is_valid_file_stem(value: &str) -> Result<(), &'static str> {
    is_not_empty(value)?;
    if value.contains(['/', '\\', '\0']) {
        Err("value cannot contain path separators")
    } else {
        Ok(())
    }
}
