//! # labrig
//!
//! Instrument automation for physics/materials-science measurement rigs:
//! Keithley SourceMeters and electrometers, Lakeshore temperature
//! controllers, and a Keysight LCR meter on a GPIB/VISA bus. Every
//! measurement module drives the same fixed sequential protocol (set a
//! stimulus, wait a settle delay, query the readings, append a row to the
//! run log) until the sweep plan is exhausted, a threshold is crossed, or
//! the operator stops it.
//!
//! ## Crate Structure
//!
//! - **`config`**: rig description (instrument addresses, VISA timeout,
//!   output directory) loaded from TOML.
//! - **`error`**: the `RigError` taxonomy shared across the crate.
//! - **`params`**: parameter forms the CLI fills in; every form is
//!   validated before an instrument is opened.
//! - **`plan`**: immutable sweep plans (linear, hysteresis loop, constant).
//! - **`record`** / **`metadata`** / **`storage`**: sample records, run
//!   metadata, and the append-only CSV run log they end up in.
//! - **`instrument`**: the SCPI transport seam, capability traits, the
//!   drivers for the bench instruments, and their mocks.
//! - **`run`**: the measurement loop state machine and the shutdown safety
//!   chain.
//! - **`procedures`**: the measurement modules themselves (I-V, delta
//!   mode, R-T, C-V, current monitoring).

pub mod config;
pub mod error;
pub mod instrument;
pub mod logging;
pub mod metadata;
pub mod params;
pub mod plan;
pub mod procedures;
pub mod record;
pub mod run;
pub mod storage;
pub mod validation;

pub use config::Settings;
pub use error::{RigError, RigResult};
pub use plan::SweepPlan;
pub use record::SampleRecord;
pub use run::{AbortFlag, MeasurementLoop, Protocol, RunState, RunStatus, StopReason};
