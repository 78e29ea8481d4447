//! CLI entry point for labrig.
//!
//! One subcommand per measurement module. Parameters arrive as flags, the
//! rig description (instrument addresses, output directory) from
//! `config/default.toml` plus an optional `--rig <name>` overlay, and
//! `--mock` swaps the whole bench for simulated instruments so a sweep can
//! be rehearsed at a desk.

use clap::{Args, Parser, Subcommand};
use labrig::params::{CvForm, DeltaForm, IvForm, MonitorForm, RtForm, RunForm};
use labrig::procedures::{self, RunReport};
use labrig::run::{abort_on_ctrl_c, AbortFlag};
use labrig::{RigResult, Settings};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "labrig")]
#[command(about = "Measurement rig automation over GPIB/VISA", long_about = None)]
struct Cli {
    /// Named rig overlay under config/ (e.g. --rig cryostat2 loads
    /// config/cryostat2.toml on top of config/default.toml)
    #[arg(long, global = true)]
    rig: Option<String>,

    /// Run against simulated instruments instead of the VISA bus
    #[arg(long, global = true)]
    mock: bool,

    /// More detailed console logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SampleArgs {
    /// Sample name; becomes the run-log file stem
    #[arg(long)]
    sample: String,
}

#[derive(Subcommand)]
enum Commands {
    /// I-V sweep on a Keithley 2400 (optionally reading a 2182)
    Iv {
        #[command(flatten)]
        sample: SampleArgs,

        /// Sweep start in microamps
        #[arg(long, default_value_t = 0.0)]
        start_ua: f64,

        /// Sweep stop (hysteresis amplitude) in microamps
        #[arg(long)]
        stop_ua: f64,

        /// Points per segment, endpoints included
        #[arg(long)]
        steps: usize,

        /// Settle delay between setting the current and reading
        #[arg(long, value_parser = humantime::parse_duration, default_value = "1500ms")]
        settle: Duration,

        /// Compliance voltage
        #[arg(long, default_value_t = 210.0)]
        compliance: f64,

        /// Sweep the full 0 -> +A -> 0 -> -A -> 0 -> +A loop
        #[arg(long)]
        hysteresis: bool,

        /// Read the sample voltage on a 2182 nanovoltmeter
        #[arg(long)]
        nanovoltmeter: bool,
    },

    /// Delta-mode measurement on a Keithley 6221/2182 pair
    Delta {
        #[command(flatten)]
        sample: SampleArgs,

        /// Delta reversal current in amps
        #[arg(long)]
        current_a: f64,

        /// Poll period
        #[arg(long, value_parser = humantime::parse_duration, default_value = "1s")]
        period: Duration,

        /// Number of points (0 = run until stopped)
        #[arg(long, default_value_t = 0)]
        points: usize,

        /// Compliance voltage
        #[arg(long, default_value_t = 50.0)]
        compliance: f64,

        /// Log a Lakeshore temperature column
        #[arg(long)]
        with_temperature: bool,
    },

    /// Resistance vs temperature with active Lakeshore control
    Rt {
        #[command(flatten)]
        sample: SampleArgs,

        /// Excitation current in milliamps
        #[arg(long)]
        current_ma: f64,

        /// Temperature setpoint in kelvin
        #[arg(long)]
        setpoint_k: f64,

        /// Ramp rate in K/min
        #[arg(long, default_value_t = 5.0)]
        ramp: f64,

        /// Lakeshore heater range (1-5)
        #[arg(long, default_value_t = 3)]
        heater_range: u8,

        /// Stop once the sample temperature crosses this bound (kelvin)
        #[arg(long)]
        cutoff_k: f64,

        /// Poll period
        #[arg(long, value_parser = humantime::parse_duration, default_value = "2s")]
        period: Duration,

        /// Compliance voltage
        #[arg(long, default_value_t = 210.0)]
        compliance: f64,
    },

    /// Capacitance-voltage sweep on the E4980A
    Cv {
        #[command(flatten)]
        sample: SampleArgs,

        /// Bias amplitude in volts
        #[arg(long)]
        bias_v: f64,

        /// Bias step in volts
        #[arg(long)]
        step_v: f64,

        /// AC drive level in volts
        #[arg(long, default_value_t = 0.5)]
        ac_level: f64,

        /// Number of protocol loops
        #[arg(long, default_value_t = 1)]
        loops: usize,

        /// Settle delay after each bias step
        #[arg(long, value_parser = humantime::parse_duration, default_value = "5s")]
        settle: Duration,
    },

    /// Current-vs-time logging on the 6517B electrometer
    Monitor {
        #[command(flatten)]
        sample: SampleArgs,

        /// Sample period
        #[arg(long, value_parser = humantime::parse_duration, default_value = "1s")]
        period: Duration,

        /// Number of points (0 = run until stopped)
        #[arg(long, default_value_t = 0)]
        points: usize,
    },

    /// Probe an instrument's *IDN? over the VISA bus
    Idn {
        /// Rig id from the config (e.g. k2400) or a raw VISA resource string
        target: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    labrig::logging::init(cli.verbose);

    if let Err(err) = dispatch(cli).await {
        tracing::error!(%err, "run failed");
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> RigResult<()> {
    let settings = Settings::load(cli.rig.as_deref())?;
    let abort = AbortFlag::new();
    abort_on_ctrl_c(abort.clone());

    let report = match cli.command {
        Commands::Iv {
            sample,
            start_ua,
            stop_ua,
            steps,
            settle,
            compliance,
            hysteresis,
            nanovoltmeter,
        } => {
            let form = IvForm {
                start_ua,
                stop_ua,
                steps,
                settle,
                compliance_v: compliance,
                hysteresis,
                nanovoltmeter,
            };
            procedures::iv_sweep::run(&settings, &run_form(sample), &form, cli.mock, abort).await?
        }

        Commands::Delta {
            sample,
            current_a,
            period,
            points,
            compliance,
            with_temperature,
        } => {
            let form = DeltaForm {
                current_a,
                period,
                points,
                compliance_v: compliance,
                with_temperature,
            };
            procedures::delta::run(&settings, &run_form(sample), &form, cli.mock, abort).await?
        }

        Commands::Rt {
            sample,
            current_ma,
            setpoint_k,
            ramp,
            heater_range,
            cutoff_k,
            period,
            compliance,
        } => {
            let form = RtForm {
                current_ma,
                setpoint_k,
                ramp_k_per_min: ramp,
                heater_range,
                cutoff_k,
                period,
                compliance_v: compliance,
            };
            procedures::rt_sweep::run(&settings, &run_form(sample), &form, cli.mock, abort).await?
        }

        Commands::Cv {
            sample,
            bias_v,
            step_v,
            ac_level,
            loops,
            settle,
        } => {
            let form = CvForm {
                bias_v,
                step_v,
                ac_level_v: ac_level,
                loops,
                settle,
            };
            procedures::cv_sweep::run(&settings, &run_form(sample), &form, cli.mock, abort).await?
        }

        Commands::Monitor {
            sample,
            period,
            points,
        } => {
            let form = MonitorForm { period, points };
            procedures::monitor::run(&settings, &run_form(sample), &form, cli.mock, abort).await?
        }

        Commands::Idn { target } => {
            let idn = probe_idn(&settings, &target).await?;
            println!("{idn}");
            return Ok(());
        }
    };

    print_report(&report);
    Ok(())
}

fn run_form(sample: SampleArgs) -> RunForm {
    RunForm {
        sample: sample.sample,
    }
}

fn print_report(report: &RunReport) {
    println!(
        "{}: {} rows -> {}",
        report.status.state,
        report.rows,
        report.log_path.display()
    );
    if let Some(reason) = report.stop_reason() {
        println!("stopped: {reason:?}");
    }
}

#[cfg(feature = "instrument_visa")]
async fn probe_idn(settings: &Settings, target: &str) -> RigResult<String> {
    use labrig::instrument::visa::VisaTransport;
    use labrig::instrument::ScpiTransport;
    use labrig::RigError;

    // a rig id resolves through the config; anything else is taken as a
    // raw VISA resource string
    let resource = settings
        .address(target)
        .unwrap_or_else(|_| target.to_string());
    let transport = VisaTransport::open(&resource, settings.visa.timeout)?;
    transport.query("*IDN?").await.map_err(RigError::Read)
}

#[cfg(not(feature = "instrument_visa"))]
async fn probe_idn(_settings: &Settings, _target: &str) -> RigResult<String> {
    Err(labrig::RigError::FeatureNotEnabled("instrument_visa".into()))
}
