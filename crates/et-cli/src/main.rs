//! et-delay-sweep - envelope tracking delay sweep on the simulated bench
//!
//! Configures the RF and envelope generators and the ACP analyzer, starts
//! both generators on a common edge, steps the RF start delay and prints the
//! adjacent-channel power measured at every step.

use clap::{Parser, ValueEnum};
use et_core::config::{
    BenchConfig, CollectionStrategy, EngineKind, LookUpTableConfig, ShapingConfig,
};
use et_core::error::EtResult;
use et_core::observe::{init_logging, LogFormat, LogLevel};
use et_core::report::SweepReport;
use et_core::run::EnvelopeTrackingRun;
use et_sim::{SimBenchConfig, SimInstruments};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "et-delay-sweep")]
#[command(about = "Sweep RF/envelope delay and collect ACP per step")]
#[command(version)]
struct Cli {
    /// JSON bench configuration; omitted fields keep their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of delay steps
    #[arg(long)]
    steps: Option<usize>,

    /// Delay increment in seconds (default: one RF arb sample period)
    #[arg(long, allow_hyphen_values = true)]
    step_size: Option<f64>,

    /// How results are drained from the analyzer
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,

    /// ACP analysis engine
    #[arg(long, value_enum)]
    engine: Option<EngineArg>,

    /// Envelope shaping mode
    #[arg(long, value_enum)]
    envelope: Option<EnvelopeArg>,

    /// Write the sweep report as JSON
    #[arg(short, long)]
    report: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum)]
    log_format: Option<LogFormatArg>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Seed for the simulated measurement noise
    #[arg(long, default_value = "42")]
    seed: u64,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    Sequential,
    Overlapped,
}

#[derive(Clone, Copy, ValueEnum)]
enum EngineArg {
    Nr,
    Specan,
}

#[derive(Clone, Copy, ValueEnum)]
enum EnvelopeArg {
    Detrough,
    Lut,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}

/// Supply voltage against instantaneous input power, used when `--envelope
/// lut` is given without a table in the configuration file.
const DEFAULT_LUT: [(f64, f64); 4] = [(-30.0, 1.5), (-15.0, 2.0), (-5.0, 2.8), (5.0, 3.5)];

impl Cli {
    fn bench_config(&self) -> EtResult<BenchConfig> {
        let mut config = match &self.config {
            Some(path) => BenchConfig::load(path)?,
            None => BenchConfig::default(),
        };

        if let Some(steps) = self.steps {
            config.sweep.number_of_steps = steps;
        }
        if let Some(step) = self.step_size {
            config.sweep.step_size_s = Some(step);
        }
        if let Some(strategy) = self.strategy {
            config.sweep.strategy = match strategy {
                StrategyArg::Sequential => CollectionStrategy::Sequential,
                StrategyArg::Overlapped => CollectionStrategy::Overlapped,
            };
        }
        if let Some(engine) = self.engine {
            config.analyzer.engine = match engine {
                EngineArg::Nr => EngineKind::NrCarrier,
                EngineArg::Specan => EngineKind::SpectrumAnalysis,
            };
        }
        match (self.envelope, &config.envelope.shaping) {
            (Some(EnvelopeArg::Detrough), ShapingConfig::LookupTable(_)) => {
                config.envelope.shaping = ShapingConfig::default();
            }
            (Some(EnvelopeArg::Lut), ShapingConfig::Detrough(_)) => {
                config.envelope.shaping = ShapingConfig::LookupTable(LookUpTableConfig {
                    dut_average_input_power_dbm: config.rf.dut_average_input_power_dbm,
                    table: DEFAULT_LUT.to_vec(),
                });
            }
            _ => {}
        }

        if let Some(format) = self.log_format {
            config.log.format = match format {
                LogFormatArg::Pretty => LogFormat::Pretty,
                LogFormatArg::Compact => LogFormat::Compact,
                LogFormatArg::Json => LogFormat::Json,
            };
        }
        match self.verbose {
            0 => {}
            1 => config.log.level = LogLevel::Debug,
            _ => config.log.level = LogLevel::Trace,
        }

        config.validate()?;
        Ok(config)
    }
}

fn print_banner(run: &EnvelopeTrackingRun) {
    let config = run.config();
    println!("Generating {} delay steps", run.plan().len());
    println!("  RF arb IQ rate : {:.2} MHz", config.rf.iq_rate_hz / 1e6);
    println!("  Delay step     : {:.3} ns", run.plan().step_size_s() * 1e9);
    println!("  Collection     : {}", config.sweep.strategy);
}

fn print_report(report: &SweepReport) {
    println!();
    println!(
        "{:>5}  {:>10}  {:>8}  {:>12}  {:>12}  {:>12}",
        "step", "delay(ns)", "result", "lower(dB)", "upper(dB)", "power(dBm)"
    );
    for row in &report.rows {
        println!(
            "{:>5}  {:>10.3}  {:>8}  {:>12.2}  {:>12.2}  {:>12.2}",
            row.index,
            row.delay_s * 1e9,
            row.result_name,
            row.lower_relative_db,
            row.upper_relative_db,
            row.channel_power_dbm
        );
    }
    println!();
    println!("{}/{} steps collected", report.completed(), report.requested_steps);
    if let Some(best) = report.best_step() {
        println!(
            "Best ACP at step {} ({:.3} ns): {:.2} dB worst side",
            best.index,
            best.delay_s * 1e9,
            best.worst_acp_db()
        );
    }
}

fn run(cli: &Cli) -> EtResult<bool> {
    let config = cli.bench_config()?;
    init_logging(&config.log);

    let mut sim = SimInstruments::new(
        &config,
        SimBenchConfig {
            seed: cli.seed,
            ..Default::default()
        },
    )?;
    let waveform = sim.waveform();
    let run = EnvelopeTrackingRun::new(config)?;
    print_banner(&run);

    let outcome = run.execute(sim.bench(), &[waveform]);
    print_report(&outcome.report);

    if let Some(path) = &cli.report {
        outcome.report.write_json(path)?;
        info!(path = %path.display(), "Report written");
    }
    if let Some(e) = &outcome.error {
        eprintln!("Sweep aborted: {e}");
    }
    Ok(outcome.is_ok())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
