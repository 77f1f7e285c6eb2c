//! # Envelope Tracking Run
//!
//! Wires generators, the envelope shaper, synchronization and the analyzer
//! into one delay-sweep run:
//!
//! 1. configure the RF generator, download its waveforms, loop the first one
//! 2. derive, scale and download the envelope waveform
//! 3. configure the analyzer
//! 4. start both generators on a common edge
//! 5. sweep and collect with the configured strategy
//! 6. teardown: abort envelope, abort RF, close both, close the analyzer
//!
//! Teardown runs on every exit path. The sweep driver and collector never
//! release generators themselves; a fatal error inside them surfaces here
//! together with whatever results were already collected.

use crate::analyzer::AcpMeasurement;
use crate::collector::{sweep_and_collect, ResultCollector};
use crate::config::{BenchConfig, GeneratorConfig, ShapingConfig};
use crate::error::{EtError, EtResult};
use crate::generator::{scale_for_tracker, EnvelopeShaper, SignalGenerator, Waveform};
use crate::report::SweepReport;
use crate::sweep::{DelaySweep, SweepPlan, SweepTiming};
use crate::sync::Synchronizer;
use tracing::{error, info, warn};

/// Instrument collaborators for one run. Each is exclusively owned by the
/// run for its duration.
pub struct Bench<'a, M: AcpMeasurement + ?Sized> {
    pub rf: &'a mut dyn SignalGenerator,
    pub envelope: &'a mut dyn SignalGenerator,
    pub shaper: &'a dyn EnvelopeShaper,
    pub synchronizer: &'a mut dyn Synchronizer,
    pub analyzer: &'a M,
}

/// Report plus the typed error that ended the run, if any.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: SweepReport,
    pub error: Option<EtError>,
}

impl RunOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// One configured envelope tracking delay sweep.
pub struct EnvelopeTrackingRun {
    config: BenchConfig,
    plan: SweepPlan,
}

impl EnvelopeTrackingRun {
    pub fn new(config: BenchConfig) -> EtResult<Self> {
        config.validate()?;
        let plan = SweepPlan::from_config(&config.sweep, config.step_size_s())?;
        Ok(Self { config, plan })
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    pub fn plan(&self) -> &SweepPlan {
        &self.plan
    }

    /// Run the whole harness against `bench` using `rf_waveforms`.
    pub fn execute<M: AcpMeasurement + ?Sized>(
        &self,
        bench: Bench<'_, M>,
        rf_waveforms: &[Waveform],
    ) -> RunOutcome {
        let Bench {
            rf,
            envelope,
            shaper,
            synchronizer,
            analyzer,
        } = bench;
        let mut collector = ResultCollector::new();

        let result = self
            .prepare(rf, envelope, shaper, analyzer, rf_waveforms)
            .and_then(|()| {
                self.log_banner();
                let mut handle =
                    synchronizer.establish_synchronous_start(rf, envelope, &self.config.sync)?;
                let mut timing = SweepTiming {
                    synchronizer: &mut *synchronizer,
                    handle: &mut handle,
                    rf: &mut *rf,
                    config: &self.config.sync,
                };
                let sweep = DelaySweep::new(&self.plan, analyzer);
                sweep_and_collect(&sweep, &mut timing, &mut collector, self.config.sweep.strategy)
            });

        self.teardown(rf, envelope, analyzer);

        let (accumulators, steps) = collector.into_parts();
        let mut report = SweepReport::new(
            self.config.sweep.strategy,
            self.plan.len(),
            self.plan.step_size_s(),
            &accumulators,
            &steps,
        );
        let error = match result {
            Ok(()) => {
                info!(completed = report.completed(), "Run complete");
                None
            }
            Err(e) => {
                error!(completed = report.completed(), "Run aborted: {}", e);
                report.error = Some(e.to_string());
                Some(e)
            }
        };
        RunOutcome { report, error }
    }

    fn prepare<M: AcpMeasurement + ?Sized>(
        &self,
        rf: &mut dyn SignalGenerator,
        envelope: &mut dyn SignalGenerator,
        shaper: &dyn EnvelopeShaper,
        analyzer: &M,
        rf_waveforms: &[Waveform],
    ) -> EtResult<()> {
        let primary = rf_waveforms
            .first()
            .ok_or_else(|| EtError::Config("no RF waveform to generate".into()))?;

        rf.configure(&self.config.rf)?;
        for waveform in rf_waveforms {
            rf.download_waveform(waveform)?;
        }
        rf.configure_continuous_generation(&primary.name, &self.config.rf.trigger_line)?;

        let env_cfg = &self.config.envelope;
        envelope.configure(&self.envelope_generator_config(primary))?;
        let shaping = match &env_cfg.shaping {
            ShapingConfig::LookupTable(lut) => {
                let mut lut = lut.clone();
                lut.dut_average_input_power_dbm = self.config.rf.dut_average_input_power_dbm;
                ShapingConfig::LookupTable(lut)
            }
            other => other.clone(),
        };
        let envelope_wfm = shaper.create_envelope_waveform(primary, &shaping)?;
        let scaled = scale_for_tracker(&envelope_wfm, &env_cfg.tracker);
        envelope.download_waveform(&scaled)?;
        envelope.configure_continuous_generation(&scaled.name, &env_cfg.trigger_line)?;

        analyzer.configure(&self.config.analyzer)
    }

    fn envelope_generator_config(&self, primary: &Waveform) -> GeneratorConfig {
        GeneratorConfig {
            resource_name: self.config.envelope.resource_name.clone(),
            carrier_frequency_hz: 0.0,
            power_level_dbm: 0.0,
            iq_rate_hz: primary.sample_rate,
            trigger_line: self.config.envelope.trigger_line.clone(),
            ..self.config.rf.clone()
        }
    }

    fn log_banner(&self) {
        info!(
            steps = self.plan.len(),
            iq_rate_mhz = self.config.rf.iq_rate_hz / 1e6,
            step_size_ns = self.plan.step_size_s() * 1e9,
            "Generating delay steps"
        );
    }

    fn teardown<M: AcpMeasurement + ?Sized>(
        &self,
        rf: &mut dyn SignalGenerator,
        envelope: &mut dyn SignalGenerator,
        analyzer: &M,
    ) {
        if let Err(e) = envelope.abort() {
            warn!("Failed to abort {}: {}", envelope.name(), e);
        }
        if let Err(e) = rf.abort() {
            warn!("Failed to abort {}: {}", rf.name(), e);
        }
        envelope.close();
        rf.close();
        analyzer.close();
    }
}
