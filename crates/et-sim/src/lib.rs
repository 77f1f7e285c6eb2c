//! # Simulated Envelope Tracking Bench
//!
//! Software stand-ins for the instruments an envelope tracking delay sweep
//! drives, so the full pipeline runs without hardware:
//!
//! - [`SimGenerator`]: RF or envelope arbitrary waveform generator
//! - [`SimInstrument`], [`NrAcpEngine`], [`SpecAnAcpEngine`]: analyzer
//!   connection and its two ACP engines
//! - [`SimEnvelopeShaper`]: magnitude to supply voltage
//!
//! All of them share one [`SimBench`], which links the RF start delay to the
//! ACP the analyzer reports and carries fault injection hooks.
//!
//! ```rust,ignore
//! use et_core::{BenchConfig, EnvelopeTrackingRun};
//! use et_sim::{SimBenchConfig, SimInstruments};
//!
//! let config = BenchConfig::default();
//! let mut sim = SimInstruments::new(&config, SimBenchConfig::default())?;
//! let waveform = sim.waveform();
//! let run = EnvelopeTrackingRun::new(config)?;
//! let outcome = run.execute(sim.bench(), &[waveform]);
//! ```

pub mod analyzer;
pub mod bench;
pub mod generator;
pub mod shaper;

pub use analyzer::{create_engine, NrAcpEngine, SimInstrument, SpecAnAcpEngine};
pub use bench::{GeneratorRole, SimBench, SimBenchConfig, RESULT_NOT_FOUND_CODE};
pub use generator::SimGenerator;
pub use shaper::{ofdm_like_waveform, SimEnvelopeShaper};

use et_core::analyzer::MeasurementSession;
use et_core::config::BenchConfig;
use et_core::error::EtResult;
use et_core::generator::Waveform;
use et_core::run::Bench;
use et_core::sync::TriggerSynchronizer;
use std::sync::Arc;

/// Samples in the synthesized RF test waveform.
const TEST_WAVEFORM_LEN: usize = 4096;

/// Occupied tones in the synthesized RF test waveform.
const TEST_WAVEFORM_TONES: usize = 273;

/// Every simulated collaborator of one run, wired to a shared bench.
pub struct SimInstruments {
    pub sim: SimBench,
    pub rf: SimGenerator,
    pub envelope: SimGenerator,
    pub shaper: SimEnvelopeShaper,
    pub synchronizer: TriggerSynchronizer,
    pub session: MeasurementSession,
    iq_rate_hz: f64,
    seed: u64,
}

impl SimInstruments {
    pub fn new(config: &BenchConfig, sim_config: SimBenchConfig) -> EtResult<Self> {
        let seed = sim_config.seed;
        let sim = SimBench::new(sim_config)?;
        let instrument = Arc::new(SimInstrument::new(
            sim.clone(),
            &config.analyzer.resource_name,
        ));
        let engine = create_engine(config.analyzer.engine, &sim);
        Ok(Self {
            rf: SimGenerator::new(sim.clone(), GeneratorRole::Rf, &config.rf.resource_name),
            envelope: SimGenerator::new(
                sim.clone(),
                GeneratorRole::Envelope,
                &config.envelope.resource_name,
            ),
            shaper: SimEnvelopeShaper::new(),
            synchronizer: TriggerSynchronizer::new(),
            session: MeasurementSession::new(instrument, engine),
            iq_rate_hz: config.rf.iq_rate_hz,
            sim,
            seed,
        })
    }

    /// Borrow everything as the collaborators of one run.
    pub fn bench(&mut self) -> Bench<'_, MeasurementSession> {
        Bench {
            rf: &mut self.rf,
            envelope: &mut self.envelope,
            shaper: &self.shaper,
            synchronizer: &mut self.synchronizer,
            analyzer: &self.session,
        }
    }

    /// Seeded OFDM-like RF waveform at the configured IQ rate.
    pub fn waveform(&self) -> Waveform {
        ofdm_like_waveform(
            "nr_100mhz",
            self.iq_rate_hz,
            TEST_WAVEFORM_LEN,
            TEST_WAVEFORM_TONES,
            self.seed,
        )
    }
}
