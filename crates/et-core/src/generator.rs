//! Generator and envelope-shaping collaborators.
//!
//! The RF generator plays the modulated carrier; the envelope generator plays
//! a supply waveform derived from the RF waveform's magnitude. Both are thin
//! wrappers around vendor drivers, so only the calls the bench makes are
//! modelled here.

use crate::config::{GeneratorConfig, ShapingConfig, TrackerConfig};
use crate::error::EtResult;
use num_complex::Complex32;

/// Baseband waveform ready for download into a generator.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub name: String,
    pub sample_rate: f64,
    pub samples: Vec<Complex32>,
    /// Peak to average power ratio in dB
    pub papr_db: f64,
}

impl Waveform {
    pub fn new(name: &str, sample_rate: f64, samples: Vec<Complex32>) -> Self {
        let papr_db = papr_db(&samples);
        Self {
            name: name.to_string(),
            sample_rate,
            samples,
            papr_db,
        }
    }

    /// Playback length in seconds.
    pub fn duration_s(&self) -> f64 {
        if self.sample_rate > 0.0 {
            self.samples.len() as f64 / self.sample_rate
        } else {
            0.0
        }
    }
}

fn papr_db(samples: &[Complex32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let powers = samples.iter().map(|s| s.norm_sqr() as f64);
    let (peak, sum) = powers.fold((0.0_f64, 0.0_f64), |(p, s), x| (p.max(x), s + x));
    let mean = sum / samples.len() as f64;
    if mean > 0.0 {
        10.0 * (peak / mean).log10()
    } else {
        0.0
    }
}

/// Signal generator session.
pub trait SignalGenerator: Send {
    /// Resource name of the generator.
    fn name(&self) -> &str;

    /// Apply frequency, power level and reference clock.
    fn configure(&mut self, config: &GeneratorConfig) -> EtResult<()>;

    /// Download a waveform into generator memory.
    fn download_waveform(&mut self, waveform: &Waveform) -> EtResult<()>;

    /// Loop `waveform_name` continuously, starting on `trigger_line`.
    fn configure_continuous_generation(&mut self, waveform_name: &str, trigger_line: &str) -> EtResult<()>;

    /// Route this generator's start edge to `line`.
    fn export_start_trigger(&mut self, line: &str) -> EtResult<()>;

    /// Start on an edge received on `line`.
    fn set_start_trigger(&mut self, line: &str) -> EtResult<()>;

    /// Absolute waveform start offset relative to the start edge.
    fn set_start_delay(&mut self, delay_s: f64) -> EtResult<()>;

    /// Arm / start generation.
    fn initiate(&mut self) -> EtResult<()>;

    /// Stop generation.
    fn abort(&mut self) -> EtResult<()>;

    /// Release the session. Idempotent.
    fn close(&mut self);
}

/// Derives an envelope waveform from an RF waveform. The shaping maths
/// itself lives behind this trait.
pub trait EnvelopeShaper: Send {
    fn create_envelope_waveform(&self, rf: &Waveform, shaping: &ShapingConfig) -> EtResult<Waveform>;
}

/// Scale an envelope waveform into tracker output volts.
pub fn scale_for_tracker(envelope: &Waveform, tracker: &TrackerConfig) -> Waveform {
    let samples = envelope
        .samples
        .iter()
        .map(|s| {
            Complex32::new(
                (s.re as f64 / tracker.gain_v_per_v - tracker.common_mode_offset_v) as f32,
                0.0,
            )
        })
        .collect();
    Waveform {
        name: format!("{}_scaled", envelope.name),
        sample_rate: envelope.sample_rate,
        samples,
        papr_db: envelope.papr_db,
    }
}
