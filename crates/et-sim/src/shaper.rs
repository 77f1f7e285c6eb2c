//! Simulated envelope shaping and test waveform synthesis.

use et_core::config::{DetroughConfig, LookUpTableConfig, ShapingConfig};
use et_core::error::{EtError, EtResult};
use et_core::generator::{EnvelopeShaper, Waveform};
use num_complex::Complex32;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::TAU;

/// Maps RF magnitude into supply voltage.
///
/// Detrough mode scales the peak-normalized magnitude to the maximum voltage
/// and clamps it into the voltage window. Lookup-table mode converts each
/// sample to instantaneous input power around the DUT average and
/// interpolates the table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimEnvelopeShaper;

impl SimEnvelopeShaper {
    pub fn new() -> Self {
        Self
    }
}

impl EnvelopeShaper for SimEnvelopeShaper {
    fn create_envelope_waveform(&self, rf: &Waveform, shaping: &ShapingConfig) -> EtResult<Waveform> {
        if rf.samples.is_empty() {
            return Err(EtError::Generator(format!("waveform '{}' is empty", rf.name)));
        }
        let volts = match shaping {
            ShapingConfig::Detrough(cfg) => detrough(rf, cfg)?,
            ShapingConfig::LookupTable(cfg) => lookup(rf, cfg)?,
        };
        let samples = volts
            .into_iter()
            .map(|v| Complex32::new(v as f32, 0.0))
            .collect();
        Ok(Waveform::new(&format!("{}_env", rf.name), rf.sample_rate, samples))
    }
}

fn detrough(rf: &Waveform, cfg: &DetroughConfig) -> EtResult<Vec<f64>> {
    if !(cfg.minimum_voltage_v >= 0.0 && cfg.minimum_voltage_v < cfg.maximum_voltage_v) {
        return Err(EtError::Config(format!(
            "detrough window {}..{} V",
            cfg.minimum_voltage_v, cfg.maximum_voltage_v
        )));
    }
    let peak = rf
        .samples
        .iter()
        .map(|s| s.norm() as f64)
        .fold(0.0_f64, f64::max);
    if peak == 0.0 {
        return Ok(vec![cfg.minimum_voltage_v; rf.samples.len()]);
    }
    Ok(rf
        .samples
        .iter()
        .map(|s| {
            (s.norm() as f64 / peak * cfg.maximum_voltage_v)
                .clamp(cfg.minimum_voltage_v, cfg.maximum_voltage_v)
        })
        .collect())
}

fn lookup(rf: &Waveform, cfg: &LookUpTableConfig) -> EtResult<Vec<f64>> {
    if cfg.table.is_empty() {
        return Err(EtError::Config("lookup table is empty".into()));
    }
    let mut table = cfg.table.clone();
    table.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mean_power =
        rf.samples.iter().map(|s| s.norm_sqr() as f64).sum::<f64>() / rf.samples.len() as f64;
    if mean_power == 0.0 {
        return Ok(vec![table[0].1; rf.samples.len()]);
    }
    Ok(rf
        .samples
        .iter()
        .map(|s| {
            let p = s.norm_sqr() as f64 / mean_power;
            let dbm = if p > 0.0 {
                cfg.dut_average_input_power_dbm + 10.0 * p.log10()
            } else {
                f64::NEG_INFINITY
            };
            interpolate(&table, dbm)
        })
        .collect())
}

/// Piecewise-linear interpolation, held flat beyond either end.
fn interpolate(table: &[(f64, f64)], x: f64) -> f64 {
    let first = table[0];
    let last = table[table.len() - 1];
    if x <= first.0 {
        return first.1;
    }
    if x >= last.0 {
        return last.1;
    }
    for pair in table.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        if x <= x1 {
            if x1 == x0 {
                return y1;
            }
            return y0 + (y1 - y0) * (x - x0) / (x1 - x0);
        }
    }
    last.1
}

/// Multi-tone waveform with random subcarrier phases, a stand-in for an
/// OFDM carrier. Deterministic for a given `seed`.
pub fn ofdm_like_waveform(
    name: &str,
    sample_rate: f64,
    len: usize,
    subcarriers: usize,
    seed: u64,
) -> Waveform {
    let mut rng = StdRng::seed_from_u64(seed);
    let phases: Vec<f64> = (0..subcarriers).map(|_| rng.gen_range(0.0..TAU)).collect();
    let half = subcarriers as f64 / 2.0;
    let scale = if subcarriers > 0 {
        1.0 / (subcarriers as f64).sqrt()
    } else {
        0.0
    };

    let samples = (0..len)
        .map(|n| {
            let (re, im) = phases
                .iter()
                .enumerate()
                .fold((0.0, 0.0), |(re, im), (k, phase)| {
                    let bin = k as f64 - half;
                    let arg = TAU * bin * n as f64 / len as f64 + phase;
                    (re + arg.cos(), im + arg.sin())
                });
            Complex32::new((re * scale) as f32, (im * scale) as f32)
        })
        .collect();
    Waveform::new(name, sample_rate, samples)
}
