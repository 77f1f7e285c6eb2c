//! Simulated RF and envelope generators.

use crate::bench::{GeneratorRole, SimBench};
use et_core::config::GeneratorConfig;
use et_core::error::{EtError, EtResult};
use et_core::generator::{SignalGenerator, Waveform};
use std::collections::HashMap;
use tracing::{debug, info};

/// Simulated arbitrary waveform generator.
///
/// Enforces the driver's call order: configure, download, continuous
/// generation, then initiate. The RF role publishes its start delay to the
/// bench, where it re-times armed acquisitions.
pub struct SimGenerator {
    bench: SimBench,
    role: GeneratorRole,
    name: String,
    config: Option<GeneratorConfig>,
    /// Downloaded waveforms by name, with their sample counts
    waveforms: HashMap<String, usize>,
    continuous: Option<String>,
    start_trigger: Option<String>,
    exported_trigger: Option<String>,
    delay_s: f64,
    generating: bool,
    closed: bool,
}

impl SimGenerator {
    pub fn new(bench: SimBench, role: GeneratorRole, name: &str) -> Self {
        Self {
            bench,
            role,
            name: name.to_string(),
            config: None,
            waveforms: HashMap::new(),
            continuous: None,
            start_trigger: None,
            exported_trigger: None,
            delay_s: 0.0,
            generating: false,
            closed: false,
        }
    }

    pub fn role(&self) -> GeneratorRole {
        self.role
    }

    pub fn delay_s(&self) -> f64 {
        self.delay_s
    }

    pub fn is_generating(&self) -> bool {
        self.generating
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Line this generator exports its start edge on, if any.
    pub fn exported_trigger(&self) -> Option<&str> {
        self.exported_trigger.as_deref()
    }

    pub fn has_waveform(&self, name: &str) -> bool {
        self.waveforms.contains_key(name)
    }

    fn check_open(&self) -> EtResult<()> {
        if self.closed {
            Err(EtError::Generator(format!("{} is closed", self.name)))
        } else {
            Ok(())
        }
    }

    fn journal(&self, entry: String) {
        self.bench.state().log(format!("{} {}", self.name, entry));
    }
}

impl SignalGenerator for SimGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure(&mut self, config: &GeneratorConfig) -> EtResult<()> {
        self.check_open()?;
        if !(config.iq_rate_hz > 0.0) {
            return Err(EtError::Generator(format!(
                "{}: IQ rate {} Hz",
                self.name, config.iq_rate_hz
            )));
        }
        self.config = Some(config.clone());
        self.journal("configure".to_string());
        debug!(
            generator = %self.name,
            carrier_hz = config.carrier_frequency_hz,
            power_dbm = config.power_level_dbm,
            "Generator configured"
        );
        Ok(())
    }

    fn download_waveform(&mut self, waveform: &Waveform) -> EtResult<()> {
        self.check_open()?;
        if self.config.is_none() {
            return Err(EtError::Generator(format!(
                "{}: download before configure",
                self.name
            )));
        }
        if waveform.samples.is_empty() {
            return Err(EtError::Generator(format!(
                "{}: waveform '{}' has no samples",
                self.name, waveform.name
            )));
        }
        self.waveforms
            .insert(waveform.name.clone(), waveform.samples.len());
        self.journal(format!("download {}", waveform.name));
        Ok(())
    }

    fn configure_continuous_generation(
        &mut self,
        waveform_name: &str,
        trigger_line: &str,
    ) -> EtResult<()> {
        self.check_open()?;
        if !self.waveforms.contains_key(waveform_name) {
            return Err(EtError::Generator(format!(
                "{}: waveform '{}' not downloaded",
                self.name, waveform_name
            )));
        }
        self.continuous = Some(waveform_name.to_string());
        self.journal(format!("continuous {waveform_name} on {trigger_line}"));
        Ok(())
    }

    fn export_start_trigger(&mut self, line: &str) -> EtResult<()> {
        self.check_open()?;
        if line.is_empty() {
            return Err(EtError::Generator(format!("{}: empty export line", self.name)));
        }
        self.exported_trigger = Some(line.to_string());
        self.journal(format!("export {line}"));
        Ok(())
    }

    fn set_start_trigger(&mut self, line: &str) -> EtResult<()> {
        self.check_open()?;
        if line.is_empty() {
            return Err(EtError::Generator(format!("{}: empty trigger line", self.name)));
        }
        self.start_trigger = Some(line.to_string());
        self.journal(format!("start_on {line}"));
        Ok(())
    }

    fn set_start_delay(&mut self, delay_s: f64) -> EtResult<()> {
        self.check_open()?;
        let max = self.bench.config().max_start_delay_s;
        if !delay_s.is_finite() || delay_s.abs() > max {
            return Err(EtError::Generator(format!(
                "{}: start delay {delay_s} s outside ±{max} s",
                self.name
            )));
        }
        self.delay_s = delay_s;
        self.journal(format!("delay {:.0}ns", delay_s * 1e9));
        if self.role == GeneratorRole::Rf {
            self.bench.set_rf_delay(delay_s);
        }
        Ok(())
    }

    fn initiate(&mut self) -> EtResult<()> {
        self.check_open()?;
        if self.continuous.is_none() {
            return Err(EtError::Generator(format!(
                "{}: no waveform selected for generation",
                self.name
            )));
        }
        if self.role == GeneratorRole::Envelope && self.start_trigger.is_none() {
            return Err(EtError::Generator(format!(
                "{}: envelope generator has no start trigger",
                self.name
            )));
        }
        self.generating = true;
        self.bench.set_generating(self.role, true);
        self.journal("initiate".to_string());
        info!(generator = %self.name, "Generation started");
        Ok(())
    }

    fn abort(&mut self) -> EtResult<()> {
        self.check_open()?;
        self.generating = false;
        self.bench.set_generating(self.role, false);
        self.journal("abort".to_string());
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        if self.generating {
            self.generating = false;
            self.bench.set_generating(self.role, false);
        }
        self.closed = true;
        self.journal("close".to_string());
        info!(generator = %self.name, "Generator closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench::SimBenchConfig;
    use num_complex::Complex32;

    fn waveform(name: &str) -> Waveform {
        Waveform::new(name, 122.88e6, vec![Complex32::new(0.5, 0.0); 16])
    }

    fn ready(bench: &SimBench, role: GeneratorRole, name: &str) -> SimGenerator {
        let mut gen = SimGenerator::new(bench.clone(), role, name);
        gen.configure(&GeneratorConfig::default()).unwrap();
        gen.download_waveform(&waveform("nr100")).unwrap();
        gen.configure_continuous_generation("nr100", "PXI_Trig1").unwrap();
        gen
    }

    #[test]
    fn test_call_order_enforced() {
        let bench = SimBench::new(SimBenchConfig::default()).unwrap();
        let mut gen = SimGenerator::new(bench, GeneratorRole::Rf, "rf");
        assert!(gen.download_waveform(&waveform("a")).is_err());
        gen.configure(&GeneratorConfig::default()).unwrap();
        assert!(gen.configure_continuous_generation("a", "PXI_Trig1").is_err());
        assert!(gen.initiate().is_err());
        gen.download_waveform(&waveform("a")).unwrap();
        gen.configure_continuous_generation("a", "PXI_Trig1").unwrap();
        gen.initiate().unwrap();
        assert!(gen.is_generating());
    }

    #[test]
    fn test_rf_delay_reaches_bench() {
        let bench = SimBench::new(SimBenchConfig::default()).unwrap();
        let mut rf = ready(&bench, GeneratorRole::Rf, "rf");
        let mut env = ready(&bench, GeneratorRole::Envelope, "env");

        rf.set_start_delay(3.0e-9).unwrap();
        env.set_start_delay(7.0e-9).unwrap();
        assert_eq!(bench.rf_delay_s(), 3.0e-9);
        assert_eq!(env.delay_s(), 7.0e-9);
    }

    #[test]
    fn test_delay_range() {
        let bench = SimBench::new(SimBenchConfig::default()).unwrap();
        let mut rf = ready(&bench, GeneratorRole::Rf, "rf");
        assert!(rf.set_start_delay(20.0e-6).is_err());
        assert!(rf.set_start_delay(f64::NAN).is_err());
        rf.set_start_delay(-10.0e-6).unwrap();
    }

    #[test]
    fn test_envelope_needs_start_trigger() {
        let bench = SimBench::new(SimBenchConfig::default()).unwrap();
        let mut env = ready(&bench, GeneratorRole::Envelope, "env");
        assert!(env.initiate().is_err());
        env.set_start_trigger("PXI_Trig0").unwrap();
        env.initiate().unwrap();
        assert!(bench.is_generating(GeneratorRole::Envelope));
    }

    #[test]
    fn test_close_stops_generation_once() {
        let bench = SimBench::new(SimBenchConfig::default()).unwrap();
        let mut rf = ready(&bench, GeneratorRole::Rf, "rf");
        rf.initiate().unwrap();
        rf.close();
        rf.close();
        assert!(!bench.is_generating(GeneratorRole::Rf));
        assert!(rf.set_start_delay(0.0).is_err());
        let closes = bench.journal().iter().filter(|e| *e == "rf close").count();
        assert_eq!(closes, 1);
    }
}
