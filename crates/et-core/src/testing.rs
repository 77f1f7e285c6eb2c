//! Recording test doubles shared by the unit tests.

use crate::analyzer::{AcpMeasurement, AcpRecord};
use crate::config::{AnalyzerConfig, GeneratorConfig, ShapingConfig};
use crate::error::{EtError, EtResult};
use crate::generator::{EnvelopeShaper, SignalGenerator, Waveform};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Ordered call log shared between doubles.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

/// Deterministic record for a result name ending in its step index.
pub fn record_for(result_name: &str) -> AcpRecord {
    let digits: String = result_name.chars().filter(|c| c.is_ascii_digit()).collect();
    let i: f64 = digits.parse().unwrap_or(0.0);
    AcpRecord {
        lower_relative_power: vec![-40.0 - i, -60.0],
        upper_relative_power: vec![-41.0 - i, -61.0],
        lower_absolute_power: vec![-50.0 - i, -70.0],
        upper_absolute_power: vec![-51.0 - i, -71.0],
        absolute_power: -10.0 + 0.1 * i,
        relative_power: 0.0,
    }
}

#[derive(Default)]
struct MockState {
    initiated: Vec<String>,
    fetched: HashSet<String>,
    stalled: HashSet<String>,
    failing: HashMap<String, i32>,
    closes: usize,
}

/// In-memory `AcpMeasurement` with fault injection.
pub struct MockMeasurement {
    journal: Journal,
    state: Mutex<MockState>,
}

impl MockMeasurement {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            state: Mutex::new(MockState::default()),
        }
    }

    /// The paced initiate of `name` times out.
    pub fn stall_initiate(&self, name: &str) {
        self.state.lock().unwrap().stalled.insert(name.to_string());
    }

    /// Fetching `name` fails with driver `code`.
    pub fn fail_fetch(&self, name: &str, code: i32) {
        self.state.lock().unwrap().failing.insert(name.to_string(), code);
    }

    pub fn initiated(&self) -> Vec<String> {
        self.state.lock().unwrap().initiated.clone()
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }
}

impl AcpMeasurement for MockMeasurement {
    fn configure(&self, _: &AnalyzerConfig) -> EtResult<()> {
        self.journal.push("analyzer configure");
        Ok(())
    }

    fn initiate(&self, result_name: &str, wait_for_prior: bool) -> EtResult<()> {
        let mut state = self.state.lock().unwrap();
        if wait_for_prior && state.stalled.contains(result_name) {
            return Err(EtError::Timeout {
                operation: "acquisition complete".into(),
                timeout: Duration::from_secs(10),
            });
        }
        state.initiated.push(result_name.to_string());
        self.journal
            .push(format!("initiate {result_name} wait={wait_for_prior}"));
        Ok(())
    }

    fn fetch_result(&self, result_name: &str) -> EtResult<AcpRecord> {
        let mut state = self.state.lock().unwrap();
        if !state.initiated.iter().any(|n| n == result_name) {
            return Err(EtError::NotInitiated(result_name.to_string()));
        }
        if let Some(&code) = state.failing.get(result_name) {
            return Err(EtError::from_driver(code, "injected", result_name));
        }
        if !state.fetched.insert(result_name.to_string()) {
            return Err(EtError::AlreadyFetched(result_name.to_string()));
        }
        Ok(record_for(result_name))
    }

    fn close(&self) {
        let mut state = self.state.lock().unwrap();
        if state.closes == 0 {
            self.journal.push("analyzer close");
        }
        state.closes += 1;
    }
}

/// Generator double logging trigger, delay and lifecycle calls.
pub struct MockGenerator {
    name: String,
    journal: Journal,
    delay_s: f64,
    pub fail_download: bool,
}

impl MockGenerator {
    pub fn new(name: &str, journal: Journal) -> Self {
        Self {
            name: name.to_string(),
            journal,
            delay_s: 0.0,
            fail_download: false,
        }
    }

    pub fn last_delay_s(&self) -> f64 {
        self.delay_s
    }
}

impl SignalGenerator for MockGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure(&mut self, _: &GeneratorConfig) -> EtResult<()> {
        self.journal.push(format!("{} configure", self.name));
        Ok(())
    }

    fn download_waveform(&mut self, waveform: &Waveform) -> EtResult<()> {
        if self.fail_download {
            return Err(EtError::Generator(format!("{} memory full", self.name)));
        }
        self.journal
            .push(format!("{} download {}", self.name, waveform.name));
        Ok(())
    }

    fn configure_continuous_generation(&mut self, waveform_name: &str, trigger_line: &str) -> EtResult<()> {
        self.journal.push(format!(
            "{} continuous {waveform_name} on {trigger_line}",
            self.name
        ));
        Ok(())
    }

    fn export_start_trigger(&mut self, line: &str) -> EtResult<()> {
        self.journal.push(format!("{} export {line}", self.name));
        Ok(())
    }

    fn set_start_trigger(&mut self, line: &str) -> EtResult<()> {
        self.journal.push(format!("{} start_on {line}", self.name));
        Ok(())
    }

    fn set_start_delay(&mut self, delay_s: f64) -> EtResult<()> {
        self.delay_s = delay_s;
        self.journal.push(format!(
            "{} delay {}ns",
            self.name,
            (delay_s * 1e9).round() as i64
        ));
        Ok(())
    }

    fn initiate(&mut self) -> EtResult<()> {
        self.journal.push(format!("{} initiate", self.name));
        Ok(())
    }

    fn abort(&mut self) -> EtResult<()> {
        self.journal.push(format!("{} abort", self.name));
        Ok(())
    }

    fn close(&mut self) {
        self.journal.push(format!("{} close", self.name));
    }
}

/// Shaper returning the magnitude of the RF waveform.
pub struct MagnitudeShaper;

impl EnvelopeShaper for MagnitudeShaper {
    fn create_envelope_waveform(&self, rf: &Waveform, _: &ShapingConfig) -> EtResult<Waveform> {
        let samples = rf
            .samples
            .iter()
            .map(|s| num_complex::Complex32::new(s.norm(), 0.0))
            .collect();
        Ok(Waveform::new(&format!("{}_env", rf.name), rf.sample_rate, samples))
    }
}
