//! Shared state of the simulated envelope tracking bench.
//!
//! The RF generator, envelope generator and analyzer of one bench all hold a
//! [`SimBench`]. Acquisitions are armed by `initiate` and triggered by the
//! next start edge of the RF generator: either a restart caused by a new
//! start delay, or the free-running edge of the looping waveform. Each
//! acquisition records the RF delay in force when it triggered, and the ACP
//! model turns that delay into adjacent-channel leakage.

use et_core::error::{EtError, EtResult};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, trace};

/// Driver status for a result name the engine never saw.
pub const RESULT_NOT_FOUND_CODE: i32 = -380418;

/// Parameters of the simulated device under test and instruments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimBenchConfig {
    /// RF/envelope delay at which ACP is lowest
    pub optimum_delay_s: f64,
    /// Delay error that raises ACP by about 6 dB
    pub delay_sensitivity_s: f64,
    /// Best-case first-offset ACP relative to the carrier (dB)
    pub acp_floor_db: f64,
    /// Extra rejection per additional offset (dB)
    pub offset_rolloff_db: f64,
    pub channel_power_dbm: f64,
    /// Standard deviation of measurement noise (dB)
    pub noise_db: f64,
    pub seed: u64,
    /// Fetch attempts answered "not ready" per result before analysis is done
    pub analysis_lag_fetches: usize,
    /// Interval of the free-running start edge of a looping waveform
    pub edge_period_ms: u64,
    /// Largest start delay the RF generator accepts, either sign
    pub max_start_delay_s: f64,
}

impl Default for SimBenchConfig {
    fn default() -> Self {
        Self {
            optimum_delay_s: 40.0e-9,
            delay_sensitivity_s: 16.0e-9,
            acp_floor_db: -48.0,
            offset_rolloff_db: 12.0,
            channel_power_dbm: -10.0,
            noise_db: 0.05,
            seed: 42,
            analysis_lag_fetches: 1,
            edge_period_ms: 50,
            max_start_delay_s: 10.0e-6,
        }
    }
}

/// Which generator a simulated session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorRole {
    Rf,
    Envelope,
}

#[derive(Debug, Clone)]
pub(crate) struct Acquisition {
    pub delay_s: Option<f64>,
    pub noise_db: [f64; 3],
}

pub(crate) struct BenchState {
    pub config: SimBenchConfig,
    pub rf_delay_s: f64,
    pub rf_generating: bool,
    pub envelope_generating: bool,
    pub acquisitions: HashMap<String, Acquisition>,
    /// Armed acquisitions waiting for a start edge, in initiate order
    pub armed: Vec<String>,
    pub fetch_attempts: HashMap<String, usize>,
    pub not_ready: HashMap<String, usize>,
    pub failing: HashMap<String, i32>,
    pub stalled: HashSet<String>,
    pub journal: Vec<String>,
    rng: StdRng,
    noise: Normal<f64>,
}

impl BenchState {
    /// Fire a start edge: every armed acquisition triggers at the current delay.
    pub fn fire_edge(&mut self) {
        if !self.rf_generating {
            return;
        }
        let armed = std::mem::take(&mut self.armed);
        for name in armed {
            if self.stalled.contains(&name) {
                self.armed.push(name);
                continue;
            }
            let noise = [
                self.noise.sample(&mut self.rng),
                self.noise.sample(&mut self.rng),
                self.noise.sample(&mut self.rng),
            ];
            if let Some(acq) = self.acquisitions.get_mut(&name) {
                acq.delay_s = Some(self.rf_delay_s);
                acq.noise_db = noise;
                trace!(result_name = %name, delay_s = self.rf_delay_s, "Acquisition triggered");
            }
        }
    }

    pub fn log(&mut self, entry: String) {
        self.journal.push(entry);
    }
}

/// Handle to one simulated bench, cheap to clone.
#[derive(Clone)]
pub struct SimBench {
    inner: Arc<(Mutex<BenchState>, Condvar)>,
}

impl SimBench {
    pub fn new(config: SimBenchConfig) -> EtResult<Self> {
        if !(config.noise_db >= 0.0) {
            return Err(EtError::Config(format!(
                "noise_db {} must be non-negative",
                config.noise_db
            )));
        }
        if !(config.delay_sensitivity_s > 0.0) {
            return Err(EtError::Config(format!(
                "delay_sensitivity_s {} must be positive",
                config.delay_sensitivity_s
            )));
        }
        let noise = Normal::new(0.0, config.noise_db)
            .map_err(|e| EtError::Config(format!("noise_db {}: {}", config.noise_db, e)))?;
        let rng = StdRng::seed_from_u64(config.seed);
        let state = BenchState {
            config,
            rf_delay_s: 0.0,
            rf_generating: false,
            envelope_generating: false,
            acquisitions: HashMap::new(),
            armed: Vec::new(),
            fetch_attempts: HashMap::new(),
            not_ready: HashMap::new(),
            failing: HashMap::new(),
            stalled: HashSet::new(),
            journal: Vec::new(),
            rng,
            noise,
        };
        Ok(Self {
            inner: Arc::new((Mutex::new(state), Condvar::new())),
        })
    }

    pub fn config(&self) -> SimBenchConfig {
        self.state().config.clone()
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, BenchState> {
        self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wake any fetch waiting for a start edge.
    pub(crate) fn notify(&self) {
        self.inner.1.notify_all();
    }

    /// Block until `done` holds or `timeout` passes. Returns the guard and
    /// whether the condition was met.
    pub(crate) fn wait_until<'a>(
        &'a self,
        guard: MutexGuard<'a, BenchState>,
        timeout: Duration,
        mut done: impl FnMut(&BenchState) -> bool,
    ) -> (MutexGuard<'a, BenchState>, bool) {
        let (guard, result) = self
            .inner
            .1
            .wait_timeout_while(guard, timeout, |state| !done(state))
            .unwrap_or_else(PoisonError::into_inner);
        (guard, !result.timed_out())
    }

    /// Answer the next `count` fetches of `result_name` with "not ready".
    pub fn not_ready_responses(&self, result_name: &str, count: usize) {
        self.state().not_ready.insert(result_name.to_string(), count);
    }

    /// Make every fetch of `result_name` fail with driver `code`.
    pub fn fail_fetch(&self, result_name: &str, code: i32) {
        self.state().failing.insert(result_name.to_string(), code);
    }

    /// The acquisition for `result_name` never triggers.
    pub fn stall_acquisition(&self, result_name: &str) {
        self.state().stalled.insert(result_name.to_string());
    }

    /// Current RF start delay.
    pub fn rf_delay_s(&self) -> f64 {
        self.state().rf_delay_s
    }

    pub fn is_generating(&self, role: GeneratorRole) -> bool {
        let state = self.state();
        match role {
            GeneratorRole::Rf => state.rf_generating,
            GeneratorRole::Envelope => state.envelope_generating,
        }
    }

    /// Delay each acquisition triggered at, if it has.
    pub fn captured_delay_s(&self, result_name: &str) -> Option<f64> {
        self.state()
            .acquisitions
            .get(result_name)
            .and_then(|a| a.delay_s)
    }

    /// Number of fetch attempts made for `result_name`.
    pub fn fetch_attempts(&self, result_name: &str) -> usize {
        self.state()
            .fetch_attempts
            .get(result_name)
            .copied()
            .unwrap_or(0)
    }

    /// Call log of all simulated instruments on this bench.
    pub fn journal(&self) -> Vec<String> {
        self.state().journal.clone()
    }

    pub(crate) fn set_rf_delay(&self, delay_s: f64) {
        let mut state = self.state();
        state.rf_delay_s = delay_s;
        state.fire_edge();
        debug!(delay_s, "RF start delay applied");
        drop(state);
        self.notify();
    }

    pub(crate) fn set_generating(&self, role: GeneratorRole, on: bool) {
        let mut state = self.state();
        match role {
            GeneratorRole::Rf => state.rf_generating = on,
            GeneratorRole::Envelope => state.envelope_generating = on,
        }
        drop(state);
        self.notify();
    }
}

/// ACP in dB relative to the carrier for a delay error.
pub(crate) fn acp_relative_db(config: &SimBenchConfig, delay_s: f64, offset: usize) -> f64 {
    let error = (delay_s - config.optimum_delay_s) / config.delay_sensitivity_s;
    config.acp_floor_db + 10.0 * (1.0 + 3.0 * error * error).log10()
        - config.offset_rolloff_db * offset as f64
}
