//! # Simulated ACP Analyzer
//!
//! Instrument connection and the two analysis engines, backed by a
//! [`SimBench`].
//!
//! - [`SimInstrument`]: frequency reference, acquisition-complete waits, close
//! - [`NrAcpEngine`]: NR component-carrier ACP; checks subcarrier spacing and
//!   carrier bandwidth against the NR numerology
//! - [`SpecAnAcpEngine`]: general spectrum-analysis ACP; integrates a noise
//!   floor into every offset unless noise compensation is enabled
//!
//! Both engines answer "not ready" for the first
//! [`SimBenchConfig::analysis_lag_fetches`](crate::SimBenchConfig) fetch
//! attempts of each result, as real analysis runs behind acquisition.

use crate::bench::{acp_relative_db, Acquisition, BenchState, SimBench, RESULT_NOT_FOUND_CODE};
use et_core::analyzer::{AcpRecord, AnalysisEngine, InstrumentLink};
use et_core::config::{AnalyzerConfig, EngineKind, FrequencyReference};
use et_core::error::{EtError, EtResult, RESULT_NOT_READY_CODE};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

/// Upper side leaks slightly more than lower on the simulated PA.
const UPPER_ASYMMETRY_DB: f64 = 0.6;

/// Integrated noise floor of the spectrum engine without compensation (dBc).
const SPECAN_NOISE_FLOOR_DBC: f64 = -62.0;

/// NR subcarrier spacings (Hz).
const NR_SUBCARRIER_SPACINGS: [f64; 4] = [15.0e3, 30.0e3, 60.0e3, 120.0e3];

/// Widest NR component carrier (Hz).
const NR_MAX_BANDWIDTH_HZ: f64 = 400.0e6;

// =============================================================================
// Instrument connection
// =============================================================================

/// Simulated analyzer connection.
pub struct SimInstrument {
    bench: SimBench,
    resource_name: String,
    closed: AtomicBool,
}

impl SimInstrument {
    pub fn new(bench: SimBench, resource_name: &str) -> Self {
        Self {
            bench,
            resource_name: resource_name.to_string(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_open(&self) -> EtResult<()> {
        if self.is_closed() {
            Err(EtError::SessionClosed)
        } else {
            Ok(())
        }
    }
}

impl InstrumentLink for SimInstrument {
    fn resource_name(&self) -> &str {
        &self.resource_name
    }

    fn configure_frequency_reference(&self, reference: &FrequencyReference) -> EtResult<()> {
        self.check_open()?;
        if !(reference.frequency_hz > 0.0) {
            return Err(EtError::Config(format!(
                "reference clock {} Hz on {}",
                reference.frequency_hz, reference.source
            )));
        }
        self.bench
            .state()
            .log(format!("analyzer reference {}", reference.source));
        Ok(())
    }

    fn wait_for_acquisition_complete(&self, timeout: Duration) -> EtResult<()> {
        self.check_open()?;
        let pending = {
            let mut state = self.bench.state();
            state.log("analyzer wait".to_string());
            state.fire_edge();
            state.armed.len()
        };
        self.bench.notify();
        if pending == 0 {
            Ok(())
        } else {
            debug!(pending, "Acquisition never triggered");
            Err(EtError::Timeout {
                operation: "acquisition complete".to_string(),
                timeout,
            })
        }
    }

    fn close(&self) -> EtResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.bench.state().log("analyzer close".to_string());
            info!(resource = %self.resource_name, "Simulated analyzer closed");
        }
        Ok(())
    }
}

// =============================================================================
// Shared engine machinery
// =============================================================================

#[derive(Default)]
struct EngineState {
    config: Option<AnalyzerConfig>,
    disposed: bool,
}

/// Bookkeeping common to both engine variants.
struct EngineCore {
    bench: SimBench,
    kind: EngineKind,
    state: Mutex<EngineState>,
}

impl EngineCore {
    fn new(bench: SimBench, kind: EngineKind) -> Self {
        Self {
            bench,
            kind,
            state: Mutex::new(EngineState::default()),
        }
    }

    fn label(&self) -> &'static str {
        match self.kind {
            EngineKind::NrCarrier => "nr",
            EngineKind::SpectrumAnalysis => "specan",
        }
    }

    fn configure(&self, config: &AnalyzerConfig) -> EtResult<()> {
        if config.engine != self.kind {
            return Err(EtError::Config(format!(
                "{:?} configuration applied to {:?} engine",
                config.engine, self.kind
            )));
        }
        if config.number_of_offsets == 0 {
            return Err(EtError::Config("at least one ACP offset is required".into()));
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.disposed {
            return Err(EtError::SessionClosed);
        }
        state.config = Some(config.clone());
        self.bench
            .state()
            .log(format!("analyzer configure {}", self.label()));
        Ok(())
    }

    fn active_config(&self) -> EtResult<AnalyzerConfig> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.disposed {
            return Err(EtError::SessionClosed);
        }
        state
            .config
            .clone()
            .ok_or_else(|| EtError::Config(format!("{} engine is not configured", self.label())))
    }

    fn initiate(&self, result_name: &str) -> EtResult<()> {
        self.active_config()?;
        let mut state = self.bench.state();
        state.acquisitions.insert(
            result_name.to_string(),
            Acquisition {
                delay_s: None,
                noise_db: [0.0; 3],
            },
        );
        state.armed.push(result_name.to_string());
        state.log(format!("analyzer initiate {result_name}"));
        Ok(())
    }

    /// Wait for the acquisition, apply fault injection and analysis lag, and
    /// hand the triggered acquisition to `build`.
    fn fetch(
        &self,
        result_name: &str,
        timeout: Duration,
        build: impl FnOnce(&BenchState, &AnalyzerConfig, &Acquisition, f64) -> AcpRecord,
    ) -> EtResult<AcpRecord> {
        let analyzer = self.active_config()?;
        let mut state = self.bench.state();
        state.log(format!("analyzer fetch {result_name}"));
        let attempts = {
            let n = state
                .fetch_attempts
                .entry(result_name.to_string())
                .or_insert(0);
            *n += 1;
            *n
        };

        if !state.acquisitions.contains_key(result_name) {
            return Err(EtError::Driver {
                code: RESULT_NOT_FOUND_CODE,
                message: format!("result name '{result_name}' not found"),
            });
        }
        if let Some(&code) = state.failing.get(result_name) {
            return Err(EtError::from_driver(code, "injected fetch failure", result_name));
        }

        if !is_triggered(&state, result_name) {
            if state.stalled.contains(result_name) {
                return Err(fetch_timeout(result_name, timeout));
            }
            let edge_period = Duration::from_millis(state.config.edge_period_ms);
            let (guard, triggered) = self
                .bench
                .wait_until(state, edge_period, |s| is_triggered(s, result_name));
            state = guard;
            if !triggered {
                state.fire_edge();
            }
            if !is_triggered(&state, result_name) {
                return Err(fetch_timeout(result_name, timeout));
            }
        }

        let lag_limit = state.config.analysis_lag_fetches;
        let lagging = match state.not_ready.get_mut(result_name) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            Some(_) => false,
            None => attempts <= lag_limit,
        };
        if lagging {
            return Err(EtError::from_driver(
                RESULT_NOT_READY_CODE,
                "analysis not complete",
                result_name,
            ));
        }

        let acquisition = state
            .acquisitions
            .get(result_name)
            .cloned()
            .ok_or_else(|| EtError::Driver {
                code: RESULT_NOT_FOUND_CODE,
                message: format!("result name '{result_name}' not found"),
            })?;
        let delay_s = acquisition.delay_s.unwrap_or(state.rf_delay_s);
        Ok(build(&*state, &analyzer, &acquisition, delay_s))
    }

    fn dispose(&self) -> EtResult<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.disposed {
            state.disposed = true;
            state.config = None;
            self.bench
                .state()
                .log(format!("analyzer dispose {}", self.label()));
        }
        Ok(())
    }
}

fn is_triggered(state: &BenchState, result_name: &str) -> bool {
    state
        .acquisitions
        .get(result_name)
        .is_some_and(|a| a.delay_s.is_some())
}

fn fetch_timeout(result_name: &str, timeout: Duration) -> EtError {
    EtError::Timeout {
        operation: format!("fetch of '{result_name}'"),
        timeout,
    }
}

/// Per-offset ACP arrays around the modelled leakage. `shape` post-processes
/// each relative power.
fn acp_record(
    state: &BenchState,
    analyzer: &AnalyzerConfig,
    acquisition: &Acquisition,
    delay_s: f64,
    shape: impl Fn(f64) -> f64,
) -> AcpRecord {
    let cfg = &state.config;
    let [lower_noise, upper_noise, power_noise] = acquisition.noise_db;
    let channel_power = cfg.channel_power_dbm + power_noise;

    let mut record = AcpRecord {
        absolute_power: channel_power,
        relative_power: 0.0,
        ..Default::default()
    };
    for offset in 0..analyzer.number_of_offsets {
        let base = acp_relative_db(cfg, delay_s, offset);
        let lower = shape(base + lower_noise);
        let upper = shape(base + UPPER_ASYMMETRY_DB + upper_noise);
        record.lower_relative_power.push(lower);
        record.upper_relative_power.push(upper);
        record.lower_absolute_power.push(channel_power + lower);
        record.upper_absolute_power.push(channel_power + upper);
    }
    record
}

/// Power sum of two dB values.
fn db_sum(a: f64, b: f64) -> f64 {
    10.0 * (10f64.powf(a / 10.0) + 10f64.powf(b / 10.0)).log10()
}

// =============================================================================
// Engines
// =============================================================================

/// Simulated NR component-carrier ACP engine.
pub struct NrAcpEngine {
    core: EngineCore,
}

impl NrAcpEngine {
    pub fn new(bench: SimBench) -> Self {
        Self {
            core: EngineCore::new(bench, EngineKind::NrCarrier),
        }
    }
}

impl AnalysisEngine for NrAcpEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::NrCarrier
    }

    fn configure(&self, config: &AnalyzerConfig) -> EtResult<()> {
        if !NR_SUBCARRIER_SPACINGS.contains(&config.subcarrier_spacing_hz) {
            return Err(EtError::Config(format!(
                "subcarrier spacing {} Hz is not an NR numerology",
                config.subcarrier_spacing_hz
            )));
        }
        if config.bandwidth_hz > NR_MAX_BANDWIDTH_HZ {
            return Err(EtError::Config(format!(
                "component carrier bandwidth {} Hz exceeds {} Hz",
                config.bandwidth_hz, NR_MAX_BANDWIDTH_HZ
            )));
        }
        self.core.configure(config)
    }

    fn initiate(&self, result_name: &str) -> EtResult<()> {
        self.core.initiate(result_name)
    }

    fn fetch_acp(&self, result_name: &str, timeout: Duration) -> EtResult<AcpRecord> {
        self.core
            .fetch(result_name, timeout, |state, analyzer, acq, delay_s| {
                acp_record(state, analyzer, acq, delay_s, |db| db)
            })
    }

    fn dispose(&self) -> EtResult<()> {
        self.core.dispose()
    }
}

/// Simulated general spectrum-analysis ACP engine.
pub struct SpecAnAcpEngine {
    core: EngineCore,
}

impl SpecAnAcpEngine {
    pub fn new(bench: SimBench) -> Self {
        Self {
            core: EngineCore::new(bench, EngineKind::SpectrumAnalysis),
        }
    }
}

impl AnalysisEngine for SpecAnAcpEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::SpectrumAnalysis
    }

    fn configure(&self, config: &AnalyzerConfig) -> EtResult<()> {
        self.core.configure(config)
    }

    fn initiate(&self, result_name: &str) -> EtResult<()> {
        self.core.initiate(result_name)
    }

    fn fetch_acp(&self, result_name: &str, timeout: Duration) -> EtResult<AcpRecord> {
        self.core
            .fetch(result_name, timeout, |state, analyzer, acq, delay_s| {
                if analyzer.noise_compensation {
                    acp_record(state, analyzer, acq, delay_s, |db| db)
                } else {
                    acp_record(state, analyzer, acq, delay_s, |db| {
                        db_sum(db, SPECAN_NOISE_FLOOR_DBC)
                    })
                }
            })
    }

    fn dispose(&self) -> EtResult<()> {
        self.core.dispose()
    }
}

/// Create the engine variant for `kind` on `bench`.
pub fn create_engine(kind: EngineKind, bench: &SimBench) -> Arc<dyn AnalysisEngine> {
    match kind {
        EngineKind::NrCarrier => Arc::new(NrAcpEngine::new(bench.clone())),
        EngineKind::SpectrumAnalysis => Arc::new(SpecAnAcpEngine::new(bench.clone())),
    }
}
