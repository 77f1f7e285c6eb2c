//! Measurement session over one analyzer connection.
//!
//! Lifecycle: `Unconfigured → Configured → Initiated → Closed`. The session
//! keeps track of which result names were initiated and fetched so a fetch
//! can never return data for a measurement that was not started.

use super::{fetch_with_single_retry, AcpMeasurement, AcpRecord, AnalysisEngine, InstrumentLink};
use crate::config::AnalyzerConfig;
use crate::error::{EtError, EtResult};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Unconfigured,
    Configured,
    Initiated,
    Closed,
}

#[derive(Debug)]
struct SessionState {
    lifecycle: Lifecycle,
    config: Option<AnalyzerConfig>,
    initiated: HashSet<String>,
    fetched: HashSet<String>,
}

/// Analyzer session: one engine on one instrument connection.
pub struct MeasurementSession {
    engine: Mutex<Option<Arc<dyn AnalysisEngine>>>,
    instrument: Mutex<Option<Arc<dyn InstrumentLink>>>,
    state: Mutex<SessionState>,
    /// Buffers of the most recent fetch
    results: Mutex<AcpRecord>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MeasurementSession {
    /// Open a session for `engine` on `instrument`.
    pub fn new(instrument: Arc<dyn InstrumentLink>, engine: Arc<dyn AnalysisEngine>) -> Self {
        info!(
            resource = instrument.resource_name(),
            engine = ?engine.kind(),
            "Opened measurement session"
        );
        Self {
            engine: Mutex::new(Some(engine)),
            instrument: Mutex::new(Some(instrument)),
            state: Mutex::new(SessionState {
                lifecycle: Lifecycle::Unconfigured,
                config: None,
                initiated: HashSet::new(),
                fetched: HashSet::new(),
            }),
            results: Mutex::new(AcpRecord::default()),
        }
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        lock(&self.state).lifecycle
    }

    /// Copy of the buffers filled by the most recent fetch.
    pub fn results(&self) -> AcpRecord {
        lock(&self.results).clone()
    }

    /// Number of results initiated so far.
    pub fn initiated_count(&self) -> usize {
        lock(&self.state).initiated.len()
    }

    /// Block until the most recent acquisition completes.
    pub fn wait_for_complete(&self) -> EtResult<()> {
        let timeout = self.active_config()?.acquisition_timeout();
        self.instrument()?.wait_for_acquisition_complete(timeout)
    }

    fn engine(&self) -> EtResult<Arc<dyn AnalysisEngine>> {
        lock(&self.engine).clone().ok_or(EtError::SessionClosed)
    }

    fn instrument(&self) -> EtResult<Arc<dyn InstrumentLink>> {
        lock(&self.instrument).clone().ok_or(EtError::SessionClosed)
    }

    fn active_config(&self) -> EtResult<AnalyzerConfig> {
        let state = lock(&self.state);
        match state.lifecycle {
            Lifecycle::Closed => Err(EtError::SessionClosed),
            Lifecycle::Unconfigured => Err(EtError::Config("session is not configured".into())),
            _ => state
                .config
                .clone()
                .ok_or_else(|| EtError::Config("session is not configured".into())),
        }
    }

    fn check_config(&self, config: &AnalyzerConfig, engine: &dyn AnalysisEngine) -> EtResult<()> {
        if engine.kind() != config.engine {
            return Err(EtError::Config(format!(
                "configuration targets {:?} but session runs {:?}",
                config.engine,
                engine.kind()
            )));
        }
        if config.bandwidth_hz <= 0.0 || config.sweep_time_s <= 0.0 {
            return Err(EtError::Config(
                "bandwidth and sweep time must be positive".into(),
            ));
        }
        if config.acquisition_timeout_s <= 0.0 || config.fetch_timeout_s <= 0.0 {
            return Err(EtError::Config("timeouts must be positive".into()));
        }
        Ok(())
    }
}

impl AcpMeasurement for MeasurementSession {
    fn configure(&self, config: &AnalyzerConfig) -> EtResult<()> {
        {
            let state = lock(&self.state);
            match state.lifecycle {
                Lifecycle::Closed => return Err(EtError::SessionClosed),
                Lifecycle::Unconfigured => {}
                Lifecycle::Configured | Lifecycle::Initiated => {
                    if state.config.as_ref() == Some(config) {
                        debug!("Analyzer already configured with identical parameters");
                        return Ok(());
                    }
                    if state.lifecycle == Lifecycle::Initiated {
                        return Err(EtError::Config(
                            "cannot reconfigure after measurements were initiated".into(),
                        ));
                    }
                }
            }
        }

        let engine = self.engine()?;
        self.check_config(config, engine.as_ref())?;
        self.instrument()?
            .configure_frequency_reference(&config.frequency_reference)?;
        engine.configure(config)?;

        let mut state = lock(&self.state);
        state.config = Some(config.clone());
        state.lifecycle = Lifecycle::Configured;
        info!(
            carrier_hz = config.carrier_frequency_hz,
            reference_level_dbm = config.reference_level_dbm,
            trigger = %config.trigger.source,
            "Analyzer configured"
        );
        Ok(())
    }

    fn initiate(&self, result_name: &str, wait_for_prior: bool) -> EtResult<()> {
        let config = self.active_config()?;
        if lock(&self.state).initiated.contains(result_name) {
            return Err(EtError::DuplicateResultName(result_name.to_string()));
        }

        if wait_for_prior {
            self.instrument()?
                .wait_for_acquisition_complete(config.acquisition_timeout())?;
        }
        self.engine()?.initiate(result_name)?;

        let mut state = lock(&self.state);
        state.initiated.insert(result_name.to_string());
        state.lifecycle = Lifecycle::Initiated;
        debug!(result_name, wait_for_prior, "Initiated measurement");
        Ok(())
    }

    fn fetch_result(&self, result_name: &str) -> EtResult<AcpRecord> {
        let config = self.active_config()?;
        {
            let state = lock(&self.state);
            if !state.initiated.contains(result_name) {
                return Err(EtError::NotInitiated(result_name.to_string()));
            }
            if state.fetched.contains(result_name) {
                return Err(EtError::AlreadyFetched(result_name.to_string()));
            }
        }

        let engine = self.engine()?;
        let timeout = config.fetch_timeout();
        let record = fetch_with_single_retry(result_name, || engine.fetch_acp(result_name, timeout))?;

        lock(&self.state).fetched.insert(result_name.to_string());
        *lock(&self.results) = record.clone();
        debug!(
            result_name,
            absolute_power_dbm = record.absolute_power,
            "Fetched ACP record"
        );
        Ok(record)
    }

    fn close(&self) {
        if let Some(engine) = lock(&self.engine).take() {
            if let Err(e) = engine.dispose() {
                warn!("Failed to release measurement configuration: {}", e);
            }
        }
        if let Some(instrument) = lock(&self.instrument).take() {
            if let Err(e) = instrument.close() {
                warn!("Failed to close {}: {}", instrument.resource_name(), e);
            }
        }
        let mut state = lock(&self.state);
        if state.lifecycle != Lifecycle::Closed {
            state.lifecycle = Lifecycle::Closed;
            info!("Measurement session closed");
        }
    }
}

impl Drop for MeasurementSession {
    fn drop(&mut self) {
        self.close();
    }
}
