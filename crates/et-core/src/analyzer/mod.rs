//! # ACP Analyzer Abstraction
//!
//! Layered interface to the spectrum / channel-power analyzer:
//!
//! - **InstrumentLink**: the instrument connection (frequency reference,
//!   acquisition-complete waits, close)
//! - **AnalysisEngine**: one measurement personality on that connection.
//!   Two variants exist, an NR component-carrier engine and a general
//!   spectrum-analysis engine, with the same method surface.
//! - **AcpMeasurement**: the uniform `{configure, initiate, fetch_result, close}`
//!   contract the sweep driver and result collector depend on, implemented by
//!   [`MeasurementSession`].
//!
//! ```text
//! DelaySweep ──initiate──┐            ┌──fetch_result── ResultCollector
//!                        ▼            ▼
//!                  ┌──────────────────────┐
//!                  │  MeasurementSession  │  state machine, retry policy,
//!                  └──────────┬───────────┘  current result buffers
//!                 ┌───────────┴───────────┐
//!                 ▼                       ▼
//!          InstrumentLink          AnalysisEngine (NR | SpecAn)
//! ```
//!
//! Acquisition runs ahead of analysis on the instrument. Several named
//! results can be queued inside the engine while the host is still fetching
//! earlier ones.

pub mod session;

pub use session::{Lifecycle, MeasurementSession};

use crate::config::{AnalyzerConfig, EngineKind, FrequencyReference};
use crate::error::EtResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// One ACP measurement as returned by the analysis engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcpRecord {
    /// Per-offset lower relative power (dB)
    pub lower_relative_power: Vec<f64>,
    /// Per-offset upper relative power (dB)
    pub upper_relative_power: Vec<f64>,
    /// Per-offset lower absolute power (dBm)
    pub lower_absolute_power: Vec<f64>,
    /// Per-offset upper absolute power (dBm)
    pub upper_absolute_power: Vec<f64>,
    /// Carrier absolute power (dBm)
    pub absolute_power: f64,
    /// Carrier relative power (dB)
    pub relative_power: f64,
}

impl AcpRecord {
    /// Number of offsets measured on each side of the carrier.
    pub fn offsets(&self) -> usize {
        self.lower_relative_power.len().min(self.upper_relative_power.len())
    }
}

/// Instrument connection underneath an analysis engine.
pub trait InstrumentLink: Send + Sync {
    /// Resource name the connection was opened on.
    fn resource_name(&self) -> &str;

    /// Lock the instrument to a reference clock.
    fn configure_frequency_reference(&self, reference: &FrequencyReference) -> EtResult<()>;

    /// Block until the most recent acquisition has completed.
    ///
    /// Fails with `EtError::Timeout` once `timeout` elapses.
    fn wait_for_acquisition_complete(&self, timeout: Duration) -> EtResult<()>;

    /// Release the connection.
    fn close(&self) -> EtResult<()>;
}

/// Measurement personality computing ACP on an instrument connection.
pub trait AnalysisEngine: Send + Sync {
    /// Engine variant.
    fn kind(&self) -> EngineKind;

    /// Apply ports, trigger, bandwidth, sweep time and reference level.
    fn configure(&self, config: &AnalyzerConfig) -> EtResult<()>;

    /// Start one acquisition/analysis cycle stored under `result_name`.
    fn initiate(&self, result_name: &str) -> EtResult<()>;

    /// Fetch the ACP arrays and carrier power for `result_name`.
    ///
    /// Returns `EtError::TransientNotReady` while analysis still lags the
    /// acquisition for that result.
    fn fetch_acp(&self, result_name: &str, timeout: Duration) -> EtResult<AcpRecord>;

    /// Release the measurement configuration.
    fn dispose(&self) -> EtResult<()>;
}

/// Uniform analyzer contract used by the sweep driver and the collector.
///
/// Methods take `&self` so one lane can initiate while another fetches.
/// Fetching from two lanes at once is not supported.
pub trait AcpMeasurement: Send + Sync {
    /// One-time setup before the first initiate.
    fn configure(&self, config: &AnalyzerConfig) -> EtResult<()>;

    /// Start a measurement tagged `result_name`. With `wait_for_prior`, first
    /// block until the previous acquisition completed.
    fn initiate(&self, result_name: &str, wait_for_prior: bool) -> EtResult<()>;

    /// Retrieve the named result, overwriting the current result buffers.
    fn fetch_result(&self, result_name: &str) -> EtResult<AcpRecord>;

    /// Release the engine and the connection. Idempotent.
    fn close(&self);
}

/// Run `fetch`, retrying exactly once, immediately, if the first attempt
/// reports that analysis is not finished. Any other error, or a second
/// not-ready, is returned unchanged.
pub fn fetch_with_single_retry<T>(
    result_name: &str,
    mut fetch: impl FnMut() -> EtResult<T>,
) -> EtResult<T> {
    match fetch() {
        Err(err) if err.is_transient() => {
            debug!(result_name, "analysis behind acquisition, retrying fetch");
            fetch()
        }
        other => other,
    }
}
