//! # Envelope Tracking Delay Sweep
//!
//! Drives an envelope tracking bench through a delay sweep and collects
//! adjacent-channel-power (ACP) results for every delay step.
//!
//! - [`sync`]: common start edge for the RF and envelope generators, and
//!   absolute delay offsets on top of it
//! - [`sweep`]: primes step 0, then initiates and re-times steps `1..n`
//! - [`analyzer`]: measurement session with lifecycle checks and the
//!   single-retry fetch policy, over two interchangeable engines
//! - [`collector`]: sequential or overlapped draining into ordered
//!   accumulators
//! - [`run`]: the full harness, setup to teardown
//!
//! Instrument drivers are reached only through the traits in [`analyzer`]
//! and [`generator`]; `et-sim` provides simulated implementations.

pub mod analyzer;
pub mod collector;
pub mod config;
pub mod error;
pub mod generator;
pub mod observe;
pub mod report;
pub mod run;
pub mod sweep;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use analyzer::{AcpMeasurement, AcpRecord, AnalysisEngine, InstrumentLink, MeasurementSession};
pub use collector::{sweep_and_collect, AcpAccumulators, ResultCollector};
pub use config::{BenchConfig, CollectionStrategy, EngineKind};
pub use error::{EtError, EtResult, RESULT_NOT_READY_CODE};
pub use generator::{EnvelopeShaper, SignalGenerator, Waveform};
pub use report::{SweepReport, SweepRow};
pub use run::{Bench, EnvelopeTrackingRun, RunOutcome};
pub use sweep::{DelaySweep, SweepPlan, SweepStep, SweepTiming};
pub use sync::{SyncHandle, Synchronizer, TriggerSynchronizer};
