//! Observability for bench runs.
//!
//! Only structured logging is provided; per-step results are already
//! captured in the [`SweepReport`](crate::report::SweepReport).

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat, LogLevel};
