//! Synchronous start of the RF and envelope generators.
//!
//! The RF generator exports its start edge on a backplane trigger line and
//! the envelope generator starts on that edge, fixing a common time origin.
//! Delay steps then move only the RF waveform's start relative to that
//! origin. Offsets are absolute: each adjustment replaces the previous one.

use crate::config::SyncConfig;
use crate::error::{EtError, EtResult};
use crate::generator::SignalGenerator;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(1);

/// Timing relationship between two generators, valid for one sweep run.
#[derive(Debug)]
pub struct SyncHandle {
    run_id: u64,
    trigger_line: String,
    offset_s: f64,
    adjustments: usize,
}

impl SyncHandle {
    /// Offset currently applied to the RF generator, in seconds.
    pub fn offset_s(&self) -> f64 {
        self.offset_s
    }

    /// Number of delay adjustments made through this handle.
    pub fn adjustments(&self) -> usize {
        self.adjustments
    }

    /// Trigger line carrying the common start edge.
    pub fn trigger_line(&self) -> &str {
        &self.trigger_line
    }
}

/// Synchronization controller.
pub trait Synchronizer: Send {
    /// Arm both generators on a common start edge. Called once per run,
    /// before any delay adjustment.
    fn establish_synchronous_start(
        &mut self,
        rf: &mut dyn SignalGenerator,
        envelope: &mut dyn SignalGenerator,
        config: &SyncConfig,
    ) -> EtResult<SyncHandle>;

    /// Shift the RF waveform start to `delay_s` after the common edge
    /// without re-arming the envelope generator.
    fn adjust_relative_delay(
        &mut self,
        handle: &mut SyncHandle,
        delay_s: f64,
        config: &SyncConfig,
        rf: &mut dyn SignalGenerator,
    ) -> EtResult<()>;
}

/// Synchronizer that shares the start edge over a backplane trigger line.
#[derive(Debug, Default)]
pub struct TriggerSynchronizer {
    run_id: Option<u64>,
}

impl TriggerSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_established(&self) -> bool {
        self.run_id.is_some()
    }
}

impl Synchronizer for TriggerSynchronizer {
    fn establish_synchronous_start(
        &mut self,
        rf: &mut dyn SignalGenerator,
        envelope: &mut dyn SignalGenerator,
        config: &SyncConfig,
    ) -> EtResult<SyncHandle> {
        if self.run_id.is_some() {
            return Err(EtError::Synchronization(
                "synchronous start already established for this run".into(),
            ));
        }

        let line = config.start_trigger_line.as_str();
        rf.export_start_trigger(line)?;
        envelope.set_start_trigger(line)?;
        rf.set_start_delay(0.0)?;

        // The follower must be armed before the leader fires the edge
        envelope.initiate()?;
        rf.initiate()?;

        let run_id = NEXT_RUN_ID.fetch_add(1, Ordering::Relaxed);
        self.run_id = Some(run_id);
        info!(
            run_id,
            leader = rf.name(),
            follower = envelope.name(),
            trigger = line,
            "Synchronous generation started"
        );

        Ok(SyncHandle {
            run_id,
            trigger_line: line.to_string(),
            offset_s: 0.0,
            adjustments: 0,
        })
    }

    fn adjust_relative_delay(
        &mut self,
        handle: &mut SyncHandle,
        delay_s: f64,
        config: &SyncConfig,
        rf: &mut dyn SignalGenerator,
    ) -> EtResult<()> {
        if self.run_id != Some(handle.run_id) {
            return Err(EtError::Synchronization(format!(
                "handle for run {} does not belong to this synchronizer",
                handle.run_id
            )));
        }
        if handle.trigger_line != config.start_trigger_line {
            return Err(EtError::Synchronization(format!(
                "handle started on {} but configuration names {}",
                handle.trigger_line, config.start_trigger_line
            )));
        }
        if !delay_s.is_finite() {
            return Err(EtError::Config(format!("delay {delay_s} is not finite")));
        }

        rf.set_start_delay(delay_s)?;
        handle.offset_s = delay_s;
        handle.adjustments += 1;
        debug!(delay_s, "Adjusted relative delay");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeneratorConfig;
    use crate::generator::Waveform;

    #[derive(Default)]
    struct RecordingGenerator {
        name: String,
        calls: Vec<String>,
        delay_s: f64,
    }

    impl RecordingGenerator {
        fn named(name: &str) -> Self {
            Self {
                name: name.into(),
                ..Default::default()
            }
        }
    }

    impl SignalGenerator for RecordingGenerator {
        fn name(&self) -> &str {
            &self.name
        }
        fn configure(&mut self, _: &GeneratorConfig) -> EtResult<()> {
            Ok(())
        }
        fn download_waveform(&mut self, _: &Waveform) -> EtResult<()> {
            Ok(())
        }
        fn configure_continuous_generation(&mut self, _: &str, _: &str) -> EtResult<()> {
            Ok(())
        }
        fn export_start_trigger(&mut self, line: &str) -> EtResult<()> {
            self.calls.push(format!("export {line}"));
            Ok(())
        }
        fn set_start_trigger(&mut self, line: &str) -> EtResult<()> {
            self.calls.push(format!("start_on {line}"));
            Ok(())
        }
        fn set_start_delay(&mut self, delay_s: f64) -> EtResult<()> {
            self.calls.push("delay".into());
            self.delay_s = delay_s;
            Ok(())
        }
        fn initiate(&mut self) -> EtResult<()> {
            self.calls.push("initiate".into());
            Ok(())
        }
        fn abort(&mut self) -> EtResult<()> {
            Ok(())
        }
        fn close(&mut self) {}
    }

    #[test]
    fn test_establish_arms_follower_first() {
        let mut rf = RecordingGenerator::named("rf");
        let mut env = RecordingGenerator::named("env");
        let mut sync = TriggerSynchronizer::new();
        let handle = sync
            .establish_synchronous_start(&mut rf, &mut env, &SyncConfig::default())
            .unwrap();

        assert!(sync.is_established());
        assert_eq!(handle.offset_s(), 0.0);
        assert_eq!(handle.trigger_line(), "PXI_Trig1");
        assert_eq!(env.calls, vec!["start_on PXI_Trig1", "initiate"]);
        assert_eq!(rf.calls, vec!["export PXI_Trig1", "delay", "initiate"]);
    }

    #[test]
    fn test_establish_only_once() {
        let mut rf = RecordingGenerator::named("rf");
        let mut env = RecordingGenerator::named("env");
        let mut sync = TriggerSynchronizer::new();
        let config = SyncConfig::default();
        sync.establish_synchronous_start(&mut rf, &mut env, &config).unwrap();
        assert!(matches!(
            sync.establish_synchronous_start(&mut rf, &mut env, &config),
            Err(EtError::Synchronization(_))
        ));
    }

    #[test]
    fn test_offsets_are_absolute() {
        let mut rf = RecordingGenerator::named("rf");
        let mut env = RecordingGenerator::named("env");
        let mut sync = TriggerSynchronizer::new();
        let config = SyncConfig::default();
        let mut handle = sync.establish_synchronous_start(&mut rf, &mut env, &config).unwrap();

        sync.adjust_relative_delay(&mut handle, 3.0e-9, &config, &mut rf).unwrap();
        sync.adjust_relative_delay(&mut handle, -1.0e-9, &config, &mut rf).unwrap();

        assert_eq!(handle.offset_s(), -1.0e-9);
        assert_eq!(rf.delay_s, -1.0e-9);
        assert_eq!(handle.adjustments(), 2);
        // Envelope generator untouched by adjustments
        assert_eq!(env.calls.len(), 2);
    }

    #[test]
    fn test_foreign_handle_rejected() {
        let mut rf = RecordingGenerator::named("rf");
        let mut env = RecordingGenerator::named("env");
        let config = SyncConfig::default();
        let mut first = TriggerSynchronizer::new();
        let mut handle = first.establish_synchronous_start(&mut rf, &mut env, &config).unwrap();

        let mut second = TriggerSynchronizer::new();
        assert!(second
            .adjust_relative_delay(&mut handle, 1.0e-9, &config, &mut rf)
            .is_err());
        assert!(first
            .adjust_relative_delay(&mut handle, f64::INFINITY, &config, &mut rf)
            .is_err());
        assert_eq!(handle.offset_s(), 0.0);
    }
}
