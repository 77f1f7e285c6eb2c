//! # Delay Sweep Driver
//!
//! Steps the RF/envelope relative delay across a run and initiates one ACP
//! measurement per step.
//!
//! ```text
//! prime:   initiate(r0, wait=false)                       delay 0
//! step i:  initiate(ri, wait=true) ──▶ adjust(i × step)   i = 1 .. n-1
//! ```
//!
//! Step 0 is initiated before the loop so a result is always in flight when
//! the collector starts draining. Each later initiate waits for the previous
//! acquisition to complete, pacing the instrument's acquisition queue while
//! analysis is free to lag behind. The delay for step `i` is adjusted after
//! its initiate: the analyzer triggers off a hardware edge, not host-side
//! call order.

use crate::analyzer::AcpMeasurement;
use crate::config::{SweepConfig, SyncConfig};
use crate::error::EtResult;
use crate::generator::SignalGenerator;
use crate::sync::{SyncHandle, Synchronizer};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// One delay step of a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepStep {
    pub index: usize,
    /// `index × step size`, seconds
    pub delay_s: f64,
    /// Key joining the initiate to its later fetch
    pub result_name: String,
}

/// Validated sweep geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPlan {
    number_of_steps: usize,
    step_size_s: f64,
    result_prefix: String,
}

impl SweepPlan {
    /// Build a plan. `number_of_steps` must be at least 1; the step size may
    /// be negative.
    pub fn new(number_of_steps: usize, step_size_s: f64, result_prefix: &str) -> EtResult<Self> {
        let config = SweepConfig {
            number_of_steps,
            step_size_s: Some(step_size_s),
            result_prefix: result_prefix.to_string(),
            ..Default::default()
        };
        config.validate()?;
        Ok(Self {
            number_of_steps,
            step_size_s,
            result_prefix: result_prefix.to_string(),
        })
    }

    /// Plan from sweep configuration with the step size already resolved.
    pub fn from_config(config: &SweepConfig, step_size_s: f64) -> EtResult<Self> {
        Self::new(config.number_of_steps, step_size_s, &config.result_prefix)
    }

    pub fn len(&self) -> usize {
        self.number_of_steps
    }

    pub fn step_size_s(&self) -> f64 {
        self.step_size_s
    }

    pub fn step(&self, index: usize) -> SweepStep {
        SweepStep {
            index,
            delay_s: index as f64 * self.step_size_s,
            result_name: format!("{}{}", self.result_prefix, index),
        }
    }

    pub fn steps(&self) -> impl Iterator<Item = SweepStep> + '_ {
        (0..self.number_of_steps).map(|i| self.step(i))
    }
}

/// Timing collaborators driven by the sweep lane.
pub struct SweepTiming<'a> {
    pub synchronizer: &'a mut dyn Synchronizer,
    pub handle: &'a mut SyncHandle,
    pub rf: &'a mut dyn SignalGenerator,
    pub config: &'a SyncConfig,
}

impl SweepTiming<'_> {
    fn adjust(&mut self, delay_s: f64) -> EtResult<()> {
        self.synchronizer
            .adjust_relative_delay(self.handle, delay_s, self.config, self.rf)
    }
}

/// Delay sweep over one measurement session.
pub struct DelaySweep<'a, M: AcpMeasurement + ?Sized> {
    plan: &'a SweepPlan,
    measurement: &'a M,
}

impl<'a, M: AcpMeasurement + ?Sized> DelaySweep<'a, M> {
    pub fn new(plan: &'a SweepPlan, measurement: &'a M) -> Self {
        Self { plan, measurement }
    }

    pub fn plan(&self) -> &SweepPlan {
        self.plan
    }

    pub fn measurement(&self) -> &'a M {
        self.measurement
    }

    /// Initiate the priming measurement for step 0.
    pub fn prime(&self) -> EtResult<SweepStep> {
        let step = self.plan.step(0);
        self.measurement.initiate(&step.result_name, false)?;
        debug!(step = 0, result_name = %step.result_name, "Primed first measurement");
        Ok(step)
    }

    /// Prime step 0, then initiate and re-time steps `1..n`.
    ///
    /// `on_initiated` is called for every step right after its initiate was
    /// accepted, before the delay for that step is applied. Returns the
    /// number of measurements initiated. The first error aborts the sweep.
    pub fn run(
        &self,
        timing: &mut SweepTiming<'_>,
        mut on_initiated: impl FnMut(&SweepStep) -> EtResult<()>,
    ) -> EtResult<usize> {
        info!(
            steps = self.plan.len(),
            step_size_ns = self.plan.step_size_s() * 1e9,
            "Starting delay sweep"
        );

        let primer = self.prime()?;
        on_initiated(&primer)?;

        for index in 1..self.plan.len() {
            let step = self.plan.step(index);
            self.measurement.initiate(&step.result_name, true)?;
            on_initiated(&step)?;
            timing.adjust(step.delay_s)?;
            debug!(step = index, delay_s = step.delay_s, "Sweep step initiated");
        }

        info!(initiated = self.plan.len(), "Delay sweep complete");
        Ok(self.plan.len())
    }
}
