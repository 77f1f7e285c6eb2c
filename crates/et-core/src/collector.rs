//! # Result Collector
//!
//! Drains initiated ACP results into ordered accumulators.
//!
//! Two strategies share one fetch-and-append path:
//!
//! - **Sequential**: the sweep runs to completion, then every step is fetched
//!   in order.
//! - **Overlapped**: a second lane (`acp-collector`) fetches each step as soon
//!   as the sweep lane reports it initiated, so fetching overlaps the rest of
//!   the sweep.
//!
//! Fetches are issued in step order on a single lane in both cases, so the
//! accumulators come out identical. Only the collector appends to them. A
//! fatal error stops collection and keeps whatever was already appended.

use crate::analyzer::{AcpMeasurement, AcpRecord};
use crate::config::CollectionStrategy;
use crate::error::{EtError, EtResult};
use crate::sweep::{DelaySweep, SweepStep, SweepTiming};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use tracing::{debug, info, warn};

/// Per-step ACP values in step order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcpAccumulators {
    /// First lower offset, relative to the carrier (dB)
    pub lower_relative_db: Vec<f64>,
    /// First upper offset, relative to the carrier (dB)
    pub upper_relative_db: Vec<f64>,
    /// Carrier absolute power (dBm)
    pub channel_power_dbm: Vec<f64>,
}

impl AcpAccumulators {
    pub fn len(&self) -> usize {
        self.channel_power_dbm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel_power_dbm.is_empty()
    }

    fn push(&mut self, result_name: &str, record: &AcpRecord) -> EtResult<()> {
        let (lower, upper) = match (
            record.lower_relative_power.first(),
            record.upper_relative_power.first(),
        ) {
            (Some(&lower), Some(&upper)) => (lower, upper),
            _ => return Err(EtError::EmptyResult(result_name.to_string())),
        };
        self.lower_relative_db.push(lower);
        self.upper_relative_db.push(upper);
        self.channel_power_dbm.push(record.absolute_power);
        Ok(())
    }
}

/// Owns the accumulators for one run.
#[derive(Debug, Default)]
pub struct ResultCollector {
    accumulators: AcpAccumulators,
    completed: Vec<SweepStep>,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accumulators(&self) -> &AcpAccumulators {
        &self.accumulators
    }

    /// Steps fetched so far, in append order.
    pub fn completed_steps(&self) -> &[SweepStep] {
        &self.completed
    }

    pub fn into_parts(self) -> (AcpAccumulators, Vec<SweepStep>) {
        (self.accumulators, self.completed)
    }

    /// Fetch one step and append it.
    pub fn collect_step<M: AcpMeasurement + ?Sized>(
        &mut self,
        measurement: &M,
        step: &SweepStep,
    ) -> EtResult<()> {
        let record = measurement.fetch_result(&step.result_name)?;
        self.accumulators.push(&step.result_name, &record)?;
        self.completed.push(step.clone());
        debug!(
            step = step.index,
            result_name = %step.result_name,
            lower_db = self.accumulators.lower_relative_db[self.accumulators.len() - 1],
            "Collected ACP result"
        );
        Ok(())
    }

    /// Fetch `steps` in order, stopping at the first error.
    pub fn drain<M, I>(&mut self, measurement: &M, steps: I) -> EtResult<()>
    where
        M: AcpMeasurement + ?Sized,
        I: IntoIterator<Item = SweepStep>,
    {
        for step in steps {
            self.collect_step(measurement, &step)?;
        }
        Ok(())
    }
}

/// Run the sweep and collect its results with `strategy`.
pub fn sweep_and_collect<M: AcpMeasurement + ?Sized>(
    sweep: &DelaySweep<'_, M>,
    timing: &mut SweepTiming<'_>,
    collector: &mut ResultCollector,
    strategy: CollectionStrategy,
) -> EtResult<()> {
    info!(%strategy, "Collecting ACP results");
    match strategy {
        CollectionStrategy::Sequential => {
            sweep.run(timing, |_| Ok(()))?;
            collector.drain(sweep.measurement(), sweep.plan().steps())
        }
        CollectionStrategy::Overlapped => collect_overlapped(sweep, timing, collector),
    }
}

fn collect_overlapped<M: AcpMeasurement + ?Sized>(
    sweep: &DelaySweep<'_, M>,
    timing: &mut SweepTiming<'_>,
    collector: &mut ResultCollector,
) -> EtResult<()> {
    let measurement = sweep.measurement();
    let aborted = AtomicBool::new(false);
    let (tx, rx) = mpsc::channel::<SweepStep>();

    thread::scope(|scope| {
        let aborted = &aborted;
        let lane = thread::Builder::new()
            .name("acp-collector".to_string())
            .spawn_scoped(scope, move || -> EtResult<()> {
                for step in rx {
                    if aborted.load(Ordering::Acquire) {
                        debug!(step = step.index, "Sweep aborted, skipping fetch");
                        break;
                    }
                    collector.collect_step(measurement, &step)?;
                }
                Ok(())
            })
            .map_err(|e| EtError::CollectorLane(e.to_string()))?;

        let swept = sweep.run(timing, |step| {
            tx.send(step.clone())
                .map_err(|_| EtError::CollectorLane("collector lane stopped".into()))
        });
        if swept.is_err() {
            aborted.store(true, Ordering::Release);
        }
        drop(tx);

        let collected = lane
            .join()
            .map_err(|_| EtError::CollectorLane("collector lane panicked".into()))?;

        match (swept, collected) {
            // A failed fetch closes the channel, so its error is the cause
            (_, Err(e)) => Err(e),
            (Err(e), Ok(())) => {
                warn!("Sweep failed while collector lane was draining: {}", e);
                Err(e)
            }
            (Ok(_), Ok(())) => Ok(()),
        }
    })
}
