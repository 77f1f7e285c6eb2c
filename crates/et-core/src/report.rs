//! Sweep report: accumulators joined back to their delay steps.

use crate::collector::AcpAccumulators;
use crate::config::CollectionStrategy;
use crate::error::EtResult;
use crate::sweep::SweepStep;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// ACP measured at one delay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepRow {
    pub index: usize,
    pub delay_s: f64,
    pub result_name: String,
    pub lower_relative_db: f64,
    pub upper_relative_db: f64,
    pub channel_power_dbm: f64,
}

impl SweepRow {
    /// The worse (higher) of the two adjacent-channel relative powers.
    pub fn worst_acp_db(&self) -> f64 {
        self.lower_relative_db.max(self.upper_relative_db)
    }
}

/// Outcome of one sweep run, complete or partial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub strategy: CollectionStrategy,
    pub requested_steps: usize,
    pub step_size_s: f64,
    pub rows: Vec<SweepRow>,
    /// Fatal error that ended the run early, if any
    pub error: Option<String>,
}

impl SweepReport {
    pub fn new(
        strategy: CollectionStrategy,
        requested_steps: usize,
        step_size_s: f64,
        accumulators: &AcpAccumulators,
        steps: &[SweepStep],
    ) -> Self {
        let rows = steps
            .iter()
            .enumerate()
            .map(|(i, step)| SweepRow {
                index: step.index,
                delay_s: step.delay_s,
                result_name: step.result_name.clone(),
                lower_relative_db: accumulators.lower_relative_db[i],
                upper_relative_db: accumulators.upper_relative_db[i],
                channel_power_dbm: accumulators.channel_power_dbm[i],
            })
            .collect();
        Self {
            strategy,
            requested_steps,
            step_size_s,
            rows,
            error: None,
        }
    }

    pub fn completed(&self) -> usize {
        self.rows.len()
    }

    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.rows.len() == self.requested_steps
    }

    /// Step with the lowest worst-side ACP.
    pub fn best_step(&self) -> Option<&SweepRow> {
        self.rows
            .iter()
            .min_by(|a, b| a.worst_acp_db().total_cmp(&b.worst_acp_db()))
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> EtResult<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}
