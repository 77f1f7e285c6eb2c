//! Bench configuration
//!
//! Every section deserializes with defaults, so a configuration file only
//! needs to name the values it changes.

use crate::error::{EtError, EtResult};
use crate::observe::LogConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Which analysis personality computes ACP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// 5G NR component-carrier engine
    #[default]
    NrCarrier,
    /// General spectrum-analysis engine
    SpectrumAnalysis,
}

/// Trigger edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerEdge {
    #[default]
    Rising,
    Falling,
}

/// Digital edge trigger routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub source: String,
    pub edge: TriggerEdge,
    pub delay_s: f64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            source: "PXI_Trig1".to_string(),
            edge: TriggerEdge::Rising,
            delay_s: 0.0,
        }
    }
}

/// Reference clock shared across the chassis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrequencyReference {
    pub source: String,
    pub frequency_hz: f64,
}

impl Default for FrequencyReference {
    fn default() -> Self {
        Self {
            source: "PXI_Clk".to_string(),
            frequency_hz: 10.0e6,
        }
    }
}

/// Spectrum / channel-power analyzer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub resource_name: String,
    pub engine: EngineKind,
    pub reference_level_dbm: f64,
    pub carrier_frequency_hz: f64,
    pub selected_port: String,
    pub external_attenuation_db: f64,
    pub frequency_reference: FrequencyReference,
    pub trigger: TriggerConfig,
    /// Component-carrier / integration bandwidth
    pub bandwidth_hz: f64,
    /// Only used by the NR engine
    pub subcarrier_spacing_hz: f64,
    pub sweep_time_s: f64,
    pub noise_compensation: bool,
    /// Adjacent offsets measured on each side of the carrier
    pub number_of_offsets: usize,
    /// Bound on wait-for-acquisition-complete before an initiate
    pub acquisition_timeout_s: f64,
    /// Bound handed to the engine on every fetch
    pub fetch_timeout_s: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            resource_name: "BCN_01".to_string(),
            engine: EngineKind::NrCarrier,
            reference_level_dbm: 0.0,
            carrier_frequency_hz: 5.0e9,
            selected_port: "if1".to_string(),
            external_attenuation_db: 0.0,
            frequency_reference: FrequencyReference::default(),
            trigger: TriggerConfig::default(),
            bandwidth_hz: 100.0e6,
            subcarrier_spacing_hz: 30.0e3,
            sweep_time_s: 1.0e-3,
            noise_compensation: false,
            number_of_offsets: 1,
            acquisition_timeout_s: 10.0,
            fetch_timeout_s: 20.0,
        }
    }
}

impl AnalyzerConfig {
    pub fn acquisition_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.acquisition_timeout_s)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.fetch_timeout_s)
    }
}

/// RF vector signal generator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub resource_name: String,
    pub carrier_frequency_hz: f64,
    pub power_level_dbm: f64,
    pub dut_average_input_power_dbm: f64,
    /// Arbitrary waveform IQ rate; one sample period is the default delay step
    pub iq_rate_hz: f64,
    pub frequency_reference: FrequencyReference,
    /// Line the generator starts on (or exports its start to)
    pub trigger_line: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            resource_name: "BCN_01".to_string(),
            carrier_frequency_hz: 5.0e9,
            power_level_dbm: -10.0,
            dut_average_input_power_dbm: -10.0,
            iq_rate_hz: 122.88e6,
            frequency_reference: FrequencyReference::default(),
            trigger_line: "PXI_Trig1".to_string(),
        }
    }
}

/// Detrough curve family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetroughType {
    #[default]
    Exponential,
    Cosine,
    Power,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetroughConfig {
    pub kind: DetroughType,
    pub minimum_voltage_v: f64,
    pub maximum_voltage_v: f64,
    pub exponent: f64,
}

impl Default for DetroughConfig {
    fn default() -> Self {
        Self {
            kind: DetroughType::Exponential,
            minimum_voltage_v: 1.5,
            maximum_voltage_v: 3.5,
            exponent: 1.2,
        }
    }
}

/// Lookup-table shaping: (input power dBm, supply voltage V) pairs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LookUpTableConfig {
    pub dut_average_input_power_dbm: f64,
    pub table: Vec<(f64, f64)>,
}

/// How the envelope waveform is derived from the RF waveform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ShapingConfig {
    Detrough(DetroughConfig),
    LookupTable(LookUpTableConfig),
}

impl Default for ShapingConfig {
    fn default() -> Self {
        ShapingConfig::Detrough(DetroughConfig::default())
    }
}

/// Envelope tracker front-end scaling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Volts at the tracker output per volt of envelope waveform
    pub gain_v_per_v: f64,
    pub common_mode_offset_v: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            gain_v_per_v: 2.0,
            common_mode_offset_v: 0.0,
        }
    }
}

/// Envelope generator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    pub resource_name: String,
    pub shaping: ShapingConfig,
    pub tracker: TrackerConfig,
    pub trigger_line: String,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            resource_name: "5820_03".to_string(),
            shaping: ShapingConfig::default(),
            tracker: TrackerConfig::default(),
            trigger_line: "PXI_Trig0".to_string(),
        }
    }
}

/// Synchronous start between the RF and envelope generators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Line the RF generator exports its start edge on
    pub start_trigger_line: String,
    pub reference_clock: FrequencyReference,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            start_trigger_line: "PXI_Trig1".to_string(),
            reference_clock: FrequencyReference::default(),
        }
    }
}

/// How measurement results are drained from the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionStrategy {
    /// Fetch everything after the sweep loop completes
    #[default]
    Sequential,
    /// Fetch on a second lane while the sweep is still initiating
    Overlapped,
}

impl std::fmt::Display for CollectionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectionStrategy::Sequential => f.write_str("sequential"),
            CollectionStrategy::Overlapped => f.write_str("overlapped"),
        }
    }
}

/// Delay sweep parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub number_of_steps: usize,
    /// Delay increment per step; `None` uses one RF arb sample period
    pub step_size_s: Option<f64>,
    pub result_prefix: String,
    pub strategy: CollectionStrategy,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            number_of_steps: 200,
            step_size_s: None,
            result_prefix: "r".to_string(),
            strategy: CollectionStrategy::Sequential,
        }
    }
}

impl SweepConfig {
    pub fn validate(&self) -> EtResult<()> {
        if self.number_of_steps == 0 {
            return Err(EtError::Config("number_of_steps must be at least 1".into()));
        }
        if self.result_prefix.is_empty() {
            return Err(EtError::Config("result_prefix must not be empty".into()));
        }
        if let Some(step) = self.step_size_s {
            if !step.is_finite() {
                return Err(EtError::Config(format!("step size {step} is not finite")));
            }
        }
        Ok(())
    }
}

/// Complete bench description.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub rf: GeneratorConfig,
    pub envelope: EnvelopeConfig,
    pub analyzer: AnalyzerConfig,
    pub sync: SyncConfig,
    pub sweep: SweepConfig,
    pub log: LogConfig,
}

impl BenchConfig {
    /// Load a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> EtResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: BenchConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EtResult<()> {
        self.sweep.validate()?;
        if self.analyzer.acquisition_timeout_s <= 0.0 || self.analyzer.fetch_timeout_s <= 0.0 {
            return Err(EtError::Config("analyzer timeouts must be positive".into()));
        }
        if self.rf.iq_rate_hz <= 0.0 {
            return Err(EtError::Config("rf iq_rate_hz must be positive".into()));
        }
        Ok(())
    }

    /// Delay increment actually used by the sweep.
    pub fn step_size_s(&self) -> f64 {
        self.sweep
            .step_size_s
            .unwrap_or(1.0 / self.rf.iq_rate_hz)
    }
}
