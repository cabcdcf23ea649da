//! Sampling configuration presets and validation.
//!
//! The four named presets trade cost against quality; `CUSTOM` merges
//! caller overrides onto the `BALANCED` defaults. The preset table is
//! loaded once and never mutated.

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::{EngineError, Result};

/// A resolved sampling configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub name: String,
    pub chunk_size_seconds: f64,
    pub overlap_seconds: f64,
    /// Minimum detection confidence in [0, 1]
    pub confidence_threshold: f64,
    /// Minimum acoustic energy in [0, 1]
    pub energy_threshold: f64,
    /// Fraction of the recording retained for analysis, in [0, 1]
    pub sampling_ratio: f64,
    pub description: String,
}

impl SamplingConfig {
    fn preset(
        name: &str,
        chunk_size_seconds: f64,
        overlap_seconds: f64,
        confidence_threshold: f64,
        energy_threshold: f64,
        sampling_ratio: f64,
        description: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            chunk_size_seconds,
            overlap_seconds,
            confidence_threshold,
            energy_threshold,
            sampling_ratio,
            description: description.to_string(),
        }
    }

    /// Step between successive chunk starts.
    pub fn step_seconds(&self) -> f64 {
        self.chunk_size_seconds - self.overlap_seconds
    }
}

/// Caller-supplied overrides for a `CUSTOM` configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigOverrides {
    pub chunk_size_seconds: Option<f64>,
    pub overlap_seconds: Option<f64>,
    pub confidence_threshold: Option<f64>,
    pub energy_threshold: Option<f64>,
    pub sampling_ratio: Option<f64>,
}

/// Name of the custom configuration.
pub const CUSTOM: &str = "CUSTOM";

fn presets() -> &'static [SamplingConfig] {
    static PRESETS: OnceLock<Vec<SamplingConfig>> = OnceLock::new();
    PRESETS.get_or_init(|| {
        vec![
            SamplingConfig::preset(
                "COST_OPTIMIZED",
                30.0,
                5.0,
                0.8,
                0.7,
                0.25,
                "Maximum cost savings (75% reduction) with good quality",
            ),
            SamplingConfig::preset(
                "BALANCED",
                20.0,
                3.0,
                0.85,
                0.6,
                0.5,
                "Balanced cost and quality optimization",
            ),
            SamplingConfig::preset(
                "QUALITY_FOCUSED",
                15.0,
                2.0,
                0.9,
                0.5,
                0.75,
                "Premium quality with moderate cost savings",
            ),
            SamplingConfig::preset(
                "ENTERPRISE",
                10.0,
                1.0,
                0.95,
                0.4,
                0.9,
                "Enterprise-grade quality and coverage",
            ),
        ]
    })
}

/// Read-only registry of named sampling configurations.
pub struct ConfigRegistry;

impl ConfigRegistry {
    /// The four immutable presets.
    pub fn list() -> &'static [SamplingConfig] {
        presets()
    }

    /// All config names the registry knows about, in preset order.
    pub fn preset_names() -> Vec<&'static str> {
        presets().iter().map(|c| c.name.as_str()).collect()
    }

    /// Resolve a config by name.
    ///
    /// Preset names return the preset verbatim. `CUSTOM` merges the
    /// overrides onto `BALANCED` and validates every supplied field.
    /// Any other name is an invalid configuration.
    pub fn resolve(name: &str, overrides: Option<&ConfigOverrides>) -> Result<SamplingConfig> {
        if name == CUSTOM {
            let base = presets()
                .iter()
                .find(|c| c.name == "BALANCED")
                .cloned()
                .expect("BALANCED preset always exists");
            let ov = overrides.cloned().unwrap_or_default();
            let config = SamplingConfig {
                name: CUSTOM.to_string(),
                chunk_size_seconds: ov.chunk_size_seconds.unwrap_or(base.chunk_size_seconds),
                overlap_seconds: ov.overlap_seconds.unwrap_or(base.overlap_seconds),
                confidence_threshold: ov
                    .confidence_threshold
                    .unwrap_or(base.confidence_threshold),
                energy_threshold: ov.energy_threshold.unwrap_or(base.energy_threshold),
                sampling_ratio: ov.sampling_ratio.unwrap_or(base.sampling_ratio),
                description: "Custom configuration".to_string(),
            };
            Self::validate(&config)?;
            return Ok(config);
        }

        presets()
            .iter()
            .find(|c| c.name == name)
            .cloned()
            .ok_or_else(|| EngineError::InvalidConfiguration(format!("unknown config {name:?}")))
    }

    /// Bound checks for a custom configuration. Failure messages name
    /// the offending field.
    fn validate(config: &SamplingConfig) -> Result<()> {
        let unit_fields = [
            ("sampling_ratio", config.sampling_ratio),
            ("confidence_threshold", config.confidence_threshold),
            ("energy_threshold", config.energy_threshold),
        ];
        for (field, value) in unit_fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::InvalidConfiguration(format!(
                    "{field} must be between 0 and 1, got {value}"
                )));
            }
        }
        if config.chunk_size_seconds <= 0.0 {
            return Err(EngineError::InvalidConfiguration(format!(
                "chunk_size_seconds must be positive, got {}",
                config.chunk_size_seconds
            )));
        }
        if config.overlap_seconds < 0.0 || config.overlap_seconds >= config.chunk_size_seconds {
            return Err(EngineError::InvalidConfiguration(format!(
                "overlap_seconds must be in [0, chunk_size_seconds), got {}",
                config.overlap_seconds
            )));
        }
        Ok(())
    }
}
