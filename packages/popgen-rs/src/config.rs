// src/config.rs

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::weighting::constraints::ColumnOrder;
use crate::weighting::contrib::DsFormat;
use crate::weighting::procedure::Procedure;
use crate::weighting::utils::{ReweightError, Result};

/// Reweighting configuration, validated once at load time.
///
/// ```toml
/// entities = ["household", "person"]
/// hid = "hid"
///
/// [control_variables.region]
/// household = ["hhsize"]
/// person = ["age", "sex"]
///
/// [control_variables.geo]
/// household = ["hhsize"]
/// person = ["sex"]
///
/// [parameters]
/// outer_iterations = 20
/// inner_iterations = 1
/// archive_performance_frequency = 1
/// procedure = "ipu"
/// ds_format = "contributing"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReweightingConfig {
    /// Entity kinds to restructure and stack, e.g. households and persons.
    pub entities: Vec<String>,
    /// Household id field shared by every entity sample.
    pub hid: String,
    pub control_variables: ControlVariables,
    pub parameters: ReweightingParameters,
}

/// Per-resolution control variables: entity -> ordered variable names
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlVariables {
    pub region: BTreeMap<String, Vec<String>>,
    pub geo: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReweightingParameters {
    pub outer_iterations: usize,
    pub inner_iterations: usize,
    /// Archive diagnostics every N outer iterations from 0; <= 0 disables.
    #[serde(default)]
    pub archive_performance_frequency: i64,
    #[serde(default)]
    pub procedure: Procedure,
    /// Reserved for filtering negligible constraints. Not applied.
    #[serde(default)]
    pub tolerance: f64,
    #[serde(default)]
    pub ds_format: DsFormat,
    #[serde(default)]
    pub column_order: ColumnOrder,
}

impl Default for ReweightingParameters {
    fn default() -> Self {
        Self {
            outer_iterations: 1,
            inner_iterations: 1,
            archive_performance_frequency: 0,
            procedure: Procedure::Ipu,
            tolerance: 0.0,
            ds_format: DsFormat::Full,
            column_order: ColumnOrder::Reversed,
        }
    }
}

impl ReweightingConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let toml_string = fs::read_to_string(path)?;
        Self::from_toml_str(&toml_string)
    }

    pub fn validate(&self) -> Result<()> {
        let params = &self.parameters;

        if self.entities.is_empty() {
            return Err(ReweightError::InvalidConfig("entities must not be empty".to_string()));
        }
        if self.hid.is_empty() {
            return Err(ReweightError::InvalidConfig("hid must name a field".to_string()));
        }
        if params.outer_iterations == 0 {
            return Err(ReweightError::InvalidConfig(
                "outer_iterations must be positive".to_string(),
            ));
        }
        if params.inner_iterations == 0 {
            return Err(ReweightError::InvalidConfig(
                "inner_iterations must be positive".to_string(),
            ));
        }
        if !params.tolerance.is_finite() || params.tolerance < 0.0 {
            return Err(ReweightError::InvalidConfig(format!(
                "tolerance must be a non-negative number, got {}",
                params.tolerance
            )));
        }

        for (resolution, controls) in [
            ("region", &self.control_variables.region),
            ("geo", &self.control_variables.geo),
        ] {
            for entity in &self.entities {
                if !controls.contains_key(entity) {
                    return Err(ReweightError::InvalidConfig(format!(
                        "No {} control variables for entity '{}'",
                        resolution, entity
                    )));
                }
            }
            for entity in controls.keys() {
                if !self.entities.contains(entity) {
                    return Err(ReweightError::InvalidConfig(format!(
                        "{} control variables given for unknown entity '{}'",
                        resolution, entity
                    )));
                }
            }
        }

        Ok(())
    }

    /// Outer iterations at which diagnostics are archived
    pub fn checkpoints(&self) -> Vec<usize> {
        let freq = self.parameters.archive_performance_frequency;
        if freq <= 0 {
            return Vec::new();
        }
        (0..self.parameters.outer_iterations)
            .step_by(freq as usize)
            .collect()
    }
}
