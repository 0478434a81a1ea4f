// src/lib.rs
//! Household reweighting against nested region/geo control totals.
//!
//! Sample rows are restructured into household x constraint-column counts
//! ([`weighting::restructure`]), indexed per column ([`weighting::contrib`]),
//! and fitted by IPU or entropy adjustment in a region-then-geo iteration
//! ([`engine::Reweighting`]).

pub mod config;
pub mod engine;
pub mod source;
pub mod weighting;

pub use config::{ControlVariables, ReweightingConfig, ReweightingParameters};
pub use engine::{DiagnosticsArchive, Reweighting, ReweightingOutput, WeightTable};
pub use source::{InMemorySource, SampleSource};
pub use weighting::{
    ColumnKey, ColumnOrder, ConstraintTable, ContributionMatrix, DsFormat, Procedure, ReweightError, Result,
};
