// src/weighting/mod.rs

pub mod utils;
pub mod contrib;
pub mod constraints;
pub mod restructure;
pub mod procedure;
mod ipu;
mod entropy;

// Re-export main implementations for easier access
pub use constraints::{ColumnOrder, ConstraintRow, ConstraintTable, Resolution};
pub use contrib::{ColumnContribution, ColumnKey, ContributionIndex, ContributionMatrix, DsFormat};
pub use procedure::{AdjustStats, HouseholdWeights, Procedure};
pub use restructure::{restructure_sample, stack_contributions, EntityContributions};
pub use utils::{ReweightError, Result};
