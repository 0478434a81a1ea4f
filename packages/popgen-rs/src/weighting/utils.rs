// src/weighting/utils.rs

use ndarray::ArrayView1;
use polars::prelude::PolarsError;
use thiserror::Error;

use super::contrib::ColumnKey;

#[derive(Error, Debug)]
pub enum ReweightError {
    #[error("Invalid value for ds_format: '{0}' (expected 'full' or 'contributing')")]
    InvalidDsFormat(String),

    #[error("Invalid value for procedure: '{0}' (expected 'ipu' or 'entropy')")]
    InvalidProcedure(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Polars(#[from] PolarsError),

    #[error("No sample table for entity '{0}'")]
    MissingSample(String),

    #[error("Null value in field '{field}' of the '{entity}' sample")]
    NullValue { entity: String, field: String },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Column {0} appears more than once")]
    DuplicateColumn(ColumnKey),

    #[error("Constraint id {0} appears in more than one row")]
    DuplicateConstraintId(i64),

    #[error("Constraint column {column} is not in the {resolution} contribution matrix")]
    UnknownConstraintColumn { column: ColumnKey, resolution: String },

    #[error("Contribution column {column} has no {resolution} constraint")]
    UnconstrainedColumn { column: ColumnKey, resolution: String },

    #[error("No {resolution} constraints for id {id}")]
    MissingConstraints { id: i64, resolution: String },

    #[error("Household index differs between region ({region} rows) and geo ({geo} rows) matrices")]
    HouseholdMismatch { region: usize, geo: usize },

    #[error("Root finding failed for column {column}: {reason}")]
    RootNotFound { column: ColumnKey, reason: String },

    #[error("Region {region}, geo {}, outer iteration {iteration}: {source}", .geo.map_or("-".to_string(), |g| g.to_string()))]
    Adjustment {
        region: i64,
        geo: Option<i64>,
        iteration: usize,
        #[source]
        source: Box<ReweightError>,
    },
}

pub type Result<T> = std::result::Result<T, ReweightError>;

impl ReweightError {
    /// Attach region/geo/iteration context to an error raised inside the iteration.
    pub fn in_context(self, region: i64, geo: Option<i64>, iteration: usize) -> Self {
        ReweightError::Adjustment {
            region,
            geo,
            iteration,
            source: Box::new(self),
        }
    }
}

/// Dot product restricted to the given (row, contribution) pairs
pub fn weighted_sum<I>(weights: ArrayView1<f64>, pairs: I) -> f64
where
    I: IntoIterator<Item = (usize, u32)>,
{
    pairs
        .into_iter()
        .map(|(row, c)| weights[row] * c as f64)
        .sum()
}

/// Relative absolute deviation of a weighted sum from its target
///
/// Returns `None` when the target is zero, since the ratio is undefined.
pub fn relative_deviation(weighted_sum: f64, target: f64) -> Option<f64> {
    if target == 0.0 {
        None
    } else {
        Some((weighted_sum - target).abs() / target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_weighted_sum_restricted() {
        let weights = array![1.0, 2.0, 3.0, 4.0];
        let sum = weighted_sum(weights.view(), vec![(1, 2), (3, 1)]);

        assert_eq!(sum, 8.0); // 2*2 + 4*1
    }

    #[test]
    fn test_relative_deviation() {
        assert_eq!(relative_deviation(12.0, 10.0), Some(0.2));
        assert_eq!(relative_deviation(8.0, 10.0), Some(0.2));
        assert_eq!(relative_deviation(3.0, 0.0), None);
    }

    #[test]
    fn test_context_wraps_source() {
        let err = ReweightError::InvalidConfig("bad".to_string()).in_context(7, Some(70), 2);
        let msg = err.to_string();

        assert!(msg.contains("Region 7"));
        assert!(msg.contains("geo 70"));
        assert!(msg.contains("outer iteration 2"));
    }
}
