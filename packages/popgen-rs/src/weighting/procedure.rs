// src/weighting/procedure.rs

use ndarray::{Array1, Array2};
use serde::Deserialize;
use std::fmt;
use std::ops::AddAssign;
use std::str::FromStr;

use super::constraints::{ColumnOrder, ConstraintRow, Resolution};
use super::contrib::{ColumnContribution, ContributionIndex};
use super::utils::{ReweightError, Result};
use super::{entropy, ipu};

/// Weight adjustment procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Procedure {
    /// Iterative proportional updating: flat ratio per column.
    #[default]
    Ipu,
    /// Maximum-entropy update: `root ^ contribution` per column.
    Entropy,
}

impl FromStr for Procedure {
    type Err = ReweightError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ipu" => Ok(Procedure::Ipu),
            "entropy" => Ok(Procedure::Entropy),
            _ => Err(ReweightError::InvalidProcedure(s.to_string())),
        }
    }
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Procedure::Ipu => write!(f, "ipu"),
            Procedure::Entropy => write!(f, "entropy"),
        }
    }
}

impl Procedure {
    /// Run `iterations` adjustment rounds over every column of `constraints`.
    ///
    /// Region-level adjustment passes the whole (households, geos) matrix, geo-level
    /// adjustment a single geo column; see [`HouseholdWeights`].
    pub fn adjust<W: HouseholdWeights>(
        &self,
        weights: &mut W,
        constraints: ConstraintRow<'_>,
        index: &ContributionIndex,
        order: ColumnOrder,
        iterations: usize,
    ) -> Result<AdjustStats> {
        if weights.nrows() != index.nrows() {
            return Err(ReweightError::DimensionMismatch {
                expected: index.nrows(),
                got: weights.nrows(),
            });
        }

        match self {
            Procedure::Ipu => ipu::adjust(weights, constraints, index, order, iterations),
            Procedure::Entropy => entropy::adjust(weights, constraints, index, order, iterations),
        }
    }
}

/// Counters reported by one call to [`Procedure::adjust`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdjustStats {
    /// Column adjustments skipped because no weight mass contributed to them.
    pub skipped: usize,
}

impl AddAssign for AdjustStats {
    fn add_assign(&mut self, other: Self) {
        self.skipped += other.skipped;
    }
}

/// Weight buffer seen as one scalar per household row.
///
/// A geo column is already one weight per household. The region matrix is
/// reduced across its geo columns, and scaling a household scales every geo.
pub trait HouseholdWeights {
    const RESOLUTION: Resolution;

    fn nrows(&self) -> usize;

    fn household_weight(&self, row: usize) -> f64;

    fn scale_household(&mut self, row: usize, factor: f64);

    fn weighted_sum(&self, column: &ColumnContribution) -> f64 {
        column
            .pairs()
            .map(|(row, c)| self.household_weight(row) * c as f64)
            .sum()
    }
}

impl HouseholdWeights for Array1<f64> {
    const RESOLUTION: Resolution = Resolution::Geo;

    fn nrows(&self) -> usize {
        self.len()
    }

    fn household_weight(&self, row: usize) -> f64 {
        self[row]
    }

    fn scale_household(&mut self, row: usize, factor: f64) {
        self[row] *= factor;
    }
}

impl HouseholdWeights for Array2<f64> {
    const RESOLUTION: Resolution = Resolution::Region;

    fn nrows(&self) -> usize {
        self.dim().0
    }

    fn household_weight(&self, row: usize) -> f64 {
        self.row(row).sum()
    }

    fn scale_household(&mut self, row: usize, factor: f64) {
        self.row_mut(row).mapv_inplace(|w| w * factor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weighting::constraints::ConstraintTable;
    use crate::weighting::contrib::{ColumnKey, ContributionMatrix, DsFormat};
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_procedure_parse() {
        assert_eq!("ipu".parse::<Procedure>().unwrap(), Procedure::Ipu);
        assert_eq!("ENTROPY".parse::<Procedure>().unwrap(), Procedure::Entropy);
        assert!(matches!(
            "raking".parse::<Procedure>(),
            Err(ReweightError::InvalidProcedure(_))
        ));
    }

    #[test]
    fn test_region_weights_reduce_across_geos() {
        let mut weights = array![[1.0, 2.0], [3.0, 4.0]];

        assert_eq!(weights.household_weight(1), 7.0);
        weights.scale_household(0, 2.0);
        assert_eq!(weights, array![[2.0, 4.0], [3.0, 4.0]]);
    }

    #[test]
    fn test_rejects_mismatched_weight_length() {
        let key = ColumnKey::new("person", ["1"]);
        let matrix = ContributionMatrix::new(vec![1, 2], vec![key.clone()], array![[1], [1]]).unwrap();
        let index = matrix.index(DsFormat::Full);
        let table = ConstraintTable::from_rows(vec![key], vec![(1, vec![4.0])]).unwrap();

        let mut weights = Array1::<f64>::ones(3);
        let result = Procedure::Ipu.adjust(
            &mut weights,
            table.row(1).unwrap(),
            &index,
            ColumnOrder::Reversed,
            1,
        );
        assert!(matches!(result, Err(ReweightError::DimensionMismatch { expected: 2, got: 3 })));
    }

    #[test]
    fn test_both_procedures_agree_on_unit_contributions() {
        // With every contribution equal to 1 the entropy root is the IPU ratio.
        let keys = vec![ColumnKey::new("person", ["1"]), ColumnKey::new("person", ["2"])];
        let matrix =
            ContributionMatrix::new(vec![1, 2, 3], keys.clone(), array![[1, 0], [0, 1], [1, 1]]).unwrap();
        let index = matrix.index(DsFormat::Contributing);
        let table = ConstraintTable::from_rows(keys, vec![(1, vec![5.0, 4.0])]).unwrap();

        let mut ipu_weights = Array1::<f64>::ones(3);
        let mut entropy_weights = Array1::<f64>::ones(3);
        Procedure::Ipu
            .adjust(&mut ipu_weights, table.row(1).unwrap(), &index, ColumnOrder::Reversed, 4)
            .unwrap();
        Procedure::Entropy
            .adjust(&mut entropy_weights, table.row(1).unwrap(), &index, ColumnOrder::Reversed, 4)
            .unwrap();

        for (a, b) in ipu_weights.iter().zip(entropy_weights.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-9);
        }
    }
}
