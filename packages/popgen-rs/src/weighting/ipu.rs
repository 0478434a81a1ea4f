// src/weighting/ipu.rs

use super::constraints::{ColumnOrder, ConstraintRow};
use super::contrib::ContributionIndex;
use super::procedure::{AdjustStats, HouseholdWeights};
use super::utils::Result;

/// Iterative proportional updating
///
/// For each column, in `order`, the weighted sum of contributions is rescaled
/// onto the column target by multiplying every contributing household by
/// `target / weighted_sum`. Each step satisfies its own column exactly; later
/// columns can disturb earlier ones, so more rounds bring the fit closer.
///
/// # Arguments
/// * `weights` - Geo column or region matrix, updated in place
/// * `constraints` - Targets for one region or geo
/// * `index` - Contribution index of the same resolution
/// * `order` - Column visiting order
/// * `iterations` - Number of full rounds over the columns
///
/// A column whose weighted sum is exactly zero is skipped for that round and
/// counted in the returned stats.
pub(crate) fn adjust<W: HouseholdWeights>(
    weights: &mut W,
    constraints: ConstraintRow<'_>,
    index: &ContributionIndex,
    order: ColumnOrder,
    iterations: usize,
) -> Result<AdjustStats> {
    let mut stats = AdjustStats::default();
    let columns = constraints.ordered(order);

    for round in 0..iterations {
        for &(key, target) in &columns {
            let column = index.require(key)?;
            let weighted_sum = weights.weighted_sum(column);

            if weighted_sum == 0.0 {
                log::warn!(
                    "Weighted sum for {} column {} is zero in round {}, not adjusting",
                    W::RESOLUTION,
                    key,
                    round
                );
                stats.skipped += 1;
                continue;
            }

            let adjustment = target / weighted_sum;
            for (row, _) in column.contributing() {
                weights.scale_household(row, adjustment);
            }
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weighting::constraints::ConstraintTable;
    use crate::weighting::contrib::{ColumnKey, ContributionMatrix, DsFormat};
    use approx::assert_relative_eq;
    use ndarray::{array, Array1, Array2};

    #[test]
    fn test_single_column_hits_target() {
        let key = ColumnKey::new("person", ["1"]);
        let matrix =
            ContributionMatrix::new(vec![1, 2, 3, 4], vec![key.clone()], array![[1], [1], [0], [1]]).unwrap();
        let table = ConstraintTable::from_rows(vec![key.clone()], vec![(10, vec![12.0])]).unwrap();

        for format in [DsFormat::Full, DsFormat::Contributing] {
            let index = matrix.index(format);
            let mut weights = Array1::<f64>::ones(4);

            let stats = adjust(&mut weights, table.row(10).unwrap(), &index, ColumnOrder::Reversed, 1).unwrap();

            assert_eq!(stats.skipped, 0);
            assert_relative_eq!(weights.weighted_sum(index.get(&key).unwrap()), 12.0, epsilon = 1e-12);
            // Non-contributing household untouched
            assert_eq!(weights[2], 1.0);
            assert_relative_eq!(weights[0], 4.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_zero_weighted_sum_is_skipped() {
        let empty = ColumnKey::new("person", ["9"]);
        let matrix = ContributionMatrix::new(vec![1, 2], vec![empty.clone()], array![[0], [0]]).unwrap();
        let index = matrix.index(DsFormat::Contributing);
        let table = ConstraintTable::from_rows(vec![empty], vec![(1, vec![5.0])]).unwrap();

        let mut weights = array![1.5, 2.5];
        for _ in 0..3 {
            let stats = adjust(&mut weights, table.row(1).unwrap(), &index, ColumnOrder::Listed, 2).unwrap();
            assert_eq!(stats.skipped, 2);
        }
        assert_eq!(weights, array![1.5, 2.5]);
    }

    #[test]
    fn test_region_granularity_sums_geo_columns() {
        let key = ColumnKey::new("household", ["1"]);
        let matrix = ContributionMatrix::new(vec![1, 2], vec![key.clone()], array![[1], [2]]).unwrap();
        let index = matrix.index(DsFormat::Full);
        let table = ConstraintTable::from_rows(vec![key], vec![(1, vec![18.0])]).unwrap();

        // weighted sum = (1 + 2) * 1 + (1 + 2) * 2 = 9, adjustment = 2
        let mut weights: Array2<f64> = array![[1.0, 2.0], [1.0, 2.0]];
        adjust(&mut weights, table.row(1).unwrap(), &index, ColumnOrder::Reversed, 1).unwrap();

        assert_eq!(weights, array![[2.0, 4.0], [2.0, 4.0]]);
    }

    #[test]
    fn test_two_margin_fit_improves_with_rounds() {
        // 2x2 cross classification, classic raking setup
        let keys = vec![
            ColumnKey::new("person", ["a"]),
            ColumnKey::new("person", ["b"]),
            ColumnKey::new("person", ["x"]),
            ColumnKey::new("person", ["y"]),
        ];
        let matrix = ContributionMatrix::new(
            vec![1, 2, 3, 4],
            keys.clone(),
            array![[1, 0, 1, 0], [1, 0, 0, 1], [0, 1, 1, 0], [0, 1, 0, 1]],
        )
        .unwrap();
        let index = matrix.index(DsFormat::Contributing);
        let table = ConstraintTable::from_rows(keys.clone(), vec![(1, vec![10.0, 20.0, 12.0, 18.0])]).unwrap();

        let mut weights = Array1::<f64>::ones(4);
        adjust(&mut weights, table.row(1).unwrap(), &index, ColumnOrder::Reversed, 50).unwrap();

        for (key, target) in table.row(1).unwrap().iter() {
            assert_relative_eq!(weights.weighted_sum(index.get(key).unwrap()), target, epsilon = 1e-6);
        }
        assert_relative_eq!(weights.sum(), 30.0, epsilon = 1e-6);
    }
}
