// src/weighting/entropy.rs
//! Entropy-maximising reweighting.
//!
//! Each column is fitted with a multiplicative factor `root ^ contribution`
//! rather than a flat ratio. Grouping the weighted contributions by their
//! integer level `p` gives the column equation
//!
//! ```text
//! sum_p  mass_p * root ^ p  =  target
//! ```
//!
//! whose positive root makes the post-adjustment weighted sum hit the target.

use std::collections::BTreeMap;

use super::constraints::{ColumnOrder, ConstraintRow};
use super::contrib::{ColumnContribution, ContributionIndex};
use super::procedure::{AdjustStats, HouseholdWeights};
use super::utils::{ReweightError, Result};

const MAX_ROOT_ITERATIONS: usize = 200;
const MAX_BRACKET_EXPANSIONS: usize = 1100;
const ROOT_TOLERANCE: f64 = 1e-12;

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
            let levels = root_power_weights(weights, column);

            if levels.is_empty() {
                log::warn!(
                    "No weight mass contributes to {} column {} in round {}, not adjusting",
                    W::RESOLUTION,
                    key,
                    round
                );
                stats.skipped += 1;
                continue;
            }

            let root = find_root(&levels, target).map_err(|reason| ReweightError::RootNotFound {
                column: key.clone(),
                reason,
            })?;

            for (row, c) in column.contributing() {
                weights.scale_household(row, root.powi(c as i32));
            }
        }
    }

    Ok(stats)
}

/// Weighted contribution mass per positive contribution level.
///
/// Levels whose mass is zero are dropped; they do not enter the column equation.
fn root_power_weights<W: HouseholdWeights>(weights: &W, column: &ColumnContribution) -> Vec<(u32, f64)> {
    let mut mass: BTreeMap<u32, f64> = BTreeMap::new();
    for (row, c) in column.contributing() {
        *mass.entry(c).or_insert(0.0) += weights.household_weight(row) * c as f64;
    }

    mass.into_iter().filter(|&(_, w)| w > 0.0).collect()
}

/// Positive root of `sum(mass * root ^ power) = target`.
///
/// A single level has the closed form `(target / mass) ^ (1 / power)`. Several
/// levels are solved by bracketing from `[0, 1]` and a safeguarded Newton
/// iteration; the left side is increasing in `root`, so the root is unique.
pub(crate) fn find_root(levels: &[(u32, f64)], target: f64) -> std::result::Result<f64, String> {
    if !target.is_finite() || target < 0.0 {
        return Err(format!("target {} is not a non-negative finite count", target));
    }
    if levels.is_empty() {
        return Err("no contributing weight mass".to_string());
    }
    if target == 0.0 {
        return Ok(0.0);
    }

    if let [(power, mass)] = levels {
        let root = (target / mass).powf(1.0 / *power as f64);
        return check_root(root);
    }

    let f = |r: f64| -> f64 {
        levels
            .iter()
            .map(|&(p, w)| w * r.powi(p as i32))
            .sum::<f64>()
            - target
    };
    let df = |r: f64| -> f64 {
        levels
            .iter()
            .map(|&(p, w)| w * p as f64 * r.powi(p as i32 - 1))
            .sum()
    };

    // f(0) = -target < 0, expand until the sign changes
    let mut lo = 0.0_f64;
    let mut hi = 1.0_f64;
    let mut expansions = 0;
    while f(hi) < 0.0 {
        lo = hi;
        hi *= 2.0;
        expansions += 1;
        if expansions > MAX_BRACKET_EXPANSIONS || !hi.is_finite() {
            return Err(format!("could not bracket root for target {}", target));
        }
    }

    let mut x = 0.5 * (lo + hi);
    for _ in 0..MAX_ROOT_ITERATIONS {
        let fx = f(x);
        if fx == 0.0 {
            return check_root(x);
        }
        if fx < 0.0 {
            lo = x;
        } else {
            hi = x;
        }

        let slope = df(x);
        let newton = x - fx / slope;
        let next = if slope > 0.0 && newton.is_finite() && newton > lo && newton < hi {
            newton
        } else {
            0.5 * (lo + hi)
        };

        if (next - x).abs() <= ROOT_TOLERANCE * next.abs() || hi - lo <= ROOT_TOLERANCE * hi {
            return check_root(next);
        }
        x = next;
    }

    Err(format!(
        "no convergence after {} iterations (last bracket [{}, {}])",
        MAX_ROOT_ITERATIONS, lo, hi
    ))
}

fn check_root(root: f64) -> std::result::Result<f64, String> {
    if root.is_finite() && root >= 0.0 {
        Ok(root)
    } else {
        Err(format!("non-physical root {}", root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weighting::constraints::ConstraintTable;
    use crate::weighting::contrib::{ColumnKey, ContributionMatrix, DsFormat};
    use approx::assert_relative_eq;
    use ndarray::{array, Array1};

    fn equation(levels: &[(u32, f64)], root: f64) -> f64 {
        levels.iter().map(|&(p, w)| w * root.powi(p as i32)).sum()
    }

    #[test]
    fn test_closed_form_single_level() {
        assert_relative_eq!(find_root(&[(1, 4.0)], 10.0).unwrap(), 2.5);
        // 2 * r^2 = 18
        assert_relative_eq!(find_root(&[(2, 2.0)], 18.0).unwrap(), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_numeric_root_multiple_levels() {
        // 3r + 2r^2 = 20  ->  r = 2.5
        let levels = [(1, 3.0), (2, 2.0)];
        let root = find_root(&levels, 20.0).unwrap();
        assert_relative_eq!(root, 2.5, epsilon = 1e-10);

        // Root below one
        let levels = [(1, 10.0), (3, 5.0)];
        let root = find_root(&levels, 1.0).unwrap();
        assert!(root > 0.0 && root < 1.0);
        assert_relative_eq!(equation(&levels, root), 1.0, epsilon = 1e-10);

        // Root far above the initial bracket
        let levels = [(1, 0.001), (4, 0.002)];
        let root = find_root(&levels, 5000.0).unwrap();
        assert_relative_eq!(equation(&levels, root), 5000.0, max_relative = 1e-10);
    }

    #[test]
    fn test_zero_target_gives_zero_root() {
        assert_eq!(find_root(&[(1, 3.0), (2, 1.0)], 0.0).unwrap(), 0.0);
    }

    #[test]
    fn test_non_physical_target_fails() {
        assert!(find_root(&[(1, 3.0), (2, 1.0)], -1.0).is_err());
        assert!(find_root(&[(1, 3.0)], f64::NAN).is_err());
        assert!(find_root(&[], 4.0).is_err());
    }

    #[test]
    fn test_single_level_column_hits_target() {
        let key = ColumnKey::new("person", ["1"]);
        let matrix = ContributionMatrix::new(vec![1, 2, 3], vec![key.clone()], array![[1], [0], [1]]).unwrap();
        let index = matrix.index(DsFormat::Full);
        let table = ConstraintTable::from_rows(vec![key.clone()], vec![(7, vec![9.0])]).unwrap();

        let mut weights = array![2.0, 5.0, 1.0];
        adjust(&mut weights, table.row(7).unwrap(), &index, ColumnOrder::Reversed, 1).unwrap();

        // W = 3, root = 3
        assert_relative_eq!(weights[0], 6.0, epsilon = 1e-12);
        assert_eq!(weights[1], 5.0);
        assert_relative_eq!(weights.weighted_sum(index.get(&key).unwrap()), 9.0, epsilon = 1e-12);
    }

    #[test]
    fn test_mixed_levels_column_hits_target() {
        let key = ColumnKey::new("person", ["1"]);
        let matrix =
            ContributionMatrix::new(vec![1, 2, 3, 4], vec![key.clone()], array![[1], [2], [3], [0]]).unwrap();
        let table = ConstraintTable::from_rows(vec![key.clone()], vec![(7, vec![40.0])]).unwrap();

        for format in [DsFormat::Full, DsFormat::Contributing] {
            let index = matrix.index(format);
            let mut weights = Array1::<f64>::ones(4);
            adjust(&mut weights, table.row(7).unwrap(), &index, ColumnOrder::Reversed, 1).unwrap();

            assert_relative_eq!(weights.weighted_sum(index.get(&key).unwrap()), 40.0, epsilon = 1e-9);
            assert_eq!(weights[3], 1.0);
            assert!(weights.iter().all(|w| w.is_finite() && *w >= 0.0));
        }
    }

    #[test]
    fn test_column_without_mass_is_skipped() {
        let key = ColumnKey::new("person", ["1"]);
        let matrix = ContributionMatrix::new(vec![1, 2], vec![key.clone()], array![[0], [0]]).unwrap();
        let index = matrix.index(DsFormat::Contributing);
        let table = ConstraintTable::from_rows(vec![key], vec![(1, vec![3.0])]).unwrap();

        let mut weights = array![1.0, 1.0];
        let stats = adjust(&mut weights, table.row(1).unwrap(), &index, ColumnOrder::Reversed, 3).unwrap();

        assert_eq!(stats.skipped, 3);
        assert_eq!(weights, array![1.0, 1.0]);
    }
}
