// src/engine/diagnostics.rs

use ndarray::ArrayView1;
use polars::prelude::*;
use std::collections::BTreeMap;

use crate::weighting::constraints::ConstraintRow;
use crate::weighting::contrib::ContributionIndex;
use crate::weighting::utils::{relative_deviation, Result};

/// Average relative absolute deviation of one geo's weighted sums from its targets.
///
/// Columns with a zero target are left out of the average; when every target
/// is zero the deviation is reported as 0.
pub fn average_deviation(
    weights: ArrayView1<f64>,
    constraints: ConstraintRow<'_>,
    index: &ContributionIndex,
) -> Result<f64> {
    let mut total = 0.0;
    let mut n = 0usize;

    for (key, target) in constraints.iter() {
        let weighted_sum = index.require(key)?.weighted_sum(weights);
        if let Some(dev) = relative_deviation(weighted_sum, target) {
            total += dev;
            n += 1;
        }
    }

    Ok(if n == 0 { 0.0 } else { total / n as f64 })
}

/// (geo id, outer iteration) -> average relative deviation, at checkpoints only
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiagnosticsArchive {
    checkpoints: Vec<usize>,
    geo_ids: Vec<i64>,
    records: BTreeMap<(i64, usize), f64>,
}

impl DiagnosticsArchive {
    pub fn new(geo_ids: Vec<i64>, checkpoints: Vec<usize>) -> Self {
        Self {
            checkpoints,
            geo_ids,
            records: BTreeMap::new(),
        }
    }

    pub fn checkpoints(&self) -> &[usize] {
        &self.checkpoints
    }

    pub fn is_checkpoint(&self, iteration: usize) -> bool {
        self.checkpoints.contains(&iteration)
    }

    pub fn record(&mut self, geo_id: i64, iteration: usize, deviation: f64) {
        self.records.insert((geo_id, iteration), deviation);
    }

    pub fn get(&self, geo_id: i64, iteration: usize) -> Option<f64> {
        self.records.get(&(geo_id, iteration)).copied()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, usize, f64)> + '_ {
        self.records.iter().map(|(&(g, i), &d)| (g, i, d))
    }

    /// One row per geo id, one `iter_<n>` column per checkpoint
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let mut columns = Vec::with_capacity(self.checkpoints.len() + 1);
        columns.push(Column::new("geo_id".into(), self.geo_ids.clone()));

        for &iteration in &self.checkpoints {
            let values: Vec<Option<f64>> = self
                .geo_ids
                .iter()
                .map(|&g| self.get(g, iteration))
                .collect();
            columns.push(Column::new(format!("iter_{}", iteration).into(), values));
        }

        DataFrame::new(columns)
    }
}
