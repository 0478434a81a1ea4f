// src/weighting/constraints.rs

use ndarray::{Array2, ArrayView1};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use super::contrib::{ColumnKey, ContributionIndex};
use super::utils::{ReweightError, Result};

/// Geographic resolution a matrix or constraint table belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Region,
    Geo,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Region => write!(f, "region"),
            Resolution::Geo => write!(f, "geo"),
        }
    }
}

/// Order in which constraint columns are visited within one adjustment round.
///
/// IPF-family updates are order sensitive, so the fixed point reached depends
/// on this choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnOrder {
    /// Last listed column first (historical behaviour).
    #[default]
    Reversed,
    /// Columns in the order the constraint table lists them.
    Listed,
}

/// Target counts per (region id | geo id) x constraint column
#[derive(Debug, Clone)]
pub struct ConstraintTable {
    ids: Vec<i64>,
    positions: HashMap<i64, usize>,
    columns: Vec<ColumnKey>,
    values: Array2<f64>,
}

impl ConstraintTable {
    /// # Arguments
    /// * `ids` - Region or geo ids, one per row of `values`
    /// * `columns` - Constraint keys, one per column of `values`
    /// * `values` - Target counts (n_ids, n_columns)
    pub fn new(ids: Vec<i64>, columns: Vec<ColumnKey>, values: Array2<f64>) -> Result<Self> {
        let (n_ids, n_cols) = values.dim();

        if ids.len() != n_ids {
            return Err(ReweightError::DimensionMismatch {
                expected: n_ids,
                got: ids.len(),
            });
        }
        if columns.len() != n_cols {
            return Err(ReweightError::DimensionMismatch {
                expected: n_cols,
                got: columns.len(),
            });
        }

        let mut seen = BTreeSet::new();
        for col in &columns {
            if !seen.insert(col) {
                return Err(ReweightError::DuplicateColumn(col.clone()));
            }
        }

        for (i, &target) in values.iter().enumerate() {
            if !target.is_finite() || target < 0.0 {
                return Err(ReweightError::InvalidInput(format!(
                    "Target for id {} column {} is {}",
                    ids[i / n_cols],
                    columns[i % n_cols],
                    target
                )));
            }
        }

        let mut positions = HashMap::with_capacity(ids.len());
        for (i, &id) in ids.iter().enumerate() {
            if positions.insert(id, i).is_some() {
                return Err(ReweightError::DuplicateConstraintId(id));
            }
        }

        Ok(Self {
            ids,
            positions,
            columns,
            values,
        })
    }

    /// Build from one `(id, targets)` row per region or geo
    pub fn from_rows(columns: Vec<ColumnKey>, rows: Vec<(i64, Vec<f64>)>) -> Result<Self> {
        let n_cols = columns.len();
        let mut ids = Vec::with_capacity(rows.len());
        let mut flat = Vec::with_capacity(rows.len() * n_cols);

        for (id, targets) in rows {
            if targets.len() != n_cols {
                return Err(ReweightError::DimensionMismatch {
                    expected: n_cols,
                    got: targets.len(),
                });
            }
            ids.push(id);
            flat.extend(targets);
        }

        let values = Array2::from_shape_vec((ids.len(), n_cols), flat).map_err(|e| {
            ReweightError::InvalidInput(format!("Cannot shape constraint rows: {}", e))
        })?;

        Self::new(ids, columns, values)
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn columns(&self) -> &[ColumnKey] {
        &self.columns
    }

    pub fn row(&self, id: i64) -> Option<ConstraintRow<'_>> {
        self.positions.get(&id).map(|&i| ConstraintRow {
            columns: &self.columns,
            values: self.values.row(i),
        })
    }

    pub fn require_row(&self, id: i64, resolution: Resolution) -> Result<ConstraintRow<'_>> {
        self.row(id).ok_or_else(|| ReweightError::MissingConstraints {
            id,
            resolution: resolution.to_string(),
        })
    }

    /// The constraint columns must match the contribution domain exactly
    pub fn validate_domain(&self, index: &ContributionIndex, resolution: Resolution) -> Result<()> {
        for col in &self.columns {
            if !index.contains(col) {
                return Err(ReweightError::UnknownConstraintColumn {
                    column: col.clone(),
                    resolution: resolution.to_string(),
                });
            }
        }

        let constrained: BTreeSet<&ColumnKey> = self.columns.iter().collect();
        for col in index.columns() {
            if !constrained.contains(col) {
                return Err(ReweightError::UnconstrainedColumn {
                    column: col.clone(),
                    resolution: resolution.to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Targets of a single region or geo
#[derive(Debug, Clone, Copy)]
pub struct ConstraintRow<'a> {
    columns: &'a [ColumnKey],
    values: ArrayView1<'a, f64>,
}

impl<'a> ConstraintRow<'a> {
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Columns in listed order
    pub fn iter(&self) -> impl Iterator<Item = (&'a ColumnKey, f64)> + '_ {
        self.columns.iter().zip(self.values.iter().copied())
    }

    /// Columns in adjustment order
    pub fn ordered(&self, order: ColumnOrder) -> Vec<(&'a ColumnKey, f64)> {
        let mut cols: Vec<_> = self.iter().collect();
        if order == ColumnOrder::Reversed {
            cols.reverse();
        }
        cols
    }

    pub fn target(&self, key: &ColumnKey) -> Option<f64> {
        self.columns
            .iter()
            .position(|c| c == key)
            .map(|j| self.values[j])
    }
}
