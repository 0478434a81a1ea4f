// src/weighting/contrib.rs
//! Household contribution matrices and the per-column contribution index.

use ndarray::{Array2, ArrayView1};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::utils::{weighted_sum, ReweightError, Result};

/// Composite constraint key: entity kind plus one value per controlled variable.
///
/// Ordering is lexicographic on (entity, values), which is the column order of
/// every stacked matrix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnKey {
    pub entity: String,
    pub values: Vec<String>,
}

impl ColumnKey {
    pub fn new<E, I, V>(entity: E, values: I) -> Self
    where
        E: Into<String>,
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Self {
            entity: entity.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}", self.entity)?;
        for v in &self.values {
            write!(f, ", {}", v)?;
        }
        write!(f, ")")
    }
}

/// Storage layout of the contribution index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DsFormat {
    /// Dense: every household row is stored for every column, zeros included.
    #[default]
    Full,
    /// Sparse: only rows with a nonzero contribution are stored.
    Contributing,
}

impl FromStr for DsFormat {
    type Err = ReweightError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "full" => Ok(DsFormat::Full),
            "contributing" => Ok(DsFormat::Contributing),
            _ => Err(ReweightError::InvalidDsFormat(s.to_string())),
        }
    }
}

/// Stacked household x column count matrix for one resolution.
///
/// Rows follow `hids` (ascending), columns follow `columns` (lexicographic).
#[derive(Debug, Clone, PartialEq)]
pub struct ContributionMatrix {
    hids: Vec<i64>,
    columns: Vec<ColumnKey>,
    counts: Array2<u32>,
}

impl ContributionMatrix {
    pub fn new(hids: Vec<i64>, columns: Vec<ColumnKey>, counts: Array2<u32>) -> Result<Self> {
        let (n_rows, n_cols) = counts.dim();
        if hids.len() != n_rows {
            return Err(ReweightError::DimensionMismatch {
                expected: n_rows,
                got: hids.len(),
            });
        }
        if columns.len() != n_cols {
            return Err(ReweightError::DimensionMismatch {
                expected: n_cols,
                got: columns.len(),
            });
        }
        Ok(Self {
            hids,
            columns,
            counts,
        })
    }

    pub fn hids(&self) -> &[i64] {
        &self.hids
    }

    pub fn columns(&self) -> &[ColumnKey] {
        &self.columns
    }

    pub fn counts(&self) -> &Array2<u32> {
        &self.counts
    }

    pub fn nrows(&self) -> usize {
        self.hids.len()
    }

    /// Build the per-column contribution index in the requested layout
    pub fn index(&self, format: DsFormat) -> ContributionIndex {
        let n_rows = self.nrows();
        let mut entries = Vec::with_capacity(self.columns.len());
        let mut positions = HashMap::with_capacity(self.columns.len());

        for (j, key) in self.columns.iter().enumerate() {
            let col = self.counts.column(j);
            let entry = match format {
                DsFormat::Full => ColumnContribution {
                    rows: (0..n_rows).collect(),
                    values: col.to_vec(),
                },
                DsFormat::Contributing => {
                    let (rows, values) = col
                        .iter()
                        .enumerate()
                        .filter(|&(_, &c)| c > 0)
                        .map(|(i, &c)| (i, c))
                        .unzip();
                    ColumnContribution { rows, values }
                }
            };
            positions.insert(key.clone(), j);
            entries.push(entry);
        }

        ContributionIndex {
            format,
            n_rows,
            columns: self.columns.clone(),
            positions,
            entries,
        }
    }
}

/// Stored (row, contribution) pairs for one column
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnContribution {
    rows: Vec<usize>,
    values: Vec<u32>,
}

impl ColumnContribution {
    /// Every stored pair; under the full layout this includes zero contributions.
    pub fn pairs(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        self.rows.iter().copied().zip(self.values.iter().copied())
    }

    /// Pairs with a nonzero contribution only
    pub fn contributing(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        self.pairs().filter(|&(_, c)| c > 0)
    }

    pub fn weighted_sum(&self, weights: ArrayView1<f64>) -> f64 {
        weighted_sum(weights, self.pairs())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Column key -> contribution lookup, immutable for a reweighting run
#[derive(Debug, Clone)]
pub struct ContributionIndex {
    format: DsFormat,
    n_rows: usize,
    columns: Vec<ColumnKey>,
    positions: HashMap<ColumnKey, usize>,
    entries: Vec<ColumnContribution>,
}

impl ContributionIndex {
    pub fn format(&self) -> DsFormat {
        self.format
    }

    pub fn nrows(&self) -> usize {
        self.n_rows
    }

    pub fn columns(&self) -> &[ColumnKey] {
        &self.columns
    }

    pub fn contains(&self, key: &ColumnKey) -> bool {
        self.positions.contains_key(key)
    }

    pub fn get(&self, key: &ColumnKey) -> Option<&ColumnContribution> {
        self.positions.get(key).map(|&j| &self.entries[j])
    }

    pub(crate) fn require(&self, key: &ColumnKey) -> Result<&ColumnContribution> {
        self.get(key).ok_or_else(|| ReweightError::UnknownConstraintColumn {
            column: key.clone(),
            resolution: "indexed".to_string(),
        })
    }
}
