// src/weighting/restructure.rs
//! Sample restructuring: raw entity rows -> household x combination counts.

use ndarray::Array2;
use polars::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::contrib::{ColumnKey, ContributionMatrix};
use super::utils::{ReweightError, Result};

/// Household x combination counts for a single entity kind
#[derive(Debug, Clone, PartialEq)]
pub struct EntityContributions {
    pub entity: String,
    pub hids: Vec<i64>,
    pub columns: Vec<ColumnKey>,
    pub counts: Array2<u32>,
}

/// Count entity records per (household, controlled-variable combination).
///
/// Categorical values are compared as strings, so integer and string coded
/// samples produce the same kind of key. Only observed combinations become
/// columns; households without a combination get 0.
///
/// # Arguments
/// * `entity` - Entity kind, the first component of every column key
/// * `sample` - One row per entity record
/// * `variable_names` - Controlled variables, in key order
/// * `hid_name` - Household id field
pub fn restructure_sample(
    entity: &str,
    sample: &DataFrame,
    variable_names: &[String],
    hid_name: &str,
) -> Result<EntityContributions> {
    let hid_col = sample.column(hid_name)?.strict_cast(&DataType::Int64)?;
    let hid = hid_col.i64()?;

    let var_cols = variable_names
        .iter()
        .map(|name| sample.column(name).and_then(|c| c.cast(&DataType::String)))
        .collect::<PolarsResult<Vec<Column>>>()?;
    let vars = var_cols
        .iter()
        .map(|c| c.str())
        .collect::<PolarsResult<Vec<&StringChunked>>>()?;

    let mut tally: BTreeMap<(i64, Vec<String>), u32> = BTreeMap::new();
    for i in 0..sample.height() {
        let household = hid.get(i).ok_or_else(|| ReweightError::NullValue {
            entity: entity.to_string(),
            field: hid_name.to_string(),
        })?;

        let mut combination = Vec::with_capacity(vars.len());
        for (name, values) in variable_names.iter().zip(vars.iter()) {
            let value = values.get(i).ok_or_else(|| ReweightError::NullValue {
                entity: entity.to_string(),
                field: name.clone(),
            })?;
            combination.push(value.to_string());
        }

        *tally.entry((household, combination)).or_insert(0) += 1;
    }

    let hids: Vec<i64> = tally
        .keys()
        .map(|(h, _)| *h)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let combinations: BTreeSet<&Vec<String>> = tally.keys().map(|(_, c)| c).collect();
    let columns: Vec<ColumnKey> = combinations
        .into_iter()
        .map(|values| ColumnKey::new(entity, values.iter().cloned()))
        .collect();

    let row_of: HashMap<i64, usize> = hids.iter().enumerate().map(|(i, &h)| (h, i)).collect();
    let col_of: HashMap<&[String], usize> = columns
        .iter()
        .enumerate()
        .map(|(j, key)| (key.values.as_slice(), j))
        .collect();

    let mut counts = Array2::zeros((hids.len(), columns.len()));
    for ((household, combination), n) in &tally {
        counts[[row_of[household], col_of[combination.as_slice()]]] = *n;
    }

    Ok(EntityContributions {
        entity: entity.to_string(),
        hids,
        columns,
        counts,
    })
}

/// Outer-join entity tables on household id.
///
/// Rows are the sorted union of household ids, columns the sorted union of
/// every entity's columns; a household absent from an entity contributes 0
/// to that entity's columns.
pub fn stack_contributions(tables: Vec<EntityContributions>) -> Result<ContributionMatrix> {
    if tables.is_empty() {
        return Err(ReweightError::InvalidInput(
            "No entity samples to stack".to_string(),
        ));
    }

    let hids: Vec<i64> = tables
        .iter()
        .flat_map(|t| t.hids.iter().copied())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut all_columns: Vec<ColumnKey> = Vec::new();
    let mut seen: BTreeSet<&ColumnKey> = BTreeSet::new();
    for table in &tables {
        for col in &table.columns {
            if !seen.insert(col) {
                return Err(ReweightError::DuplicateColumn(col.clone()));
            }
            all_columns.push(col.clone());
        }
    }
    all_columns.sort();

    let row_of: HashMap<i64, usize> = hids.iter().enumerate().map(|(i, &h)| (h, i)).collect();
    let col_of: HashMap<&ColumnKey, usize> = all_columns.iter().enumerate().map(|(j, c)| (c, j)).collect();

    let mut counts = Array2::zeros((hids.len(), all_columns.len()));
    for table in &tables {
        let rows: Vec<usize> = table.hids.iter().map(|h| row_of[h]).collect();
        for (j, col) in table.columns.iter().enumerate() {
            let target = col_of[col];
            for (i, &row) in rows.iter().enumerate() {
                counts[[row, target]] = table.counts[[i, j]];
            }
        }
    }

    ContributionMatrix::new(hids, all_columns, counts)
}
