// src/engine/weights.rs

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use polars::prelude::*;
use std::collections::HashMap;

use crate::weighting::utils::{ReweightError, Result};

/// Final household x geo weights, one column per geo id.
///
/// Columns are appended region by region; each remembers the region it was
/// fitted in.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightTable {
    hids: Vec<i64>,
    geo_ids: Vec<i64>,
    regions: Vec<i64>,
    positions: HashMap<i64, usize>,
    columns: Vec<Array1<f64>>,
}

impl WeightTable {
    pub fn new(hids: Vec<i64>) -> Self {
        Self {
            hids,
            geo_ids: Vec::new(),
            regions: Vec::new(),
            positions: HashMap::new(),
            columns: Vec::new(),
        }
    }

    /// Copy a finished region's weight matrix in, one column per geo id
    pub fn insert_region(&mut self, region_id: i64, geo_ids: &[i64], weights: ArrayView2<f64>) -> Result<()> {
        let (n_rows, n_geos) = weights.dim();
        if n_rows != self.hids.len() {
            return Err(ReweightError::DimensionMismatch {
                expected: self.hids.len(),
                got: n_rows,
            });
        }
        if n_geos != geo_ids.len() {
            return Err(ReweightError::DimensionMismatch {
                expected: geo_ids.len(),
                got: n_geos,
            });
        }

        for (j, &geo_id) in geo_ids.iter().enumerate() {
            if self.positions.contains_key(&geo_id) {
                return Err(ReweightError::InvalidInput(format!(
                    "Geo {} is assigned to more than one region",
                    geo_id
                )));
            }
            self.positions.insert(geo_id, self.columns.len());
            self.geo_ids.push(geo_id);
            self.regions.push(region_id);
            self.columns.push(weights.column(j).to_owned());
        }

        Ok(())
    }

    pub fn hids(&self) -> &[i64] {
        &self.hids
    }

    pub fn geo_ids(&self) -> &[i64] {
        &self.geo_ids
    }

    pub fn column(&self, geo_id: i64) -> Option<ArrayView1<'_, f64>> {
        self.positions.get(&geo_id).map(|&j| self.columns[j].view())
    }

    pub fn region_of(&self, geo_id: i64) -> Option<i64> {
        self.positions.get(&geo_id).map(|&j| self.regions[j])
    }

    /// Weight of household `hid` in geo `geo_id`
    pub fn weight(&self, hid: i64, geo_id: i64) -> Option<f64> {
        let row = self.hids.binary_search(&hid).ok()?;
        self.column(geo_id).map(|col| col[row])
    }

    /// Dense (households, geos) matrix in `geo_ids()` order
    pub fn to_array(&self) -> Array2<f64> {
        let mut out = Array2::zeros((self.hids.len(), self.columns.len()));
        for (j, col) in self.columns.iter().enumerate() {
            out.column_mut(j).assign(col);
        }
        out
    }

    /// `hid` column plus one float column per geo id
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let mut columns = Vec::with_capacity(self.columns.len() + 1);
        columns.push(Column::new("hid".into(), self.hids.clone()));
        for (geo_id, col) in self.geo_ids.iter().zip(self.columns.iter()) {
            columns.push(Column::new(geo_id.to_string().into(), col.to_vec()));
        }
        DataFrame::new(columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_insert_and_lookup() {
        let mut table = WeightTable::new(vec![4, 7, 9]);
        table
            .insert_region(1, &[10, 11], array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]].view())
            .unwrap();
        table.insert_region(2, &[20], array![[0.5], [0.0], [1.5]].view()).unwrap();

        assert_eq!(table.geo_ids(), &[10, 11, 20]);
        assert_eq!(table.region_of(11), Some(1));
        assert_eq!(table.region_of(20), Some(2));
        assert_eq!(table.weight(7, 11), Some(4.0));
        assert_eq!(table.weight(8, 11), None);
        assert_eq!(table.column(20).unwrap(), array![0.5, 0.0, 1.5]);
        assert_eq!(table.to_array().dim(), (3, 3));

        let frame = table.to_dataframe().unwrap();
        assert_eq!(frame.shape(), (3, 4));
        assert!(frame.column("hid").is_ok());
        assert_eq!(frame.column("11").unwrap().f64().unwrap().get(1), Some(4.0));
    }

    #[test]
    fn test_rejects_repeated_geo_and_bad_shape() {
        let mut table = WeightTable::new(vec![1, 2]);
        table.insert_region(1, &[10], array![[1.0], [1.0]].view()).unwrap();

        assert!(table.insert_region(2, &[10], array![[1.0], [1.0]].view()).is_err());
        assert!(table.insert_region(2, &[30], array![[1.0]].view()).is_err());
        assert!(table.insert_region(2, &[30, 31], array![[1.0], [1.0]].view()).is_err());
    }
}
