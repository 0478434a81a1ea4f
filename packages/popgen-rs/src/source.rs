// src/source.rs

use polars::prelude::DataFrame;
use std::collections::{BTreeMap, HashMap};

/// Read access to the sample tables and the region/geo hierarchy
pub trait SampleSource {
    /// Raw sample rows for one entity kind
    fn sample(&self, entity: &str) -> Option<&DataFrame>;

    /// Region ids in processing order
    fn region_ids(&self) -> Vec<i64>;

    /// Geo ids nested in `region_id`, in the order their weight columns are laid out
    fn geo_ids_for_region(&self, region_id: i64) -> Vec<i64>;
}

/// In-memory source built from already-loaded frames
#[derive(Debug, Default, Clone)]
pub struct InMemorySource {
    samples: HashMap<String, DataFrame>,
    regions: BTreeMap<i64, Vec<i64>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sample(mut self, entity: &str, sample: DataFrame) -> Self {
        self.samples.insert(entity.to_string(), sample);
        self
    }

    pub fn with_region(mut self, region_id: i64, geo_ids: Vec<i64>) -> Self {
        self.regions.insert(region_id, geo_ids);
        self
    }
}

impl SampleSource for InMemorySource {
    fn sample(&self, entity: &str) -> Option<&DataFrame> {
        self.samples.get(entity)
    }

    fn region_ids(&self) -> Vec<i64> {
        self.regions.keys().copied().collect()
    }

    fn geo_ids_for_region(&self, region_id: i64) -> Vec<i64> {
        self.regions.get(&region_id).cloned().unwrap_or_default()
    }
}
