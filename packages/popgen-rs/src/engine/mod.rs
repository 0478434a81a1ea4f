// src/engine/mod.rs
//! Nested region/geo reweighting.
//!
//! For every region a (households, geos) weight matrix starts at 1.0. Each outer
//! iteration first fits the whole matrix to the region targets, then refits
//! every geo column to its own targets for `inner_iterations` rounds. Regions
//! share nothing but the final weight table and run in parallel.

pub mod diagnostics;
pub mod weights;

use ndarray::Array2;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::time::Instant;

use crate::config::ReweightingConfig;
use crate::source::SampleSource;
use crate::weighting::constraints::{ConstraintRow, ConstraintTable, Resolution};
use crate::weighting::contrib::{ContributionIndex, ContributionMatrix};
use crate::weighting::procedure::AdjustStats;
use crate::weighting::restructure::{restructure_sample, stack_contributions};
use crate::weighting::utils::{ReweightError, Result};

pub use diagnostics::{average_deviation, DiagnosticsArchive};
pub use weights::WeightTable;

/// Everything a reweighting run produces
#[derive(Debug, Clone)]
pub struct ReweightingOutput {
    pub weights: WeightTable,
    pub diagnostics: DiagnosticsArchive,
    /// Column adjustments skipped because nothing contributed to them.
    pub skipped_adjustments: usize,
}

/// Reweighting engine over fixed region and geo contribution indexes
#[derive(Debug, Clone)]
pub struct Reweighting {
    config: ReweightingConfig,
    hids: Vec<i64>,
    region_index: ContributionIndex,
    geo_index: ContributionIndex,
}

struct RegionTask<'a> {
    region_id: i64,
    region_row: Option<ConstraintRow<'a>>,
    geo_rows: Vec<(i64, ConstraintRow<'a>)>,
}

struct RegionOutcome {
    region_id: i64,
    geo_ids: Vec<i64>,
    weights: Array2<f64>,
    deviations: Vec<(i64, usize, f64)>,
    stats: AdjustStats,
}

impl Reweighting {
    /// Restructure the samples at both resolutions and index them
    pub fn from_source<S: SampleSource + ?Sized>(config: ReweightingConfig, source: &S) -> Result<Self> {
        config.validate()?;
        let region = contribution_matrix(&config, source, &config.control_variables.region)?;
        let geo = contribution_matrix(&config, source, &config.control_variables.geo)?;
        Self::from_matrices(config, region, geo)
    }

    pub fn from_matrices(
        config: ReweightingConfig,
        region: ContributionMatrix,
        geo: ContributionMatrix,
    ) -> Result<Self> {
        config.validate()?;

        if region.hids() != geo.hids() {
            return Err(ReweightError::HouseholdMismatch {
                region: region.nrows(),
                geo: geo.nrows(),
            });
        }

        let format = config.parameters.ds_format;
        log::debug!(
            "Indexed {} households: {} region columns, {} geo columns ({:?} layout)",
            region.nrows(),
            region.columns().len(),
            geo.columns().len(),
            format
        );

        Ok(Self {
            hids: region.hids().to_vec(),
            region_index: region.index(format),
            geo_index: geo.index(format),
            config,
        })
    }

    pub fn config(&self) -> &ReweightingConfig {
        &self.config
    }

    pub fn hids(&self) -> &[i64] {
        &self.hids
    }

    pub fn region_index(&self) -> &ContributionIndex {
        &self.region_index
    }

    pub fn geo_index(&self) -> &ContributionIndex {
        &self.geo_index
    }

    /// Reweight every region of `source`.
    ///
    /// # Arguments
    /// * `source` - Supplies region ids and the geo ids nested in each
    /// * `region_constraints` - Region targets; `None` skips the region-level step
    /// * `geo_constraints` - Geo targets, one row per geo id
    pub fn run<S: SampleSource + ?Sized>(
        &self,
        source: &S,
        region_constraints: Option<&ConstraintTable>,
        geo_constraints: &ConstraintTable,
    ) -> Result<ReweightingOutput> {
        if let Some(table) = region_constraints {
            table.validate_domain(&self.region_index, Resolution::Region)?;
        }
        geo_constraints.validate_domain(&self.geo_index, Resolution::Geo)?;

        let tasks = source
            .region_ids()
            .into_iter()
            .map(|region_id| {
                let region_row = region_constraints
                    .map(|t| t.require_row(region_id, Resolution::Region))
                    .transpose()?;
                let geo_rows = source
                    .geo_ids_for_region(region_id)
                    .into_iter()
                    .map(|geo_id| {
                        let row = geo_constraints.require_row(geo_id, Resolution::Geo)?;
                        Ok::<_, ReweightError>((geo_id, row))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok::<_, ReweightError>(RegionTask {
                    region_id,
                    region_row,
                    geo_rows,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let all_geo_ids = tasks
            .iter()
            .flat_map(|t| t.geo_rows.iter().map(|&(g, _)| g))
            .collect();
        let mut diagnostics = DiagnosticsArchive::new(all_geo_ids, self.config.checkpoints());

        let outcomes = tasks
            .par_iter()
            .map(|task| self.reweight_region(task, &diagnostics))
            .collect::<Result<Vec<_>>>()?;

        let mut weights = WeightTable::new(self.hids.clone());
        let mut stats = AdjustStats::default();

        for outcome in outcomes {
            weights.insert_region(outcome.region_id, &outcome.geo_ids, outcome.weights.view())?;
            for (geo_id, iteration, deviation) in outcome.deviations {
                diagnostics.record(geo_id, iteration, deviation);
            }
            stats += outcome.stats;
        }

        if stats.skipped > 0 {
            log::warn!("{} column adjustments were skipped for lack of weight mass", stats.skipped);
        }

        Ok(ReweightingOutput {
            weights,
            diagnostics,
            skipped_adjustments: stats.skipped,
        })
    }

    fn reweight_region(&self, task: &RegionTask<'_>, diagnostics: &DiagnosticsArchive) -> Result<RegionOutcome> {
        let params = &self.config.parameters;
        let procedure = params.procedure;
        let region_id = task.region_id;

        log::info!(
            "{} for region {} ({} geos)",
            procedure,
            region_id,
            task.geo_rows.len()
        );

        let mut weights = Array2::<f64>::ones((self.hids.len(), task.geo_rows.len()));
        let mut deviations = Vec::new();
        let mut stats = AdjustStats::default();

        for iteration in 0..params.outer_iterations {
            let started = Instant::now();

            if let Some(region_row) = task.region_row {
                stats += procedure
                    .adjust(&mut weights, region_row, &self.region_index, params.column_order, 1)
                    .map_err(|e| e.in_context(region_id, None, iteration))?;
            }

            for (position, &(geo_id, geo_row)) in task.geo_rows.iter().enumerate() {
                let mut column = weights.column(position).to_owned();
                stats += procedure
                    .adjust(
                        &mut column,
                        geo_row,
                        &self.geo_index,
                        params.column_order,
                        params.inner_iterations,
                    )
                    .map_err(|e| e.in_context(region_id, Some(geo_id), iteration))?;
                weights.column_mut(position).assign(&column);
                log::debug!(
                    "Region {} geo {} outer iteration {}: weight sum {:.6}",
                    region_id,
                    geo_id,
                    iteration,
                    column.sum()
                );

                if diagnostics.is_checkpoint(iteration) {
                    let deviation = average_deviation(column.view(), geo_row, &self.geo_index)
                        .map_err(|e| e.in_context(region_id, Some(geo_id), iteration))?;
                    deviations.push((geo_id, iteration, deviation));
                }
            }

            log::debug!(
                "Region {} outer iteration {} complete in {:.4}s",
                region_id,
                iteration,
                started.elapsed().as_secs_f64()
            );
        }

        log::info!("Region {} sample weights sum: {:.6}", region_id, weights.sum());

        Ok(RegionOutcome {
            region_id,
            geo_ids: task.geo_rows.iter().map(|&(g, _)| g).collect(),
            weights,
            deviations,
            stats,
        })
    }
}

/// Restructure and stack every configured entity at one resolution
fn contribution_matrix<S: SampleSource + ?Sized>(
    config: &ReweightingConfig,
    source: &S,
    controls: &BTreeMap<String, Vec<String>>,
) -> Result<ContributionMatrix> {
    let tables = config
        .entities
        .iter()
        .map(|entity| {
            let sample = source
                .sample(entity)
                .ok_or_else(|| ReweightError::MissingSample(entity.clone()))?;
            let variables = controls.get(entity).ok_or_else(|| {
                ReweightError::InvalidConfig(format!("No control variables for entity '{}'", entity))
            })?;
            restructure_sample(entity, sample, variables, &config.hid)
        })
        .collect::<Result<Vec<_>>>()?;

    stack_contributions(tables)
}
