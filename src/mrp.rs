//! Multilevel regression with poststratification over the production panel.
//!
//! The pipeline partitions countries into fully observed and partially
//! observed sets, trains the hierarchical model on the observed side in log
//! space, and imputes the farm-size distribution of the partial side over a
//! full covariate frame. Strata absent from training inherit the pooled
//! baseline instead of requiring their own data, which is what lets MRP
//! cover cells a Pareto interpolation has to extrapolate into.

use log::debug;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::data::{CropTotal, ProductionTable};
use crate::error::{FarmdistError, Result};
use crate::model::{HierarchicalModel, Prediction, ShrinkageConfig, Stratum, TrainingRow};

/// Seeded partition of countries into fully and partially observed sets.
///
/// Sampled once per analysis run and immutable afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObservationSplit {
    observed: Vec<u32>,
    partial_only: Vec<u32>,
}

impl ObservationSplit {
    /// Randomly assigns `observed_fraction` of the countries to the observed
    /// side, keeping at least one. The same seed always yields the same
    /// split.
    pub fn sample(country_ids: &[u32], observed_fraction: f64, seed: u64) -> Result<Self> {
        if !observed_fraction.is_finite() || !(0.0..=1.0).contains(&observed_fraction) {
            return Err(FarmdistError::invalid_parameter(
                "observed_fraction",
                observed_fraction,
                "must lie in [0, 1]",
            ));
        }
        if country_ids.is_empty() {
            return Err(FarmdistError::insufficient("observation split", 1, 0));
        }

        let mut ids = country_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let mut rng = SmallRng::seed_from_u64(seed);
        ids.shuffle(&mut rng);

        let n_observed = ((ids.len() as f64 * observed_fraction).round() as usize)
            .clamp(1, ids.len());
        let mut observed = ids[..n_observed].to_vec();
        let mut partial_only = ids[n_observed..].to_vec();
        observed.sort_unstable();
        partial_only.sort_unstable();

        debug!(
            "observation split: {} observed, {} partial-only",
            observed.len(),
            partial_only.len()
        );
        Ok(Self {
            observed,
            partial_only,
        })
    }

    /// Countries with complete farm-size-resolved data.
    pub fn observed(&self) -> &[u32] {
        &self.observed
    }

    /// Countries with crop-level totals only.
    pub fn partial_only(&self) -> &[u32] {
        &self.partial_only
    }

    /// Whether a country is on the observed side.
    pub fn is_observed(&self, country_id: u32) -> bool {
        self.observed.binary_search(&country_id).is_ok()
    }
}

/// Farm-size-resolved rows of the observed countries with the log-transformed
/// regression target.
#[derive(Clone, Debug)]
pub struct TrainingSet {
    rows: Vec<TrainingRow>,
    mean_production: f64,
}

impl TrainingSet {
    /// Extracts the observed-country rows and takes the natural log of
    /// production. Predictions are reported back in natural units via
    /// exponentiation.
    pub fn build(table: &ProductionTable, split: &ObservationSplit) -> Result<Self> {
        let mut rows = Vec::new();
        let mut total = 0.0;
        for record in table.records() {
            if !split.is_observed(record.country_id) {
                continue;
            }
            total += record.production;
            rows.push(TrainingRow {
                stratum: Stratum {
                    country_id: record.country_id,
                    region: record.region.clone(),
                    development_index: record.development_index,
                    crop: record.crop.clone(),
                    farm_size: record.farm_size.clone(),
                },
                log_production: record.production.ln(),
            });
        }
        if rows.is_empty() {
            return Err(FarmdistError::insufficient("training set", 1, 0));
        }
        let mean_production = total / rows.len() as f64;
        Ok(Self {
            rows,
            mean_production,
        })
    }

    /// Read-only view of the training rows.
    pub fn rows(&self) -> &[TrainingRow] {
        &self.rows
    }

    /// Number of training rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the set holds no rows. Always false for a built set.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Mean production of the training rows, in natural units.
    pub fn mean_production(&self) -> f64 {
        self.mean_production
    }
}

/// Prediction targets for the partially observed countries: the full
/// crop x farm-size grid with country covariates but no production, plus the
/// crop-level totals that are actually observed for those countries.
#[derive(Clone, Debug)]
pub struct PoststratFrame {
    cells: Vec<Stratum>,
    crop_totals: Vec<CropTotal>,
}

impl PoststratFrame {
    /// Builds the frame from the table's level catalogs and the split.
    pub fn build(table: &ProductionTable, split: &ObservationSplit) -> Result<Self> {
        let mut cells = Vec::new();
        for country_id in split.partial_only() {
            let profile = table.country_profile(*country_id).ok_or_else(|| {
                FarmdistError::UnknownLevel {
                    field: "country",
                    level: country_id.to_string(),
                }
            })?;
            for crop in table.crops() {
                for farm_size in table.farm_sizes() {
                    cells.push(Stratum {
                        country_id: *country_id,
                        region: profile.region.clone(),
                        development_index: profile.development_index,
                        crop: crop.clone(),
                        farm_size: farm_size.clone(),
                    });
                }
            }
        }

        let crop_totals = table
            .crop_totals()
            .into_iter()
            .filter(|t| !split.is_observed(t.country_id))
            .collect();

        Ok(Self { cells, crop_totals })
    }

    /// The strata whose production must be imputed.
    pub fn cells(&self) -> &[Stratum] {
        &self.cells
    }

    /// Observed crop-level totals of the partial countries, for diagnostic
    /// comparison against the imputed totals.
    pub fn crop_totals(&self) -> &[CropTotal] {
        &self.crop_totals
    }

    /// Number of cells in the frame.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the frame has no cells (every country observed).
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Configuration for fitting and predicting with the MRP model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MrpOptions {
    /// Partial-pooling strength per grouping factor.
    pub shrinkage: ShrinkageConfig,
    /// Number of posterior-predictive draws per stratum.
    pub draws: usize,
    /// Seed for the prediction draws.
    pub seed: u64,
}

impl Default for MrpOptions {
    fn default() -> Self {
        Self {
            shrinkage: ShrinkageConfig::default(),
            draws: 200,
            seed: 0,
        }
    }
}

impl MrpOptions {
    /// Overrides the shrinkage configuration.
    pub fn with_shrinkage(mut self, shrinkage: ShrinkageConfig) -> Self {
        self.shrinkage = shrinkage;
        self
    }

    /// Overrides the number of posterior-predictive draws.
    pub fn with_draws(mut self, draws: usize) -> Self {
        self.draws = draws;
        self
    }

    /// Overrides the prediction seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.draws == 0 {
            return Err(FarmdistError::invalid_parameter(
                "draws",
                0.0,
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// High-level MRP estimation problem over one table and one split.
#[derive(Clone, Debug)]
pub struct MrpProblem {
    table: ProductionTable,
    split: ObservationSplit,
    training: TrainingSet,
    frame: PoststratFrame,
}

impl MrpProblem {
    /// Builds the training set and poststratification frame up front so a
    /// malformed split fails here rather than mid-pipeline.
    pub fn new(table: ProductionTable, split: ObservationSplit) -> Result<Self> {
        let training = TrainingSet::build(&table, &split)?;
        let frame = PoststratFrame::build(&table, &split)?;
        Ok(Self {
            table,
            split,
            training,
            frame,
        })
    }

    /// Accessor for the underlying table.
    pub fn table(&self) -> &ProductionTable {
        &self.table
    }

    /// Accessor for the country split.
    pub fn split(&self) -> &ObservationSplit {
        &self.split
    }

    /// Accessor for the training set.
    pub fn training(&self) -> &TrainingSet {
        &self.training
    }

    /// Accessor for the poststratification frame.
    pub fn frame(&self) -> &PoststratFrame {
        &self.frame
    }

    /// Fits the hierarchical model on the observed-country rows.
    pub fn fit(&self, options: &MrpOptions) -> Result<MrpFit> {
        options.validate()?;
        let model = HierarchicalModel::fit(self.training.rows(), &options.shrinkage)?;
        Ok(MrpFit {
            model,
            draws: options.draws,
            seed: options.seed,
        })
    }
}

/// A fitted MRP model, ready to impute production for arbitrary strata.
#[derive(Clone, Debug)]
pub struct MrpFit {
    model: HierarchicalModel,
    draws: usize,
    seed: u64,
}

impl MrpFit {
    /// Accessor for the underlying hierarchical model.
    pub fn model(&self) -> &HierarchicalModel {
        &self.model
    }

    /// Non-fatal warnings collected during fitting.
    pub fn warnings(&self) -> &[String] {
        self.model.warnings()
    }

    /// Posterior-predictive estimates for arbitrary strata, in natural units.
    pub fn predict(&self, strata: &[Stratum]) -> Result<Prediction> {
        self.model.predict(strata, self.draws, self.seed)
    }

    /// Imputes every cell of the poststratification frame.
    pub fn poststratify(&self, frame: &PoststratFrame) -> Result<PoststratEstimates> {
        let prediction = self.predict(frame.cells())?;
        let cells = frame
            .cells()
            .iter()
            .zip(&prediction.values)
            .map(|(stratum, production)| CellEstimate {
                stratum: stratum.clone(),
                production: *production,
            })
            .collect();

        let mut warnings = self.model.warnings().to_vec();
        warnings.extend(prediction.warnings);
        Ok(PoststratEstimates { cells, warnings })
    }
}

/// Imputed production for one poststratification cell, in natural units.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellEstimate {
    pub stratum: Stratum,
    pub production: f64,
}

/// Farm-size-resolved estimates for the partially observed countries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoststratEstimates {
    /// One estimate per frame cell.
    pub cells: Vec<CellEstimate>,
    /// Warnings inherited from the fit and the prediction pass.
    pub warnings: Vec<String>,
}

impl PoststratEstimates {
    /// Aggregates the imputed cells to country x crop totals, comparable to
    /// the observed crop-level totals carried by the frame.
    pub fn crop_totals(&self) -> Vec<CropTotal> {
        let mut totals: Vec<CropTotal> = Vec::new();
        for cell in &self.cells {
            match totals.iter_mut().find(|t| {
                t.country_id == cell.stratum.country_id && t.crop == cell.stratum.crop
            }) {
                Some(total) => total.production += cell.production,
                None => totals.push(CropTotal {
                    country_id: cell.stratum.country_id,
                    crop: cell.stratum.crop.clone(),
                    production: cell.production,
                }),
            }
        }
        totals.sort_by(|a, b| (a.country_id, &a.crop).cmp(&(b.country_id, &b.crop)));
        totals
    }
}
