//! Hierarchical regression core: partial pooling via penalized least squares.
//!
//! The model regresses log production on fixed effects (farm size, crop,
//! region, development index) plus group-level effects for country,
//! farm_size x region, and crop x farm_size. Group blocks carry a ridge
//! penalty, which is the mixed-model formulation of partial pooling: a
//! group level with little data is shrunk toward the global mean, one with
//! plenty of data keeps its own estimate.

use std::collections::HashMap;

use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::data::{farm_size_rank, REGIONS};
use crate::error::{FarmdistError, Result};

/// One covariate cell: everything the model needs to predict a production
/// value, with no production attached.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stratum {
    pub country_id: u32,
    pub region: String,
    pub development_index: f64,
    pub crop: String,
    pub farm_size: String,
}

/// A training observation: a stratum plus its log-transformed production.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingRow {
    pub stratum: Stratum,
    pub log_production: f64,
}

/// Ridge precision of each partially pooled grouping factor. Larger values
/// pool harder toward the global mean. These are tunable hyperparameters,
/// not derived constants.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShrinkageConfig {
    /// Penalty on country intercepts.
    pub country: f64,
    /// Penalty on farm_size x region intercepts.
    pub size_region: f64,
    /// Penalty on crop x farm_size intercepts.
    pub crop_size: f64,
}

impl Default for ShrinkageConfig {
    fn default() -> Self {
        // Interaction blocks have many more, sparser levels than the country
        // block, so they pool harder by default.
        Self {
            country: 1.0,
            size_region: 2.0,
            crop_size: 2.0,
        }
    }
}

impl ShrinkageConfig {
    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("shrinkage.country", self.country),
            ("shrinkage.size_region", self.size_region),
            ("shrinkage.crop_size", self.crop_size),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(FarmdistError::invalid_parameter(
                    name,
                    value,
                    "must be finite and positive",
                ));
            }
        }
        Ok(())
    }
}

/// Posterior-predictive output for a batch of strata.
#[derive(Clone, Debug)]
pub struct Prediction {
    /// Mean of the posterior-predictive draws per stratum, in log space.
    pub log_means: Vec<f64>,
    /// The log means exponentiated back to natural production units.
    pub values: Vec<f64>,
    /// Non-fatal issues hit while encoding the strata, e.g. covariate levels
    /// unseen in training that fell back to the pooled baseline.
    pub warnings: Vec<String>,
}

/// Maps categorical levels onto design-matrix columns.
///
/// Fixed-effect factors are dummy-coded against their first level; group
/// factors get one column per observed level (or level pair). Levels are
/// ordered canonically so the encoding is independent of row order.
#[derive(Clone, Debug)]
struct Encoder {
    farm_sizes: Vec<String>,
    crops: Vec<String>,
    regions: Vec<String>,
    countries: Vec<u32>,
    size_region: Vec<(usize, usize)>,
    crop_size: Vec<(usize, usize)>,
    size_index: HashMap<String, usize>,
    crop_index: HashMap<String, usize>,
    region_index: HashMap<String, usize>,
    country_index: HashMap<u32, usize>,
    size_region_index: HashMap<(usize, usize), usize>,
    crop_size_index: HashMap<(usize, usize), usize>,
}

impl Encoder {
    fn build(rows: &[TrainingRow]) -> Result<Self> {
        let mut size_ranks: Vec<usize> = Vec::new();
        let mut crops: Vec<String> = Vec::new();
        let mut region_ranks: Vec<usize> = Vec::new();
        let mut countries: Vec<u32> = Vec::new();

        for row in rows {
            let stratum = &row.stratum;
            let rank = farm_size_rank(&stratum.farm_size).ok_or_else(|| {
                FarmdistError::UnknownLevel {
                    field: "farm_size",
                    level: stratum.farm_size.clone(),
                }
            })?;
            let region_rank = REGIONS
                .iter()
                .position(|r| *r == stratum.region)
                .ok_or_else(|| FarmdistError::UnknownLevel {
                    field: "region",
                    level: stratum.region.clone(),
                })?;
            if !size_ranks.contains(&rank) {
                size_ranks.push(rank);
            }
            if !region_ranks.contains(&region_rank) {
                region_ranks.push(region_rank);
            }
            if !crops.contains(&stratum.crop) {
                crops.push(stratum.crop.clone());
            }
            if !countries.contains(&stratum.country_id) {
                countries.push(stratum.country_id);
            }
        }

        size_ranks.sort_unstable();
        region_ranks.sort_unstable();
        crops.sort();
        countries.sort_unstable();

        let farm_sizes: Vec<String> = size_ranks
            .iter()
            .map(|r| crate::data::FARM_SIZES[*r].to_string())
            .collect();
        let regions: Vec<String> = region_ranks
            .iter()
            .map(|r| REGIONS[*r].to_string())
            .collect();

        let size_index: HashMap<String, usize> = farm_sizes
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i))
            .collect();
        let crop_index: HashMap<String, usize> = crops
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i))
            .collect();
        let region_index: HashMap<String, usize> = regions
            .iter()
            .enumerate()
            .map(|(i, r)| (r.clone(), i))
            .collect();
        let country_index: HashMap<u32, usize> =
            countries.iter().enumerate().map(|(i, c)| (*c, i)).collect();

        let mut size_region: Vec<(usize, usize)> = Vec::new();
        let mut crop_size: Vec<(usize, usize)> = Vec::new();
        for row in rows {
            let s = size_index[&row.stratum.farm_size];
            let r = region_index[&row.stratum.region];
            let c = crop_index[&row.stratum.crop];
            if !size_region.contains(&(s, r)) {
                size_region.push((s, r));
            }
            if !crop_size.contains(&(c, s)) {
                crop_size.push((c, s));
            }
        }
        size_region.sort_unstable();
        crop_size.sort_unstable();

        if countries.len() < 2 {
            return Err(FarmdistError::DegenerateFactor {
                factor: "country",
                levels: countries.len(),
            });
        }
        if size_region.len() < 2 {
            return Err(FarmdistError::DegenerateFactor {
                factor: "farm_size x region",
                levels: size_region.len(),
            });
        }
        if crop_size.len() < 2 {
            return Err(FarmdistError::DegenerateFactor {
                factor: "crop x farm_size",
                levels: crop_size.len(),
            });
        }

        let size_region_index: HashMap<(usize, usize), usize> = size_region
            .iter()
            .enumerate()
            .map(|(i, k)| (*k, i))
            .collect();
        let crop_size_index: HashMap<(usize, usize), usize> =
            crop_size.iter().enumerate().map(|(i, k)| (*k, i)).collect();

        Ok(Self {
            farm_sizes,
            crops,
            regions,
            countries,
            size_region,
            crop_size,
            size_index,
            crop_index,
            region_index,
            country_index,
            size_region_index,
            crop_size_index,
        })
    }

    fn fixed_dim(&self) -> usize {
        // Intercept, dummy-coded factors, development index.
        1 + (self.farm_sizes.len() - 1) + (self.crops.len() - 1) + (self.regions.len() - 1) + 1
    }

    fn dim(&self) -> usize {
        self.fixed_dim()
            + self.countries.len()
            + self.size_region.len()
            + self.crop_size.len()
    }

    /// Ridge penalty per column: zero on the fixed block, the configured
    /// precision on each group block.
    fn penalties(&self, shrinkage: &ShrinkageConfig) -> Vec<f64> {
        let mut diag = vec![0.0; self.dim()];
        let mut offset = self.fixed_dim();
        for slot in diag.iter_mut().skip(offset).take(self.countries.len()) {
            *slot = shrinkage.country;
        }
        offset += self.countries.len();
        for slot in diag.iter_mut().skip(offset).take(self.size_region.len()) {
            *slot = shrinkage.size_region;
        }
        offset += self.size_region.len();
        for slot in diag.iter_mut().skip(offset).take(self.crop_size.len()) {
            *slot = shrinkage.crop_size;
        }
        diag
    }

    /// Fills one design-matrix row. Unseen group levels contribute nothing
    /// (the pooled fallback); unseen fixed-effect levels fall back to the
    /// baseline level and are reported through `unseen`.
    fn encode(&self, stratum: &Stratum, row: &mut [f64], unseen: &mut Vec<String>) {
        row.fill(0.0);
        row[0] = 1.0;

        let mut offset = 1;
        let size = self.size_index.get(&stratum.farm_size).copied();
        match size {
            Some(idx) if idx > 0 => row[offset + idx - 1] = 1.0,
            Some(_) => {}
            None => unseen.push(format!("farm_size `{}`", stratum.farm_size)),
        }
        offset += self.farm_sizes.len() - 1;

        let crop = self.crop_index.get(&stratum.crop).copied();
        match crop {
            Some(idx) if idx > 0 => row[offset + idx - 1] = 1.0,
            Some(_) => {}
            None => unseen.push(format!("crop `{}`", stratum.crop)),
        }
        offset += self.crops.len() - 1;

        let region = self.region_index.get(&stratum.region).copied();
        match region {
            Some(idx) if idx > 0 => row[offset + idx - 1] = 1.0,
            Some(_) => {}
            None => unseen.push(format!("region `{}`", stratum.region)),
        }
        offset += self.regions.len() - 1;

        row[offset] = stratum.development_index;
        offset += 1;

        if let Some(idx) = self.country_index.get(&stratum.country_id) {
            row[offset + idx] = 1.0;
        }
        offset += self.countries.len();

        if let (Some(s), Some(r)) = (size, region) {
            if let Some(idx) = self.size_region_index.get(&(s, r)) {
                row[offset + idx] = 1.0;
            }
        }
        offset += self.size_region.len();

        if let (Some(c), Some(s)) = (crop, size) {
            if let Some(idx) = self.crop_size_index.get(&(c, s)) {
                row[offset + idx] = 1.0;
            }
        }
    }
}

/// A fitted hierarchical regression.
///
/// Owns everything needed to draw from the posterior predictive: the point
/// estimates, the residual scale, and a Cholesky factor of the posterior
/// coefficient covariance. Fitting is deterministic; only prediction draws
/// consume randomness, and those take an explicit seed.
#[derive(Clone, Debug)]
pub struct HierarchicalModel {
    encoder: Encoder,
    beta: DVector<f64>,
    sigma: f64,
    posterior_l: DMatrix<f64>,
    edf: f64,
    n_obs: usize,
    warnings: Vec<String>,
}

impl HierarchicalModel {
    /// Fits the model on training rows with the given shrinkage precisions.
    ///
    /// This is a pure function of its arguments, so independent fits (e.g.
    /// cross-validation folds) can run in parallel without sharing state.
    pub fn fit(rows: &[TrainingRow], shrinkage: &ShrinkageConfig) -> Result<Self> {
        shrinkage.validate()?;
        let n = rows.len();
        if n < 2 {
            return Err(FarmdistError::insufficient("hierarchical fit", 2, n));
        }

        for row in rows {
            if !row.log_production.is_finite() {
                return Err(FarmdistError::non_finite("log production"));
            }
            if !row.stratum.development_index.is_finite() {
                return Err(FarmdistError::non_finite("development index"));
            }
        }

        let mean_y: f64 = rows.iter().map(|r| r.log_production).sum::<f64>() / n as f64;
        let ss_y: f64 = rows
            .iter()
            .map(|r| (r.log_production - mean_y).powi(2))
            .sum();
        if ss_y / (n as f64 - 1.0) < 1e-12 {
            return Err(FarmdistError::ZeroVariance {
                context: "log production",
            });
        }

        let encoder = Encoder::build(rows)?;
        let p = encoder.dim();
        let mut warnings = Vec::new();

        let mut x = DMatrix::zeros(n, p);
        let mut y = DVector::zeros(n);
        let mut scratch = vec![0.0; p];
        let mut unseen = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            encoder.encode(&row.stratum, &mut scratch, &mut unseen);
            for (j, value) in scratch.iter().enumerate() {
                x[(i, j)] = *value;
            }
            y[i] = row.log_production;
        }
        debug_assert!(unseen.is_empty(), "training levels are seen by definition");

        let xtx = x.transpose() * &x;
        let xty = x.transpose() * &y;
        let penalties = encoder.penalties(shrinkage);

        let mut a = xtx.clone();
        for (j, penalty) in penalties.iter().enumerate() {
            a[(j, j)] += penalty;
        }

        let cholesky = match nalgebra::linalg::Cholesky::new(a.clone()) {
            Some(c) => c,
            None => {
                // One ridge bump on the whole diagonal before giving up.
                let jitter = 1e-8 * a.diagonal().mean().max(1.0);
                for j in 0..p {
                    a[(j, j)] += jitter;
                }
                let message = format!(
                    "normal equations near singular; ridge jitter {jitter:.3e} applied"
                );
                warn!("{message}");
                warnings.push(message);
                nalgebra::linalg::Cholesky::new(a.clone())
                    .ok_or_else(|| FarmdistError::singular("hierarchical fit"))?
            }
        };

        let beta = cholesky.solve(&xty);
        let residuals = &y - &x * &beta;
        let ssr = residuals.norm_squared();

        let a_inv = cholesky.inverse();
        let edf = (&a_inv * &xtx).trace();
        let mut dof = n as f64 - edf;
        if dof < 1.0 {
            let message = format!(
                "residual degrees of freedom {dof:.2} clamped to 1; sigma estimate is coarse"
            );
            warn!("{message}");
            warnings.push(message);
            dof = 1.0;
        }
        let sigma2 = ssr / dof;
        if !sigma2.is_finite() {
            return Err(FarmdistError::non_finite("residual variance"));
        }
        let sigma = sigma2.sqrt();

        // Posterior coefficient covariance sigma^2 * (X'X + Lambda)^-1;
        // symmetrize before factoring to absorb inversion round-off.
        let mut cov = &a_inv * sigma2;
        cov = (&cov + cov.transpose()) * 0.5;
        let posterior_l = match nalgebra::linalg::Cholesky::new(cov.clone()) {
            Some(c) => c.l(),
            None => {
                let jitter = 1e-12 * (1.0 + sigma2);
                for j in 0..p {
                    cov[(j, j)] += jitter;
                }
                let message = "posterior covariance near singular; jitter applied".to_string();
                warn!("{message}");
                warnings.push(message);
                nalgebra::linalg::Cholesky::new(cov)
                    .ok_or_else(|| FarmdistError::singular("posterior covariance"))?
                    .l()
            }
        };

        debug!(
            "hierarchical fit: n = {n}, p = {p}, edf = {edf:.1}, sigma = {sigma:.4}"
        );

        Ok(Self {
            encoder,
            beta,
            sigma,
            posterior_l,
            edf,
            n_obs: n,
            warnings,
        })
    }

    /// Residual standard deviation in log space.
    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Effective number of parameters after penalization.
    pub fn effective_dim(&self) -> f64 {
        self.edf
    }

    /// Number of training observations the fit consumed.
    pub fn n_obs(&self) -> usize {
        self.n_obs
    }

    /// Non-fatal warnings collected while fitting.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Draws from the posterior predictive for each stratum and returns the
    /// per-stratum mean of the draws, in log space and exponentiated back to
    /// natural units.
    ///
    /// Coefficient uncertainty enters through the posterior Cholesky factor,
    /// observation noise through the residual scale. The same seed always
    /// produces the same prediction.
    pub fn predict(&self, strata: &[Stratum], draws: usize, seed: u64) -> Result<Prediction> {
        if draws == 0 {
            return Err(FarmdistError::invalid_parameter(
                "draws",
                0.0,
                "must be at least 1",
            ));
        }
        if strata.is_empty() {
            return Ok(Prediction {
                log_means: Vec::new(),
                values: Vec::new(),
                warnings: Vec::new(),
            });
        }

        let p = self.encoder.dim();
        let m = strata.len();
        let mut x = DMatrix::zeros(m, p);
        let mut scratch = vec![0.0; p];
        let mut unseen = Vec::new();
        for (i, stratum) in strata.iter().enumerate() {
            self.encoder.encode(stratum, &mut scratch, &mut unseen);
            for (j, value) in scratch.iter().enumerate() {
                x[(i, j)] = *value;
            }
        }
        unseen.sort();
        unseen.dedup();
        let mut warnings: Vec<String> = unseen
            .into_iter()
            .map(|level| format!("{level} not seen in training; using pooled baseline"))
            .collect();
        for message in &warnings {
            warn!("{message}");
        }

        let mut rng = SmallRng::seed_from_u64(seed);
        let normal = StandardNormal;

        // Coefficient draws: beta + L z, assembled as one p x draws matrix.
        let mut z = DMatrix::zeros(p, draws);
        for j in 0..draws {
            for i in 0..p {
                z[(i, j)] = normal.sample(&mut rng);
            }
        }
        let mut coef = &self.posterior_l * z;
        for j in 0..draws {
            let mut column = coef.column_mut(j);
            column += &self.beta;
        }

        let mut predicted = &x * coef;
        for i in 0..m {
            for j in 0..draws {
                let noise: f64 = normal.sample(&mut rng);
                predicted[(i, j)] += self.sigma * noise;
            }
        }

        let mut log_means = Vec::with_capacity(m);
        let mut values = Vec::with_capacity(m);
        for i in 0..m {
            let mean = predicted.row(i).sum() / draws as f64;
            if !mean.is_finite() {
                return Err(FarmdistError::non_finite("posterior prediction"));
            }
            log_means.push(mean);
            values.push(mean.exp());
        }

        Ok(Prediction {
            log_means,
            values,
            warnings,
        })
    }
}
