//! Synthetic production panel generator used to exercise both estimators.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::data::{ProductionRecord, ProductionTable, CROPS, FARM_SIZES, REGIONS};
use crate::error::{FarmdistError, Result};

/// Production scale of the smallest farm-size class, in kcal.
const BASE_SCALE: f64 = 1200.0;
/// Multiplicative growth of the size effect per farm-size rank.
const BASE_GROWTH: f64 = 1.3;
/// Log-scale spread of the per-crop multipliers.
const CROP_SD: f64 = 0.25;
/// Log-scale spread of the per-region multipliers.
const REGION_SD: f64 = 0.2;
/// Strength of the development-index effect per unit of centered size rank.
/// Small classes are favored at low development, large classes at high.
const DEV_STRENGTH: f64 = 0.25;

/// Configuration for the synthetic panel.
#[derive(Clone, Debug)]
pub struct SimulatorConfig {
    /// Number of countries to generate.
    pub n_countries: usize,
    /// Number of crops, taken from the front of [`CROPS`].
    pub n_crops: usize,
    /// Number of farm-size classes, taken from the front of [`FARM_SIZES`].
    pub n_farm_sizes: usize,
    /// Standard deviation of the log-space noise term.
    pub noise_sigma: f64,
    /// Seed for all random draws; the panel is a pure function of the config.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            n_countries: 50,
            n_crops: 8,
            n_farm_sizes: 7,
            noise_sigma: 0.3,
            seed: 0,
        }
    }
}

impl SimulatorConfig {
    /// Starts from the defaults with a given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }

    /// Overrides the number of countries.
    pub fn with_countries(mut self, n_countries: usize) -> Self {
        self.n_countries = n_countries;
        self
    }

    /// Overrides the number of crops.
    pub fn with_crops(mut self, n_crops: usize) -> Self {
        self.n_crops = n_crops;
        self
    }

    /// Overrides the number of farm-size classes.
    pub fn with_farm_sizes(mut self, n_farm_sizes: usize) -> Self {
        self.n_farm_sizes = n_farm_sizes;
        self
    }

    /// Overrides the log-space noise standard deviation.
    pub fn with_noise_sigma(mut self, noise_sigma: f64) -> Self {
        self.noise_sigma = noise_sigma;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.n_countries == 0 {
            return Err(FarmdistError::invalid_parameter(
                "n_countries",
                self.n_countries as f64,
                "must be at least 1",
            ));
        }
        if self.n_crops == 0 || self.n_crops > CROPS.len() {
            return Err(FarmdistError::invalid_parameter(
                "n_crops",
                self.n_crops as f64,
                "must be between 1 and the crop catalog size",
            ));
        }
        if self.n_farm_sizes == 0 || self.n_farm_sizes > FARM_SIZES.len() {
            return Err(FarmdistError::invalid_parameter(
                "n_farm_sizes",
                self.n_farm_sizes as f64,
                "must be between 1 and the farm-size catalog size",
            ));
        }
        if !self.noise_sigma.is_finite() || self.noise_sigma < 0.0 {
            return Err(FarmdistError::invalid_parameter(
                "noise_sigma",
                self.noise_sigma,
                "must be finite and non-negative",
            ));
        }
        Ok(())
    }
}

/// Generates the full country x crop x farm-size panel described by `config`.
///
/// Production follows the multiplicative model
/// `base(size) * dev_effect(size, development_index) * crop_effect * region_effect * exp(noise)`
/// with log-normal noise, so the panel is heavy-tailed by construction. The
/// same config always yields the same table.
pub fn simulate(config: &SimulatorConfig) -> Result<ProductionTable> {
    config.validate()?;

    let mut rng = SmallRng::seed_from_u64(config.seed);
    let noise = Normal::new(0.0, config.noise_sigma).expect("validated noise sigma");
    let crop_sd = Normal::new(0.0, CROP_SD).expect("fixed crop spread");
    let region_sd = Normal::new(0.0, REGION_SD).expect("fixed region spread");

    let crop_effects: Vec<f64> = (0..config.n_crops)
        .map(|_| crop_sd.sample(&mut rng).exp())
        .collect();
    let region_effects: Vec<f64> = (0..REGIONS.len())
        .map(|_| region_sd.sample(&mut rng).exp())
        .collect();

    let half_span = (config.n_farm_sizes - 1) as f64 / 2.0;
    let mut records =
        Vec::with_capacity(config.n_countries * config.n_crops * config.n_farm_sizes);

    for country_idx in 0..config.n_countries {
        let country_id = country_idx as u32 + 1;
        let country_name = format!("Country {country_id:03}");
        let development_index = rng.gen::<f64>();
        let region_idx = rng.gen_range(0..REGIONS.len());

        for (crop_idx, crop_effect) in crop_effects.iter().enumerate() {
            for rank in 0..config.n_farm_sizes {
                let base = BASE_SCALE * BASE_GROWTH.powi(rank as i32);
                let centered = rank as f64 - half_span;
                let dev_effect =
                    (DEV_STRENGTH * centered * (development_index - 0.5)).exp();
                let production = base
                    * dev_effect
                    * crop_effect
                    * region_effects[region_idx]
                    * noise.sample(&mut rng).exp();

                records.push(ProductionRecord {
                    country_id,
                    country_name: country_name.clone(),
                    region: REGIONS[region_idx].to_string(),
                    development_index,
                    crop: CROPS[crop_idx].to_string(),
                    farm_size: FARM_SIZES[rank].to_string(),
                    production,
                });
            }
        }
    }

    ProductionTable::new(records)
}
