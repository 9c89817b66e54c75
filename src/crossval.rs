//! Seeded k-fold cross-validation of the MRP pipeline.

use log::debug;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{FarmdistError, Result};
use crate::model::{HierarchicalModel, Stratum, TrainingRow};
use crate::mrp::{MrpOptions, TrainingSet};

/// Configuration for one cross-validation run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CvOptions {
    /// Number of folds.
    pub k_folds: usize,
    /// Seed for the fold assignment.
    pub seed: u64,
    /// Fit and prediction configuration shared by every fold.
    pub mrp: MrpOptions,
}

impl Default for CvOptions {
    fn default() -> Self {
        Self {
            k_folds: 5,
            seed: 0,
            mrp: MrpOptions::default(),
        }
    }
}

impl CvOptions {
    /// Overrides the fold count.
    pub fn with_k_folds(mut self, k_folds: usize) -> Self {
        self.k_folds = k_folds;
        self
    }

    /// Overrides the fold-assignment seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Overrides the per-fold MRP configuration.
    pub fn with_mrp(mut self, mrp: MrpOptions) -> Self {
        self.mrp = mrp;
        self
    }
}

/// Held-out error of a single fold, in natural production units.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FoldMetrics {
    pub fold: usize,
    pub n_test: usize,
    pub rmse: f64,
    pub mae: f64,
}

/// Aggregated cross-validation diagnostics.
///
/// All error metrics are in the same units as the production field; the
/// `*_pct_of_mean` variants rescale by the overall training mean for
/// scale-free interpretation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CvSummary {
    pub rmse: f64,
    pub mae: f64,
    pub rmse_sd: f64,
    pub mae_sd: f64,
    pub rmse_pct_of_mean: f64,
    pub mae_pct_of_mean: f64,
    pub folds: Vec<FoldMetrics>,
    pub warnings: Vec<String>,
}

/// Evaluates the MRP pipeline by k-fold cross-validation over the observed
/// training rows.
///
/// Rows are shuffled once with the given seed and dealt round-robin into
/// folds. Each fold refits the hierarchical model from scratch on the other
/// k-1 folds and predicts the held-out rows; no fit state is shared between
/// folds, so they run in parallel. Per-fold prediction seeds are derived from
/// the MRP seed and the fold index before the parallel loop, which keeps the
/// result independent of scheduling.
pub fn cross_validate(training: &TrainingSet, options: &CvOptions) -> Result<CvSummary> {
    if options.k_folds < 2 {
        return Err(FarmdistError::invalid_parameter(
            "k_folds",
            options.k_folds as f64,
            "must be at least 2",
        ));
    }
    options.mrp.validate()?;

    let n = training.len();
    if n < options.k_folds {
        return Err(FarmdistError::insufficient(
            "cross-validation",
            options.k_folds,
            n,
        ));
    }

    let mut shuffled: Vec<usize> = (0..n).collect();
    let mut rng = SmallRng::seed_from_u64(options.seed);
    shuffled.shuffle(&mut rng);
    let mut fold_of = vec![0usize; n];
    for (position, row_index) in shuffled.iter().enumerate() {
        fold_of[*row_index] = position % options.k_folds;
    }

    let rows = training.rows();
    let evaluated: Vec<(FoldMetrics, Vec<String>)> = (0..options.k_folds)
        .into_par_iter()
        .map(|fold| evaluate_fold(rows, &fold_of, fold, options))
        .collect::<Result<Vec<_>>>()?;

    let k = options.k_folds as f64;
    let rmse = evaluated.iter().map(|(m, _)| m.rmse).sum::<f64>() / k;
    let mae = evaluated.iter().map(|(m, _)| m.mae).sum::<f64>() / k;
    let rmse_sd = (evaluated
        .iter()
        .map(|(m, _)| (m.rmse - rmse).powi(2))
        .sum::<f64>()
        / (k - 1.0))
        .sqrt();
    let mae_sd = (evaluated
        .iter()
        .map(|(m, _)| (m.mae - mae).powi(2))
        .sum::<f64>()
        / (k - 1.0))
        .sqrt();

    let mean_production = training.mean_production();
    let summary = CvSummary {
        rmse,
        mae,
        rmse_sd,
        mae_sd,
        rmse_pct_of_mean: 100.0 * rmse / mean_production,
        mae_pct_of_mean: 100.0 * mae / mean_production,
        folds: evaluated.iter().map(|(m, _)| m.clone()).collect(),
        warnings: evaluated.into_iter().flat_map(|(_, w)| w).collect(),
    };
    debug!(
        "cross-validation: rmse = {:.1} ({:.1}% of mean), mae = {:.1} ({:.1}% of mean)",
        summary.rmse, summary.rmse_pct_of_mean, summary.mae, summary.mae_pct_of_mean
    );
    Ok(summary)
}

fn evaluate_fold(
    rows: &[TrainingRow],
    fold_of: &[usize],
    fold: usize,
    options: &CvOptions,
) -> Result<(FoldMetrics, Vec<String>)> {
    let mut train: Vec<TrainingRow> = Vec::with_capacity(rows.len());
    let mut test_strata: Vec<Stratum> = Vec::new();
    let mut test_actual: Vec<f64> = Vec::new();
    for (row, assigned) in rows.iter().zip(fold_of) {
        if *assigned == fold {
            test_strata.push(row.stratum.clone());
            test_actual.push(row.log_production.exp());
        } else {
            train.push(row.clone());
        }
    }
    if train.len() < 2 {
        return Err(FarmdistError::insufficient("fold training set", 2, train.len()));
    }

    let model = HierarchicalModel::fit(&train, &options.mrp.shrinkage)?;
    let seed = options
        .mrp
        .seed
        .wrapping_add((fold as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    let prediction = model.predict(&test_strata, options.mrp.draws, seed)?;

    let n_test = test_actual.len();
    let mut squared = 0.0;
    let mut absolute = 0.0;
    for (predicted, actual) in prediction.values.iter().zip(&test_actual) {
        let error = predicted - actual;
        squared += error * error;
        absolute += error.abs();
    }
    let metrics = FoldMetrics {
        fold,
        n_test,
        rmse: (squared / n_test as f64).sqrt(),
        mae: absolute / n_test as f64,
    };

    let mut warnings: Vec<String> = model
        .warnings()
        .iter()
        .chain(prediction.warnings.iter())
        .map(|w| format!("fold {fold}: {w}"))
        .collect();
    warnings.dedup();
    Ok((metrics, warnings))
}

#[cfg(test)]
mod tests {
    use crate::mrp::ObservationSplit;
    use crate::simulate::{simulate, SimulatorConfig};

    use super::*;

    fn training_set() -> TrainingSet {
        let table = simulate(
            &SimulatorConfig::new(33)
                .with_countries(10)
                .with_crops(3)
                .with_farm_sizes(4),
        )
        .unwrap();
        let split = ObservationSplit::sample(&table.country_ids(), 0.6, 33).unwrap();
        TrainingSet::build(&table, &split).unwrap()
    }

    #[test]
    fn metrics_are_non_negative_and_in_natural_units() {
        let training = training_set();
        let summary = cross_validate(&training, &CvOptions::default().with_k_folds(3)).unwrap();

        assert!(summary.rmse >= 0.0);
        assert!(summary.mae >= 0.0);
        // MAE never exceeds RMSE.
        assert!(summary.mae <= summary.rmse + 1e-9);
        assert!(summary.rmse_pct_of_mean.is_finite());
        assert_eq!(summary.folds.len(), 3);
        let covered: usize = summary.folds.iter().map(|f| f.n_test).sum();
        assert_eq!(covered, training.len());
    }

    #[test]
    fn same_seed_reproduces_the_summary() {
        let training = training_set();
        let options = CvOptions::default().with_k_folds(3).with_seed(7);
        let first = cross_validate(&training, &options).unwrap();
        let second = cross_validate(&training, &options).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn different_fold_seeds_change_the_partition() {
        let training = training_set();
        let first = cross_validate(&training, &CvOptions::default().with_seed(1)).unwrap();
        let second = cross_validate(&training, &CvOptions::default().with_seed(2)).unwrap();
        assert_ne!(first.folds, second.folds);
    }

    #[test]
    fn rejects_degenerate_fold_counts() {
        let training = training_set();
        assert!(matches!(
            cross_validate(&training, &CvOptions::default().with_k_folds(1)),
            Err(FarmdistError::InvalidParameter { name: "k_folds", .. })
        ));
        assert!(matches!(
            cross_validate(
                &training,
                &CvOptions::default().with_k_folds(training.len() + 1)
            ),
            Err(FarmdistError::InsufficientData { .. })
        ));
    }

    #[test]
    fn summary_round_trips_through_serde() {
        let training = training_set();
        let summary = cross_validate(&training, &CvOptions::default().with_k_folds(3)).unwrap();
        let encoded = serde_json::to_string(&summary).unwrap();
        let decoded: CvSummary = serde_json::from_str(&encoded).unwrap();
        assert_eq!(summary, decoded);
    }
}
