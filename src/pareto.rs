//! Pareto (power-law) tail estimation and Kolmogorov-Smirnov goodness of fit.

use serde::{Deserialize, Serialize};

use crate::data::ProductionTable;
use crate::error::{FarmdistError, Result};

/// Result of a Pareto tail fit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParetoFit {
    /// Estimated shape parameter; values above 1 imply a finite mean.
    pub alpha: f64,
    /// Threshold above which the power law applies.
    pub xmin: f64,
    /// Maximum absolute deviation between empirical and fitted CDF, in `[0, 1]`.
    pub ks_statistic: f64,
    /// Number of tail points used for the fit.
    pub n_points: usize,
}

impl ParetoFit {
    /// Informational quality band for the fit; not a hard threshold.
    pub fn quality(&self) -> FitQuality {
        if self.ks_statistic < 0.05 {
            FitQuality::Excellent
        } else if self.ks_statistic < 0.1 {
            FitQuality::Good
        } else {
            FitQuality::Poor
        }
    }
}

/// Coarse goodness-of-fit banding of the KS statistic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitQuality {
    /// KS below 0.05.
    Excellent,
    /// KS below 0.1.
    Good,
    /// KS of 0.1 or above.
    Poor,
}

/// How the power-law threshold `xmin` is determined.
#[derive(Clone, Debug, PartialEq)]
pub enum XminPolicy {
    /// Fit the tail above a caller-supplied threshold.
    Fixed(f64),
    /// Try every observed value at or above `floor` as a candidate threshold
    /// and keep the one whose fit minimizes the KS distance.
    ///
    /// Candidates that would leave fewer than a tenth of the qualifying points
    /// (or 2, whichever is larger) in the tail are skipped, so the scan cannot
    /// chase vanishing tails whose KS distances are pure noise.
    ScanAboveFloor { floor: f64 },
}

/// Fits a continuous power-law tail to a collection of positive totals.
///
/// The shape parameter is the maximum-likelihood estimate
/// `alpha = 1 + n / sum(ln(x_i / xmin))` over the tail `x_i >= xmin`. The KS
/// statistic compares the rank-based empirical CDF (`i/n` at ascending rank
/// `i`) against the fitted `F(x) = 1 - (xmin/x)^alpha`.
pub fn fit_pareto(totals: &[f64], policy: &XminPolicy) -> Result<ParetoFit> {
    for (index, value) in totals.iter().enumerate() {
        if !value.is_finite() {
            return Err(FarmdistError::non_finite("pareto input"));
        }
        if *value <= 0.0 {
            return Err(FarmdistError::NonPositiveProduction {
                index,
                value: *value,
            });
        }
    }

    let mut sorted = totals.to_vec();
    sorted.sort_by(f64::total_cmp);

    match policy {
        XminPolicy::Fixed(xmin) => {
            if !xmin.is_finite() || *xmin <= 0.0 {
                return Err(FarmdistError::invalid_parameter(
                    "xmin",
                    *xmin,
                    "must be finite and positive",
                ));
            }
            let start = sorted.partition_point(|v| *v < *xmin);
            let tail = &sorted[start..];
            if tail.len() < 2 {
                return Err(FarmdistError::insufficient("pareto fit", 2, tail.len()));
            }
            fit_tail(tail, *xmin)
        }
        XminPolicy::ScanAboveFloor { floor } => {
            if !floor.is_finite() || *floor < 0.0 {
                return Err(FarmdistError::invalid_parameter(
                    "floor",
                    *floor,
                    "must be finite and non-negative",
                ));
            }
            let start = sorted.partition_point(|v| *v < *floor);
            let qualifying = &sorted[start..];
            if qualifying.len() < 2 {
                return Err(FarmdistError::insufficient(
                    "pareto scan",
                    2,
                    qualifying.len(),
                ));
            }

            let min_tail = (qualifying.len() / 10).max(2);
            let mut best: Option<ParetoFit> = None;
            for (offset, candidate) in qualifying.iter().enumerate() {
                if offset > 0 && *candidate == qualifying[offset - 1] {
                    continue;
                }
                let tail = &qualifying[offset..];
                if tail.len() < min_tail {
                    break;
                }
                let fit = match fit_tail(tail, *candidate) {
                    Ok(fit) => fit,
                    // A candidate whose tail is all ties has no likelihood
                    // maximum; the next candidate may still be fine.
                    Err(FarmdistError::ZeroVariance { .. }) => continue,
                    Err(other) => return Err(other),
                };
                if best
                    .as_ref()
                    .map_or(true, |b| fit.ks_statistic < b.ks_statistic)
                {
                    best = Some(fit);
                }
            }
            best.ok_or_else(|| FarmdistError::insufficient("pareto scan", min_tail, 0))
        }
    }
}

/// Collects the per-(country, crop, farm-size) production totals that the
/// Pareto estimator consumes. A validated table already holds exactly one
/// value per cell, so the totals are the production column itself.
pub fn aggregate_production(table: &ProductionTable) -> Vec<f64> {
    table.records().iter().map(|r| r.production).collect()
}

fn fit_tail(tail: &[f64], xmin: f64) -> Result<ParetoFit> {
    let n = tail.len();
    let sum_log: f64 = tail.iter().map(|x| (x / xmin).ln()).sum();
    if sum_log <= 0.0 {
        // Every tail point sits on the threshold; the likelihood is unbounded.
        return Err(FarmdistError::ZeroVariance {
            context: "pareto tail",
        });
    }
    let alpha = 1.0 + n as f64 / sum_log;

    let mut ks = 0.0f64;
    for (i, x) in tail.iter().enumerate() {
        let empirical = (i + 1) as f64 / n as f64;
        let theoretical = 1.0 - (xmin / x).powf(alpha);
        ks = ks.max((empirical - theoretical).abs());
    }
    if !ks.is_finite() || !alpha.is_finite() {
        return Err(FarmdistError::non_finite("pareto fit"));
    }

    Ok(ParetoFit {
        alpha,
        xmin,
        ks_statistic: ks,
        n_points: n,
    })
}

#[cfg(test)]
mod tests {
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    /// Inverse-CDF sampling of an exact Pareto tail.
    fn pareto_sample(n: usize, alpha: f64, xmin: f64, seed: u64) -> Vec<f64> {
        let mut rng = SmallRng::seed_from_u64(seed);
        (0..n)
            .map(|_| xmin * (1.0 - rng.gen::<f64>()).powf(-1.0 / alpha))
            .collect()
    }

    #[test]
    fn recovers_known_shape_parameter() {
        let data = pareto_sample(10_000, 2.5, 1.0, 42);
        let fit = fit_pareto(&data, &XminPolicy::Fixed(1.0)).unwrap();

        assert!((fit.alpha - 2.5).abs() < 0.1, "alpha = {}", fit.alpha);
        assert_eq!(fit.n_points, 10_000);
        assert!((0.0..=1.0).contains(&fit.ks_statistic));
        assert!(fit.ks_statistic < 0.05);
        assert_eq!(fit.quality(), FitQuality::Excellent);
    }

    #[test]
    fn scan_rejects_contaminated_head() {
        // Uniform noise below 1.0 plus an exact Pareto tail above it. The scan
        // should place xmin at or above the contamination boundary.
        let mut rng = SmallRng::seed_from_u64(7);
        let mut data: Vec<f64> = (0..500).map(|_| 0.5 + 0.5 * rng.gen::<f64>()).collect();
        data.extend(pareto_sample(2_000, 2.0, 1.0, 8));

        let fit = fit_pareto(&data, &XminPolicy::ScanAboveFloor { floor: 0.0 }).unwrap();
        assert!(fit.xmin >= 0.95, "xmin = {}", fit.xmin);
        assert!((1.5..2.5).contains(&fit.alpha), "alpha = {}", fit.alpha);
        assert!(fit.ks_statistic < 0.1);
    }

    #[test]
    fn too_few_tail_points_is_an_error() {
        let result = fit_pareto(&[5.0], &XminPolicy::Fixed(1.0));
        assert!(matches!(
            result,
            Err(FarmdistError::InsufficientData {
                context: "pareto fit",
                ..
            })
        ));

        let below_threshold = fit_pareto(&[1.0, 2.0, 3.0], &XminPolicy::Fixed(10.0));
        assert!(matches!(
            below_threshold,
            Err(FarmdistError::InsufficientData { .. })
        ));
    }

    #[test]
    fn rejects_invalid_threshold_and_inputs() {
        assert!(matches!(
            fit_pareto(&[1.0, 2.0], &XminPolicy::Fixed(-1.0)),
            Err(FarmdistError::InvalidParameter { name: "xmin", .. })
        ));
        assert!(matches!(
            fit_pareto(&[1.0, -2.0], &XminPolicy::Fixed(1.0)),
            Err(FarmdistError::NonPositiveProduction { index: 1, .. })
        ));
        assert!(matches!(
            fit_pareto(&[1.0, f64::NAN], &XminPolicy::Fixed(1.0)),
            Err(FarmdistError::NonFinite { .. })
        ));
    }

    #[test]
    fn degenerate_tail_is_an_error() {
        let result = fit_pareto(&[2.0, 2.0, 2.0], &XminPolicy::Fixed(2.0));
        assert!(matches!(result, Err(FarmdistError::ZeroVariance { .. })));
    }

    #[test]
    fn quality_bands() {
        let mut fit = ParetoFit {
            alpha: 2.0,
            xmin: 1.0,
            ks_statistic: 0.03,
            n_points: 100,
        };
        assert_eq!(fit.quality(), FitQuality::Excellent);
        fit.ks_statistic = 0.07;
        assert_eq!(fit.quality(), FitQuality::Good);
        fit.ks_statistic = 0.2;
        assert_eq!(fit.quality(), FitQuality::Poor);
    }
}
