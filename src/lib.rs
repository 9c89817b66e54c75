//! Estimation of agricultural production distributions across farm-size
//! classes.
//!
//! This crate contrasts two ways of estimating how much production sits in
//! each farm-size class when only part of the world reports size-resolved
//! data:
//!
//! - a single-parameter Pareto (power-law) tail fit with a
//!   Kolmogorov-Smirnov goodness-of-fit check (`pareto` module), and
//! - multilevel regression with poststratification (MRP): a hierarchical
//!   model with partial pooling across countries, farm_size x region, and
//!   crop x farm_size groups, projected onto a full covariate frame
//!   (`model` and `mrp` modules).
//!
//! A seeded synthetic panel generator (`simulate` module) exercises both
//! paths, and a k-fold cross-validator (`crossval` module) reports held-out
//! RMSE/MAE in natural production units. Every stochastic step takes an
//! explicit seed; the same inputs always produce the same outputs.
//!
//! # Quick start
//!
//! ```no_run
//! use farmdist::crossval::{cross_validate, CvOptions};
//! use farmdist::mrp::{MrpOptions, MrpProblem, ObservationSplit};
//! use farmdist::pareto::{aggregate_production, fit_pareto, XminPolicy};
//! use farmdist::simulate::{simulate, SimulatorConfig};
//!
//! // Synthetic panel: 50 countries x 8 crops x 7 farm-size classes.
//! let table = simulate(&SimulatorConfig::new(123)).expect("valid simulator config");
//!
//! // Pareto interpolation over the aggregated production totals.
//! let totals = aggregate_production(&table);
//! let pareto = fit_pareto(&totals, &XminPolicy::ScanAboveFloor { floor: 0.0 })
//!     .expect("pareto fit");
//! println!("alpha = {:.2}, KS = {:.3}", pareto.alpha, pareto.ks_statistic);
//!
//! // MRP: train on the observed countries, impute the partial ones.
//! let split = ObservationSplit::sample(&table.country_ids(), 0.4, 123)
//!     .expect("valid fraction");
//! let problem = MrpProblem::new(table, split).expect("well-formed problem");
//! let fit = problem.fit(&MrpOptions::default()).expect("converged");
//! let estimates = fit.poststratify(problem.frame()).expect("poststratified");
//! println!("imputed {} cells", estimates.cells.len());
//!
//! // Held-out error of the MRP pipeline.
//! let summary = cross_validate(problem.training(), &CvOptions::default())
//!     .expect("cross-validated");
//! println!("rmse = {:.1}% of the target mean", summary.rmse_pct_of_mean);
//! ```
//!
//! Result records are serde-serializable so an external report renderer can
//! consume them; the crate itself draws no plots and prints nothing.

pub mod crossval;
pub mod data;
pub mod error;
pub mod model;
pub mod mrp;
pub mod pareto;
pub mod simulate;

pub use crossval::{cross_validate, CvOptions, CvSummary};
pub use data::{ProductionRecord, ProductionTable};
pub use error::{FarmdistError, Result};
pub use model::{HierarchicalModel, ShrinkageConfig, Stratum};
pub use mrp::{MrpFit, MrpOptions, MrpProblem, ObservationSplit};
pub use pareto::{fit_pareto, ParetoFit, XminPolicy};
pub use simulate::{simulate, SimulatorConfig};
