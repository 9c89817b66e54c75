use farmdist::crossval::{cross_validate, CvOptions};
use farmdist::mrp::{MrpOptions, MrpProblem, ObservationSplit};
use farmdist::pareto::{aggregate_production, fit_pareto, XminPolicy};
use farmdist::simulate::{simulate, SimulatorConfig};
use farmdist::ProductionTable;

/// Reference scenario: 50 countries x 8 crops x 7 farm-size classes, seed 123.
fn scenario_table() -> ProductionTable {
    simulate(&SimulatorConfig::new(123)).expect("valid default config")
}

#[test]
fn simulator_is_deterministic() {
    let first = scenario_table();
    let second = scenario_table();
    assert_eq!(first.records(), second.records());
    assert_eq!(first.len(), 50 * 8 * 7);
}

#[test]
fn pareto_fit_lands_in_the_expected_band() {
    let table = scenario_table();
    let totals = aggregate_production(&table);
    let fit = fit_pareto(&totals, &XminPolicy::ScanAboveFloor { floor: 0.0 })
        .expect("scan succeeds on the synthetic panel");

    // The generator's exponential size effect produces a heavy tail whose
    // fitted shape parameter sits well inside (1, 5).
    assert!(fit.alpha > 1.0 && fit.alpha < 5.0, "alpha = {}", fit.alpha);
    assert!(
        (0.0..=1.0).contains(&fit.ks_statistic),
        "ks = {}",
        fit.ks_statistic
    );
    assert!(fit.n_points >= totals.len() / 10);
}

#[test]
fn mrp_cross_validation_stays_under_half_the_target_mean() {
    let table = scenario_table();
    let split = ObservationSplit::sample(&table.country_ids(), 0.4, 123).expect("valid fraction");
    let problem = MrpProblem::new(table, split).expect("well-formed problem");

    let options = CvOptions::default()
        .with_seed(123)
        .with_mrp(MrpOptions::default().with_seed(123));
    let summary = cross_validate(problem.training(), &options).expect("cross-validation runs");

    assert!(summary.rmse >= 0.0);
    assert!(summary.mae >= 0.0);
    assert!(summary.mae <= summary.rmse + 1e-9);
    // A correctly wired pipeline recovers the synthetic structure well below
    // this bound; failing it signals a broken pipeline, not a poor fit.
    assert!(
        summary.rmse_pct_of_mean < 50.0,
        "rmse = {:.1}% of mean",
        summary.rmse_pct_of_mean
    );
}

#[test]
fn cross_validation_is_reproducible_per_seed() {
    let table = scenario_table();
    let split = ObservationSplit::sample(&table.country_ids(), 0.4, 123).expect("valid fraction");
    let problem = MrpProblem::new(table, split).expect("well-formed problem");
    let options = CvOptions::default().with_seed(9);

    let first = cross_validate(problem.training(), &options).expect("first run");
    let second = cross_validate(problem.training(), &options).expect("second run");
    assert_eq!(first, second);
}

#[test]
fn poststratification_imputes_the_full_partial_grid() {
    let table = scenario_table();
    let split = ObservationSplit::sample(&table.country_ids(), 0.4, 123).expect("valid fraction");
    let n_partial = split.partial_only().len();
    assert_eq!(split.observed().len(), 20);

    let problem = MrpProblem::new(table, split).expect("well-formed problem");
    let fit = problem
        .fit(&MrpOptions::default().with_seed(123))
        .expect("model converges on the synthetic panel");
    let estimates = fit.poststratify(problem.frame()).expect("poststratified");

    assert_eq!(estimates.cells.len(), n_partial * 8 * 7);
    assert!(estimates
        .cells
        .iter()
        .all(|c| c.production.is_finite() && c.production > 0.0));

    // Imputed totals line up one-to-one with the observed crop-level totals
    // kept for diagnostics.
    let implied = estimates.crop_totals();
    let observed = problem.frame().crop_totals();
    assert_eq!(implied.len(), observed.len());
    for (imputed, actual) in implied.iter().zip(observed) {
        assert_eq!(imputed.country_id, actual.country_id);
        assert_eq!(imputed.crop, actual.crop);
    }
}
