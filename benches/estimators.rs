use criterion::{black_box, criterion_group, criterion_main, Criterion};
use farmdist::mrp::{MrpOptions, MrpProblem, ObservationSplit};
use farmdist::pareto::{aggregate_production, fit_pareto, XminPolicy};
use farmdist::simulate::{simulate, SimulatorConfig};

fn bench_pareto_scan(c: &mut Criterion) {
    let table = simulate(&SimulatorConfig::new(7)).expect("valid config");
    let totals = aggregate_production(&table);
    c.bench_function("pareto_scan_2800", |b| {
        b.iter(|| {
            fit_pareto(
                black_box(&totals),
                &XminPolicy::ScanAboveFloor { floor: 0.0 },
            )
            .expect("fit succeeds")
        })
    });
}

fn bench_mrp_fit(c: &mut Criterion) {
    let table = simulate(&SimulatorConfig::new(7).with_countries(20)).expect("valid config");
    let split = ObservationSplit::sample(&table.country_ids(), 0.5, 7).expect("valid fraction");
    let problem = MrpProblem::new(table, split).expect("well-formed problem");
    let options = MrpOptions::default();
    c.bench_function("mrp_fit_10_countries", |b| {
        b.iter(|| problem.fit(black_box(&options)).expect("fit succeeds"))
    });
}

criterion_group!(benches, bench_pareto_scan, bench_mrp_fit);
criterion_main!(benches);
