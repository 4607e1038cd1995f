use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use suite_runner::result::{AggregateRun, ResultCode, SuiteResult};
use suite_runner::suite::{Suite, TestCase};

fn build_results(suites: usize, cases: usize) -> Vec<SuiteResult> {
    (0..suites)
        .map(|s| {
            let name = format!("test_s{s}.S");
            let suite = Suite::with_cases(
                name.clone(),
                (0..cases).map(|c| TestCase::new(format!("{name}.case{c}"), "true")),
            );
            let mut result = SuiteResult::new(Arc::new(suite));
            for c in 0..cases {
                let id = format!("{name}.case{c}");
                result.record(id.clone(), ResultCode::TestRun);
                let code = if (s + c) % 17 == 0 {
                    ResultCode::Fail
                } else {
                    ResultCode::Pass
                };
                result.record(id, code);
            }
            result
        })
        .collect()
}

fn bench_aggregation(c: &mut Criterion) {
    let results = build_results(200, 25);

    c.bench_function("aggregate_results", |b| {
        b.iter(|| AggregateRun::from_results(black_box(results.clone())));
    });

    let run = AggregateRun::from_results(results);
    c.bench_function("rerun_suites", |b| {
        b.iter(|| black_box(&run).rerun_suites());
    });
}

criterion_group!(benches, bench_aggregation);
criterion_main!(benches);
