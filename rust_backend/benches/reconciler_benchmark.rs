use std::hint::black_box;
use std::sync::Arc;

use chrono::{Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use prod_metrics::db::LocalRepository;
use prod_metrics::models::{ActionType, BreakLogEvent, ProductionWindow};
use prod_metrics::services::{AggregationEngine, EngineConfig, Reconciler};

fn shift_start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 5)
        .and_then(|d| d.and_hms_opt(7, 0, 0))
        .unwrap()
}

fn break_log(events: usize) -> Vec<BreakLogEvent> {
    let utc = FixedOffset::east_opt(0).unwrap();
    (0..events)
        .map(|i| BreakLogEvent {
            operator_id: "jdoe".to_string(),
            timestamp: utc
                .from_local_datetime(&(shift_start() + Duration::minutes(i as i64 * 5)))
                .unwrap(),
            action_type: if i % 2 == 0 {
                ActionType::Start
            } else {
                ActionType::Stop
            },
        })
        .collect()
}

fn bench_reconcile(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconciler");
    let reconciler = Reconciler::default();
    let start = shift_start();
    let end = start + Duration::hours(12);

    for size in [10usize, 100, 1000] {
        let events = break_log(size);
        group.bench_with_input(BenchmarkId::new("reconcile", size), &events, |b, events| {
            b.iter(|| black_box(reconciler.reconcile("jdoe", Some(start), Some(end), black_box(events))));
        });
    }

    group.finish();
}

fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregation");
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let repo = LocalRepository::new();
    for db in ["acme", "globex"] {
        for t in 0..20 {
            let table = format!("model{}_station{}", t, t % 4);
            repo.add_production_table(db, &table);
            for i in 0..200 {
                repo.insert_event(
                    db,
                    &table,
                    &format!("op{}", i % 7),
                    &format!("SN{}", i),
                    shift_start() + Duration::minutes(i as i64 * 3),
                );
            }
        }
    }
    let engine = AggregationEngine::new(Arc::new(repo), EngineConfig::default());
    let window = ProductionWindow::for_day(shift_start().date());

    for workers in [1usize, 4, 8] {
        group.bench_with_input(BenchmarkId::new("aggregate_day", workers), &workers, |b, &w| {
            b.iter(|| runtime.block_on(engine.aggregate(black_box(&window), None, w)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_reconcile, bench_aggregate);
criterion_main!(benches);
