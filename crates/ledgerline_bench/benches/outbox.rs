//! Outbox commit benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ledgerline_core::{ChangeObserver, Config, CoreResult, Delivery, Outbox};
use ledgerline_protocol::{ChangeType, ObjectType};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Observer that only counts deliveries.
#[derive(Default)]
struct Counter(AtomicU64);

impl ChangeObserver for Counter {
    fn observe(&self, _delivery: Delivery<'_>) -> CoreResult<()> {
        self.0.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Benchmark committing transactions of various sizes.
fn bench_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit");

    for changes in [1usize, 10, 100] {
        let outbox = Outbox::with_config(Config::new().enable_feed(false));
        outbox.register_observer(Arc::new(Counter::default()));
        let mut round = 0u64;

        group.throughput(Throughput::Elements(changes as u64));
        group.bench_with_input(BenchmarkId::new("changes", changes), &changes, |b, &changes| {
            b.iter(|| {
                round += 1;
                outbox
                    .transaction(|txn| {
                        for i in 0..changes {
                            outbox.messenger().send_change(
                                txn,
                                format!("{round}-{i}"),
                                ObjectType::Entity,
                                ChangeType::Create,
                            )?;
                        }
                        Ok(())
                    })
                    .unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark collapsing repeated registrations of one object.
fn bench_collapse(c: &mut Criterion) {
    let outbox = Outbox::with_config(Config::new().enable_feed(false));

    c.bench_function("collapse_100_updates", |b| {
        b.iter(|| {
            outbox
                .transaction(|txn| {
                    for _ in 0..100 {
                        outbox.messenger().send_change(
                            txn,
                            black_box("42"),
                            ObjectType::Entity,
                            ChangeType::Update,
                        )?;
                    }
                    Ok(())
                })
                .unwrap();
        });
    });
}

/// Benchmark republishing unsent changes.
fn bench_publish_unsent(c: &mut Criterion) {
    c.bench_function("publish_unsent_500", |b| {
        b.iter_with_setup(
            || {
                let outbox = Outbox::with_config(Config::new().enable_feed(false).unsent_page_size(500));
                outbox
                    .transaction(|txn| {
                        for i in 0..500 {
                            outbox.messenger().send_change(
                                txn,
                                i.to_string(),
                                ObjectType::Table,
                                ChangeType::Update,
                            )?;
                        }
                        Ok(())
                    })
                    .unwrap();
                outbox
            },
            |outbox| {
                let sink = Counter::default();
                black_box(outbox.publish_unsent(&sink).unwrap());
            },
        );
    });
}

criterion_group!(benches, bench_commit, bench_collapse, bench_publish_unsent);
criterion_main!(benches);
