use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;

use aurum_assets::{AssetCreated, AssetEvent, AssetId, AssetRevalued};
use aurum_core::{AggregateId, CorrelationId, ExpectedVersion};
use aurum_events::HandlerRegistry;
use aurum_infra::event_store::{EventStore, InMemoryEventStore, PendingEvent};
use aurum_infra::projections::{AssetRegisterProjection, AssetRegisterRow, Rebuildable};
use aurum_infra::publisher::EventPublisher;
use aurum_infra::read_model::InMemoryReadStore;
use aurum_infra::reconstruction::Reconstruction;

/// Naive CRUD simulation: direct key-value updates (no events, no history).
#[derive(Debug, Clone)]
struct NaiveCrudStore {
    inner: Arc<RwLock<HashMap<String, CrudRow>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CrudRow {
    name: String,
    value_minor: u64,
    version: u64, // For optimistic concurrency (not used in benchmarks)
}

impl NaiveCrudStore {
    fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn create(&self, asset_id: &str, name: String, cost_minor: u64) {
        let mut map = self.inner.write().unwrap();
        map.insert(
            asset_id.to_string(),
            CrudRow {
                name,
                value_minor: cost_minor,
                version: 1,
            },
        );
    }

    fn revalue(&self, asset_id: &str, value_minor: u64) -> Result<(), ()> {
        let mut map = self.inner.write().unwrap();
        if let Some(row) = map.get_mut(asset_id) {
            row.value_minor = value_minor;
            row.version += 1;
            Ok(())
        } else {
            Err(())
        }
    }
}

fn created(asset_id: &str, cost_minor: u64) -> AssetEvent {
    AssetEvent::AssetCreated(AssetCreated {
        asset_id: AssetId::new(asset_id),
        name: "Forklift".to_string(),
        category_id: 1,
        cost_minor,
        currency: "USD".to_string(),
        purchase_date: Utc::now(),
        location: None,
        occurred_at: Utc::now(),
    })
}

fn revalued(asset_id: &str, revalued_minor: u64) -> AssetEvent {
    AssetEvent::AssetRevalued(AssetRevalued {
        asset_id: AssetId::new(asset_id),
        previous_value_minor: 10_000,
        revalued_minor,
        effective_date: Utc::now(),
        appraiser: Some("acme-appraisals".to_string()),
        occurred_at: Utc::now(),
    })
}

fn publisher_with_register() -> (
    EventPublisher<Arc<InMemoryEventStore>>,
    Arc<AssetRegisterProjection<Arc<InMemoryReadStore<String, AssetRegisterRow>>>>,
) {
    let store = Arc::new(InMemoryEventStore::new());
    let assets = Arc::new(AssetRegisterProjection::new(Arc::new(
        InMemoryReadStore::new(),
    )));

    let mut registry = HandlerRegistry::new();
    registry.register_many(
        &["assets.asset.created", "assets.asset.revalued"],
        10,
        assets.clone(),
    );

    (EventPublisher::new(store, Arc::new(registry)), assets)
}

fn bench_publish_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_latency");
    group.sample_size(1000);

    // Benchmark: store only, no handlers attached
    group.bench_function("store_only", |b| {
        let store = Arc::new(InMemoryEventStore::new());
        let publisher = EventPublisher::new(store, Arc::new(HandlerRegistry::new()));

        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            let asset_id = format!("AST-{n:06}");
            publisher
                .publish_typed(
                    asset_id.as_str(),
                    CorrelationId::new(),
                    &created(&asset_id, black_box(10_000)),
                )
                .unwrap();
        });
    });

    // Benchmark: store plus synchronous dispatch into the asset register
    group.bench_function("store_and_dispatch", |b| {
        let (publisher, _assets) = publisher_with_register();

        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            let asset_id = format!("AST-{n:06}");
            publisher
                .publish_typed(
                    asset_id.as_str(),
                    CorrelationId::new(),
                    &created(&asset_id, black_box(10_000)),
                )
                .unwrap();
        });
    });

    group.finish();
}

fn bench_event_append_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_append_throughput");
    group.throughput(Throughput::Elements(1));

    for batch_size in [1, 10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::new("batch_append", batch_size),
            batch_size,
            |b, &size| {
                let store = InMemoryEventStore::new();

                b.iter(|| {
                    let events: Vec<PendingEvent> = (0..size)
                        .map(|i| {
                            PendingEvent::from_typed(
                                "AST-000001",
                                CorrelationId::new(),
                                &revalued("AST-000001", 10_000 + i as u64),
                            )
                            .unwrap()
                        })
                        .collect();

                    black_box(store.append(events, ExpectedVersion::Any).unwrap());
                });
            },
        );
    }

    group.finish();
}

fn bench_projection_rebuild_speed(c: &mut Criterion) {
    let mut group = c.benchmark_group("projection_rebuild_speed");

    for event_count in [10, 100, 1000, 10000].iter() {
        group.bench_with_input(
            BenchmarkId::new("rebuild_from_events", event_count),
            event_count,
            |b, &count| {
                let store = InMemoryEventStore::new();

                // Pre-generate the log: one creation, then revaluations.
                let mut all_envelopes = Vec::with_capacity(count);
                {
                    let pending = PendingEvent::from_typed(
                        "AST-000001",
                        CorrelationId::new(),
                        &created("AST-000001", 10_000),
                    )
                    .unwrap();
                    let stored = store.append(vec![pending], ExpectedVersion::Any).unwrap();
                    all_envelopes.push(stored[0].to_envelope());

                    for i in 0..(count - 1) {
                        let pending = PendingEvent::from_typed(
                            "AST-000001",
                            CorrelationId::new(),
                            &revalued("AST-000001", 10_000 + i as u64),
                        )
                        .unwrap();
                        let stored = store
                            .append(vec![pending], ExpectedVersion::Exact(i as u64 + 1))
                            .unwrap();
                        all_envelopes.push(stored[0].to_envelope());
                    }
                }

                let rows: Arc<InMemoryReadStore<String, AssetRegisterRow>> =
                    Arc::new(InMemoryReadStore::new());
                let projection = AssetRegisterProjection::new(rows);

                b.iter(|| {
                    projection
                        .rebuild_from_scratch(black_box(all_envelopes.clone()))
                        .unwrap();
                });
            },
        );
    }

    group.finish();
}

fn bench_state_reconstruction(c: &mut Criterion) {
    let mut group = c.benchmark_group("state_reconstruction");

    for event_count in [10, 100, 1000].iter() {
        group.bench_with_input(
            BenchmarkId::new("fold_entity_state", event_count),
            event_count,
            |b, &count| {
                let store = Arc::new(InMemoryEventStore::new());

                let pending = PendingEvent::from_typed(
                    "AST-000001",
                    CorrelationId::new(),
                    &created("AST-000001", 10_000),
                )
                .unwrap();
                store.append(vec![pending], ExpectedVersion::Any).unwrap();

                for i in 0..(count - 1) {
                    let pending = PendingEvent::from_typed(
                        "AST-000001",
                        CorrelationId::new(),
                        &revalued("AST-000001", 10_000 + i as u64),
                    )
                    .unwrap();
                    store.append(vec![pending], ExpectedVersion::Any).unwrap();
                }

                let reconstruction = Reconstruction::new(store);
                let aggregate_id = AggregateId::new("AST-000001");

                b.iter(|| {
                    black_box(
                        reconstruction
                            .reconstruct_entity_state("assets.asset", &aggregate_id, None)
                            .unwrap(),
                    );
                });
            },
        );
    }

    group.finish();
}

fn bench_event_sourcing_vs_naive_crud(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_sourcing_vs_naive_crud");
    group.sample_size(1000);

    // Benchmark: event sourcing (create + revalue, register kept in sync)
    group.bench_function("event_sourcing_create_and_revalue", |b| {
        let (publisher, _assets) = publisher_with_register();

        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            let asset_id = format!("AST-{n:06}");

            publisher
                .publish_typed(
                    asset_id.as_str(),
                    CorrelationId::new(),
                    &created(&asset_id, 10_000),
                )
                .unwrap();

            publisher
                .publish_typed(
                    asset_id.as_str(),
                    CorrelationId::new(),
                    &revalued(&asset_id, 12_500),
                )
                .unwrap();
        });
    });

    // Benchmark: naive CRUD (create + revalue, no history)
    group.bench_function("naive_crud_create_and_revalue", |b| {
        let store = NaiveCrudStore::new();

        b.iter(|| {
            store.create("AST-000001", "Forklift".to_string(), 10_000);
            store.revalue("AST-000001", 12_500).unwrap();
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_publish_latency,
    bench_event_append_throughput,
    bench_projection_rebuild_speed,
    bench_state_reconstruction,
    bench_event_sourcing_vs_naive_crud
);
criterion_main!(benches);
