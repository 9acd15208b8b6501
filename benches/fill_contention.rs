//! Tile write throughput: uncontended fills versus many participants
//! racing for the same slot.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio::runtime::Runtime;

use taz_canvas::canvas::{CanvasStore, LedgerMinter, StoreConfig};
use taz_canvas::proof::{GroupId, GroupRegistry, Identity, LocalProofProvider, ProofBundle, ProofProvider};
use taz_canvas::ImageRef;

const GROUP: GroupId = GroupId(1);

struct Setup {
    store: Arc<CanvasStore>,
    bundles: Vec<ProofBundle>,
}

async fn setup(tile_count: usize, participants: usize) -> Setup {
    let registry = Arc::new(GroupRegistry::new());
    registry.create_group(GROUP).await;
    let identities: Vec<Identity> = (0..participants)
        .map(|i| Identity::from_secret_str(&format!("bench-{}", i)))
        .collect();
    for id in &identities {
        registry.add_member(GROUP, id.commitment()).await.unwrap();
    }

    let store = Arc::new(CanvasStore::new(
        StoreConfig { tile_count, allocate_on_complete: false, ..Default::default() },
        registry.clone(),
        Arc::new(LedgerMinter::new("ipfs://bench")),
    ));

    let signal = store.current_id().await.proof_signal();
    let provider = LocalProofProvider::new(registry, GROUP);
    let mut bundles = Vec::with_capacity(participants);
    for id in &identities {
        bundles.push(provider.generate(id, &signal).await.unwrap());
    }

    Setup { store, bundles }
}

fn bench_fill(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("fill_tile");

    for participants in [1usize, 8, 32] {
        group.bench_with_input(
            BenchmarkId::new("same_slot", participants),
            &participants,
            |b, &n| {
                b.iter_batched(
                    || rt.block_on(setup(1, n)),
                    |setup| {
                        rt.block_on(async move {
                            let id = setup.store.current_id().await;
                            let mut handles = Vec::with_capacity(n);
                            for (i, bundle) in setup.bundles.into_iter().enumerate() {
                                let store = setup.store.clone();
                                handles.push(tokio::spawn(async move {
                                    let image = ImageRef::new(format!("img-{}", i)).unwrap();
                                    store.reserve_and_fill(id, 0, image, &bundle).await
                                }));
                            }
                            for h in handles {
                                let _ = h.await;
                            }
                        })
                    },
                    criterion::BatchSize::SmallInput,
                );
            },
        );
    }

    group.bench_function("distinct_slots_9", |b| {
        b.iter_batched(
            || rt.block_on(setup(9, 9)),
            |setup| {
                rt.block_on(async move {
                    let id = setup.store.current_id().await;
                    for (i, bundle) in setup.bundles.iter().enumerate() {
                        let image = ImageRef::new(format!("img-{}", i)).unwrap();
                        let _ = setup.store.reserve_and_fill(id, i, image, bundle).await;
                    }
                })
            },
            criterion::BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_fill);
criterion_main!(benches);
