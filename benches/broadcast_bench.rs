//! Benchmarks for the relay hub
//!
//! Run with: cargo bench

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use relay::hub::{Hub, HubConfig, Subscription};

fn create_hub(subscribers: usize) -> (Hub, Vec<Subscription>) {
    let hub = Hub::new(HubConfig {
        queue_capacity: 1024,
        max_subscribers: 0,
    });
    let subscriptions = (0..subscribers)
        .map(|_| hub.subscribe().unwrap())
        .collect();
    (hub, subscriptions)
}

fn bench_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast");
    let payload = Bytes::from_static(br#"{"red":12,"green":7,"blue":3}"#);

    for size in [1, 100, 1000] {
        let (hub, mut subscriptions) = create_hub(size);

        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("fan_out_{}", size), |b| {
            b.iter(|| {
                let report = hub.broadcast(black_box(payload.clone()));
                // Drain so queues never fill and trigger eviction
                for subscription in subscriptions.iter_mut() {
                    subscription.try_recv();
                }
                report
            })
        });
    }

    group.finish();
}

fn bench_subscribe(c: &mut Criterion) {
    let mut group = c.benchmark_group("subscribe");
    let hub = Hub::new(HubConfig::default());

    group.bench_function("subscribe_unsubscribe", |b| {
        b.iter(|| {
            let subscription = hub.subscribe().unwrap();
            drop(black_box(subscription));
        })
    });

    group.finish();
}

criterion_group!(benches, bench_broadcast, bench_subscribe);
criterion_main!(benches);
