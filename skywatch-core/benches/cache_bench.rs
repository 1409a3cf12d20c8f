use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use skywatch_core::cache::{compute_key, CacheStore, Params};
use skywatch_core::Payload;
use std::sync::Arc;
use std::time::Duration;

const TTL: Duration = Duration::from_secs(600);

fn bench_cache_key(c: &mut Criterion) {
    let params: Params = [
        ("starttime", "2024-01-01"),
        ("endtime", "2024-01-31"),
        ("minmagnitude", "4.5"),
        ("format", "geojson"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    c.bench_function("cache_compute_key_4_params", |b| {
        b.iter(|| {
            black_box(compute_key(
                "usgs",
                "earthquakes",
                "https://earthquake.usgs.gov/fdsnws/event/1/query",
                black_box(&params),
            ))
        });
    });
}

fn bench_cache_hits(c: &mut Criterion) {
    let cache = populated(1_000);
    let keys: Vec<String> = (0..1_000).map(key).collect();

    c.bench_function("cache_get_hit_1000_entries", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % keys.len();
            black_box(cache.get(&keys[i]));
        });
    });
}

fn bench_cache_eviction(c: &mut Criterion) {
    c.bench_function("cache_put_with_eviction", |b| {
        b.iter_batched(
            || populated(256),
            |cache| {
                for n in 256..512 {
                    cache.put(key(n), payload(n), TTL);
                }
                black_box(cache.stats());
            },
            BatchSize::SmallInput,
        );
    });
}

fn populated(capacity: usize) -> CacheStore<Arc<Payload>> {
    let cache = CacheStore::new(capacity);
    for n in 0..capacity {
        cache.put(key(n), payload(n), TTL);
    }
    cache
}

fn key(n: usize) -> String {
    format!("usgs:earthquakes:https://earthquake.usgs.gov/fdsnws/event/1/query?page={}", n)
}

fn payload(n: usize) -> Arc<Payload> {
    Arc::new(Payload::new(200, format!("{{\"page\":{}}}", n)))
}

criterion_group!(benches, bench_cache_key, bench_cache_hits, bench_cache_eviction);
criterion_main!(benches);
