//! Benchmarks for the address index map
//!
//! Measures insert, lookup and churn throughput against `FxHashMap`, the
//! general-purpose map the crawl would otherwise use as its visited set.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rustc_hash::FxHashMap;
use std::hint::black_box;

use heapcrawl::address_map::AddressIndexMap;
use heapcrawl::index::ObjectIndex;

/// Heap-like addresses: 16-byte aligned, mostly ascending with gaps.
fn generate_addresses(count: usize) -> Vec<u64> {
    let mut address = 0x7f00_0000_0000u64;
    (0..count)
        .map(|_| {
            address += 16 * (1 + fastrand::u64(..8));
            address
        })
        .collect()
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("address_map_insert");

    for size in [1_000, 10_000, 100_000].iter() {
        let addresses = generate_addresses(*size);
        group.throughput(Throughput::Elements(*size as u64));

        group.bench_with_input(BenchmarkId::new("address_map", size), &addresses, |b, keys| {
            b.iter(|| {
                let mut map = AddressIndexMap::new();
                for (position, &key) in keys.iter().enumerate() {
                    map.try_add(key, ObjectIndex(position as u32));
                }
                black_box(map.len())
            });
        });

        group.bench_with_input(BenchmarkId::new("fx_hash_map", size), &addresses, |b, keys| {
            b.iter(|| {
                let mut map = FxHashMap::default();
                for (position, &key) in keys.iter().enumerate() {
                    map.entry(key).or_insert(position as u32);
                }
                black_box(map.len())
            });
        });
    }

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("address_map_lookup");
    let size = 100_000;
    let addresses = generate_addresses(size);
    // Half hits, half misses one byte off a live address.
    let lookups: Vec<u64> = (0..size)
        .map(|_| addresses[fastrand::usize(..size)] + fastrand::u64(..2))
        .collect();

    let mut map = AddressIndexMap::with_capacity(size);
    let mut model = FxHashMap::default();
    for (position, &key) in addresses.iter().enumerate() {
        map.try_add(key, ObjectIndex(position as u32));
        model.insert(key, position as u32);
    }

    group.throughput(Throughput::Elements(lookups.len() as u64));
    group.bench_function("address_map", |b| {
        b.iter(|| lookups.iter().filter(|&&key| map.find(key).is_some()).count())
    });
    group.bench_function("fx_hash_map", |b| {
        b.iter(|| lookups.iter().filter(|&&key| model.contains_key(&key)).count())
    });

    group.finish();
}

fn bench_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("address_map_churn");
    let addresses = generate_addresses(20_000);

    group.bench_function("add_remove_resize", |b| {
        b.iter(|| {
            let mut map = AddressIndexMap::with_capacity(1024);
            for (position, &key) in addresses.iter().enumerate() {
                map.try_add(key, ObjectIndex(position as u32));
                if position % 3 == 0 {
                    map.try_remove(addresses[position / 2]);
                }
            }
            let _ = map.resize(map.len());
            black_box(map.check_integrity().is_ok())
        });
    });

    group.finish();
}

criterion_group!(benches, bench_insert, bench_lookup, bench_churn);
criterion_main!(benches);
