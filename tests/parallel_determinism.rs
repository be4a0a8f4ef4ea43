//! Chunked scanning must not change what a crawl finds.
//!
//! Large arrays and static storage are split into chunks and merged in chunk
//! order, so the object table and connection log are identical whatever the
//! worker count.

use heapcrawl::config::CrawlConfig;
use heapcrawl::source::SourceKind;
use heapcrawl::test_utils::SnapshotBuilder;
use heapcrawl::{CapturedSnapshot, ManagedData, crawl};

const LEAVES: u64 = 3_000;
const SLOTS: u64 = 5_000;
const ENTRIES: u64 = 2_000;

/// A reference array and a struct array over a shared pool of leaves, plus
/// a few static roots pointing into the same pool.
fn large_heap(seed: u64) -> CapturedSnapshot {
    let mut rng = fastrand::Rng::with_seed(seed);
    let mut builder = SnapshotBuilder::x64();
    let leaf = builder.add_class("Leaf", 16);
    let leaves = builder.add_array_type("Leaf[]", leaf, 1);
    let entry = builder.add_value_type("Entry", 16);
    builder.add_field(entry, "first", 0, leaf);
    builder.add_field(entry, "second", 8, leaf);
    let entries = builder.add_array_type("Entry[]", entry, 1);
    let registry = builder.add_class("Registry", 16);
    for slot in 0..8u32 {
        builder.add_static_field(registry, &format!("s_Slot{slot}"), slot * 8, leaf);
    }

    let leaf_base = 0x10_0000u64;
    let slots_base = 0x20_0000u64;
    let entries_base = 0x30_0000u64;
    builder.add_section(leaf_base, (LEAVES * 16) as usize);
    builder.add_section(slots_base, (32 + SLOTS * 8) as usize);
    builder.add_section(entries_base, (32 + ENTRIES * 16) as usize);

    let leaf_at = |i: u64| leaf_base + i * 16;
    for i in 0..LEAVES {
        builder.write_object(leaf_at(i), leaf);
    }

    let first_slot = builder.write_array(slots_base, leaves, SLOTS);
    for i in 0..SLOTS {
        if rng.u8(..) % 5 != 0 {
            builder.write_pointer(first_slot + i * 8, leaf_at(rng.u64(0..LEAVES)));
        } else if rng.bool() {
            builder.write_pointer(first_slot + i * 8, 0x9999);
        }
    }

    let first_entry = builder.write_array(entries_base, entries, ENTRIES);
    for i in 0..ENTRIES {
        builder.write_pointer(first_entry + i * 16, leaf_at(rng.u64(0..LEAVES)));
        if rng.bool() {
            builder.write_pointer(first_entry + i * 16 + 8, leaf_at(rng.u64(0..LEAVES)));
        }
    }

    for slot in 0..8u32 {
        builder.write_static_pointer(registry, slot * 8, leaf_at(rng.u64(0..LEAVES)));
    }
    builder.add_gc_handle(leaf_at(0));
    builder.add_gc_handle(slots_base);
    builder.add_gc_handle(entries_base);
    builder.build()
}

fn crawl_with(snapshot: &CapturedSnapshot, worker_threads: usize) -> ManagedData {
    let config = CrawlConfig {
        worker_threads,
        parallel_array_threshold: 256,
        array_chunk_len: 300,
        static_chunk_len: 1,
        ..CrawlConfig::default()
    };
    crawl(snapshot, config).expect("crawl succeeds")
}

fn assert_same(a: &ManagedData, b: &ManagedData) {
    assert_eq!(a.objects.as_slice(), b.objects.as_slice());
    assert_eq!(a.connections.as_slice(), b.connections.as_slice());
    assert_eq!(a.gc_handle_targets, b.gc_handle_targets);
    assert_eq!(a.diagnostics, b.diagnostics);
}

#[test]
fn worker_count_does_not_change_the_result() {
    let snapshot = large_heap(7);
    let inline = crawl_with(&snapshot, 1);
    for workers in [2, 4] {
        assert_same(&inline, &crawl_with(&snapshot, workers));
    }
}

#[test]
fn repeated_pooled_crawls_agree() {
    let snapshot = large_heap(42);
    let first = crawl_with(&snapshot, 4);
    let second = crawl_with(&snapshot, 4);
    assert_same(&first, &second);
}

#[test]
fn chunked_crawl_finds_every_reference() {
    let snapshot = large_heap(3);
    let data = crawl_with(&snapshot, 4);

    let arrays = data
        .objects
        .iter()
        .filter(|(_, record)| {
            record
                .type_index
                .and_then(|ty| snapshot.types.get(ty))
                .is_some_and(|description| description.is_array())
        })
        .count();
    assert_eq!(arrays, 2);

    let object_edges = data.connections.from_kind(SourceKind::ManagedObject).count();
    let static_edges = data.connections.from_kind(SourceKind::ManagedType).count();
    assert_eq!(static_edges, 8);
    assert!(object_edges >= ENTRIES as usize);
    assert!(data.diagnostics.unresolvable_pointers > 0);
    assert_eq!(data.objects_by_address.len(), data.objects.len());
    for (index, _) in data.objects.iter() {
        assert!(!data.connection_index.to_target(index).is_empty());
    }
}

#[test]
fn chunked_and_sequential_paths_find_the_same_graph() {
    let snapshot = large_heap(11);
    let chunked = crawl_with(&snapshot, 2);
    let sequential = crawl(
        &snapshot,
        CrawlConfig {
            parallel_array_threshold: usize::MAX,
            ..CrawlConfig::single_threaded()
        },
    )
    .unwrap();

    // Discovery order may differ; the sets of addresses and edges may not.
    let mut chunked_addresses: Vec<_> = chunked.objects.iter().map(|(_, r)| r.address).collect();
    let mut sequential_addresses: Vec<_> =
        sequential.objects.iter().map(|(_, r)| r.address).collect();
    chunked_addresses.sort_unstable();
    sequential_addresses.sort_unstable();
    assert_eq!(chunked_addresses, sequential_addresses);

    let edge_keys = |data: &ManagedData| {
        let mut keys: Vec<_> = data
            .connections
            .iter()
            .map(|edge| {
                let source = match edge.from.as_managed_object() {
                    Some(object) => data.objects[object].address,
                    None => edge.from.index().map_or(u64::MAX, |index| index as u64),
                };
                (
                    edge.from.kind(),
                    source,
                    data.objects[edge.to].address,
                    edge.provenance.array_index,
                    edge.provenance.field_index.map(|field| field.0),
                )
            })
            .collect();
        keys.sort_unstable();
        keys
    };
    assert_eq!(edge_keys(&chunked), edge_keys(&sequential));
}
