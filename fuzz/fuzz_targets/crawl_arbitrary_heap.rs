#![no_main]

use heapcrawl::config::CrawlConfig;
use heapcrawl::test_utils::SnapshotBuilder;
use libfuzzer_sys::fuzz_target;

const HEAP_BASE: u64 = 0x1000;

fuzz_target!(|data: &[u8]| {
    if data.len() < 16 {
        return;
    }

    let mut builder = SnapshotBuilder::x64();
    let node = builder.add_class("Node", 32);
    builder.add_field(node, "left", 0, node);
    builder.add_field(node, "right", 8, node);
    let string = builder.add_string_type();
    let pair = builder.add_value_type("Pair", 16);
    builder.add_field(pair, "first", 0, node);
    builder.add_field(pair, "second", 8, string);
    let nodes = builder.add_array_type("Node[]", node, 1);
    let pairs = builder.add_array_type("Pair[]", pair, 1);
    let grid = builder.add_array_type("Node[,]", node, 2);
    let types = [node, string, pair, nodes, pairs, grid];

    // Each input word becomes a descriptor, an in-heap pointer, a raw word
    // or a small length, so headers and references are hit often.
    let words = data.len() / 8;
    let heap_len = words as u64 * 8;
    let mut heap = Vec::with_capacity(words * 8);
    for chunk in data.chunks_exact(8) {
        let raw = u64::from_le_bytes(chunk.try_into().unwrap());
        let word = match raw % 4 {
            0 => builder.type_info_address(types[(raw >> 2) as usize % types.len()]),
            1 => HEAP_BASE + ((raw >> 2) % heap_len & !7),
            2 => raw,
            _ => (raw >> 2) % 64,
        };
        heap.extend_from_slice(&word.to_le_bytes());
    }
    builder.add_section(HEAP_BASE, heap.len());
    builder.write_bytes(HEAP_BASE, &heap);

    for &byte in data.iter().take(8) {
        builder.add_gc_handle(HEAP_BASE + (byte as u64 * 8) % heap_len);
    }
    let snapshot = builder.build();

    let inline = heapcrawl::crawl(&snapshot, CrawlConfig::single_threaded())
        .expect("crawling untrusted bytes never fails");
    assert_eq!(inline.objects.len(), inline.objects_by_address.len());

    let chunked = heapcrawl::crawl(
        &snapshot,
        CrawlConfig {
            worker_threads: 2,
            parallel_array_threshold: 2,
            array_chunk_len: 3,
            ..CrawlConfig::default()
        },
    )
    .expect("crawling untrusted bytes never fails");
    assert_eq!(inline.objects.len(), chunked.objects.len());
});
