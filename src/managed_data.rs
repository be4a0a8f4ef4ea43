//! What a finished crawl hands to downstream consumers.

use crate::address_map::AddressIndexMap;
use crate::connections::{ConnectionIndexMaps, ConnectionLog};
use crate::index::{GcHandleIndex, NativeObjectIndex, NativeTypeIndex, ObjectIndex, TypeIndex};
use crate::objects::{ManagedObjectRecord, ObjectTable};
use crate::snapshot::{HeapSectionKind, ManagedHeap};

/// Counts of input faults the crawl recovered from.
///
/// None of these abort a crawl; a capture is a best-effort image and the crawl
/// reports how much of it could not be interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlDiagnostics {
    /// Pointers outside every captured heap section
    pub unresolvable_pointers: usize,
    /// Objects whose header did not resolve to a type, even through one indirection
    pub invalid_headers: usize,
    /// String or array lengths that were negative or overran their section
    pub impossible_lengths: usize,
    /// GC handles targeting an address an earlier handle already registered
    pub duplicate_roots: usize,
    /// Edges dropped because their provenance contradicted their source
    pub inconsistent_edges: usize,
    /// Shell objects whose cached native pointer was null
    pub leaked_shells: usize,
    /// Shell objects whose cached native pointer matched no native object
    pub unresolved_native_pointers: usize,
}

impl CrawlDiagnostics {
    /// Whether the crawl ran without recovering from anything.
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

/// Managed/native associations established after the crawl.
#[derive(Debug, Clone, Default)]
pub struct NativeLinks {
    /// Managed shell of each native object, by native object index
    pub native_to_managed: Vec<Option<ObjectIndex>>,
    /// Incoming reported connections per native object
    pub native_ref_counts: Vec<u32>,
    /// Native type each managed type mirrors, by managed type index
    pub managed_type_to_native: Vec<Option<NativeTypeIndex>>,
    /// Managed type matching each native type by name, by native type index
    pub native_type_to_managed_base: Vec<Option<TypeIndex>>,
}

impl NativeLinks {
    pub fn managed_for_native(&self, native: NativeObjectIndex) -> Option<ObjectIndex> {
        self.native_to_managed.get(native.index()).copied().flatten()
    }

    pub fn native_for_type(&self, ty: TypeIndex) -> Option<NativeTypeIndex> {
        self.managed_type_to_native.get(ty.index()).copied().flatten()
    }

    pub fn managed_base_for(&self, native: NativeTypeIndex) -> Option<TypeIndex> {
        self.native_type_to_managed_base
            .get(native.index())
            .copied()
            .flatten()
    }

    /// Number of native objects with a managed shell.
    pub fn linked_count(&self) -> usize {
        self.native_to_managed.iter().flatten().count()
    }
}

/// The reconstructed managed object graph.
///
/// # Examples
///
/// ```
/// use heapcrawl::config::CrawlConfig;
/// use heapcrawl::test_utils::SnapshotBuilder;
///
/// let mut builder = SnapshotBuilder::x64();
/// let leaf = builder.add_class("Leaf", 24);
/// builder.add_section(0x1000, 0x100);
/// builder.write_object(0x1000, leaf);
/// builder.add_gc_handle(0x1000);
///
/// let data = heapcrawl::crawl(&builder.build(), CrawlConfig::single_threaded()).unwrap();
/// assert_eq!(data.objects.len(), 1);
/// assert_eq!(data.managed_object_memory_usage, 24);
/// assert_eq!(data.active_heap_empty_space, 0x100 - 24);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManagedData {
    pub objects: ObjectTable,
    pub objects_by_address: AddressIndexMap,
    pub connections: ConnectionLog,
    pub connection_index: ConnectionIndexMaps,
    /// Object each GC handle resolved to, by handle index
    pub gc_handle_targets: Vec<Option<ObjectIndex>>,
    pub native_links: NativeLinks,
    /// Bytes of every object with a resolved type
    pub managed_object_memory_usage: u64,
    /// Bytes of resolved objects living in GC heap sections
    pub active_heap_memory_usage: u64,
    /// GC heap section bytes not covered by resolved objects
    pub active_heap_empty_space: u64,
    pub diagnostics: CrawlDiagnostics,
}

impl ManagedData {
    pub fn object(&self, index: ObjectIndex) -> Option<&ManagedObjectRecord> {
        self.objects.get(index)
    }

    pub fn object_at(&self, address: u64) -> Option<&ManagedObjectRecord> {
        self.objects_by_address
            .find(address)
            .and_then(|index| self.objects.get(index))
    }

    pub fn gc_handle_target(&self, handle: GcHandleIndex) -> Option<ObjectIndex> {
        self.gc_handle_targets.get(handle.index()).copied().flatten()
    }

    /// Recompute the memory aggregates from the object table.
    pub(crate) fn compute_memory_usage(&mut self, heap: &ManagedHeap) {
        let mut total = 0u64;
        let mut active = 0u64;
        for (_, record) in self.objects.valid() {
            total += record.size;
            let in_gc_heap = record
                .data
                .and_then(|view| heap.kind_of(view))
                .is_some_and(|kind| kind == HeapSectionKind::GcHeap);
            if in_gc_heap {
                active += record.size;
            }
        }

        self.managed_object_memory_usage = total;
        self.active_heap_memory_usage = active;
        self.active_heap_empty_space = heap
            .total_bytes(HeapSectionKind::GcHeap)
            .saturating_sub(active);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::ObjectState;
    use crate::snapshot::{HeapSection, HeapView};

    #[test]
    fn memory_usage_counts_only_valid_objects() {
        let heap = ManagedHeap::new(vec![
            HeapSection::new(0x1000, vec![0; 0x100], HeapSectionKind::GcHeap),
            HeapSection::new(0x8000, vec![0; 0x40], HeapSectionKind::VirtualMachine),
        ]);

        let mut data = ManagedData::default();
        let in_heap = HeapView {
            section: 0,
            offset: 0,
        };
        let in_vm = HeapView {
            section: 1,
            offset: 0,
        };

        let a = data
            .objects
            .push(ManagedObjectRecord::pending(0x1000, in_heap));
        let b = data.objects.push(ManagedObjectRecord::pending(0x8000, in_vm));
        let c = data
            .objects
            .push(ManagedObjectRecord::pending(0x1040, in_heap.advance(0x40)));
        for (index, size, state) in [
            (a, 0x20, ObjectState::Valid),
            (b, 0x10, ObjectState::Valid),
            (c, 0x30, ObjectState::InvalidType),
        ] {
            data.objects[index].size = size;
            data.objects[index].state = state;
        }

        data.compute_memory_usage(&heap);
        assert_eq!(data.managed_object_memory_usage, 0x30);
        assert_eq!(data.active_heap_memory_usage, 0x20);
        assert_eq!(data.active_heap_empty_space, 0xe0);
    }

    #[test]
    fn native_link_lookups_tolerate_out_of_range() {
        let links = NativeLinks {
            native_to_managed: vec![None, Some(ObjectIndex(3))],
            ..NativeLinks::default()
        };
        assert_eq!(
            links.managed_for_native(NativeObjectIndex(1)),
            Some(ObjectIndex(3))
        );
        assert_eq!(links.managed_for_native(NativeObjectIndex(9)), None);
        assert_eq!(links.native_for_type(TypeIndex(0)), None);
        assert_eq!(links.linked_count(), 1);
    }

    #[test]
    fn default_diagnostics_are_clean() {
        let mut diagnostics = CrawlDiagnostics::default();
        assert!(diagnostics.is_clean());
        diagnostics.leaked_shells += 1;
        assert!(!diagnostics.is_clean());
    }
}
