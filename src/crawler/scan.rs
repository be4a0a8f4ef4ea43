//! Pointer discovery over byte windows.
//!
//! These functions only read. Discovered references go to a
//! [`ReferenceSink`]: the orchestrator's worklist during the sequential walk,
//! or a private [`ChunkOutput`] inside a chunk worker.

use std::ops::Range;

use crate::address_map::AddressIndexMap;
use crate::connections::Provenance;
use crate::field_layout::FieldLayoutCache;
use crate::index::TypeIndex;
use crate::parallel::ChunkOutput;
use crate::snapshot::TypeTable;
use crate::snapshot::heap::read_pointer;
use crate::source::SourceLocation;
use crate::worklist::{CrawlTask, CrawlWorklist};

/// Receiver of references found while scanning.
pub(crate) trait ReferenceSink {
    fn reference(&mut self, task: CrawlTask);
}

impl ReferenceSink for CrawlWorklist {
    #[inline]
    fn reference(&mut self, task: CrawlTask) {
        self.push(task);
    }
}

/// Chunk-local sink resolving known addresses against a read-only map.
pub(crate) struct ChunkSink<'a> {
    known: &'a AddressIndexMap,
    pub(crate) output: ChunkOutput,
}

impl<'a> ChunkSink<'a> {
    pub(crate) fn new(known: &'a AddressIndexMap) -> Self {
        Self {
            known,
            output: ChunkOutput::default(),
        }
    }
}

impl ReferenceSink for ChunkSink<'_> {
    #[inline]
    fn reference(&mut self, task: CrawlTask) {
        self.output.record(self.known, task);
    }
}

/// A byte range holding one instance's data.
///
/// `start` is where field offsets are measured from; no read may reach past
/// `end`. Both are offsets into `bytes`.
#[derive(Debug, Copy, Clone)]
pub(crate) struct DataWindow<'a> {
    pub bytes: &'a [u8],
    pub start: u64,
    pub end: u64,
}

impl<'a> DataWindow<'a> {
    pub(crate) fn new(bytes: &'a [u8], start: u64, end: u64) -> Self {
        Self {
            bytes,
            start,
            end: end.min(bytes.len() as u64),
        }
    }

    /// Sub-window for the `index`-th element of `element_size` bytes,
    /// starting at `first`.
    fn element(&self, first: u64, element_size: u64, index: u64) -> Self {
        let start = first.saturating_add(element_size.saturating_mul(index));
        Self {
            bytes: self.bytes,
            start,
            end: start.saturating_add(element_size).min(self.end),
        }
    }
}

/// Scan the reference fields of one instance of `ty`.
///
/// The layout of `ty` must already be built in `layouts`. Returns the number
/// of non-null references reported.
pub(crate) fn scan_fields<S: ReferenceSink>(
    layouts: &FieldLayoutCache,
    ty: TypeIndex,
    window: DataWindow<'_>,
    pointer_size: u32,
    from: SourceLocation,
    array_index: Option<u32>,
    sink: &mut S,
) -> usize {
    let mut found = 0;
    let width = pointer_size as u64;
    for (offset, entry) in layouts.fields(ty) {
        let at = window.start.saturating_add(offset);
        if at.saturating_add(width) > window.end {
            // Offsets ascend, so every later field is out of range too.
            break;
        }
        let Some(address) = read_pointer(window.bytes, at, pointer_size) else {
            break;
        };
        if address == 0 {
            continue;
        }

        let provenance = match array_index {
            Some(index) => entry.provenance().with_array_index(index),
            None => entry.provenance(),
        };
        sink.reference(CrawlTask::new(address, from, provenance));
        found += 1;
    }
    found
}

/// Element positions paired with their recorded array index. Elements past
/// `u32::MAX` cannot be named in a provenance and are not scanned.
fn element_indices(range: Range<usize>) -> impl Iterator<Item = (usize, u32)> {
    range.map_while(|index| Some((index, u32::try_from(index).ok()?)))
}

/// Scan pointer-sized array slots `range`; slot 0 sits at `window.start`.
pub(crate) fn scan_reference_slots<S: ReferenceSink>(
    window: DataWindow<'_>,
    range: Range<usize>,
    pointer_size: u32,
    from: SourceLocation,
    sink: &mut S,
) -> usize {
    let width = pointer_size as u64;
    let mut found = 0;
    for (slot, array_index) in element_indices(range) {
        let at = window.start.saturating_add(width.saturating_mul(slot as u64));
        if at.saturating_add(width) > window.end {
            break;
        }
        let Some(address) = read_pointer(window.bytes, at, pointer_size) else {
            break;
        };
        if address != 0 {
            sink.reference(CrawlTask::new(
                address,
                from,
                Provenance::array_element(array_index),
            ));
            found += 1;
        }
    }
    found
}

/// Scan the embedded value-type elements `range` of an array.
#[allow(clippy::too_many_arguments)]
pub(crate) fn scan_value_elements<S: ReferenceSink>(
    layouts: &FieldLayoutCache,
    element_type: TypeIndex,
    element_size: u64,
    window: DataWindow<'_>,
    range: Range<usize>,
    pointer_size: u32,
    from: SourceLocation,
    sink: &mut S,
) -> usize {
    if element_size == 0 {
        return 0;
    }
    let mut found = 0;
    for (index, array_index) in element_indices(range) {
        let element = window.element(window.start, element_size, index as u64);
        if element.start >= window.end {
            break;
        }
        found += scan_fields(
            layouts,
            element_type,
            element,
            pointer_size,
            from,
            Some(array_index),
            sink,
        );
    }
    found
}

/// Scan the static storage of each type in `roots`.
///
/// Static layouts for every listed type must already be built.
pub(crate) fn scan_static_roots<S: ReferenceSink>(
    types: &TypeTable,
    layouts: &FieldLayoutCache,
    roots: &[TypeIndex],
    pointer_size: u32,
    sink: &mut S,
) -> usize {
    roots
        .iter()
        .filter_map(|&ty| Some((ty, types.get(ty)?)))
        .map(|(ty, description)| {
            let bytes = description.static_field_bytes.as_slice();
            scan_fields(
                layouts,
                ty,
                DataWindow::new(bytes, 0, bytes.len() as u64),
                pointer_size,
                SourceLocation::ManagedType(ty),
                None,
                sink,
            )
        })
        .sum()
}
