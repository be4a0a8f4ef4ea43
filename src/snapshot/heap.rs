//! Captured heap sections and bounds-checked little-endian reads.

/// What a heap section holds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum HeapSectionKind {
    /// Garbage-collected object storage (the active heap)
    GcHeap,
    /// Runtime-internal memory such as vtables and class data
    VirtualMachine,
}

/// A contiguous captured byte range starting at `base`.
#[derive(Debug, Clone)]
pub struct HeapSection {
    pub base: u64,
    pub bytes: Vec<u8>,
    pub kind: HeapSectionKind,
}

impl HeapSection {
    pub fn new(base: u64, bytes: Vec<u8>, kind: HeapSectionKind) -> Self {
        Self { base, bytes, kind }
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// One past the last captured address.
    #[inline]
    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.len())
    }

    #[inline]
    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address < self.end()
    }
}

/// A byte window into one heap section.
///
/// Records store views rather than borrowed slices so they can outlive the
/// borrow of the heap that produced them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct HeapView {
    pub section: u32,
    /// Byte offset from the section base
    pub offset: u64,
}

impl HeapView {
    #[inline]
    pub fn advance(self, delta: u64) -> Self {
        Self {
            section: self.section,
            offset: self.offset + delta,
        }
    }
}

/// Read a little-endian pointer of `pointer_size` bytes at `offset`.
///
/// Returns `None` when the read would run past the end of `bytes`.
#[inline]
pub fn read_pointer(bytes: &[u8], offset: u64, pointer_size: u32) -> Option<u64> {
    match pointer_size {
        8 => read_u64(bytes, offset),
        4 => read_u32(bytes, offset).map(u64::from),
        _ => None,
    }
}

#[inline]
pub fn read_u64(bytes: &[u8], offset: u64) -> Option<u64> {
    let raw = slice_at(bytes, offset, 8)?;
    Some(u64::from_le_bytes(raw.try_into().ok()?))
}

#[inline]
pub fn read_u32(bytes: &[u8], offset: u64) -> Option<u32> {
    let raw = slice_at(bytes, offset, 4)?;
    Some(u32::from_le_bytes(raw.try_into().ok()?))
}

#[inline]
pub fn read_i32(bytes: &[u8], offset: u64) -> Option<i32> {
    read_u32(bytes, offset).map(|v| v as i32)
}

#[inline]
fn slice_at(bytes: &[u8], offset: u64, len: usize) -> Option<&[u8]> {
    let start = usize::try_from(offset).ok()?;
    let end = start.checked_add(len)?;
    bytes.get(start..end)
}

/// All captured heap sections, sorted by base address.
///
/// # Examples
///
/// ```
/// use heapcrawl::snapshot::{HeapSection, HeapSectionKind, ManagedHeap};
///
/// let mut bytes = vec![0u8; 0x100];
/// bytes[0x10..0x18].copy_from_slice(&0xdead_beef_u64.to_le_bytes());
/// let heap = ManagedHeap::new(vec![HeapSection::new(0x1000, bytes, HeapSectionKind::GcHeap)]);
///
/// let view = heap.find(0x1010).expect("address is captured");
/// assert_eq!(heap.read_pointer(view, 0, 8), Some(0xdead_beef));
/// assert!(heap.find(0x1100).is_none());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManagedHeap {
    sections: Vec<HeapSection>,
}

impl ManagedHeap {
    pub fn new(mut sections: Vec<HeapSection>) -> Self {
        sections.sort_by_key(|section| section.base);
        Self { sections }
    }

    pub fn sections(&self) -> &[HeapSection] {
        &self.sections
    }

    pub fn section(&self, index: u32) -> Option<&HeapSection> {
        self.sections.get(index as usize)
    }

    /// Locate the section holding `address`.
    pub fn find(&self, address: u64) -> Option<HeapView> {
        let after = self
            .sections
            .partition_point(|section| section.base <= address);
        let index = after.checked_sub(1)?;
        let section = &self.sections[index];
        if !section.contains(address) {
            return None;
        }
        Some(HeapView {
            section: index as u32,
            offset: address - section.base,
        })
    }

    pub fn address_of(&self, view: HeapView) -> Option<u64> {
        self.section(view.section)
            .map(|section| section.base + view.offset)
    }

    pub fn kind_of(&self, view: HeapView) -> Option<HeapSectionKind> {
        self.section(view.section).map(|section| section.kind)
    }

    /// Captured bytes from `view` to the end of its section.
    pub fn remaining(&self, view: HeapView) -> u64 {
        self.section(view.section)
            .map(|section| section.len().saturating_sub(view.offset))
            .unwrap_or(0)
    }

    /// Bytes from `view` to the end of its section.
    pub fn tail(&self, view: HeapView) -> &[u8] {
        self.section(view.section)
            .and_then(|section| {
                let start = usize::try_from(view.offset).ok()?;
                section.bytes.get(start..)
            })
            .unwrap_or(&[])
    }

    #[inline]
    pub fn read_pointer(&self, view: HeapView, offset: u64, pointer_size: u32) -> Option<u64> {
        let section = self.section(view.section)?;
        read_pointer(&section.bytes, view.offset.checked_add(offset)?, pointer_size)
    }

    #[inline]
    pub fn read_i32(&self, view: HeapView, offset: u64) -> Option<i32> {
        let section = self.section(view.section)?;
        read_i32(&section.bytes, view.offset.checked_add(offset)?)
    }

    /// Read a pointer stored at an absolute address.
    pub fn read_pointer_at(&self, address: u64, pointer_size: u32) -> Option<u64> {
        let view = self.find(address)?;
        self.read_pointer(view, 0, pointer_size)
    }

    /// Total captured bytes across sections of `kind`.
    pub fn total_bytes(&self, kind: HeapSectionKind) -> u64 {
        self.sections
            .iter()
            .filter(|section| section.kind == kind)
            .map(HeapSection::len)
            .sum()
    }
}
