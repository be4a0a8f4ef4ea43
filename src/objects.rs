//! Discovered managed objects.

use crate::index::{NativeObjectIndex, ObjectIndex, TypeIndex};
use crate::snapshot::HeapView;

/// How far a record has been processed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ObjectState {
    /// Registered as a root, header not yet parsed
    Pending,
    /// Header resolved to a known type and fields walked
    Valid,
    /// Header did not resolve; kept so existing edges stay valid
    InvalidType,
}

/// One managed object found in the capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedObjectRecord {
    pub address: u64,
    /// Descriptor address the header resolved through (0 when unresolved)
    pub type_info_address: u64,
    pub type_index: Option<TypeIndex>,
    pub size: u64,
    pub native_object_index: Option<NativeObjectIndex>,
    pub ref_count: u32,
    /// Window starting at the object's first header byte
    pub data: Option<HeapView>,
    pub state: ObjectState,
}

impl ManagedObjectRecord {
    /// A record registered before its header has been read.
    pub fn pending(address: u64, data: HeapView) -> Self {
        Self {
            address,
            type_info_address: 0,
            type_index: None,
            size: 0,
            native_object_index: None,
            ref_count: 0,
            data: Some(data),
            state: ObjectState::Pending,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.state == ObjectState::Valid
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.state == ObjectState::Pending
    }
}

/// Append-only arena of object records indexed by [`ObjectIndex`].
///
/// Indices are handed out in discovery order starting at 0 and never reused.
///
/// # Examples
///
/// ```
/// use heapcrawl::index::ObjectIndex;
/// use heapcrawl::objects::{ManagedObjectRecord, ObjectTable};
/// use heapcrawl::snapshot::HeapView;
///
/// let mut table = ObjectTable::default();
/// let view = HeapView { section: 0, offset: 0 };
/// let first = table.push(ManagedObjectRecord::pending(0x1000, view));
/// let second = table.push(ManagedObjectRecord::pending(0x1100, view.advance(0x100)));
///
/// assert_eq!(first, ObjectIndex(0));
/// assert_eq!(second, ObjectIndex(1));
/// assert_eq!(table[second].address, 0x1100);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ObjectTable {
    records: Vec<ManagedObjectRecord>,
}

impl ObjectTable {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, record: ManagedObjectRecord) -> ObjectIndex {
        let index = ObjectIndex::from_usize(self.records.len());
        self.records.push(record);
        index
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[inline]
    pub fn get(&self, index: ObjectIndex) -> Option<&ManagedObjectRecord> {
        self.records.get(index.index())
    }

    #[inline]
    pub fn get_mut(&mut self, index: ObjectIndex) -> Option<&mut ManagedObjectRecord> {
        self.records.get_mut(index.index())
    }

    #[inline]
    pub fn contains(&self, index: ObjectIndex) -> bool {
        index.index() < self.records.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectIndex, &ManagedObjectRecord)> + '_ {
        self.records
            .iter()
            .enumerate()
            .map(|(index, record)| (ObjectIndex::from_usize(index), record))
    }

    pub fn as_slice(&self) -> &[ManagedObjectRecord] {
        &self.records
    }

    /// Objects whose header resolved to a known type.
    pub fn valid(&self) -> impl Iterator<Item = (ObjectIndex, &ManagedObjectRecord)> + '_ {
        self.iter().filter(|(_, record)| record.is_valid())
    }
}

impl std::ops::Index<ObjectIndex> for ObjectTable {
    type Output = ManagedObjectRecord;

    fn index(&self, index: ObjectIndex) -> &Self::Output {
        &self.records[index.index()]
    }
}

impl std::ops::IndexMut<ObjectIndex> for ObjectTable {
    fn index_mut(&mut self, index: ObjectIndex) -> &mut Self::Output {
        &mut self.records[index.index()]
    }
}
