//! Native (unmanaged) objects and types reported by the capture.

use rustc_hash::FxHashMap;

use crate::index::{NativeObjectIndex, NativeTypeIndex};
use crate::source::SourceLocation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeType {
    pub name: String,
    pub base_type: Option<NativeTypeIndex>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeObject {
    pub name: String,
    pub instance_id: i32,
    pub native_type: NativeTypeIndex,
    pub address: u64,
    pub size: u64,
}

/// A reference the capture reported directly, independent of the crawl.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ReportedConnection {
    pub from: SourceLocation,
    pub to: SourceLocation,
}

/// Native objects with lookup by address and by instance id.
#[derive(Debug, Clone, Default)]
pub struct NativeObjectTable {
    objects: Vec<NativeObject>,
    by_address: FxHashMap<u64, NativeObjectIndex>,
    by_instance_id: FxHashMap<i32, NativeObjectIndex>,
}

impl NativeObjectTable {
    pub fn new(objects: Vec<NativeObject>) -> Self {
        let mut by_address = FxHashMap::default();
        let mut by_instance_id = FxHashMap::default();
        by_address.reserve(objects.len());
        by_instance_id.reserve(objects.len());

        for (index, object) in objects.iter().enumerate() {
            let index = NativeObjectIndex::from_usize(index);
            if object.address != 0 {
                by_address.entry(object.address).or_insert(index);
            }
            by_instance_id.entry(object.instance_id).or_insert(index);
        }

        Self {
            objects,
            by_address,
            by_instance_id,
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get(&self, index: NativeObjectIndex) -> Option<&NativeObject> {
        self.objects.get(index.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = (NativeObjectIndex, &NativeObject)> + '_ {
        self.objects
            .iter()
            .enumerate()
            .map(|(index, object)| (NativeObjectIndex::from_usize(index), object))
    }

    pub fn find_by_address(&self, address: u64) -> Option<NativeObjectIndex> {
        self.by_address.get(&address).copied()
    }

    pub fn find_by_instance_id(&self, instance_id: i32) -> Option<NativeObjectIndex> {
        self.by_instance_id.get(&instance_id).copied()
    }
}
