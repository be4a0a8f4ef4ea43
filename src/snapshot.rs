//! The raw capture the crawler consumes.
//!
//! Everything in this module is produced by an external snapshot reader and is
//! treated as read-only input. Nothing here is trusted: every pointer and
//! length found in the byte buffers is checked before use.

pub mod heap;
pub mod native;
pub mod types;
pub mod vm;

pub use heap::{HeapSection, HeapSectionKind, HeapView, ManagedHeap};
pub use native::{NativeObject, NativeObjectTable, NativeType, ReportedConnection};
pub use types::{
    FieldDescription, KnownTypes, TypeDescription, TypeFlags, TypeTable, strip_namespace,
};
pub use vm::VmInfo;

use crate::error::CrawlResult;
use crate::index::{GcHandleIndex, NativeTypeIndex};

/// A complete managed memory capture.
#[derive(Debug, Clone, Default)]
pub struct CapturedSnapshot {
    pub vm: VmInfo,
    pub heap: ManagedHeap,
    pub types: TypeTable,
    /// Target address of every GC handle, in capture order
    pub gc_handles: Vec<u64>,
    pub native_types: Vec<NativeType>,
    pub native_objects: NativeObjectTable,
    pub connections: Vec<ReportedConnection>,
}

impl Default for VmInfo {
    fn default() -> Self {
        VmInfo::x64()
    }
}

impl CapturedSnapshot {
    pub fn validate(&self) -> CrawlResult<()> {
        self.vm.validate()
    }

    pub fn gc_handle_count(&self) -> usize {
        self.gc_handles.len()
    }

    pub fn gc_handle_target(&self, index: GcHandleIndex) -> Option<u64> {
        self.gc_handles.get(index.index()).copied()
    }

    pub fn native_type(&self, index: NativeTypeIndex) -> Option<&NativeType> {
        self.native_types.get(index.index())
    }
}
