//! Test utilities for heapcrawl tests
//!
//! [`SnapshotBuilder`] assembles a [`CapturedSnapshot`] by hand: declare
//! types and fields, map heap sections, then write headers and pointers at
//! absolute addresses the way a real runtime would have laid them out.
//!
//! The writers panic when an address is not inside a mapped section, since a
//! fixture that writes outside its own heap is a broken test.

use crate::index::{FieldIndex, GcHandleIndex, NativeObjectIndex, NativeTypeIndex, TypeIndex};
use crate::snapshot::{
    CapturedSnapshot, FieldDescription, HeapSection, HeapSectionKind, ManagedHeap, NativeObject,
    NativeObjectTable, NativeType, ReportedConnection, TypeDescription, TypeFlags, TypeTable,
    VmInfo,
};
use crate::source::SourceLocation;

/// First synthetic descriptor address handed out by [`SnapshotBuilder`].
pub const TEST_DESCRIPTOR_BASE: u64 = 0x7f00_0000_0000;
/// Spacing between synthetic descriptor addresses.
pub const TEST_DESCRIPTOR_STRIDE: u64 = 0x100;

/// Builder for hand-made snapshots.
///
/// # Examples
///
/// ```
/// use heapcrawl::test_utils::SnapshotBuilder;
///
/// let mut builder = SnapshotBuilder::x64();
/// let string = builder.add_string_type();
/// builder.add_section(0x1000, 0x100);
/// builder.write_string(0x1000, string, 3);
/// builder.add_gc_handle(0x1000);
///
/// let snapshot = builder.build();
/// assert_eq!(snapshot.types.known().string, Some(string));
/// assert_eq!(snapshot.heap.read_pointer_at(0x1000, 8), Some(builder.type_info_address(string)));
/// ```
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    vm: VmInfo,
    types: Vec<TypeDescription>,
    fields: Vec<FieldDescription>,
    sections: Vec<HeapSection>,
    gc_handles: Vec<u64>,
    native_types: Vec<NativeType>,
    native_objects: Vec<NativeObject>,
    connections: Vec<ReportedConnection>,
}

impl SnapshotBuilder {
    pub fn new(vm: VmInfo) -> Self {
        Self {
            vm,
            types: Vec::new(),
            fields: Vec::new(),
            sections: Vec::new(),
            gc_handles: Vec::new(),
            native_types: Vec::new(),
            native_objects: Vec::new(),
            connections: Vec::new(),
        }
    }

    pub fn x64() -> Self {
        Self::new(VmInfo::x64())
    }

    pub fn x86() -> Self {
        Self::new(VmInfo::x86())
    }

    pub fn vm(&self) -> &VmInfo {
        &self.vm
    }

    /// Add a type, assigning it a descriptor address if it has none.
    pub fn add_type(&mut self, mut description: TypeDescription) -> TypeIndex {
        let index = TypeIndex::from_usize(self.types.len());
        if description.type_info_address == 0 {
            description.type_info_address =
                TEST_DESCRIPTOR_BASE + index.0 as u64 * TEST_DESCRIPTOR_STRIDE;
        }
        self.types.push(description);
        index
    }

    /// A reference type of `size` bytes including the header.
    pub fn add_class(&mut self, name: &str, size: u32) -> TypeIndex {
        self.add_type(TypeDescription {
            name: name.to_string(),
            size,
            ..TypeDescription::default()
        })
    }

    pub fn add_derived_class(&mut self, name: &str, size: u32, base: TypeIndex) -> TypeIndex {
        self.add_type(TypeDescription {
            name: name.to_string(),
            size,
            base_or_element_type: Some(base),
            ..TypeDescription::default()
        })
    }

    /// A value type whose unboxed data is `size` bytes.
    pub fn add_value_type(&mut self, name: &str, size: u32) -> TypeIndex {
        self.add_type(TypeDescription {
            name: name.to_string(),
            flags: TypeFlags::VALUE_TYPE,
            size,
            ..TypeDescription::default()
        })
    }

    pub fn add_string_type(&mut self) -> TypeIndex {
        self.add_class(crate::snapshot::types::STRING_TYPE_NAME, 0)
    }

    pub fn add_array_type(&mut self, name: &str, element: TypeIndex, rank: u32) -> TypeIndex {
        self.add_type(TypeDescription {
            name: name.to_string(),
            flags: TypeFlags::ARRAY,
            array_rank: rank,
            base_or_element_type: Some(element),
            ..TypeDescription::default()
        })
    }

    /// Declare an instance field; `offset` is measured from the data start.
    pub fn add_field(
        &mut self,
        owner: TypeIndex,
        name: &str,
        offset: u32,
        field_type: TypeIndex,
    ) -> FieldIndex {
        self.push_field(owner, name, offset, field_type, false)
    }

    /// Declare a static field, growing the owner's static storage to fit.
    pub fn add_static_field(
        &mut self,
        owner: TypeIndex,
        name: &str,
        offset: u32,
        field_type: TypeIndex,
    ) -> FieldIndex {
        let needed = (offset + self.vm.pointer_size) as usize;
        let statics = &mut self.types[owner.index()].static_field_bytes;
        if statics.len() < needed {
            statics.resize(needed, 0);
        }
        self.push_field(owner, name, offset, field_type, true)
    }

    fn push_field(
        &mut self,
        owner: TypeIndex,
        name: &str,
        offset: u32,
        field_type: TypeIndex,
        is_static: bool,
    ) -> FieldIndex {
        let index = FieldIndex::from_usize(self.fields.len());
        self.fields.push(FieldDescription {
            name: name.to_string(),
            offset,
            type_index: field_type,
            is_static,
        });
        self.types[owner.index()].fields.push(index);
        index
    }

    /// Store `value` in `owner`'s static storage at `offset`.
    pub fn write_static_pointer(&mut self, owner: TypeIndex, offset: u32, value: u64) {
        let width = self.vm.pointer_size as usize;
        let statics = &mut self.types[owner.index()].static_field_bytes;
        let start = offset as usize;
        if statics.len() < start + width {
            statics.resize(start + width, 0);
        }
        statics[start..start + width].copy_from_slice(&value.to_le_bytes()[..width]);
    }

    pub fn type_info_address(&self, ty: TypeIndex) -> u64 {
        self.types[ty.index()].type_info_address
    }

    /// Map `len` zeroed bytes of GC heap at `base`.
    pub fn add_section(&mut self, base: u64, len: usize) {
        self.add_section_of_kind(base, len, HeapSectionKind::GcHeap);
    }

    /// Map `len` zeroed bytes of runtime-owned memory at `base`.
    pub fn add_vm_section(&mut self, base: u64, len: usize) {
        self.add_section_of_kind(base, len, HeapSectionKind::VirtualMachine);
    }

    fn add_section_of_kind(&mut self, base: u64, len: usize, kind: HeapSectionKind) {
        self.sections.push(HeapSection::new(base, vec![0; len], kind));
    }

    fn bytes_at(&mut self, address: u64, len: usize) -> &mut [u8] {
        let section = self
            .sections
            .iter_mut()
            .find(|section| section.contains(address))
            .unwrap_or_else(|| panic!("address {address:#x} is not inside any section"));
        let start = (address - section.base) as usize;
        section
            .bytes
            .get_mut(start..start + len)
            .unwrap_or_else(|| panic!("write of {len} bytes at {address:#x} overruns its section"))
    }

    pub fn write_bytes(&mut self, address: u64, bytes: &[u8]) {
        self.bytes_at(address, bytes.len()).copy_from_slice(bytes);
    }

    /// Write a pointer-sized little-endian word.
    pub fn write_pointer(&mut self, address: u64, value: u64) {
        let width = self.vm.pointer_size as usize;
        self.write_bytes(address, &value.to_le_bytes()[..width]);
    }

    pub fn write_i32(&mut self, address: u64, value: i32) {
        self.write_bytes(address, &value.to_le_bytes());
    }

    /// Write an object header for `ty` at `address`.
    pub fn write_object(&mut self, address: u64, ty: TypeIndex) {
        let descriptor = self.type_info_address(ty);
        self.write_pointer(address, descriptor);
    }

    /// Write a string header and its character count.
    pub fn write_string(&mut self, address: u64, string_type: TypeIndex, length: i32) {
        self.write_object(address, string_type);
        let length_at = address + self.vm.object_header_size as u64;
        self.write_i32(length_at, length);
    }

    /// Write a single-dimension array header; returns the address of element 0.
    pub fn write_array(&mut self, address: u64, array_type: TypeIndex, length: u64) -> u64 {
        self.write_object(address, array_type);
        let length_at = address + self.vm.array_size_offset as u64;
        self.write_pointer(length_at, length);
        address + self.vm.array_header_size as u64
    }

    pub fn add_gc_handle(&mut self, target: u64) -> GcHandleIndex {
        self.gc_handles.push(target);
        GcHandleIndex::from_usize(self.gc_handles.len() - 1)
    }

    pub fn add_native_type(&mut self, name: &str, base: Option<NativeTypeIndex>) -> NativeTypeIndex {
        self.native_types.push(NativeType {
            name: name.to_string(),
            base_type: base,
        });
        NativeTypeIndex::from_usize(self.native_types.len() - 1)
    }

    pub fn add_native_object(
        &mut self,
        name: &str,
        native_type: NativeTypeIndex,
        address: u64,
    ) -> NativeObjectIndex {
        let index = NativeObjectIndex::from_usize(self.native_objects.len());
        self.native_objects.push(NativeObject {
            name: name.to_string(),
            instance_id: index.0 as i32 + 1,
            native_type,
            address,
            size: 0,
        });
        index
    }

    pub fn add_reported_connection(&mut self, from: SourceLocation, to: SourceLocation) {
        self.connections.push(ReportedConnection { from, to });
    }

    pub fn build(&self) -> CapturedSnapshot {
        CapturedSnapshot {
            vm: self.vm,
            heap: ManagedHeap::new(self.sections.clone()),
            types: TypeTable::new(self.types.clone(), self.fields.clone()),
            gc_handles: self.gc_handles.clone(),
            native_types: self.native_types.clone(),
            native_objects: NativeObjectTable::new(self.native_objects.clone()),
            connections: self.connections.clone(),
        }
    }
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::x64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors_are_distinct_and_resolvable() {
        let mut builder = SnapshotBuilder::x64();
        let a = builder.add_class("A", 16);
        let b = builder.add_class("B", 16);
        assert_ne!(builder.type_info_address(a), builder.type_info_address(b));

        let snapshot = builder.build();
        assert_eq!(
            snapshot.types.resolve_descriptor(builder.type_info_address(b)),
            Some(b)
        );
    }

    #[test]
    fn x86_pointers_are_four_bytes() {
        let mut builder = SnapshotBuilder::x86();
        builder.add_section(0x1000, 0x10);
        builder.write_pointer(0x1000, 0xdead_beef);
        builder.write_pointer(0x1004, 0x1234);

        let snapshot = builder.build();
        assert_eq!(snapshot.heap.read_pointer_at(0x1000, 4), Some(0xdead_beef));
        assert_eq!(snapshot.heap.read_pointer_at(0x1004, 4), Some(0x1234));
    }

    #[test]
    fn static_fields_grow_storage() {
        let mut builder = SnapshotBuilder::x64();
        let holder = builder.add_class("Holder", 16);
        builder.add_static_field(holder, "s_Value", 8, holder);
        builder.write_static_pointer(holder, 8, 0x4000);

        let snapshot = builder.build();
        let statics = &snapshot.types.get(holder).unwrap().static_field_bytes;
        assert_eq!(statics.len(), 16);
        assert_eq!(&statics[8..], &0x4000u64.to_le_bytes());
    }

    #[test]
    #[should_panic(expected = "not inside any section")]
    fn writing_outside_sections_panics() {
        let mut builder = SnapshotBuilder::x64();
        builder.add_section(0x1000, 0x10);
        builder.write_pointer(0x2000, 1);
    }
}
