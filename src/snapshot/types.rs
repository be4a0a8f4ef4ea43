//! Managed type and field descriptors.

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use crate::index::{FieldIndex, TypeIndex};

bitflags! {
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TypeFlags: u8 {
        const VALUE_TYPE = 0b0001;
        const ARRAY = 0b0010;
    }
}

pub const STRING_TYPE_NAME: &str = "System.String";
pub const OBJECT_TYPE_NAME: &str = "System.Object";
pub const VALUE_TYPE_NAME: &str = "System.ValueType";

/// One field of a managed type.
///
/// Instance offsets are relative to the first byte after the object header,
/// value-type offsets to the start of the value's data and static offsets to
/// the type's static storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    pub name: String,
    pub offset: u32,
    /// Declared type of the field
    pub type_index: TypeIndex,
    pub is_static: bool,
}

/// A managed type as reported by the capture.
#[derive(Debug, Clone, Default)]
pub struct TypeDescription {
    pub name: String,
    pub assembly: String,
    pub flags: TypeFlags,
    pub array_rank: u32,
    /// Base type for classes and value types, element type for arrays
    pub base_or_element_type: Option<TypeIndex>,
    /// Instance size including the header for reference types, unboxed size for value types
    pub size: u32,
    /// Runtime descriptor address stored in object headers
    pub type_info_address: u64,
    pub static_field_bytes: Vec<u8>,
    pub fields: Vec<FieldIndex>,
}

impl TypeDescription {
    #[inline]
    pub fn is_value_type(&self) -> bool {
        self.flags.contains(TypeFlags::VALUE_TYPE)
    }

    #[inline]
    pub fn is_array(&self) -> bool {
        self.flags.contains(TypeFlags::ARRAY)
    }

    #[inline]
    pub fn has_static_field_data(&self) -> bool {
        !self.static_field_bytes.is_empty()
    }

    /// Element type of an array type.
    pub fn element_type(&self) -> Option<TypeIndex> {
        if self.is_array() {
            self.base_or_element_type
        } else {
            None
        }
    }

    /// Base type of a non-array type.
    pub fn base_type(&self) -> Option<TypeIndex> {
        if self.is_array() {
            None
        } else {
            self.base_or_element_type
        }
    }
}

/// Well-known types located by name when the table is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KnownTypes {
    pub string: Option<TypeIndex>,
    pub object: Option<TypeIndex>,
    pub value_type: Option<TypeIndex>,
}

/// Every managed type and field in the capture plus descriptor resolution.
///
/// # Examples
///
/// ```
/// use heapcrawl::index::TypeIndex;
/// use heapcrawl::snapshot::{TypeDescription, TypeTable};
///
/// let types = vec![
///     TypeDescription {
///         name: "System.Object".to_string(),
///         type_info_address: 0xf000,
///         ..TypeDescription::default()
///     },
///     TypeDescription {
///         name: "System.String".to_string(),
///         base_or_element_type: Some(TypeIndex(0)),
///         type_info_address: 0xf100,
///         ..TypeDescription::default()
///     },
/// ];
/// let table = TypeTable::new(types, Vec::new());
///
/// assert_eq!(table.resolve_descriptor(0xf100), Some(TypeIndex(1)));
/// assert_eq!(table.known().string, Some(TypeIndex(1)));
/// assert!(table.derives_from(TypeIndex(1), TypeIndex(0)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    types: Vec<TypeDescription>,
    fields: Vec<FieldDescription>,
    by_descriptor: FxHashMap<u64, TypeIndex>,
    known: KnownTypes,
}

impl TypeTable {
    pub fn new(types: Vec<TypeDescription>, fields: Vec<FieldDescription>) -> Self {
        let mut by_descriptor = FxHashMap::default();
        by_descriptor.reserve(types.len());
        let mut known = KnownTypes::default();

        for (index, ty) in types.iter().enumerate() {
            let type_index = TypeIndex::from_usize(index);
            if ty.type_info_address != 0 {
                by_descriptor.entry(ty.type_info_address).or_insert(type_index);
            }
            match ty.name.as_str() {
                STRING_TYPE_NAME => known.string = known.string.or(Some(type_index)),
                OBJECT_TYPE_NAME => known.object = known.object.or(Some(type_index)),
                VALUE_TYPE_NAME => known.value_type = known.value_type.or(Some(type_index)),
                _ => {}
            }
        }

        Self {
            types,
            fields,
            by_descriptor,
            known,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    #[inline]
    pub fn get(&self, index: TypeIndex) -> Option<&TypeDescription> {
        self.types.get(index.index())
    }

    #[inline]
    pub fn field(&self, index: FieldIndex) -> Option<&FieldDescription> {
        self.fields.get(index.index())
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TypeIndex, &TypeDescription)> + '_ {
        self.types
            .iter()
            .enumerate()
            .map(|(index, ty)| (TypeIndex::from_usize(index), ty))
    }

    pub fn known(&self) -> KnownTypes {
        self.known
    }

    /// Map a runtime type descriptor address to its type.
    #[inline]
    pub fn resolve_descriptor(&self, address: u64) -> Option<TypeIndex> {
        self.by_descriptor.get(&address).copied()
    }

    pub fn find_by_name(&self, name: &str) -> Option<TypeIndex> {
        self.types
            .iter()
            .position(|ty| ty.name == name)
            .map(TypeIndex::from_usize)
    }

    #[inline]
    pub fn is_string(&self, index: TypeIndex) -> bool {
        self.known.string == Some(index)
    }

    /// `index` followed by each of its base types.
    ///
    /// Stops after visiting as many types as the table holds, so a cyclic
    /// base chain in a corrupt capture still terminates.
    pub fn base_chain(&self, index: TypeIndex) -> BaseChain<'_> {
        BaseChain {
            table: self,
            next: Some(index),
            remaining: self.types.len(),
        }
    }

    pub fn derives_from(&self, index: TypeIndex, base: TypeIndex) -> bool {
        self.base_chain(index).any(|candidate| candidate == base)
    }

    /// Search `index` and its bases for an instance field named `name`.
    pub fn find_instance_field(&self, index: TypeIndex, name: &str) -> Option<FieldIndex> {
        self.base_chain(index).find_map(|ty| {
            self.get(ty)?.fields.iter().copied().find(|&field| {
                self.field(field)
                    .is_some_and(|f| !f.is_static && f.name == name)
            })
        })
    }
}

/// Iterator returned by [`TypeTable::base_chain`].
pub struct BaseChain<'a> {
    table: &'a TypeTable,
    next: Option<TypeIndex>,
    remaining: usize,
}

impl Iterator for BaseChain<'_> {
    type Item = TypeIndex;

    fn next(&mut self) -> Option<TypeIndex> {
        if self.remaining == 0 {
            return None;
        }
        let current = self.next?;
        let ty = self.table.get(current)?;
        self.remaining -= 1;
        self.next = ty.base_type();
        Some(current)
    }
}

/// Drop the namespace from a qualified type name.
///
/// ```
/// use heapcrawl::snapshot::strip_namespace;
///
/// assert_eq!(strip_namespace("UnityEngine.MonoBehaviour"), "MonoBehaviour");
/// assert_eq!(strip_namespace("Texture2D"), "Texture2D");
/// ```
pub fn strip_namespace(name: &str) -> &str {
    name.rsplit_once('.').map_or(name, |(_, short)| short)
}
