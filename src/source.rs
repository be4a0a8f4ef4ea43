//! Edge endpoints.

use crate::index::{
    GcHandleIndex, NativeAllocationIndex, NativeObjectIndex, NativeTypeIndex, ObjectIndex,
    TypeIndex,
};

/// Discriminant of a [`SourceLocation`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum SourceKind {
    None,
    ManagedObject,
    ManagedType,
    NativeObject,
    NativeType,
    NativeAllocation,
    GcHandle,
}

/// Where a value or an edge comes from.
///
/// A closed set of origins; consumers switch on it explicitly. It is also used
/// as a hash map key by the reverse connection indexes.
///
/// # Examples
///
/// ```
/// use heapcrawl::index::{ObjectIndex, TypeIndex};
/// use heapcrawl::source::{SourceKind, SourceLocation};
///
/// let from_object = SourceLocation::ManagedObject(ObjectIndex(3));
/// let from_statics = SourceLocation::ManagedType(TypeIndex(7));
///
/// assert_eq!(from_object.kind(), SourceKind::ManagedObject);
/// assert_eq!(from_statics.index(), Some(7));
/// assert!(SourceLocation::None.is_none());
/// ```
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum SourceLocation {
    #[default]
    None,
    ManagedObject(ObjectIndex),
    /// Static storage of a managed type
    ManagedType(TypeIndex),
    NativeObject(NativeObjectIndex),
    NativeType(NativeTypeIndex),
    NativeAllocation(NativeAllocationIndex),
    GcHandle(GcHandleIndex),
}

impl SourceLocation {
    pub fn kind(self) -> SourceKind {
        match self {
            SourceLocation::None => SourceKind::None,
            SourceLocation::ManagedObject(_) => SourceKind::ManagedObject,
            SourceLocation::ManagedType(_) => SourceKind::ManagedType,
            SourceLocation::NativeObject(_) => SourceKind::NativeObject,
            SourceLocation::NativeType(_) => SourceKind::NativeType,
            SourceLocation::NativeAllocation(_) => SourceKind::NativeAllocation,
            SourceLocation::GcHandle(_) => SourceKind::GcHandle,
        }
    }

    /// Table index carried by the location, `None` for [`SourceLocation::None`].
    pub fn index(self) -> Option<usize> {
        match self {
            SourceLocation::None => None,
            SourceLocation::ManagedObject(i) => Some(i.index()),
            SourceLocation::ManagedType(i) => Some(i.index()),
            SourceLocation::NativeObject(i) => Some(i.index()),
            SourceLocation::NativeType(i) => Some(i.index()),
            SourceLocation::NativeAllocation(i) => Some(i.index()),
            SourceLocation::GcHandle(i) => Some(i.index()),
        }
    }

    pub fn is_none(self) -> bool {
        matches!(self, SourceLocation::None)
    }

    pub fn as_managed_object(self) -> Option<ObjectIndex> {
        match self {
            SourceLocation::ManagedObject(i) => Some(i),
            _ => None,
        }
    }
}

impl From<ObjectIndex> for SourceLocation {
    fn from(index: ObjectIndex) -> Self {
        SourceLocation::ManagedObject(index)
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.index() {
            Some(index) => write!(f, "{:?}({})", self.kind(), index),
            None => write!(f, "None"),
        }
    }
}
