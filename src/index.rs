//! Strongly typed indices into the snapshot and crawl tables.
//!
//! Every table in the crate is an arena addressed by a dense `u32` index.
//! Wrapping each index kind in its own type keeps a type index from being
//! used where an object index is expected.

macro_rules! define_index {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
        pub struct $name(pub u32);

        impl $name {
            #[inline]
            pub const fn new(index: u32) -> Self {
                Self(index)
            }

            /// Build from a `usize` position in the owning table.
            ///
            /// Tables never exceed `u32::MAX` entries; larger positions are a
            /// bookkeeping fault.
            #[inline]
            pub fn from_usize(index: usize) -> Self {
                debug_assert!(index <= u32::MAX as usize, "index {index} overflows u32");
                Self(index as u32)
            }

            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_index!(
    /// Position of a record in the [`ObjectTable`](crate::objects::ObjectTable).
    ObjectIndex
);
define_index!(
    /// Position of a managed type in the [`TypeTable`](crate::snapshot::TypeTable).
    TypeIndex
);
define_index!(
    /// Position of a field in the snapshot's global field table.
    FieldIndex
);
define_index!(
    /// Position of a native object in the snapshot.
    NativeObjectIndex
);
define_index!(
    /// Position of a native type in the snapshot.
    NativeTypeIndex
);
define_index!(
    /// Position of a native allocation in the snapshot.
    NativeAllocationIndex
);
define_index!(
    /// Position of a GC handle in the snapshot's root list.
    GcHandleIndex
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_round_trip_through_usize() {
        let index = ObjectIndex::from_usize(42);
        assert_eq!(index.index(), 42);
        assert_eq!(index, ObjectIndex::new(42));
        assert_eq!(index.to_string(), "42");
    }

    #[test]
    fn indices_order_by_value() {
        assert!(TypeIndex(1) < TypeIndex(2));
        assert_eq!(TypeIndex::default(), TypeIndex(0));
    }
}
