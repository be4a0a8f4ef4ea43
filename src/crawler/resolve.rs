//! Object header parsing and size computation.

use crate::index::TypeIndex;
use crate::snapshot::{HeapView, ManagedHeap, TypeTable, VmInfo};

/// What an object header resolved to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedHeader {
    pub type_index: TypeIndex,
    /// Descriptor address the type was found under
    pub type_info_address: u64,
}

/// Resolve the type of the object at `view`.
///
/// The first pointer-sized word is the descriptor address. When it is not a
/// known descriptor it may point at a structure whose first word is, so one
/// indirection is attempted before giving up.
pub(crate) fn resolve_header(
    heap: &ManagedHeap,
    types: &TypeTable,
    vm: &VmInfo,
    view: HeapView,
) -> Option<ResolvedHeader> {
    let word = heap.read_pointer(view, 0, vm.pointer_size)?;
    if word == 0 {
        return None;
    }
    if let Some(type_index) = types.resolve_descriptor(word) {
        return Some(ResolvedHeader {
            type_index,
            type_info_address: word,
        });
    }

    let forwarded = heap.read_pointer_at(word, vm.pointer_size)?;
    let type_index = types.resolve_descriptor(forwarded)?;
    Some(ResolvedHeader {
        type_index,
        type_info_address: forwarded,
    })
}

/// How the contents of an array are laid out.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct ArrayShape {
    pub element_type: TypeIndex,
    pub length: u64,
    pub element_size: u64,
    pub reference_elements: bool,
}

/// Size and shape of a resolved object.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum ObjectShape {
    String { size: u64 },
    Array { size: u64, array: Option<ArrayShape> },
    Fixed { size: u64 },
}

impl ObjectShape {
    pub(crate) fn size(&self) -> u64 {
        match *self {
            ObjectShape::String { size }
            | ObjectShape::Array { size, .. }
            | ObjectShape::Fixed { size } => size,
        }
    }
}

/// Result of [`measure`]: the shape plus whether a length had to be clamped.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Measured {
    pub shape: ObjectShape,
    pub clamped: bool,
}

/// Compute the byte size of the object at `view`, whose type is `ty`.
///
/// Strings and arrays read their length from the object; a length that is
/// negative or would run past the end of the section is clamped to zero.
pub(crate) fn measure(
    heap: &ManagedHeap,
    types: &TypeTable,
    vm: &VmInfo,
    view: HeapView,
    ty: TypeIndex,
) -> Measured {
    let available = heap.remaining(view);
    if types.is_string(ty) {
        return measure_string(heap, vm, view, available);
    }

    let Some(description) = types.get(ty) else {
        return Measured {
            shape: ObjectShape::Fixed { size: 0 },
            clamped: false,
        };
    };
    if description.is_array() {
        return measure_array(heap, types, vm, view, ty, available);
    }

    let mut size = description.size as u64;
    if description.is_value_type() {
        // Boxed: header followed by the unboxed value.
        size += vm.object_header_size as u64;
    }
    Measured {
        shape: ObjectShape::Fixed {
            size: size.min(available),
        },
        clamped: false,
    }
}

fn measure_string(heap: &ManagedHeap, vm: &VmInfo, view: HeapView, available: u64) -> Measured {
    let header = vm.object_header_size as u64;
    let empty = (header + 4 + 2).min(available);
    let Some(length) = heap.read_i32(view, header) else {
        return Measured {
            shape: ObjectShape::String { size: empty },
            clamped: true,
        };
    };

    let size = u64::try_from(length)
        .ok()
        .map(|length| header + 4 + 2 * length + 2)
        .filter(|&size| size <= available);
    match size {
        Some(size) => Measured {
            shape: ObjectShape::String { size },
            clamped: false,
        },
        None => Measured {
            shape: ObjectShape::String { size: empty },
            clamped: true,
        },
    }
}

fn measure_array(
    heap: &ManagedHeap,
    types: &TypeTable,
    vm: &VmInfo,
    view: HeapView,
    ty: TypeIndex,
    available: u64,
) -> Measured {
    let header = vm.array_header_size as u64;
    let empty = Measured {
        shape: ObjectShape::Array {
            size: header.min(available),
            array: None,
        },
        clamped: false,
    };
    let Some(description) = types.get(ty) else {
        return empty;
    };
    let Some((element_type, element)) = description
        .element_type()
        .and_then(|element_type| Some((element_type, types.get(element_type)?)))
    else {
        return empty;
    };

    let reference_elements = !element.is_value_type();
    let element_size = if reference_elements {
        vm.pointer_bytes()
    } else {
        element.size as u64
    };
    let rank = description.array_rank.max(1) as u64;
    let bounds_size = if rank > 1 {
        rank * 2 * vm.pointer_bytes()
    } else {
        0
    };

    let length = read_array_length(heap, vm, view, rank);
    let size = length.and_then(|length| {
        length
            .checked_mul(element_size)?
            .checked_add(header)?
            .checked_add(bounds_size)
            .filter(|&size| size <= available)
            .map(|size| (length, size))
    });

    let (length, size, clamped) = match size {
        Some((length, size)) => (length, size, false),
        None => (0, (header + bounds_size).min(available), true),
    };
    Measured {
        shape: ObjectShape::Array {
            size,
            array: Some(ArrayShape {
                element_type,
                length,
                element_size,
                reference_elements,
            }),
        },
        clamped,
    }
}

/// Element count of the array at `view`, or `None` if it cannot be read.
fn read_array_length(heap: &ManagedHeap, vm: &VmInfo, view: HeapView, rank: u64) -> Option<u64> {
    let bounds = heap.read_pointer(view, vm.array_bounds_offset as u64, vm.pointer_size)?;
    if bounds == 0 {
        return heap.read_pointer(view, vm.array_size_offset as u64, vm.pointer_size);
    }

    // Each dimension is a (length, lower bound) pair of pointer-sized words.
    let stride = 2 * vm.pointer_bytes();
    (0..rank).try_fold(1u64, |total, dimension| {
        let entry = bounds.checked_add(dimension * stride)?;
        let length = heap.read_pointer_at(entry, vm.pointer_size)?;
        total.checked_mul(length)
    })
}
