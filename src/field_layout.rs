//! Per-type cache of reference-bearing fields.
//!
//! Crawling a heap with millions of objects but only thousands of types means
//! the same layouts are consulted over and over. Each type's layout is
//! flattened once: its own reference fields, those inherited from base types,
//! and every reference nested inside embedded value-type fields. Entries are
//! sorted by offset and stored diff-encoded, so a scan walks an object by
//! adding deltas to a cursor.
//!
//! Entries for one type form a contiguous run inside a shared backing vector
//! addressed by a per-type start index, avoiding an allocation per type.

use itertools::izip;

use crate::connections::Provenance;
use crate::index::{FieldIndex, TypeIndex};
use crate::snapshot::{FieldDescription, TypeTable};

const UNBUILT: u32 = u32::MAX;
const NO_FIELDS: u32 = u32::MAX - 1;

/// Which set of fields a cache describes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LayoutKind {
    /// Non-static fields, offsets relative to the instance data
    Instance,
    /// Static fields, offsets relative to the type's static storage
    Static,
}

/// One reference-bearing field in a flattened layout.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FieldLayoutEntry {
    /// Entries left in this type's run, counting this one
    pub remaining_fields: u32,
    /// Type declaring the reference field
    pub owner_type: TypeIndex,
    /// Distance from the previous entry's offset (from the data start for the first)
    pub offset_delta: u32,
    /// Reference field on `owner_type`
    pub field_index: FieldIndex,
    /// Outermost value-type field the reference is nested in
    pub nested_in_field: Option<FieldIndex>,
    /// Offset from the data start to the data of `owner_type` when nested
    pub nested_offset: u32,
}

impl FieldLayoutEntry {
    /// Edge provenance for a reference found through this entry.
    pub fn provenance(&self) -> Provenance {
        match self.nested_in_field {
            None => Provenance::field(self.field_index),
            Some(outer) => Provenance {
                field_index: Some(outer),
                value_type_owner: Some(self.owner_type),
                value_type_field_index: Some(self.field_index),
                offset_within_value_type: self.nested_offset,
                array_index: None,
            },
        }
    }
}

/// An entry being collected, before sorting and diff-encoding.
#[derive(Debug, Copy, Clone)]
struct Collected {
    offset: u32,
    owner_type: TypeIndex,
    field_index: FieldIndex,
    nested_in_field: Option<FieldIndex>,
    nested_offset: u32,
}

/// Lazily built flattened layouts for one [`LayoutKind`].
///
/// # Examples
///
/// ```
/// use heapcrawl::field_layout::{FieldLayoutCache, LayoutKind};
/// use heapcrawl::index::{FieldIndex, TypeIndex};
/// use heapcrawl::snapshot::{FieldDescription, TypeDescription, TypeTable};
///
/// let fields = vec![
///     FieldDescription { name: "count".into(), offset: 0, type_index: TypeIndex(1), is_static: false },
///     FieldDescription { name: "next".into(), offset: 8, type_index: TypeIndex(0), is_static: false },
/// ];
/// let node = TypeDescription {
///     name: "Node".into(),
///     size: 32,
///     fields: vec![FieldIndex(0), FieldIndex(1)],
///     ..TypeDescription::default()
/// };
/// let int = TypeDescription {
///     name: "System.Int64".into(),
///     flags: heapcrawl::snapshot::TypeFlags::VALUE_TYPE,
///     size: 8,
///     ..TypeDescription::default()
/// };
/// let types = TypeTable::new(vec![node, int], fields);
///
/// let mut cache = FieldLayoutCache::new(LayoutKind::Instance, types.len(), 32);
/// assert_eq!(cache.ensure(&types, TypeIndex(0)), 1);
///
/// let laid_out: Vec<_> = cache.fields(TypeIndex(0)).map(|(offset, entry)| (offset, entry.field_index)).collect();
/// assert_eq!(laid_out, vec![(8, FieldIndex(1))]);
/// ```
#[derive(Debug, Clone)]
pub struct FieldLayoutCache {
    kind: LayoutKind,
    max_depth: usize,
    type_starts: Vec<u32>,
    entries: Vec<FieldLayoutEntry>,
    built_types: usize,
}

impl FieldLayoutCache {
    pub fn new(kind: LayoutKind, type_count: usize, max_depth: usize) -> Self {
        Self {
            kind,
            max_depth,
            type_starts: vec![UNBUILT; type_count],
            entries: Vec::new(),
            built_types: 0,
        }
    }

    pub fn kind(&self) -> LayoutKind {
        self.kind
    }

    pub fn is_built(&self, ty: TypeIndex) -> bool {
        self.type_starts
            .get(ty.index())
            .is_some_and(|&start| start != UNBUILT)
    }

    /// Types whose layout has been computed.
    pub fn built_type_count(&self) -> usize {
        self.built_types
    }

    /// Total entries across all built layouts.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Build the layout for `ty` if needed; returns its entry count.
    pub fn ensure(&mut self, types: &TypeTable, ty: TypeIndex) -> usize {
        let Some(&start) = self.type_starts.get(ty.index()) else {
            return 0;
        };
        if start != UNBUILT {
            return self.run(start).len();
        }

        let mut collector = LayoutCollector::new(types, self.max_depth);
        match self.kind {
            LayoutKind::Instance => collector.collect_instance(ty, Placement::TOP),
            LayoutKind::Static => collector.collect_static(ty),
        }
        let mut collected = collector.out;
        collected.sort_by_key(|entry| (entry.offset, entry.field_index));

        self.built_types += 1;
        if collected.is_empty() {
            self.type_starts[ty.index()] = NO_FIELDS;
            return 0;
        }

        let start = self.entries.len();
        let total = collected.len();
        let previous_offsets = std::iter::once(0).chain(collected.iter().map(|entry| entry.offset));
        self.entries.extend(
            izip!(collected.iter(), previous_offsets, (1..=total).rev()).map(
                |(entry, previous, remaining)| FieldLayoutEntry {
                    remaining_fields: remaining as u32,
                    owner_type: entry.owner_type,
                    offset_delta: entry.offset - previous,
                    field_index: entry.field_index,
                    nested_in_field: entry.nested_in_field,
                    nested_offset: entry.nested_offset,
                },
            ),
        );
        self.type_starts[ty.index()] = start as u32;
        total
    }

    /// Build layouts for every type in `tys`.
    pub fn ensure_all(&mut self, types: &TypeTable, tys: impl IntoIterator<Item = TypeIndex>) {
        for ty in tys {
            self.ensure(types, ty);
        }
    }

    fn run(&self, start: u32) -> &[FieldLayoutEntry] {
        if start == NO_FIELDS || start == UNBUILT {
            return &[];
        }
        let start = start as usize;
        match self.entries.get(start) {
            Some(first) => &self.entries[start..start + first.remaining_fields as usize],
            None => &[],
        }
    }

    /// Reference fields of `ty` as `(offset from data start, entry)` pairs in
    /// ascending offset order. Empty for a type that has not been built.
    pub fn fields(&self, ty: TypeIndex) -> LayoutFields<'_> {
        let start = self.type_starts.get(ty.index()).copied().unwrap_or(UNBUILT);
        debug_assert!(start != UNBUILT, "layout for type {ty} read before it was built");
        LayoutFields {
            entries: self.run(start),
            cursor: 0,
        }
    }
}

/// Iterator decoding a diff-encoded layout run.
pub struct LayoutFields<'a> {
    entries: &'a [FieldLayoutEntry],
    cursor: u64,
}

impl<'a> Iterator for LayoutFields<'a> {
    type Item = (u64, &'a FieldLayoutEntry);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let (entry, rest) = self.entries.split_first()?;
        self.entries = rest;
        self.cursor += entry.offset_delta as u64;
        Some((self.cursor, entry))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.entries.len(), Some(self.entries.len()))
    }
}

impl ExactSizeIterator for LayoutFields<'_> {}

/// Flattens one type's layout. `path` holds the value types currently being
/// expanded so mutually nested value types in a malformed capture terminate.
struct LayoutCollector<'a> {
    types: &'a TypeTable,
    max_depth: usize,
    path: Vec<TypeIndex>,
    out: Vec<Collected>,
}

impl<'a> LayoutCollector<'a> {
    fn new(types: &'a TypeTable, max_depth: usize) -> Self {
        Self {
            types,
            max_depth,
            path: Vec::new(),
            out: Vec::new(),
        }
    }

    fn collect_static(&mut self, ty: TypeIndex) {
        let types = self.types;
        let Some(description) = types.get(ty) else {
            return;
        };
        self.path.push(ty);
        for &field in &description.fields {
            let Some(field_description) = types.field(field) else {
                continue;
            };
            if field_description.is_static {
                self.collect_field(ty, field, field_description, Placement::TOP);
            }
        }
        self.path.pop();
    }

    /// Instance fields of `ty` and its bases, placed at `at.base_offset`.
    fn collect_instance(&mut self, ty: TypeIndex, at: Placement) {
        let types = self.types;
        self.path.push(ty);
        for owner in types.base_chain(ty) {
            let Some(description) = types.get(owner) else {
                continue;
            };
            for &field in &description.fields {
                let Some(field_description) = types.field(field) else {
                    continue;
                };
                if field_description.is_static {
                    continue;
                }
                self.collect_field(owner, field, field_description, at);
            }
        }
        self.path.pop();
    }

    fn collect_field(
        &mut self,
        owner: TypeIndex,
        field: FieldIndex,
        description: &FieldDescription,
        at: Placement,
    ) {
        let types = self.types;
        let Some(declared) = types.get(description.type_index) else {
            return;
        };
        if at.limit.is_some_and(|limit| description.offset >= limit) {
            return;
        }
        let Some(offset) = at.base_offset.checked_add(description.offset) else {
            return;
        };

        if declared.is_value_type() {
            // Primitives declare an instance field of their own type.
            if self.path.contains(&description.type_index) || at.depth + 1 >= self.max_depth {
                return;
            }
            self.collect_instance(
                description.type_index,
                Placement {
                    base_offset: offset,
                    nested_in: at.nested_in.or(Some(field)),
                    depth: at.depth + 1,
                    limit: Some(declared.size).filter(|&size| size > 0),
                },
            );
            return;
        }

        self.out.push(Collected {
            offset,
            owner_type: owner,
            field_index: field,
            nested_in_field: at.nested_in,
            nested_offset: if at.nested_in.is_some() { at.base_offset } else { 0 },
        });
    }
}

/// Where the fields being collected sit inside the outermost type.
#[derive(Debug, Copy, Clone)]
struct Placement {
    base_offset: u32,
    nested_in: Option<FieldIndex>,
    depth: usize,
    /// Declared size of the enclosing value type, when known
    limit: Option<u32>,
}

impl Placement {
    const TOP: Placement = Placement {
        base_offset: 0,
        nested_in: None,
        depth: 0,
        limit: None,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{TypeDescription, TypeFlags};

    /// 0: Object, 1: Int32 (primitive, self-referencing field), 2: Pair struct
    /// {Int32 a @0, Object ref @8}, 3: Holder class {Object first @8,
    /// Pair pair @16, Object last @0}, 4: Derived : Holder {Object extra @40},
    /// 5: Outer struct {Pair inner @8}, 6: statics {static Object s @16,
    /// static Pair sp @0, Object instance @0}
    fn table() -> TypeTable {
        let f = |name: &str, offset: u32, ty: u32, is_static: bool| FieldDescription {
            name: name.to_string(),
            offset,
            type_index: TypeIndex(ty),
            is_static,
        };
        let fields = vec![
            f("m_value", 0, 1, false), // 0 on Int32
            f("a", 0, 1, false),       // 1 on Pair
            f("ref", 8, 0, false),     // 2 on Pair
            f("first", 8, 0, false),   // 3 on Holder
            f("pair", 16, 2, false),   // 4 on Holder
            f("last", 0, 0, false),    // 5 on Holder
            f("extra", 40, 0, false),  // 6 on Derived
            f("inner", 8, 2, false),   // 7 on Outer
            f("s", 16, 0, true),       // 8 on Statics
            f("sp", 0, 2, true),       // 9 on Statics
            f("instance", 0, 0, false), // 10 on Statics
        ];
        let value = TypeFlags::VALUE_TYPE;
        let ty = |name: &str, flags: TypeFlags, base: Option<u32>, fields: Vec<u32>| {
            TypeDescription {
                name: name.to_string(),
                flags,
                base_or_element_type: base.map(TypeIndex),
                fields: fields.into_iter().map(FieldIndex).collect(),
                ..TypeDescription::default()
            }
        };
        let types = vec![
            ty("System.Object", TypeFlags::empty(), None, vec![]),
            ty("System.Int32", value, None, vec![0]),
            ty("Pair", value, None, vec![1, 2]),
            ty("Holder", TypeFlags::empty(), Some(0), vec![3, 4, 5]),
            ty("Derived", TypeFlags::empty(), Some(3), vec![6]),
            ty("Outer", value, None, vec![7]),
            ty("Statics", TypeFlags::empty(), Some(0), vec![8, 9, 10]),
        ];
        TypeTable::new(types, fields)
    }

    fn decoded(cache: &FieldLayoutCache, ty: u32) -> Vec<(u64, FieldIndex, Option<FieldIndex>)> {
        cache
            .fields(TypeIndex(ty))
            .map(|(offset, entry)| (offset, entry.field_index, entry.nested_in_field))
            .collect()
    }

    #[test]
    fn direct_and_nested_fields_sorted_by_offset() {
        let types = table();
        let mut cache = FieldLayoutCache::new(LayoutKind::Instance, types.len(), 32);
        assert_eq!(cache.ensure(&types, TypeIndex(3)), 3);
        assert_eq!(
            decoded(&cache, 3),
            vec![
                (0, FieldIndex(5), None),
                (8, FieldIndex(3), None),
                (24, FieldIndex(2), Some(FieldIndex(4))),
            ]
        );
    }

    #[test]
    fn offsets_are_diff_encoded() {
        let types = table();
        let mut cache = FieldLayoutCache::new(LayoutKind::Instance, types.len(), 32);
        cache.ensure(&types, TypeIndex(3));
        let deltas: Vec<_> = cache
            .fields(TypeIndex(3))
            .map(|(_, entry)| entry.offset_delta)
            .collect();
        assert_eq!(deltas, vec![0, 8, 16]);
        let remaining: Vec<_> = cache
            .fields(TypeIndex(3))
            .map(|(_, entry)| entry.remaining_fields)
            .collect();
        assert_eq!(remaining, vec![3, 2, 1]);
    }

    #[test]
    fn inherited_fields_are_included() {
        let types = table();
        let mut cache = FieldLayoutCache::new(LayoutKind::Instance, types.len(), 32);
        assert_eq!(cache.ensure(&types, TypeIndex(4)), 4);
        let offsets: Vec<_> = decoded(&cache, 4).into_iter().map(|(o, ..)| o).collect();
        assert_eq!(offsets, vec![0, 8, 24, 40]);
    }

    #[test]
    fn doubly_nested_value_types_keep_outer_field() {
        let types = table();
        let mut cache = FieldLayoutCache::new(LayoutKind::Instance, types.len(), 32);
        cache.ensure(&types, TypeIndex(5));
        let (offset, entry) = cache.fields(TypeIndex(5)).next().unwrap();
        assert_eq!(offset, 16);
        assert_eq!(entry.nested_in_field, Some(FieldIndex(7)));
        assert_eq!(entry.owner_type, TypeIndex(2));
        assert_eq!(entry.nested_offset, 8);

        let provenance = entry.provenance();
        assert_eq!(provenance.field_index, Some(FieldIndex(7)));
        assert_eq!(provenance.value_type_field_index, Some(FieldIndex(2)));
        assert_eq!(provenance.value_type_owner, Some(TypeIndex(2)));
    }

    #[test]
    fn primitive_self_reference_terminates() {
        let types = table();
        let mut cache = FieldLayoutCache::new(LayoutKind::Instance, types.len(), 32);
        assert_eq!(cache.ensure(&types, TypeIndex(1)), 0);
        assert!(cache.is_built(TypeIndex(1)));
        assert_eq!(cache.fields(TypeIndex(1)).count(), 0);
    }

    #[test]
    fn depth_limit_cuts_nesting() {
        let types = table();
        let mut cache = FieldLayoutCache::new(LayoutKind::Instance, types.len(), 2);
        // Pair's reference is one level below Outer; Pair's Int32 would be two.
        cache.ensure(&types, TypeIndex(5));
        assert_eq!(cache.fields(TypeIndex(5)).count(), 1);

        let mut shallow = FieldLayoutCache::new(LayoutKind::Instance, types.len(), 1);
        shallow.ensure(&types, TypeIndex(3));
        let fields: Vec<_> = shallow.fields(TypeIndex(3)).map(|(o, _)| o).collect();
        assert_eq!(fields, vec![0, 8]);
    }

    #[test]
    fn static_and_instance_layouts_are_separate() {
        let types = table();
        let mut statics = FieldLayoutCache::new(LayoutKind::Static, types.len(), 32);
        let mut instances = FieldLayoutCache::new(LayoutKind::Instance, types.len(), 32);

        assert_eq!(statics.ensure(&types, TypeIndex(6)), 2);
        assert_eq!(
            decoded(&statics, 6),
            vec![
                (8, FieldIndex(2), Some(FieldIndex(9))),
                (16, FieldIndex(8), None),
            ]
        );
        assert_eq!(instances.ensure(&types, TypeIndex(6)), 1);
        assert_eq!(decoded(&instances, 6), vec![(0, FieldIndex(10), None)]);
    }

    #[test]
    fn layouts_are_built_once() {
        let types = table();
        let mut cache = FieldLayoutCache::new(LayoutKind::Instance, types.len(), 32);
        cache.ensure(&types, TypeIndex(3));
        let entries = cache.entry_count();
        cache.ensure(&types, TypeIndex(3));
        assert_eq!(cache.entry_count(), entries);
        assert_eq!(cache.built_type_count(), 1);
    }

    /// 0: Leaf class, 1: A struct {B x @0, B y @8, Leaf r @16},
    /// 2: B struct {A x @0, A y @8, Leaf r @16}, 3: C class {A a @0},
    /// 4: Small struct of 8 bytes {Leaf inside @0, Leaf past @8}, 5: D class {Small s @0}
    fn mutually_nested_table() -> TypeTable {
        let f = |name: &str, offset: u32, ty: u32| FieldDescription {
            name: name.to_string(),
            offset,
            type_index: TypeIndex(ty),
            is_static: false,
        };
        let fields = vec![
            f("x", 0, 2),      // 0 on A
            f("y", 8, 2),      // 1 on A
            f("r", 16, 0),     // 2 on A
            f("x", 0, 1),      // 3 on B
            f("y", 8, 1),      // 4 on B
            f("r", 16, 0),     // 5 on B
            f("a", 0, 1),      // 6 on C
            f("inside", 0, 0), // 7 on Small
            f("past", 8, 0),   // 8 on Small
            f("s", 0, 4),      // 9 on D
        ];
        let ty = |name: &str, flags: TypeFlags, size: u32, fields: Vec<u32>| TypeDescription {
            name: name.to_string(),
            flags,
            size,
            fields: fields.into_iter().map(FieldIndex).collect(),
            ..TypeDescription::default()
        };
        let value = TypeFlags::VALUE_TYPE;
        let types = vec![
            ty("Leaf", TypeFlags::empty(), 16, vec![]),
            ty("A", value, 24, vec![0, 1, 2]),
            ty("B", value, 24, vec![3, 4, 5]),
            ty("C", TypeFlags::empty(), 24, vec![6]),
            ty("Small", value, 8, vec![7, 8]),
            ty("D", TypeFlags::empty(), 24, vec![9]),
        ];
        TypeTable::new(types, fields)
    }

    #[test]
    fn mutually_nested_value_types_stay_bounded() {
        let types = mutually_nested_table();
        let mut cache = FieldLayoutCache::new(LayoutKind::Instance, types.len(), 32);

        // C.a -> A {x: B {r}, y: B {r}, r}; B's own A fields are already being expanded.
        assert_eq!(cache.ensure(&types, TypeIndex(3)), 3);
        let offsets: Vec<_> = decoded(&cache, 3).into_iter().map(|(o, ..)| o).collect();
        assert_eq!(offsets, vec![16, 16, 24]);
        assert!(decoded(&cache, 3)
            .iter()
            .all(|&(_, _, nested)| nested == Some(FieldIndex(6))));
    }

    #[test]
    fn nested_fields_past_value_type_size_are_skipped() {
        let types = mutually_nested_table();
        let mut cache = FieldLayoutCache::new(LayoutKind::Instance, types.len(), 32);
        assert_eq!(cache.ensure(&types, TypeIndex(5)), 1);
        assert_eq!(decoded(&cache, 5), vec![(0, FieldIndex(7), Some(FieldIndex(9)))]);
    }

    #[test]
    fn unknown_type_is_ignored() {
        let types = table();
        let mut cache = FieldLayoutCache::new(LayoutKind::Instance, types.len(), 32);
        assert_eq!(cache.ensure(&types, TypeIndex(99)), 0);
    }
}
