//! Managed type to native type association.

use rustc_hash::FxHashMap;

use crate::index::{NativeTypeIndex, TypeIndex};
use crate::snapshot::{NativeType, TypeTable, strip_namespace};

/// Builds the managed-type/native-type maps from linked shell instances.
///
/// The capture only says which native object a shell instance wraps. From a
/// concrete pair the linker walks the managed base chain, assigning each
/// visited managed type the native type it mirrors. A native cursor follows
/// along: when a managed type's unqualified name equals the cursor's name it
/// is taken as that native type's managed base and the cursor moves to the
/// native base type. The name match is a heuristic; types whose unqualified
/// names collide can be mis-linked.
///
/// # Examples
///
/// ```
/// use heapcrawl::crawler::TypeNativeLinker;
/// use heapcrawl::index::{NativeTypeIndex, TypeIndex};
/// use heapcrawl::snapshot::{NativeType, TypeDescription, TypeTable};
///
/// let managed = TypeTable::new(
///     vec![
///         TypeDescription { name: "UnityEngine.Object".into(), ..TypeDescription::default() },
///         TypeDescription {
///             name: "UnityEngine.Texture".into(),
///             base_or_element_type: Some(TypeIndex(0)),
///             ..TypeDescription::default()
///         },
///         TypeDescription {
///             name: "Game.Atlas".into(),
///             base_or_element_type: Some(TypeIndex(1)),
///             ..TypeDescription::default()
///         },
///     ],
///     Vec::new(),
/// );
/// let native = vec![
///     NativeType { name: "Object".into(), base_type: None },
///     NativeType { name: "Texture".into(), base_type: Some(NativeTypeIndex(0)) },
/// ];
///
/// let mut linker = TypeNativeLinker::new(managed.len(), native.len());
/// linker.link(&managed, &native, TypeIndex(2), NativeTypeIndex(1));
///
/// assert_eq!(linker.native_for(TypeIndex(2)), Some(NativeTypeIndex(1)));
/// assert_eq!(linker.managed_base_for(NativeTypeIndex(1)), Some(TypeIndex(1)));
/// assert_eq!(linker.managed_base_for(NativeTypeIndex(0)), Some(TypeIndex(0)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct TypeNativeLinker {
    managed_to_native: Vec<Option<NativeTypeIndex>>,
    native_to_managed_base: Vec<Option<TypeIndex>>,
    seen_native: Vec<bool>,
}

impl TypeNativeLinker {
    pub fn new(managed_type_count: usize, native_type_count: usize) -> Self {
        Self {
            managed_to_native: vec![None; managed_type_count],
            native_to_managed_base: vec![None; native_type_count],
            seen_native: vec![false; native_type_count],
        }
    }

    pub fn native_for(&self, managed: TypeIndex) -> Option<NativeTypeIndex> {
        self.managed_to_native.get(managed.index()).copied().flatten()
    }

    pub fn managed_base_for(&self, native: NativeTypeIndex) -> Option<TypeIndex> {
        self.native_to_managed_base
            .get(native.index())
            .copied()
            .flatten()
    }

    /// Whether a linked instance of `native` has been seen.
    pub fn has_seen(&self, native: NativeTypeIndex) -> bool {
        self.seen_native.get(native.index()).copied().unwrap_or(false)
    }

    /// Record that instances of `managed` wrap natives of type `native`.
    ///
    /// Returns how many managed types were newly mapped.
    pub fn link(
        &mut self,
        types: &TypeTable,
        native_types: &[NativeType],
        managed: TypeIndex,
        native: NativeTypeIndex,
    ) -> usize {
        let Some(seen) = self.seen_native.get_mut(native.index()) else {
            return 0;
        };
        *seen = true;

        let mut cursor = Some(native);
        let mut mapped = 0;
        for ty in types.base_chain(managed) {
            let Some(slot) = self.managed_to_native.get_mut(ty.index()) else {
                break;
            };
            if slot.is_some() {
                break;
            }
            let Some(current) = cursor else {
                break;
            };
            *slot = Some(current);
            mapped += 1;

            let Some(current_type) = native_types.get(current.index()) else {
                break;
            };
            let Some(managed_type) = types.get(ty) else {
                break;
            };
            if strip_namespace(&managed_type.name) == current_type.name {
                let base = &mut self.native_to_managed_base[current.index()];
                if base.is_none() {
                    *base = Some(ty);
                }
                cursor = current_type.base_type;
            }
        }
        mapped
    }

    /// Name-based fallback for shell types no linked instance reached.
    ///
    /// Each candidate still lacking a native type is matched by unqualified
    /// name against the native types; when several native types share a
    /// name the lowest index wins. Returns how many candidates matched.
    pub fn connect_by_name(
        &mut self,
        types: &TypeTable,
        native_types: &[NativeType],
        candidates: impl IntoIterator<Item = TypeIndex>,
    ) -> usize {
        let mut by_name: FxHashMap<&str, NativeTypeIndex> = FxHashMap::default();
        for (index, native) in native_types.iter().enumerate() {
            by_name
                .entry(strip_namespace(&native.name))
                .or_insert(NativeTypeIndex::from_usize(index));
        }

        let mut matched = 0;
        for ty in candidates {
            if self.native_for(ty).is_some() {
                continue;
            }
            let Some(description) = types.get(ty) else {
                continue;
            };
            if let Some(&native) = by_name.get(strip_namespace(&description.name)) {
                self.link(types, native_types, ty, native);
                matched += 1;
            }
        }
        matched
    }

    pub fn into_maps(self) -> (Vec<Option<NativeTypeIndex>>, Vec<Option<TypeIndex>>) {
        (self.managed_to_native, self.native_to_managed_base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::TypeDescription;

    /// Object <- Component <- Behaviour <- MonoBehaviour <- Game.Player
    /// plus an unrelated Game.Camera deriving from Behaviour.
    fn managed() -> TypeTable {
        let names = [
            "UnityEngine.Object",
            "UnityEngine.Component",
            "UnityEngine.Behaviour",
            "UnityEngine.MonoBehaviour",
            "Game.Player",
            "Game.Camera",
        ];
        let bases = [None, Some(0), Some(1), Some(2), Some(3), Some(2)];
        TypeTable::new(
            names
                .iter()
                .zip(bases)
                .map(|(name, base)| TypeDescription {
                    name: name.to_string(),
                    base_or_element_type: base.map(TypeIndex),
                    ..TypeDescription::default()
                })
                .collect(),
            Vec::new(),
        )
    }

    fn native() -> Vec<NativeType> {
        vec![
            NativeType {
                name: "Object".into(),
                base_type: None,
            },
            NativeType {
                name: "Component".into(),
                base_type: Some(NativeTypeIndex(0)),
            },
            NativeType {
                name: "Behaviour".into(),
                base_type: Some(NativeTypeIndex(1)),
            },
            NativeType {
                name: "MonoBehaviour".into(),
                base_type: Some(NativeTypeIndex(2)),
            },
            NativeType {
                name: "Camera".into(),
                base_type: Some(NativeTypeIndex(2)),
            },
        ]
    }

    #[test]
    fn link_walks_chain_with_native_cursor() {
        let types = managed();
        let natives = native();
        let mut linker = TypeNativeLinker::new(types.len(), natives.len());

        assert_eq!(linker.link(&types, &natives, TypeIndex(4), NativeTypeIndex(3)), 5);
        assert_eq!(linker.native_for(TypeIndex(4)), Some(NativeTypeIndex(3)));
        assert_eq!(linker.native_for(TypeIndex(3)), Some(NativeTypeIndex(3)));
        assert_eq!(linker.native_for(TypeIndex(2)), Some(NativeTypeIndex(2)));
        assert_eq!(linker.native_for(TypeIndex(0)), Some(NativeTypeIndex(0)));
        for native in 0..4 {
            assert_eq!(
                linker.managed_base_for(NativeTypeIndex(native)),
                Some(TypeIndex(native))
            );
        }
        assert!(linker.has_seen(NativeTypeIndex(3)));
        assert!(!linker.has_seen(NativeTypeIndex(0)));
    }

    #[test]
    fn link_stops_at_already_mapped_type() {
        let types = managed();
        let natives = native();
        let mut linker = TypeNativeLinker::new(types.len(), natives.len());
        linker.link(&types, &natives, TypeIndex(4), NativeTypeIndex(3));

        // Camera maps itself, then hits the already mapped Behaviour.
        assert_eq!(linker.link(&types, &natives, TypeIndex(5), NativeTypeIndex(4)), 1);
        assert_eq!(linker.managed_base_for(NativeTypeIndex(4)), Some(TypeIndex(5)));
        assert_eq!(linker.link(&types, &natives, TypeIndex(5), NativeTypeIndex(4)), 0);
    }

    #[test]
    fn connect_by_name_only_fills_unmapped_types() {
        let types = managed();
        let natives = native();
        let mut linker = TypeNativeLinker::new(types.len(), natives.len());

        let matched = linker.connect_by_name(&types, &natives, [TypeIndex(5), TypeIndex(4)]);
        // Game.Player has no native namesake.
        assert_eq!(matched, 1);
        assert_eq!(linker.native_for(TypeIndex(5)), Some(NativeTypeIndex(4)));
        assert_eq!(linker.native_for(TypeIndex(4)), None);
    }

    #[test]
    fn out_of_range_native_is_ignored() {
        let types = managed();
        let mut linker = TypeNativeLinker::new(types.len(), 0);
        assert_eq!(linker.link(&types, &[], TypeIndex(4), NativeTypeIndex(0)), 0);
        let (managed_to_native, native_to_base) = linker.into_maps();
        assert!(managed_to_native.iter().all(Option::is_none));
        assert!(native_to_base.is_empty());
    }
}
