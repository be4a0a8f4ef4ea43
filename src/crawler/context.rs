//! Mutable state of one crawl.

use tracing::warn;

use crate::address_map::AddressIndexMap;
use crate::config::CrawlConfig;
use crate::connections::{Connection, ConnectionIndexMaps, ConnectionLog};
use crate::field_layout::{FieldLayoutCache, LayoutKind};
use crate::index::{GcHandleIndex, ObjectIndex, TypeIndex};
use crate::managed_data::CrawlDiagnostics;
use crate::objects::ObjectTable;
use crate::parallel::{ChunkOutput, MergeSummary, merge_outputs};
use crate::snapshot::{CapturedSnapshot, TypeTable};
use crate::source::SourceKind;
use crate::worklist::CrawlWorklist;

use super::native_link::TypeNativeLinker;

/// A GC handle whose target an earlier handle already registered.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DuplicateRoot {
    pub handle: GcHandleIndex,
    pub address: u64,
}

/// Everything a crawl mutates, owned by the orchestrating thread and passed
/// by reference into each phase.
#[derive(Debug)]
pub struct CrawlContext {
    pub(crate) map: AddressIndexMap,
    pub(crate) objects: ObjectTable,
    pub(crate) connections: ConnectionLog,
    pub(crate) worklist: CrawlWorklist,
    pub(crate) duplicate_roots: Vec<DuplicateRoot>,
    pub(crate) gc_handle_targets: Vec<Option<ObjectIndex>>,
    pub(crate) instance_layouts: FieldLayoutCache,
    pub(crate) static_layouts: FieldLayoutCache,
    pub(crate) diagnostics: CrawlDiagnostics,
    pub(crate) linker: TypeNativeLinker,
    /// Memoized "is or derives from the shell base type", by type index
    pub(crate) shell_types: Vec<Option<bool>>,
    pub(crate) native_to_managed: Vec<Option<ObjectIndex>>,
    pub(crate) native_ref_counts: Vec<u32>,
    pub(crate) connection_index: ConnectionIndexMaps,
}

impl CrawlContext {
    pub(crate) fn new(snapshot: &CapturedSnapshot, config: &CrawlConfig) -> Self {
        let type_count = snapshot.types.len();
        let native_count = snapshot.native_objects.len();
        let expected_objects = snapshot.gc_handle_count().saturating_mul(2);

        Self {
            map: AddressIndexMap::with_capacity(expected_objects),
            objects: ObjectTable::with_capacity(expected_objects),
            connections: ConnectionLog::default(),
            worklist: CrawlWorklist::default(),
            duplicate_roots: Vec::new(),
            gc_handle_targets: vec![None; snapshot.gc_handle_count()],
            instance_layouts: FieldLayoutCache::new(
                LayoutKind::Instance,
                type_count,
                config.max_value_type_depth,
            ),
            static_layouts: FieldLayoutCache::new(
                LayoutKind::Static,
                type_count,
                config.max_value_type_depth,
            ),
            diagnostics: CrawlDiagnostics::default(),
            linker: TypeNativeLinker::new(type_count, snapshot.native_types.len()),
            shell_types: vec![None; type_count],
            native_to_managed: vec![None; native_count],
            native_ref_counts: vec![0; native_count],
            connection_index: ConnectionIndexMaps::default(),
        }
    }

    pub fn objects(&self) -> &ObjectTable {
        &self.objects
    }

    pub fn objects_by_address(&self) -> &AddressIndexMap {
        &self.map
    }

    pub fn connections(&self) -> &ConnectionLog {
        &self.connections
    }

    pub fn diagnostics(&self) -> &CrawlDiagnostics {
        &self.diagnostics
    }

    pub fn duplicate_roots(&self) -> &[DuplicateRoot] {
        &self.duplicate_roots
    }

    pub fn gc_handle_targets(&self) -> &[Option<ObjectIndex>] {
        &self.gc_handle_targets
    }

    /// Tasks waiting on the worklist.
    pub fn pending_tasks(&self) -> usize {
        self.worklist.len()
    }

    /// Append `connection` to the log unless its provenance contradicts its
    /// source.
    pub(crate) fn accept_edge(&mut self, types: &TypeTable, connection: Connection) -> bool {
        accept_edge(
            &mut self.connections,
            &mut self.diagnostics,
            &self.objects,
            types,
            connection,
        )
    }

    /// Merge chunk outputs in chunk order.
    pub(crate) fn absorb(&mut self, types: &TypeTable, outputs: Vec<ChunkOutput>) -> MergeSummary {
        let Self {
            worklist,
            connections,
            diagnostics,
            objects,
            ..
        } = self;
        merge_outputs(outputs, worklist, |edge| {
            accept_edge(connections, diagnostics, objects, types, edge);
        })
    }

    /// Whether `ty` is, or derives from, `shell_base`.
    pub(crate) fn is_shell_type(
        &mut self,
        types: &TypeTable,
        shell_base: TypeIndex,
        ty: TypeIndex,
    ) -> bool {
        let Some(slot) = self.shell_types.get_mut(ty.index()) else {
            return false;
        };
        *slot.get_or_insert_with(|| types.derives_from(ty, shell_base))
    }
}

fn accept_edge(
    connections: &mut ConnectionLog,
    diagnostics: &mut CrawlDiagnostics,
    objects: &ObjectTable,
    types: &TypeTable,
    connection: Connection,
) -> bool {
    if connection.from.is_none() {
        return false;
    }
    debug_assert!(
        objects.contains(connection.to),
        "edge to unregistered object {}",
        connection.to
    );

    let static_field = connection
        .provenance
        .field_index
        .and_then(|field| types.field(field))
        .is_some_and(|field| field.is_static);
    if static_field && connection.from.kind() != SourceKind::ManagedType {
        debug_assert!(
            false,
            "static field provenance on edge from {}",
            connection.from
        );
        diagnostics.inconsistent_edges += 1;
        warn!(
            from = %connection.from,
            to = %connection.to,
            "dropping edge with static field provenance"
        );
        return false;
    }

    connections.push(connection);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::Provenance;
    use crate::index::FieldIndex;
    use crate::objects::ManagedObjectRecord;
    use crate::snapshot::{FieldDescription, HeapView, TypeDescription};
    use crate::source::SourceLocation;

    fn types() -> TypeTable {
        TypeTable::new(
            vec![
                TypeDescription {
                    name: "UnityEngine.Object".into(),
                    fields: vec![FieldIndex(0)],
                    ..TypeDescription::default()
                },
                TypeDescription {
                    name: "Game.Enemy".into(),
                    base_or_element_type: Some(TypeIndex(0)),
                    ..TypeDescription::default()
                },
                TypeDescription {
                    name: "Game.Settings".into(),
                    ..TypeDescription::default()
                },
            ],
            vec![FieldDescription {
                name: "s_Instance".into(),
                offset: 0,
                type_index: TypeIndex(0),
                is_static: true,
            }],
        )
    }

    fn context() -> CrawlContext {
        let snapshot = CapturedSnapshot {
            types: types(),
            ..CapturedSnapshot::default()
        };
        let mut context = CrawlContext::new(&snapshot, &CrawlConfig::single_threaded());
        context.objects.push(ManagedObjectRecord::pending(
            0x1000,
            HeapView {
                section: 0,
                offset: 0,
            },
        ));
        context
    }

    #[test]
    fn edges_from_none_are_not_logged() {
        let types = types();
        let mut context = context();
        let edge = Connection::new(SourceLocation::None, ObjectIndex(0), Provenance::NONE);
        assert!(!context.accept_edge(&types, edge));
        assert!(context.connections.is_empty());
    }

    #[test]
    fn static_provenance_from_type_is_accepted() {
        let types = types();
        let mut context = context();
        let edge = Connection::new(
            SourceLocation::ManagedType(TypeIndex(0)),
            ObjectIndex(0),
            Provenance::field(FieldIndex(0)),
        );
        assert!(context.accept_edge(&types, edge));
        assert_eq!(context.connections.len(), 1);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "static field provenance")]
    fn static_provenance_from_object_fails_fast_in_debug() {
        let types = types();
        let mut context = context();
        context.accept_edge(
            &types,
            Connection::new(
                SourceLocation::ManagedObject(ObjectIndex(0)),
                ObjectIndex(0),
                Provenance::field(FieldIndex(0)),
            ),
        );
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn static_provenance_from_object_is_skipped_in_release() {
        let types = types();
        let mut context = context();
        let accepted = context.accept_edge(
            &types,
            Connection::new(
                SourceLocation::ManagedObject(ObjectIndex(0)),
                ObjectIndex(0),
                Provenance::field(FieldIndex(0)),
            ),
        );
        assert!(!accepted);
        assert_eq!(context.diagnostics.inconsistent_edges, 1);
        assert!(context.connections.is_empty());
    }

    #[test]
    fn shell_membership_is_memoized() {
        let types = types();
        let mut context = context();
        assert!(context.is_shell_type(&types, TypeIndex(0), TypeIndex(1)));
        assert!(!context.is_shell_type(&types, TypeIndex(0), TypeIndex(2)));
        assert_eq!(context.shell_types[1], Some(true));
        assert_eq!(context.shell_types[2], Some(false));
        assert!(!context.is_shell_type(&types, TypeIndex(0), TypeIndex(40)));
    }
}
