//! The crawl phases, in execution order.

use tracing::{debug, warn};

use crate::connections::{Connection, ConnectionIndexMaps, Provenance};
use crate::error::{CrawlError, CrawlResult};
use crate::index::{GcHandleIndex, NativeObjectIndex, ObjectIndex, TypeIndex};
use crate::parallel::ChunkPlan;
use crate::snapshot::heap::read_pointer;
use crate::source::SourceLocation;
use crate::worklist::CrawlTask;

use super::PhaseEnv;
use super::context::{CrawlContext, DuplicateRoot};
use super::scan::{ChunkSink, scan_static_roots};

/// Register every GC handle target and queue it for crawling.
///
/// A target an earlier handle already registered is set aside for
/// [`reconcile_duplicates`] instead of being queued again.
pub(crate) fn gather_roots(context: &mut CrawlContext, env: &PhaseEnv<'_>) -> CrawlResult<()> {
    let snapshot = env.snapshot;
    let mut null_handles = 0usize;

    for (handle, &address) in snapshot.gc_handles.iter().enumerate() {
        let handle = GcHandleIndex::from_usize(handle);
        if address == 0 {
            null_handles += 1;
            continue;
        }
        if context.map.contains(address) {
            context
                .duplicate_roots
                .push(DuplicateRoot { handle, address });
            context.diagnostics.duplicate_roots += 1;
            continue;
        }
        let Some(view) = snapshot.heap.find(address) else {
            context.diagnostics.unresolvable_pointers += 1;
            warn!(
                handle = %handle,
                address = format_args!("{address:#x}"),
                "GC handle target outside captured heap"
            );
            continue;
        };

        let index = context.register(address, view);
        context.gc_handle_targets[handle.index()] = Some(index);
        context.worklist.push(CrawlTask::new(
            address,
            SourceLocation::GcHandle(handle),
            Provenance::NONE,
        ));
    }

    debug!(
        handles = snapshot.gc_handle_count(),
        queued = context.worklist.len(),
        duplicates = context.duplicate_roots.len(),
        null_handles,
        "gathered GC roots"
    );
    Ok(())
}

/// Drain the worklist: everything reachable from the GC handles.
pub(crate) fn crawl_gc_handle_roots(
    context: &mut CrawlContext,
    env: &PhaseEnv<'_>,
) -> CrawlResult<()> {
    let stats = context.drain(env);
    debug!(
        popped = stats.popped,
        resolved = stats.resolved,
        peak_worklist = context.worklist.peak_len(),
        "crawled from GC handles"
    );
    Ok(())
}

/// Scan the static storage of every type that has some, in chunks.
pub(crate) fn crawl_static_fields(
    context: &mut CrawlContext,
    env: &PhaseEnv<'_>,
) -> CrawlResult<()> {
    let types = &env.snapshot.types;
    let roots: Vec<TypeIndex> = types
        .iter()
        .filter(|(_, description)| description.has_static_field_data())
        .map(|(index, _)| index)
        .collect();

    context.static_layouts.ensure_all(types, roots.iter().copied());
    let roots: Vec<TypeIndex> = roots
        .into_iter()
        .filter(|&ty| context.static_layouts.fields(ty).next().is_some())
        .collect();

    let plan = ChunkPlan::new(roots.len(), env.config.static_chunk_len);
    let pointer_size = env.snapshot.vm.pointer_size;
    let known = &context.map;
    let layouts = &context.static_layouts;
    let outputs = env.runner.run(plan, |range| {
        let mut sink = ChunkSink::new(known);
        scan_static_roots(types, layouts, &roots[range], pointer_size, &mut sink);
        sink.output
    });
    let merged = context.absorb(types, outputs);

    debug!(
        types_with_statics = roots.len(),
        chunks = merged.chunks,
        edges = merged.edges,
        tasks = merged.tasks,
        static_layout_entries = context.static_layouts.entry_count(),
        "scanned static fields"
    );
    Ok(())
}

/// Drain the worklist again: objects reachable only from static fields.
pub(crate) fn crawl_static_instance_roots(
    context: &mut CrawlContext,
    env: &PhaseEnv<'_>,
) -> CrawlResult<()> {
    let stats = context.drain(env);
    debug!(
        popped = stats.popped,
        resolved = stats.resolved,
        instance_layouts = context.instance_layouts.built_type_count(),
        "crawled from static fields"
    );
    Ok(())
}

/// Point every duplicate GC handle at the record its address resolved to,
/// in the order the duplicates were found.
pub(crate) fn reconcile_duplicates(
    context: &mut CrawlContext,
    env: &PhaseEnv<'_>,
) -> CrawlResult<()> {
    let types = &env.snapshot.types;
    let duplicates = std::mem::take(&mut context.duplicate_roots);

    for duplicate in &duplicates {
        let canonical = context.map.find(duplicate.address).ok_or_else(|| {
            CrawlError::InternalInconsistency(format!(
                "duplicate root {} lost its target {:#x}",
                duplicate.handle, duplicate.address
            ))
        })?;
        context.gc_handle_targets[duplicate.handle.index()] = Some(canonical);
        context.accept_edge(
            types,
            Connection::new(
                SourceLocation::GcHandle(duplicate.handle),
                canonical,
                Provenance::NONE,
            ),
        );
    }

    debug!(reconciled = duplicates.len(), "reconciled duplicate roots");
    context.duplicate_roots = duplicates;
    Ok(())
}

/// Follow the cached native pointer of every shell object.
pub(crate) fn connect_native_objects(
    context: &mut CrawlContext,
    env: &PhaseEnv<'_>,
) -> CrawlResult<()> {
    if !env.config.link_native_objects {
        debug!("native object linking disabled");
        return Ok(());
    }
    let snapshot = env.snapshot;
    let types = &snapshot.types;
    let native = &env.config.native;

    let Some(shell_base) = types.find_by_name(&native.shell_base_type_name) else {
        debug!(
            shell_base = native.shell_base_type_name.as_str(),
            "no shell base type in capture"
        );
        return Ok(());
    };
    let Some(cached_pointer) = types
        .find_instance_field(shell_base, &native.cached_pointer_field_name)
        .and_then(|field| types.field(field))
    else {
        warn!(
            shell_base = native.shell_base_type_name.as_str(),
            field = native.cached_pointer_field_name.as_str(),
            "shell base type has no cached pointer field"
        );
        return Ok(());
    };

    let pointer_size = snapshot.vm.pointer_size;
    let field_offset = snapshot.vm.object_header_size as u64 + cached_pointer.offset as u64;
    let mut linked = 0usize;

    for position in 0..context.objects.len() {
        let index = ObjectIndex::from_usize(position);
        let record = &context.objects[index];
        let (Some(ty), Some(view), true) = (record.type_index, record.data, record.is_valid())
        else {
            continue;
        };
        let size = record.size;
        if !context.is_shell_type(types, shell_base, ty) {
            continue;
        }

        let address = if field_offset + pointer_size as u64 <= size {
            read_pointer(snapshot.heap.tail(view), field_offset, pointer_size).unwrap_or(0)
        } else {
            0
        };
        if address == 0 {
            context.diagnostics.leaked_shells += 1;
            continue;
        }
        let Some(native_index) = snapshot.native_objects.find_by_address(address) else {
            context.diagnostics.unresolved_native_pointers += 1;
            continue;
        };

        link_pair(context, env, index, ty, native_index);
        linked += 1;
    }

    debug!(
        linked,
        leaked = context.diagnostics.leaked_shells,
        unresolved = context.diagnostics.unresolved_native_pointers,
        "connected native objects"
    );
    Ok(())
}

fn link_pair(
    context: &mut CrawlContext,
    env: &PhaseEnv<'_>,
    managed: ObjectIndex,
    managed_type: TypeIndex,
    native: NativeObjectIndex,
) {
    let snapshot = env.snapshot;
    context.objects[managed].native_object_index = Some(native);
    if let Some(slot) = context.native_to_managed.get_mut(native.index()) {
        slot.get_or_insert(managed);
    }
    context.accept_edge(
        &snapshot.types,
        Connection::new(SourceLocation::NativeObject(native), managed, Provenance::NONE),
    );

    if let Some(native_object) = snapshot.native_objects.get(native) {
        context.linker.link(
            &snapshot.types,
            &snapshot.native_types,
            managed_type,
            native_object.native_type,
        );
    }
}

/// Match shell types no live instance linked to native types by name.
pub(crate) fn connect_remaining_types(
    context: &mut CrawlContext,
    env: &PhaseEnv<'_>,
) -> CrawlResult<()> {
    if !env.config.link_native_objects {
        return Ok(());
    }
    let snapshot = env.snapshot;
    let types = &snapshot.types;
    let Some(shell_base) = types.find_by_name(&env.config.native.shell_base_type_name) else {
        return Ok(());
    };

    let mut candidates = Vec::new();
    for (ty, description) in types.iter() {
        if description.is_array() || context.linker.native_for(ty).is_some() {
            continue;
        }
        if context.is_shell_type(types, shell_base, ty) {
            candidates.push(ty);
        }
    }

    let unlinked = candidates.len();
    let matched = context
        .linker
        .connect_by_name(types, &snapshot.native_types, candidates);
    debug!(unlinked, matched, "connected remaining shell types by name");
    Ok(())
}

/// Count the capture's reported references arriving at each object.
pub(crate) fn compute_ref_counts(
    context: &mut CrawlContext,
    env: &PhaseEnv<'_>,
) -> CrawlResult<()> {
    let mut counted = 0usize;
    for reported in &env.snapshot.connections {
        let counter = match reported.to {
            SourceLocation::ManagedObject(index) => context
                .objects
                .get_mut(index)
                .map(|record| &mut record.ref_count),
            SourceLocation::GcHandle(handle) => {
                match context.gc_handle_targets.get(handle.index()).copied().flatten() {
                    Some(index) => context
                        .objects
                        .get_mut(index)
                        .map(|record| &mut record.ref_count),
                    None => None,
                }
            }
            SourceLocation::NativeObject(native) => {
                context.native_ref_counts.get_mut(native.index())
            }
            _ => None,
        };
        if let Some(counter) = counter {
            *counter += 1;
            counted += 1;
        }
    }

    debug!(
        reported = env.snapshot.connections.len(),
        counted, "computed reference counts"
    );
    Ok(())
}

/// Verify the address map and build the reverse connection indexes.
pub(crate) fn build_connection_index_maps(
    context: &mut CrawlContext,
    _env: &PhaseEnv<'_>,
) -> CrawlResult<()> {
    context.map.check_integrity()?;
    if context.map.len() != context.objects.len() {
        return Err(CrawlError::AddressMapCorrupted(format!(
            "{} addresses indexed for {} objects",
            context.map.len(),
            context.objects.len()
        )));
    }
    debug_assert!(
        context
            .connections
            .iter()
            .all(|connection| context.objects.contains(connection.to)),
        "connection to an unregistered object"
    );

    context.connection_index = ConnectionIndexMaps::build(&context.connections);
    debug!(
        sources = context.connection_index.source_count(),
        targets = context.connection_index.target_count(),
        "built connection index maps"
    );
    Ok(())
}
