//! Worklist traversal: resolving pointers and walking object contents.

use tracing::{debug, trace};

use crate::connections::Connection;
use crate::index::{ObjectIndex, TypeIndex};
use crate::objects::{ManagedObjectRecord, ObjectState};
use crate::parallel::ChunkPlan;
use crate::snapshot::HeapView;
use crate::source::SourceLocation;
use crate::worklist::CrawlTask;

use super::PhaseEnv;
use super::context::CrawlContext;
use super::resolve::{ArrayShape, ObjectShape, measure, resolve_header};
use super::scan::{
    ChunkSink, DataWindow, scan_fields, scan_reference_slots, scan_value_elements,
};

/// Totals of one [`CrawlContext::drain`].
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub(crate) struct DrainStats {
    pub popped: usize,
    pub resolved: usize,
}

impl CrawlContext {
    /// Pop tasks until the worklist is empty.
    pub(crate) fn drain(&mut self, env: &PhaseEnv<'_>) -> DrainStats {
        let mut stats = DrainStats::default();
        while let Some(task) = self.worklist.pop() {
            stats.popped += 1;
            if let Some(index) = self.visit(env, task) {
                self.resolve_object(env, index);
                stats.resolved += 1;
            }
        }
        stats
    }

    /// Record the edge `task` describes, registering its target if the
    /// address is new. Returns the target when its header still needs parsing.
    fn visit(&mut self, env: &PhaseEnv<'_>, task: CrawlTask) -> Option<ObjectIndex> {
        let types = &env.snapshot.types;
        if let Some(index) = self.map.find(task.address) {
            self.accept_edge(types, Connection::new(task.from, index, task.provenance));
            return self.objects[index].is_pending().then_some(index);
        }

        let Some(view) = env.snapshot.heap.find(task.address) else {
            self.diagnostics.unresolvable_pointers += 1;
            trace!(
                address = format_args!("{:#x}", task.address),
                from = %task.from,
                "pointer outside captured heap"
            );
            return None;
        };

        let index = self.register(task.address, view);
        self.accept_edge(types, Connection::new(task.from, index, task.provenance));
        Some(index)
    }

    /// Add a pending record for `address`.
    pub(crate) fn register(&mut self, address: u64, view: HeapView) -> ObjectIndex {
        let index = self
            .objects
            .push(ManagedObjectRecord::pending(address, view));
        let added = self.map.try_add(address, index);
        debug_assert!(added.is_some(), "address {address:#x} registered twice");
        index
    }

    /// Parse the header of a pending object, size it and walk its contents.
    fn resolve_object(&mut self, env: &PhaseEnv<'_>, index: ObjectIndex) {
        let snapshot = env.snapshot;
        let Some(view) = self.objects[index].data else {
            self.objects[index].state = ObjectState::InvalidType;
            return;
        };

        let Some(header) = resolve_header(&snapshot.heap, &snapshot.types, &snapshot.vm, view)
        else {
            self.objects[index].state = ObjectState::InvalidType;
            self.diagnostics.invalid_headers += 1;
            trace!(
                object = %index,
                address = format_args!("{:#x}", self.objects[index].address),
                "object header did not resolve to a type"
            );
            return;
        };

        let measured = measure(
            &snapshot.heap,
            &snapshot.types,
            &snapshot.vm,
            view,
            header.type_index,
        );
        if measured.clamped {
            self.diagnostics.impossible_lengths += 1;
            trace!(object = %index, "length clamped to zero");
        }

        let record = &mut self.objects[index];
        record.type_index = Some(header.type_index);
        record.type_info_address = header.type_info_address;
        record.size = measured.shape.size();
        record.state = ObjectState::Valid;

        match measured.shape {
            ObjectShape::String { .. } => {}
            ObjectShape::Fixed { size } => {
                self.walk_fields(env, index, header.type_index, view, size);
            }
            ObjectShape::Array {
                size,
                array: Some(array),
            } if array.length > 0 => {
                self.walk_array(env, index, view, size, array);
            }
            ObjectShape::Array { .. } => {}
        }
    }

    fn walk_fields(
        &mut self,
        env: &PhaseEnv<'_>,
        index: ObjectIndex,
        ty: TypeIndex,
        view: HeapView,
        size: u64,
    ) {
        let snapshot = env.snapshot;
        if self.instance_layouts.ensure(&snapshot.types, ty) == 0 {
            return;
        }
        let window = DataWindow::new(
            snapshot.heap.tail(view),
            snapshot.vm.object_header_size as u64,
            size,
        );
        scan_fields(
            &self.instance_layouts,
            ty,
            window,
            snapshot.vm.pointer_size,
            SourceLocation::ManagedObject(index),
            None,
            &mut self.worklist,
        );
    }

    fn walk_array(
        &mut self,
        env: &PhaseEnv<'_>,
        index: ObjectIndex,
        view: HeapView,
        size: u64,
        array: ArrayShape,
    ) {
        let snapshot = env.snapshot;
        let types = &snapshot.types;
        if !array.reference_elements
            && self.instance_layouts.ensure(types, array.element_type) == 0
        {
            // Elements hold no references (primitive or reference-free struct).
            return;
        }

        let pointer_size = snapshot.vm.pointer_size;
        let from = SourceLocation::ManagedObject(index);
        let window = DataWindow::new(
            snapshot.heap.tail(view),
            snapshot.vm.array_header_size as u64,
            size,
        );
        let length = usize::try_from(array.length).unwrap_or(usize::MAX);

        if length < env.config.parallel_array_threshold {
            if array.reference_elements {
                scan_reference_slots(window, 0..length, pointer_size, from, &mut self.worklist);
            } else {
                scan_value_elements(
                    &self.instance_layouts,
                    array.element_type,
                    array.element_size,
                    window,
                    0..length,
                    pointer_size,
                    from,
                    &mut self.worklist,
                );
            }
            return;
        }

        let plan = ChunkPlan::new(length, env.config.array_chunk_len);
        let known = &self.map;
        let layouts = &self.instance_layouts;
        let outputs = env.runner.run(plan, |range| {
            let mut sink = ChunkSink::new(known);
            if array.reference_elements {
                scan_reference_slots(window, range, pointer_size, from, &mut sink);
            } else {
                scan_value_elements(
                    layouts,
                    array.element_type,
                    array.element_size,
                    window,
                    range,
                    pointer_size,
                    from,
                    &mut sink,
                );
            }
            sink.output
        });
        let merged = self.absorb(types, outputs);
        debug!(
            object = %index,
            elements = length,
            chunks = merged.chunks,
            edges = merged.edges,
            tasks = merged.tasks,
            "scanned large array in chunks"
        );
    }
}
