//! The crawl orchestrator.
//!
//! A crawl is a fixed sequence of phases driven one at a time by
//! [`Crawler::step`], so callers can report progress between phases. Phases
//! cannot be interrupted part way; abandoning a crawl is only possible at a
//! phase boundary.
//!
//! The traversal phases are single-threaded: resolving a pointer may register
//! a new object, and registration is what deduplicates the graph. Only scans
//! whose extent is known up front (static storage, large arrays) are split
//! into chunks that run on the worker pool against a read-only view of the
//! address map.

mod context;
mod native_link;
mod phases;
mod resolve;
mod scan;
mod walk;


use std::time::Instant;

use tracing::info;

use crate::config::CrawlConfig;
use crate::error::{CrawlError, CrawlResult};
use crate::managed_data::{ManagedData, NativeLinks};
use crate::parallel::ChunkRunner;
use crate::snapshot::CapturedSnapshot;

pub use context::{CrawlContext, DuplicateRoot};
pub use native_link::TypeNativeLinker;

/// Crawl phases in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CrawlPhase {
    /// Register GC handle targets, setting duplicates aside
    GatherRoots,
    /// Crawl everything reachable from the GC handles
    CrawlGcHandleRoots,
    /// Scan static storage of every type that has some
    CrawlStaticFields,
    /// Crawl objects reachable only from static storage
    CrawlStaticInstanceRoots,
    /// Resolve duplicate GC handles to their shared record
    ReconcileDuplicates,
    /// Link shell objects to the native objects they wrap
    ConnectNativeObjects,
    /// Match unlinked shell types to native types by name
    ConnectRemainingTypes,
    /// Count reported references per target
    ComputeRefCounts,
    /// Build reverse connection indexes
    BuildConnectionIndexMaps,
    /// Nothing left to run
    Finished,
}

impl CrawlPhase {
    /// Every phase that does work, in order.
    pub const ALL: [CrawlPhase; 9] = [
        CrawlPhase::GatherRoots,
        CrawlPhase::CrawlGcHandleRoots,
        CrawlPhase::CrawlStaticFields,
        CrawlPhase::CrawlStaticInstanceRoots,
        CrawlPhase::ReconcileDuplicates,
        CrawlPhase::ConnectNativeObjects,
        CrawlPhase::ConnectRemainingTypes,
        CrawlPhase::ComputeRefCounts,
        CrawlPhase::BuildConnectionIndexMaps,
    ];

    /// The phase that follows this one.
    pub fn next(self) -> CrawlPhase {
        match self {
            CrawlPhase::GatherRoots => CrawlPhase::CrawlGcHandleRoots,
            CrawlPhase::CrawlGcHandleRoots => CrawlPhase::CrawlStaticFields,
            CrawlPhase::CrawlStaticFields => CrawlPhase::CrawlStaticInstanceRoots,
            CrawlPhase::CrawlStaticInstanceRoots => CrawlPhase::ReconcileDuplicates,
            CrawlPhase::ReconcileDuplicates => CrawlPhase::ConnectNativeObjects,
            CrawlPhase::ConnectNativeObjects => CrawlPhase::ConnectRemainingTypes,
            CrawlPhase::ConnectRemainingTypes => CrawlPhase::ComputeRefCounts,
            CrawlPhase::ComputeRefCounts => CrawlPhase::BuildConnectionIndexMaps,
            CrawlPhase::BuildConnectionIndexMaps | CrawlPhase::Finished => CrawlPhase::Finished,
        }
    }
}

/// Read-only inputs shared by every phase.
pub(crate) struct PhaseEnv<'a> {
    pub snapshot: &'a CapturedSnapshot,
    pub config: &'a CrawlConfig,
    pub runner: &'a ChunkRunner,
}

/// Steppable crawl over one snapshot.
///
/// # Examples
///
/// ```
/// use heapcrawl::config::CrawlConfig;
/// use heapcrawl::crawler::{CrawlPhase, Crawler};
/// use heapcrawl::test_utils::SnapshotBuilder;
///
/// let mut builder = SnapshotBuilder::x64();
/// let node = builder.add_class("Node", 32);
/// let next = builder.add_field(node, "next", 0, node);
/// builder.add_section(0x1000, 0x1000);
/// builder.write_object(0x1000, node);
/// builder.write_object(0x1100, node);
/// builder.write_pointer(0x1000 + 16, 0x1100);
/// builder.add_gc_handle(0x1000);
/// let snapshot = builder.build();
///
/// let mut crawler = Crawler::new(&snapshot, CrawlConfig::single_threaded()).unwrap();
/// assert_eq!(crawler.step().unwrap(), CrawlPhase::GatherRoots);
/// assert_eq!(crawler.phase(), CrawlPhase::CrawlGcHandleRoots);
/// while !crawler.is_finished() {
///     crawler.step().unwrap();
/// }
///
/// let data = crawler.finish().unwrap();
/// assert_eq!(data.objects.len(), 2);
/// let edge = data.connections.iter().last().unwrap();
/// assert_eq!(edge.provenance.field_index, Some(next));
/// ```
#[derive(Debug)]
pub struct Crawler<'s> {
    snapshot: &'s CapturedSnapshot,
    config: CrawlConfig,
    runner: ChunkRunner,
    context: CrawlContext,
    phase: CrawlPhase,
}

impl<'s> Crawler<'s> {
    pub fn new(snapshot: &'s CapturedSnapshot, config: CrawlConfig) -> CrawlResult<Self> {
        config.validate()?;
        snapshot.validate()?;
        let runner = ChunkRunner::new(&config)?;
        let context = CrawlContext::new(snapshot, &config);

        info!(
            sections = snapshot.heap.sections().len(),
            types = snapshot.types.len(),
            gc_handles = snapshot.gc_handle_count(),
            workers = runner.workers(),
            "starting heap crawl"
        );

        Ok(Self {
            snapshot,
            config,
            runner,
            context,
            phase: CrawlPhase::GatherRoots,
        })
    }

    /// The phase the next [`step`](Self::step) will run.
    pub fn phase(&self) -> CrawlPhase {
        self.phase
    }

    pub fn is_finished(&self) -> bool {
        self.phase == CrawlPhase::Finished
    }

    /// Crawl state so far.
    pub fn context(&self) -> &CrawlContext {
        &self.context
    }

    /// Run the current phase to completion and return it.
    ///
    /// Stepping a finished crawl does nothing and returns
    /// [`CrawlPhase::Finished`].
    pub fn step(&mut self) -> CrawlResult<CrawlPhase> {
        let phase = self.phase;
        if phase == CrawlPhase::Finished {
            return Ok(phase);
        }

        let started = Instant::now();
        let env = PhaseEnv {
            snapshot: self.snapshot,
            config: &self.config,
            runner: &self.runner,
        };
        let context = &mut self.context;
        match phase {
            CrawlPhase::GatherRoots => phases::gather_roots(context, &env)?,
            CrawlPhase::CrawlGcHandleRoots => phases::crawl_gc_handle_roots(context, &env)?,
            CrawlPhase::CrawlStaticFields => phases::crawl_static_fields(context, &env)?,
            CrawlPhase::CrawlStaticInstanceRoots => {
                phases::crawl_static_instance_roots(context, &env)?
            }
            CrawlPhase::ReconcileDuplicates => phases::reconcile_duplicates(context, &env)?,
            CrawlPhase::ConnectNativeObjects => phases::connect_native_objects(context, &env)?,
            CrawlPhase::ConnectRemainingTypes => phases::connect_remaining_types(context, &env)?,
            CrawlPhase::ComputeRefCounts => phases::compute_ref_counts(context, &env)?,
            CrawlPhase::BuildConnectionIndexMaps => {
                phases::build_connection_index_maps(context, &env)?
            }
            CrawlPhase::Finished => {}
        }

        info!(
            phase = ?phase,
            elapsed_us = started.elapsed().as_micros() as u64,
            objects = self.context.objects.len(),
            connections = self.context.connections.len(),
            "crawl phase complete"
        );
        self.phase = phase.next();
        Ok(phase)
    }

    /// Run every remaining phase and return the result.
    pub fn run(mut self) -> CrawlResult<ManagedData> {
        while !self.is_finished() {
            self.step()?;
        }
        self.finish()
    }

    /// Take the result of a finished crawl.
    pub fn finish(self) -> CrawlResult<ManagedData> {
        if !self.is_finished() {
            return Err(CrawlError::PhaseOrder {
                expected: CrawlPhase::Finished,
                found: self.phase,
            });
        }

        let context = self.context;
        let (managed_type_to_native, native_type_to_managed_base) = context.linker.into_maps();
        let mut data = ManagedData {
            objects: context.objects,
            objects_by_address: context.map,
            connections: context.connections,
            connection_index: context.connection_index,
            gc_handle_targets: context.gc_handle_targets,
            native_links: NativeLinks {
                native_to_managed: context.native_to_managed,
                native_ref_counts: context.native_ref_counts,
                managed_type_to_native,
                native_type_to_managed_base,
            },
            diagnostics: context.diagnostics,
            ..ManagedData::default()
        };
        data.compute_memory_usage(&self.snapshot.heap);

        info!(
            objects = data.objects.len(),
            connections = data.connections.len(),
            managed_bytes = data.managed_object_memory_usage,
            active_heap_bytes = data.active_heap_memory_usage,
            empty_heap_bytes = data.active_heap_empty_space,
            diagnostics = ?data.diagnostics,
            "heap crawl complete"
        );
        Ok(data)
    }
}

/// Crawl `snapshot` from start to finish.
///
/// # Examples
///
/// ```
/// use heapcrawl::config::CrawlConfig;
/// use heapcrawl::test_utils::SnapshotBuilder;
///
/// let mut builder = SnapshotBuilder::x64();
/// let leaf = builder.add_class("Leaf", 24);
/// builder.add_section(0x1000, 0x100);
/// builder.write_object(0x1000, leaf);
/// builder.add_gc_handle(0x1000);
/// builder.add_gc_handle(0x9999);
///
/// let data = heapcrawl::crawl(&builder.build(), CrawlConfig::single_threaded()).unwrap();
/// assert_eq!(data.objects.len(), 1);
/// assert_eq!(data.diagnostics.unresolvable_pointers, 1);
/// ```
pub fn crawl(snapshot: &CapturedSnapshot, config: CrawlConfig) -> CrawlResult<ManagedData> {
    Crawler::new(snapshot, config)?.run()
}
