//! Chunked data-parallel scanning.
//!
//! Work whose size is known up front (the elements of a large array, the
//! types that own static storage) is split into fixed-size chunks. Each chunk
//! runs as a pure function over read-only inputs and returns an owned
//! [`ChunkOutput`]; nothing shared is mutated while chunks run. The
//! orchestrating thread then merges every output into the connection log and
//! worklist in chunk order, so results are identical whatever the thread
//! count.

use std::ops::Range;

use rayon::prelude::*;

use crate::address_map::AddressIndexMap;
use crate::config::CrawlConfig;
use crate::connections::Connection;
use crate::error::{CrawlError, CrawlResult};
use crate::worklist::{CrawlTask, CrawlWorklist};

/// Partition of `0..total` into ranges of at most `chunk_len`.
///
/// # Examples
///
/// ```
/// use heapcrawl::parallel::ChunkPlan;
///
/// let plan = ChunkPlan::new(10, 4);
/// assert_eq!(plan.chunk_count(), 3);
/// assert_eq!(plan.ranges().collect::<Vec<_>>(), vec![0..4, 4..8, 8..10]);
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    total: usize,
    chunk_len: usize,
}

impl ChunkPlan {
    pub fn new(total: usize, chunk_len: usize) -> Self {
        Self {
            total,
            chunk_len: chunk_len.max(1),
        }
    }

    /// A single chunk covering everything.
    pub fn whole(total: usize) -> Self {
        Self::new(total, total.max(1))
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn chunk_count(&self) -> usize {
        self.total.div_ceil(self.chunk_len)
    }

    pub fn chunk(&self, index: usize) -> Range<usize> {
        let start = (index * self.chunk_len).min(self.total);
        let end = (start + self.chunk_len).min(self.total);
        start..end
    }

    pub fn ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        (0..self.chunk_count()).map(|index| self.chunk(index))
    }
}

/// What one chunk worker found.
///
/// References to addresses already present in the read-only address map
/// become finished edges; everything else becomes a task for the
/// orchestrator, which performs deduplication when it pops the task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkOutput {
    pub edges: Vec<Connection>,
    pub tasks: Vec<CrawlTask>,
}

impl ChunkOutput {
    pub fn record(&mut self, known: &AddressIndexMap, task: CrawlTask) {
        match known.find(task.address) {
            Some(to) if !task.from.is_none() => {
                self.edges
                    .push(Connection::new(task.from, to, task.provenance));
            }
            Some(_) => {}
            None => self.tasks.push(task),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty() && self.tasks.is_empty()
    }
}

/// Totals of a [`merge_outputs`] pass.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub chunks: usize,
    pub edges: usize,
    pub tasks: usize,
}

/// Fold chunk outputs into the worklist, in chunk order, handing each
/// finished edge to `accept_edge`.
pub fn merge_outputs(
    outputs: Vec<ChunkOutput>,
    worklist: &mut CrawlWorklist,
    mut accept_edge: impl FnMut(Connection),
) -> MergeSummary {
    let mut summary = MergeSummary::default();
    for output in outputs {
        summary.chunks += 1;
        summary.edges += output.edges.len();
        summary.tasks += output.tasks.len();
        output.edges.into_iter().for_each(&mut accept_edge);
        worklist.extend(output.tasks);
    }
    summary
}

/// Runs chunk functions on a dedicated rayon pool, or inline when the crawl
/// is configured single-threaded.
///
/// # Examples
///
/// ```
/// use heapcrawl::config::CrawlConfig;
/// use heapcrawl::parallel::{ChunkPlan, ChunkRunner};
///
/// let runner = ChunkRunner::new(&CrawlConfig { worker_threads: 2, ..CrawlConfig::default() }).unwrap();
/// let sums = runner.run(ChunkPlan::new(100, 30), |range| range.sum::<usize>());
/// assert_eq!(sums.len(), 4);
/// assert_eq!(sums.iter().sum::<usize>(), (0..100).sum::<usize>());
/// ```
pub struct ChunkRunner {
    pool: Option<rayon::ThreadPool>,
    workers: usize,
}

impl std::fmt::Debug for ChunkRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkRunner")
            .field("workers", &self.workers)
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

impl ChunkRunner {
    pub fn new(config: &CrawlConfig) -> CrawlResult<Self> {
        if !config.uses_worker_pool() {
            return Ok(Self::inline());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|index| format!("heapcrawl-chunk-{}", index))
            .build()
            .map_err(|error| CrawlError::ThreadPool(error.to_string()))?;

        Ok(Self {
            pool: Some(pool),
            workers: config.worker_threads,
        })
    }

    /// A runner that executes every chunk on the calling thread.
    pub fn inline() -> Self {
        Self {
            pool: None,
            workers: 1,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `work` once per chunk of `plan`; results come back in chunk order.
    pub fn run<T, F>(&self, plan: ChunkPlan, work: F) -> Vec<T>
    where
        T: Send,
        F: Fn(Range<usize>) -> T + Sync,
    {
        match &self.pool {
            Some(pool) if plan.chunk_count() > 1 => pool.install(|| {
                (0..plan.chunk_count())
                    .into_par_iter()
                    .map(|index| work(plan.chunk(index)))
                    .collect()
            }),
            _ => plan.ranges().map(work).collect(),
        }
    }
}
