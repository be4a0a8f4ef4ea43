//! Pending pointer visits.

use crate::connections::Provenance;
use crate::source::SourceLocation;

/// "Visit this address", with the provenance of the reference that led here.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CrawlTask {
    pub address: u64,
    pub from: SourceLocation,
    pub provenance: Provenance,
}

impl CrawlTask {
    pub fn new(address: u64, from: SourceLocation, provenance: Provenance) -> Self {
        Self {
            address,
            from,
            provenance,
        }
    }
}

/// LIFO stack of crawl tasks.
///
/// A stack keeps the working set close to the most recently parsed object and
/// avoids the recursion depth a naive graph walk would need.
///
/// # Examples
///
/// ```
/// use heapcrawl::connections::Provenance;
/// use heapcrawl::source::SourceLocation;
/// use heapcrawl::worklist::{CrawlTask, CrawlWorklist};
///
/// let mut worklist = CrawlWorklist::default();
/// worklist.push(CrawlTask::new(0x1000, SourceLocation::None, Provenance::NONE));
/// worklist.push(CrawlTask::new(0x2000, SourceLocation::None, Provenance::NONE));
///
/// assert_eq!(worklist.pop().map(|task| task.address), Some(0x2000));
/// assert_eq!(worklist.len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CrawlWorklist {
    tasks: Vec<CrawlTask>,
    pushed_total: usize,
    peak_len: usize,
}

impl CrawlWorklist {
    #[inline]
    pub fn push(&mut self, task: CrawlTask) {
        self.tasks.push(task);
        self.pushed_total += 1;
        self.peak_len = self.peak_len.max(self.tasks.len());
    }

    /// Append a chunk worker's tasks in their discovery order.
    pub fn extend(&mut self, tasks: impl IntoIterator<Item = CrawlTask>) {
        let before = self.tasks.len();
        self.tasks.extend(tasks);
        self.pushed_total += self.tasks.len() - before;
        self.peak_len = self.peak_len.max(self.tasks.len());
    }

    #[inline]
    pub fn pop(&mut self) -> Option<CrawlTask> {
        self.tasks.pop()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks pushed over the worklist's lifetime.
    pub fn pushed_total(&self) -> usize {
        self.pushed_total
    }

    /// Largest number of tasks pending at once.
    pub fn peak_len(&self) -> usize {
        self.peak_len
    }
}
