//! Error types for the heap crawler.
//!
//! Malformed snapshot data never surfaces here: bad pointers, bad headers and
//! impossible lengths are recovered locally and only counted in
//! [`CrawlDiagnostics`](crate::managed_data::CrawlDiagnostics). The variants
//! below describe misuse of the API or corruption of the crawler's own
//! bookkeeping.

use thiserror::Error;

use crate::crawler::CrawlPhase;

/// Errors that can occur while configuring or driving a crawl.
///
/// # Examples
///
/// ```
/// use heapcrawl::error::{CrawlError, CrawlResult};
///
/// let corrupted = CrawlError::AddressMapCorrupted("chain loops back".to_string());
/// let out_of_range = CrawlError::SlotOutOfRange { slot: 9, capacity: 8 };
///
/// let success: CrawlResult<u32> = Ok(42);
/// let failure: CrawlResult<u32> = Err(out_of_range);
///
/// assert!(success.is_ok());
/// assert!(failure.is_err());
/// assert_eq!(
///     corrupted.to_string(),
///     "Address index map corrupted: chain loops back"
/// );
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CrawlError {
    /// A [`CrawlConfig`](crate::config::CrawlConfig) value is unusable
    #[error("Invalid crawl configuration: {0}")]
    InvalidConfig(String),
    /// The captured virtual machine geometry cannot describe a real heap
    #[error("Invalid virtual machine geometry: {0}")]
    InvalidGeometry(String),
    /// The address map failed its structural integrity check
    #[error("Address index map corrupted: {0}")]
    AddressMapCorrupted(String),
    /// A slot index outside the address map's allocation was accessed
    #[error("Slot {slot} is out of range for capacity {capacity}")]
    SlotOutOfRange { slot: usize, capacity: usize },
    /// A resize request cannot hold the entries already stored
    #[error("Requested capacity {requested} cannot hold {count} live entries")]
    CapacityTooSmall { requested: usize, count: usize },
    /// A crawl operation was requested in the wrong phase
    #[error("Crawl phase order violated: expected {expected:?}, found {found:?}")]
    PhaseOrder {
        expected: CrawlPhase,
        found: CrawlPhase,
    },
    /// Layout or edge bookkeeping disagrees with itself
    #[error("Internal inconsistency: {0}")]
    InternalInconsistency(String),
    /// The worker pool for chunked scanning could not be created
    #[error("Worker pool error: {0}")]
    ThreadPool(String),
}

/// Result type for crawl operations
pub type CrawlResult<T> = Result<T, CrawlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_readable_messages() {
        let cases = [
            (
                CrawlError::InvalidConfig("array_chunk_len must be non-zero".into()),
                "Invalid crawl configuration: array_chunk_len must be non-zero",
            ),
            (
                CrawlError::InvalidGeometry("pointer size 3".into()),
                "Invalid virtual machine geometry: pointer size 3",
            ),
            (
                CrawlError::SlotOutOfRange {
                    slot: 17,
                    capacity: 16,
                },
                "Slot 17 is out of range for capacity 16",
            ),
            (
                CrawlError::CapacityTooSmall {
                    requested: 4,
                    count: 10,
                },
                "Requested capacity 4 cannot hold 10 live entries",
            ),
            (
                CrawlError::ThreadPool("spawn failed".into()),
                "Worker pool error: spawn failed",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn phase_order_mentions_both_phases() {
        let error = CrawlError::PhaseOrder {
            expected: CrawlPhase::Finished,
            found: CrawlPhase::GatherRoots,
        };
        let message = error.to_string();
        assert!(message.contains("Finished"));
        assert!(message.contains("GatherRoots"));
    }

    #[test]
    fn crawl_result_alias_behaves_like_result() {
        fn take_result(value: CrawlResult<usize>) -> usize {
            value.unwrap_or_default()
        }

        assert_eq!(take_result(Ok(42)), 42);
        assert_eq!(
            take_result(Err(CrawlError::InternalInconsistency("x".into()))),
            0
        );
    }
}
