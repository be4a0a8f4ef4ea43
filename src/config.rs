//! Crawl configuration.

use crate::error::{CrawlError, CrawlResult};

/// Names used to recognise managed shells around native objects.
///
/// # Examples
///
/// ```
/// use heapcrawl::config::NativeLinkConfig;
///
/// let config = NativeLinkConfig::default();
/// assert_eq!(config.shell_base_type_name, "UnityEngine.Object");
/// assert_eq!(config.cached_pointer_field_name, "m_CachedPtr");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeLinkConfig {
    /// Fully qualified name of the managed base type every shell derives from
    pub shell_base_type_name: String,
    /// Instance field on the shell base type holding the native object address
    pub cached_pointer_field_name: String,
}

impl Default for NativeLinkConfig {
    fn default() -> Self {
        Self {
            shell_base_type_name: "UnityEngine.Object".to_string(),
            cached_pointer_field_name: "m_CachedPtr".to_string(),
        }
    }
}

/// Configuration for a crawl.
///
/// `CrawlConfig` controls how much of the crawl is farmed out to chunk workers
/// and how the native link pass identifies shell objects.
///
/// # Examples
///
/// ```
/// use heapcrawl::config::CrawlConfig;
///
/// // Use default configuration
/// let default_config = CrawlConfig::default();
/// assert_eq!(default_config.parallel_array_threshold, 4096);
/// assert!(default_config.link_native_objects);
///
/// // Single-threaded crawl with small chunks
/// let custom_config = CrawlConfig {
///     worker_threads: 1,
///     array_chunk_len: 64,
///     ..CrawlConfig::default()
/// };
/// assert!(custom_config.validate().is_ok());
/// assert_eq!(custom_config.worker_threads, 1);
/// ```
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Threads in the chunk worker pool; `0` or `1` runs chunks inline
    pub worker_threads: usize,
    /// Arrays with at least this many elements are scanned in parallel chunks
    pub parallel_array_threshold: usize,
    /// Elements per array chunk
    pub array_chunk_len: usize,
    /// Types per static field chunk
    pub static_chunk_len: usize,
    /// Deepest value-type nesting followed when building field layouts
    pub max_value_type_depth: usize,
    /// Run the native shell linking phases
    pub link_native_objects: bool,
    pub native: NativeLinkConfig,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get(),
            parallel_array_threshold: 4096,
            array_chunk_len: 1024,
            static_chunk_len: 64,
            max_value_type_depth: 32,
            link_native_objects: true,
            native: NativeLinkConfig::default(),
        }
    }
}

impl CrawlConfig {
    /// Configuration that never spawns worker threads.
    pub fn single_threaded() -> Self {
        Self {
            worker_threads: 1,
            ..Self::default()
        }
    }

    /// Reject values that would stall or disable the crawl.
    pub fn validate(&self) -> CrawlResult<()> {
        if self.array_chunk_len == 0 {
            return Err(CrawlError::InvalidConfig(
                "array_chunk_len must be non-zero".to_string(),
            ));
        }
        if self.static_chunk_len == 0 {
            return Err(CrawlError::InvalidConfig(
                "static_chunk_len must be non-zero".to_string(),
            ));
        }
        if self.max_value_type_depth == 0 {
            return Err(CrawlError::InvalidConfig(
                "max_value_type_depth must be non-zero".to_string(),
            ));
        }
        if self.link_native_objects && self.native.shell_base_type_name.is_empty() {
            return Err(CrawlError::InvalidConfig(
                "shell_base_type_name must be set when native linking is enabled".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether chunk work should run on the worker pool.
    pub fn uses_worker_pool(&self) -> bool {
        self.worker_threads > 1
    }
}
