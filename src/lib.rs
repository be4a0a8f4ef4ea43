//! # heapcrawl
//!
//! Reconstructs the live managed object graph from a captured memory snapshot
//! of a managed runtime.
//!
//! A capture is nothing but byte ranges, GC handle targets, type and field
//! descriptors and the runtime's geometry. The crawler walks it starting from
//! the GC handles and from types with static storage, resolving every object
//! header to a type, sizing strings and arrays, and following every reference
//! field, including references nested in embedded value types and array
//! elements. The result is an arena of objects indexed by discovery order
//! plus every edge between them with the provenance needed to explain it.
//! Shell objects that wrap native objects are linked to their native
//! counterparts afterwards.
//!
//! Inputs are untrusted: pointers outside the captured heap, headers that name
//! no known type and impossible lengths are recovered from locally and counted
//! in [`CrawlDiagnostics`](managed_data::CrawlDiagnostics). Only corruption of
//! the crawler's own bookkeeping is an error.
//!
//! ## Architecture
//!
//! - [`address_map`]: open-addressing address to object index map, the
//!   visited set of the crawl
//! - [`field_layout`]: per-type flattened reference field layouts
//! - [`objects`], [`connections`], [`worklist`]: the arena, edge log and task
//!   stack
//! - [`crawler`]: the phase-by-phase orchestrator and native type linking
//! - [`parallel`]: chunked scanning of static storage and large arrays
//! - [`snapshot`]: the captured input model
//!
//! ## Example
//!
//! ```
//! use heapcrawl::config::CrawlConfig;
//! use heapcrawl::source::SourceKind;
//! use heapcrawl::test_utils::SnapshotBuilder;
//!
//! let mut builder = SnapshotBuilder::x64();
//! let node = builder.add_class("Node", 24);
//! builder.add_field(node, "next", 0, node);
//! builder.add_section(0x1000, 0x1000);
//!
//! // Two nodes pointing at each other.
//! builder.write_object(0x1000, node);
//! builder.write_object(0x1100, node);
//! builder.write_pointer(0x1010, 0x1100);
//! builder.write_pointer(0x1110, 0x1000);
//! builder.add_gc_handle(0x1000);
//!
//! let data = heapcrawl::crawl(&builder.build(), CrawlConfig::single_threaded()).unwrap();
//! assert_eq!(data.objects.len(), 2);
//! assert_eq!(data.connections.from_kind(SourceKind::ManagedObject).count(), 2);
//! ```

pub mod address_map;
pub mod config;
pub mod connections;
pub mod crawler;
pub mod error;
pub mod field_layout;
pub mod index;
pub mod managed_data;
pub mod objects;
pub mod parallel;
pub mod snapshot;
pub mod source;
pub mod test_utils;
pub mod worklist;

pub use address_map::AddressIndexMap;
pub use config::{CrawlConfig, NativeLinkConfig};
pub use connections::{Connection, ConnectionIndexMaps, ConnectionLog, Provenance};
pub use crawler::{CrawlPhase, Crawler, TypeNativeLinker, crawl};
pub use error::{CrawlError, CrawlResult};
pub use field_layout::{FieldLayoutCache, LayoutKind};
pub use index::{
    FieldIndex, GcHandleIndex, NativeAllocationIndex, NativeObjectIndex, NativeTypeIndex,
    ObjectIndex, TypeIndex,
};
pub use managed_data::{CrawlDiagnostics, ManagedData, NativeLinks};
pub use objects::{ManagedObjectRecord, ObjectState, ObjectTable};
pub use snapshot::CapturedSnapshot;
pub use source::{SourceKind, SourceLocation};
