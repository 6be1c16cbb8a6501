//! Campcache - a concurrent, cost aware, in-memory cache
//!
//! A [Cache] is a bounded key value store that many threads read and write at
//! once. Every entry carries an application defined `cost` (what it takes to
//! recreate the value) and a `size` (its share of the capacity). When the sum
//! of sizes would run over the capacity, an [admission policy](admission)
//! decides whether the new entry is worth more than the next victim, and an
//! [eviction strategy](eviction) picks that victim.
//!
//! Readers and writers never wait on each other's bookkeeping. Accesses are
//! recorded into lock-free buffers and replayed in bounded batches by
//! whichever caller wins the maintenance lock, or by a dedicated maintenance
//! thread. The load may therefore overshoot the capacity briefly, and settles
//! after the next drain.
//!
//! ```
//! use campcache::{CacheBuilder, EvictionKind};
//! use std::num::NonZeroUsize;
//!
//! let cache = CacheBuilder::new()
//!     .set_capacity(1024)
//!     .set_eviction(EvictionKind::Camp)
//!     .build()
//!     .expect("Invalid cache parameters!");
//!
//! let size = NonZeroUsize::new(4).unwrap();
//! assert!(cache.put_if_absent("report", String::from("..."), 250, size));
//! assert_eq!(cache.get(&"report").as_deref(), Some("..."));
//! ```
//!
//! # Features
//!
//! * `foldhash` - hash with foldhash (default)
//! * `ahash` - use the cpu accelerated ahash crate
//! * `serde` - derive serde traits for the configuration enums
//! * `dhat-heap` - heap profile the stress tests

#![warn(unused_extern_crates)]
#![warn(missing_docs)]
#![allow(clippy::needless_lifetimes)]

#[cfg(all(test, feature = "dhat-heap"))]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

pub mod admission;
pub mod cache;
pub mod entry;
pub mod eviction;
pub mod store;

mod utils;

pub use crate::admission::{AdmissionKind, AdmissionPolicy};
pub use crate::cache::{Cache, CacheBuilder, CacheStats, MaintenanceMode};
pub use crate::entry::Entry;
pub use crate::eviction::EvictionKind;
pub use crate::store::{BackingStore, ShardedStore};
