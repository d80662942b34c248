//! # cachesync core
//!
//! Keeps a local cache of a content-addressed backup repository in line with
//! the repository itself.
//!
//! A repository holds immutable objects of several types (index files,
//! snapshots, data packs) named by content-derived ids. A local cache mirrors
//! some of them. This library answers two questions:
//!
//! - Which cached objects are stale, because the repository no longer reports
//!   them, and must be evicted?
//! - Which packs hold tree blobs, are read on every tree traversal, and
//!   should be copied into the cache ahead of time?
//!
//! ## Features
//!
//! - Two-phase reconciliation per type: validate every listed object, then
//!   commit a single retain call. A failed or cancelled pass never evicts.
//! - Tree-pack prefetching driven by the merged index
//! - Narrow [`Backend`], [`Cache`] and [`TreePackSource`] traits, with
//!   filesystem implementations ([`LocalBackend`], [`DiskCache`])
//! - Optional concurrent fetching within a type
//!
//! ## Example
//!
//! ```no_run
//! use cachesync_core::{CancelToken, DiskCache, LocalBackend, MasterIndex, Reconciler};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = LocalBackend::open("./repo")?;
//! let cache = DiskCache::open_or_create("./cache")?;
//! let cancel = CancelToken::new();
//!
//! let index = MasterIndex::load(&backend, &cancel)?;
//! let report = Reconciler::new(&backend, &cache, &cancel).run(Some(&index))?;
//!
//! for t in &report.types {
//!     println!("{}: {} listed, {} evicted", t.object_type, t.listed, t.evicted);
//! }
//! # Ok(())
//! # }
//! ```

mod backend;
mod cache;
mod cancel;
mod config;
mod error;
mod handle;
mod id;
mod index;
mod read_through;
mod reconcile;

#[cfg(test)]
mod testing;

pub use backend::{Backend, IdStream, LocalBackend, ObjectStream};
pub use cache::{Cache, DiskCache, RetainStats, TypeUsage, default_cache_dir};
pub use cancel::CancelToken;
pub use config::LAYOUT_VERSION;
pub use error::{Error, Result};
pub use handle::{Handle, ObjectType};
pub use id::{ID_SIZE, IdSet, ObjectId};
pub use index::{BlobType, Index, MasterIndex, PackedBlob, TreePackSource};
pub use read_through::{ReadThroughBackend, Staging};
pub use reconcile::{PrefetchReport, ReconcileConfig, Reconciler, RunReport, TypeReport};
