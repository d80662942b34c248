//! Cache reconciliation and tree-pack prefetching.
//!
//! Reconciling an object type runs in two phases:
//!
//! 1. **Validate**: list every id the repository reports for the type, and
//!    load-and-discard each object the cache does not already hold. This
//!    builds the valid set and proves each object is readable.
//! 2. **Commit**: hand the valid set to [`Cache::retain`], which evicts every
//!    cached entry of the type that the repository no longer reports.
//!
//! The commit runs only if phase 1 finished without error or cancellation, so
//! a type is never left partially evicted. Loads a [`Staging`] layer held back
//! during phase 1 reach the cache only after the commit.
//!
//! Tree-pack prefetching then copies every pack the index marks as holding
//! tree blobs into the cache, since those packs are read on every tree
//! traversal.

use crate::backend::Backend;
use crate::cache::Cache;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::handle::{Handle, ObjectType};
use crate::id::IdSet;
use crate::index::TreePackSource;
use crate::read_through::Staging;
use serde::Serialize;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{debug, info};

/// Which object types to reconcile and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Types whose cache partition is brought in line with the repository.
    pub object_types: Vec<ObjectType>,
    /// Whether to copy tree packs into the cache after reconciling.
    pub prefetch_tree_packs: bool,
    /// Number of concurrent fetches per type. `0` and `1` both mean serial.
    pub workers: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            object_types: vec![ObjectType::Index, ObjectType::Snapshot],
            prefetch_tree_packs: true,
            workers: 1,
        }
    }
}

/// Outcome of reconciling one object type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeReport {
    pub object_type: ObjectType,
    /// Distinct ids reported by the repository.
    pub listed: usize,
    /// Ids skipped because the cache already held them.
    pub already_cached: usize,
    /// Ids loaded to prove they are readable.
    pub validated: usize,
    /// Cache entries evicted by the commit.
    pub evicted: usize,
    pub bytes_freed: u64,
    /// Validated objects written into the cache from staging after the commit.
    pub saved: usize,
}

/// Outcome of tree-pack prefetching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrefetchReport {
    /// Tree packs named by the index.
    pub tree_packs: usize,
    pub already_cached: usize,
    /// Packs copied into the cache.
    pub fetched: usize,
}

/// Outcome of a full [`Reconciler::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub types: Vec<TypeReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefetch: Option<PrefetchReport>,
}

/// Result of the validation phase for one type.
struct Scan {
    valid: IdSet,
    already_cached: usize,
    validated: usize,
}

/// Brings a cache in line with a repository.
///
/// The caller must hold whatever lock keeps the repository stable for the
/// duration of a run; the reconciler takes none itself.
pub struct Reconciler<'a> {
    backend: &'a dyn Backend,
    cache: &'a dyn Cache,
    cancel: &'a CancelToken,
    staging: Option<&'a dyn Staging>,
    config: ReconcileConfig,
}

impl<'a> Reconciler<'a> {
    pub fn new(backend: &'a dyn Backend, cache: &'a dyn Cache, cancel: &'a CancelToken) -> Self {
        Self {
            backend,
            cache,
            cancel,
            staging: None,
            config: ReconcileConfig::default(),
        }
    }

    /// Write loads staged during validation into the cache once a type's
    /// commit has succeeded, and drop them if the pass fails.
    pub fn with_staging(mut self, staging: &'a dyn Staging) -> Self {
        self.staging = Some(staging);
        self
    }

    pub fn with_config(mut self, config: ReconcileConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Reconcile every configured type, then prefetch tree packs from `index`.
    ///
    /// Stops at the first error. Types reconciled before the failing one keep
    /// their committed state.
    pub fn run(&self, index: Option<&dyn TreePackSource>) -> Result<RunReport> {
        let mut report = RunReport::default();

        for &object_type in &self.config.object_types {
            report.types.push(self.reconcile_type(object_type)?);
        }

        if self.config.prefetch_tree_packs
            && let Some(index) = index
        {
            report.prefetch = Some(self.prefetch_tree_packs(index)?);
        }

        Ok(report)
    }

    /// Validate then commit one type.
    ///
    /// Staged loads are written only after `retain` succeeds; on any earlier
    /// error they are discarded and the type's cache entries are untouched.
    pub fn reconcile_type(&self, object_type: ObjectType) -> Result<TypeReport> {
        info!(object_type = %object_type, "updating cache");

        if let Some(staging) = self.staging {
            staging.discard(object_type);
        }

        let committed = self.scan(object_type).and_then(|scan| {
            let stats = self.cache.retain(object_type, &scan.valid)?;
            Ok((scan, stats))
        });
        let (scan, stats) = match committed {
            Ok(committed) => committed,
            Err(e) => {
                if let Some(staging) = self.staging {
                    staging.discard(object_type);
                }
                return Err(e);
            }
        };

        if stats.objects_deleted > 0 {
            info!(
                object_type = %object_type,
                evicted = stats.objects_deleted,
                bytes_freed = stats.bytes_freed,
                "evicted stale cache entries"
            );
        }

        let saved = match self.staging {
            Some(staging) => staging.commit(object_type, &scan.valid)?,
            None => 0,
        };

        Ok(TypeReport {
            object_type,
            listed: scan.valid.len(),
            already_cached: scan.already_cached,
            validated: scan.validated,
            evicted: stats.objects_deleted,
            bytes_freed: stats.bytes_freed,
            saved,
        })
    }

    /// Build the valid set for `object_type`, loading every object the cache
    /// lacks. Never mutates the cache.
    pub fn compute_valid_set(&self, object_type: ObjectType) -> Result<IdSet> {
        Ok(self.scan(object_type)?.valid)
    }

    /// Copy every tree pack named by `index` into the cache.
    pub fn prefetch_tree_packs(&self, index: &dyn TreePackSource) -> Result<PrefetchReport> {
        let packs = index.tree_pack_ids();
        let mut report = PrefetchReport {
            tree_packs: packs.len(),
            ..PrefetchReport::default()
        };

        let mut missing = Vec::new();
        for pack_id in packs {
            let handle = Handle::new(ObjectType::Data, pack_id);
            if self.cache.has(&handle) {
                report.already_cached += 1;
            } else {
                missing.push(handle);
            }
        }

        self.for_each(&missing, |handle| {
            info!(pack = %handle.id.short(), "tree pack not cached, fetching");
            self.fetch_into_cache(handle)
        })?;
        report.fetched = missing.len();

        Ok(report)
    }

    fn scan(&self, object_type: ObjectType) -> Result<Scan> {
        let mut valid = IdSet::new();
        let mut missing = Vec::new();
        let mut already_cached = 0;

        for id in self.backend.list(object_type, self.cancel)? {
            let id = id?;
            if !valid.insert(id) {
                continue;
            }

            let handle = Handle::new(object_type, id);
            if self.cache.has(&handle) {
                already_cached += 1;
            } else {
                missing.push(handle);
            }
        }

        self.for_each(&missing, |handle| {
            debug!(handle = %handle, "validating");
            self.validate(handle)
        })?;

        Ok(Scan {
            valid,
            already_cached,
            validated: missing.len(),
        })
    }

    /// Load an object in full and discard its content.
    fn validate(&self, handle: &Handle) -> Result<()> {
        let mut rd = self.backend.load(handle, 0, 0, self.cancel)?;

        if let Err(e) = io::copy(&mut rd, &mut io::sink()) {
            let _ = rd.close();
            return Err(Error::fetch(*handle, e));
        }

        rd.close().map_err(|e| Error::stream_release(*handle, e))
    }

    /// Load an object in full and save it into the cache.
    fn fetch_into_cache(&self, handle: &Handle) -> Result<()> {
        let mut rd = self.backend.load(handle, 0, 0, self.cancel)?;

        let mut trap = ReadErrorTrap {
            inner: &mut rd,
            error: None,
        };
        if let Err(e) = self.cache.save(handle, &mut trap) {
            let read_error = trap.error.take();
            let _ = rd.close();
            // A failed read surfaces through the cache; report it as a fetch.
            return Err(match read_error {
                Some(source) => Error::fetch(*handle, source),
                None => e,
            });
        }

        rd.close().map_err(|e| Error::stream_release(*handle, e))
    }

    /// Run `work` for every handle, stopping at the first error.
    ///
    /// With more than one worker the handles are split across scoped threads.
    /// Each thread stops once any thread has failed or the run is cancelled.
    fn for_each<F>(&self, handles: &[Handle], work: F) -> Result<()>
    where
        F: Fn(&Handle) -> Result<()> + Sync,
    {
        if self.config.workers <= 1 || handles.len() <= 1 {
            for handle in handles {
                self.cancel.check()?;
                work(handle)?;
            }
            return Ok(());
        }

        let workers = self.config.workers.min(handles.len());
        let chunk_size = handles.len().div_ceil(workers);
        let failed = AtomicBool::new(false);
        let first_error: Mutex<Option<Error>> = Mutex::new(None);

        std::thread::scope(|scope| {
            for chunk in handles.chunks(chunk_size) {
                let work = &work;
                let failed = &failed;
                let first_error = &first_error;
                scope.spawn(move || {
                    for handle in chunk {
                        if failed.load(Ordering::SeqCst) {
                            return;
                        }
                        let outcome = self.cancel.check().and_then(|()| work(handle));
                        if let Err(e) = outcome {
                            failed.store(true, Ordering::SeqCst);
                            if let Ok(mut slot) = first_error.lock() {
                                slot.get_or_insert(e);
                            }
                            return;
                        }
                    }
                });
            }
        });

        match first_error.into_inner() {
            Ok(Some(e)) => Err(e),
            Ok(None) => Ok(()),
            Err(poisoned) => match poisoned.into_inner() {
                Some(e) => Err(e),
                None => Ok(()),
            },
        }
    }
}

/// Remembers the first read error so it can be told apart from write errors.
struct ReadErrorTrap<'r, R: Read + ?Sized> {
    inner: &'r mut R,
    error: Option<io::Error>,
}

impl<R: Read + ?Sized> Read for ReadErrorTrap<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read(buf) {
            Ok(n) => Ok(n),
            Err(e) => {
                if self.error.is_none() {
                    self.error = Some(io::Error::new(e.kind(), e.to_string()));
                }
                Err(e)
            }
        }
    }
}
