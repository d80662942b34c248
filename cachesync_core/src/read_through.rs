//! A backend wrapper that stages full loads of selected types for the cache.

use crate::backend::{Backend, IdStream, ObjectStream};
use crate::cache::Cache;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::handle::{Handle, ObjectType};
use crate::id::IdSet;
use std::collections::HashMap;
use std::io::{self, Cursor, Read};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Cache writes held back until a validation pass for their type succeeds.
pub trait Staging: Send + Sync {
    /// Write every staged entry of `object_type` whose id is in `valid` and
    /// drop the rest. Returns the number of entries written.
    fn commit(&self, object_type: ObjectType, valid: &IdSet) -> Result<usize>;

    /// Drop every staged entry of `object_type` without writing it.
    fn discard(&self, object_type: ObjectType);
}

/// Wraps a backend so that full loads of selected types can be copied into a
/// cache once their pass has been committed.
///
/// Loads are buffered and staged; nothing reaches the cache until
/// [`Staging::commit`]. Ranged loads and loads of other types pass straight
/// through. Content is held in memory, so only small metadata types belong in
/// `object_types`.
pub struct ReadThroughBackend<'a> {
    backend: &'a dyn Backend,
    cache: &'a dyn Cache,
    object_types: Vec<ObjectType>,
    staged: Mutex<HashMap<Handle, Vec<u8>>>,
}

impl<'a> ReadThroughBackend<'a> {
    pub fn new(
        backend: &'a dyn Backend,
        cache: &'a dyn Cache,
        object_types: impl IntoIterator<Item = ObjectType>,
    ) -> Self {
        Self {
            backend,
            cache,
            object_types: object_types.into_iter().collect(),
            staged: Mutex::new(HashMap::new()),
        }
    }

    /// Number of loads staged and not yet committed or discarded.
    pub fn staged_len(&self) -> usize {
        self.staged().len()
    }

    fn caches(&self, object_type: ObjectType) -> bool {
        self.object_types.contains(&object_type)
    }

    fn staged(&self) -> MutexGuard<'_, HashMap<Handle, Vec<u8>>> {
        self.staged.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_staged(&self, object_type: ObjectType) -> Vec<(Handle, Vec<u8>)> {
        let mut staged = self.staged();
        let handles: Vec<Handle> = staged
            .keys()
            .filter(|h| h.object_type == object_type)
            .copied()
            .collect();
        handles
            .into_iter()
            .filter_map(|h| staged.remove(&h).map(|data| (h, data)))
            .collect()
    }
}

impl Staging for ReadThroughBackend<'_> {
    fn commit(&self, object_type: ObjectType, valid: &IdSet) -> Result<usize> {
        let mut written = 0;

        for (handle, data) in self.take_staged(object_type) {
            if !valid.contains(&handle.id) || self.cache.has(&handle) {
                continue;
            }
            self.cache.save(&handle, &mut data.as_slice())?;
            debug!(handle = %handle, bytes = data.len(), "cached on read");
            written += 1;
        }

        Ok(written)
    }

    fn discard(&self, object_type: ObjectType) {
        let dropped = self.take_staged(object_type).len();
        if dropped > 0 {
            debug!(object_type = %object_type, dropped, "discarded staged loads");
        }
    }
}

impl Backend for ReadThroughBackend<'_> {
    fn list<'a>(
        &'a self,
        object_type: ObjectType,
        cancel: &'a CancelToken,
    ) -> Result<IdStream<'a>> {
        self.backend.list(object_type, cancel)
    }

    fn load(
        &self,
        handle: &Handle,
        offset: u64,
        length: u64,
        cancel: &CancelToken,
    ) -> Result<Box<dyn ObjectStream>> {
        if !self.caches(handle.object_type) || offset != 0 || length != 0 {
            return self.backend.load(handle, offset, length, cancel);
        }

        let mut rd = self.backend.load(handle, 0, 0, cancel)?;
        let mut data = Vec::new();
        if let Err(e) = rd.read_to_end(&mut data) {
            let _ = rd.close();
            return Err(Error::fetch(*handle, e));
        }
        rd.close().map_err(|e| Error::stream_release(*handle, e))?;

        if !self.cache.has(handle) {
            self.staged().insert(*handle, data.clone());
        }

        Ok(Box::new(BufferStream {
            inner: Cursor::new(data),
        }))
    }
}

struct BufferStream {
    inner: Cursor<Vec<u8>>,
}

impl Read for BufferStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl ObjectStream for BufferStream {
    fn close(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }
}
