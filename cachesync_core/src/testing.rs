//! In-memory backend and cache used by unit tests.

use crate::backend::{Backend, IdStream, ObjectStream};
use crate::cache::{Cache, RetainStats};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::handle::{Handle, ObjectType};
use crate::id::{IdSet, ObjectId};
use std::collections::{HashMap, HashSet};
use std::io::{self, Cursor, Read};
use std::sync::{Arc, Mutex};

pub(crate) fn id(seed: &str) -> ObjectId {
    ObjectId::hash_bytes(seed.as_bytes())
}

/// Repository held in memory, with injectable failures.
#[derive(Default)]
pub(crate) struct MemoryBackend {
    objects: HashMap<Handle, Vec<u8>>,
    fail_load: HashSet<Handle>,
    fail_read: HashSet<Handle>,
    fail_close: HashSet<Handle>,
    fail_list_after: HashMap<ObjectType, usize>,
    cancel_on_load: Option<usize>,
    loads: Mutex<Vec<Handle>>,
    closes: Arc<Mutex<Vec<Handle>>>,
}

impl MemoryBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, object_type: ObjectType, seed: &str) -> Self {
        self.objects.insert(
            Handle::new(object_type, id(seed)),
            format!("{} {}", object_type, seed).into_bytes(),
        );
        self
    }

    pub(crate) fn failing_load(mut self, object_type: ObjectType, seed: &str) -> Self {
        self.fail_load.insert(Handle::new(object_type, id(seed)));
        self
    }

    pub(crate) fn failing_read(mut self, object_type: ObjectType, seed: &str) -> Self {
        self.fail_read.insert(Handle::new(object_type, id(seed)));
        self
    }

    pub(crate) fn failing_close(mut self, object_type: ObjectType, seed: &str) -> Self {
        self.fail_close.insert(Handle::new(object_type, id(seed)));
        self
    }

    /// Listing `object_type` yields `count` ids and then fails.
    pub(crate) fn failing_list_after(mut self, object_type: ObjectType, count: usize) -> Self {
        self.fail_list_after.insert(object_type, count);
        self
    }

    /// The `count`-th load cancels the run's token after it has started.
    pub(crate) fn cancelling_on_load(mut self, count: usize) -> Self {
        self.cancel_on_load = Some(count);
        self
    }

    pub(crate) fn content(&self, handle: &Handle) -> Option<&[u8]> {
        self.objects.get(handle).map(Vec::as_slice)
    }

    /// Handles loaded so far, in call order.
    pub(crate) fn loads(&self) -> Vec<Handle> {
        self.loads.lock().unwrap().clone()
    }

    /// Handles whose streams were closed, in call order.
    pub(crate) fn closes(&self) -> Vec<Handle> {
        self.closes.lock().unwrap().clone()
    }
}

impl Backend for MemoryBackend {
    fn list<'a>(
        &'a self,
        object_type: ObjectType,
        cancel: &'a CancelToken,
    ) -> Result<IdStream<'a>> {
        cancel.check()?;

        let mut ids: Vec<ObjectId> = self
            .objects
            .keys()
            .filter(|h| h.object_type == object_type)
            .map(|h| h.id)
            .collect();
        ids.sort();

        let mut items: Vec<Result<ObjectId>> = ids.into_iter().map(Ok).collect();
        if let Some(&count) = self.fail_list_after.get(&object_type) {
            items.truncate(count);
            items.push(Err(Error::enumeration(object_type, "listing interrupted")));
        }

        Ok(Box::new(items.into_iter().map(
            move |item: Result<ObjectId>| -> Result<ObjectId> {
                cancel.check()?;
                item
            },
        )))
    }

    fn load(
        &self,
        handle: &Handle,
        _offset: u64,
        _length: u64,
        cancel: &CancelToken,
    ) -> Result<Box<dyn ObjectStream>> {
        cancel.check()?;
        let mut loads = self.loads.lock().unwrap();
        loads.push(*handle);
        if self.cancel_on_load == Some(loads.len()) {
            cancel.cancel();
        }
        drop(loads);

        if self.fail_load.contains(handle) {
            return Err(Error::fetch(*handle, io::Error::other("transport error")));
        }

        let data = self.objects.get(handle).cloned().ok_or_else(|| {
            Error::fetch(*handle, io::Error::new(io::ErrorKind::NotFound, "no such object"))
        })?;

        Ok(Box::new(MemoryStream {
            handle: *handle,
            closes: Arc::clone(&self.closes),
            data: Cursor::new(data),
            fail_read: self.fail_read.contains(handle),
            fail_close: self.fail_close.contains(handle),
        }))
    }
}

struct MemoryStream {
    handle: Handle,
    closes: Arc<Mutex<Vec<Handle>>>,
    data: Cursor<Vec<u8>>,
    fail_read: bool,
    fail_close: bool,
}

impl Read for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.fail_read {
            return Err(io::Error::other("connection reset"));
        }
        self.data.read(buf)
    }
}

impl ObjectStream for MemoryStream {
    fn close(self: Box<Self>) -> io::Result<()> {
        self.closes.lock().unwrap().push(self.handle);
        if self.fail_close {
            return Err(io::Error::other("close failed"));
        }
        Ok(())
    }
}

/// Cache held in memory, recording every mutating call.
#[derive(Default)]
pub(crate) struct MemoryCache {
    entries: Mutex<HashMap<Handle, Vec<u8>>>,
    saves: Mutex<Vec<Handle>>,
    retains: Mutex<Vec<ObjectType>>,
    fail_save: bool,
    fail_retain: bool,
}

impl MemoryCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(self, object_type: ObjectType, seed: &str) -> Self {
        self.entries.lock().unwrap().insert(
            Handle::new(object_type, id(seed)),
            format!("{} {}", object_type, seed).into_bytes(),
        );
        self
    }

    pub(crate) fn failing_save(mut self) -> Self {
        self.fail_save = true;
        self
    }

    pub(crate) fn failing_retain(mut self) -> Self {
        self.fail_retain = true;
        self
    }

    pub(crate) fn ids(&self, object_type: ObjectType) -> IdSet {
        self.entries
            .lock()
            .unwrap()
            .keys()
            .filter(|h| h.object_type == object_type)
            .map(|h| h.id)
            .collect()
    }

    pub(crate) fn get(&self, handle: &Handle) -> Option<Vec<u8>> {
        self.entries.lock().unwrap().get(handle).cloned()
    }

    pub(crate) fn saves(&self) -> Vec<Handle> {
        self.saves.lock().unwrap().clone()
    }

    pub(crate) fn retains(&self) -> Vec<ObjectType> {
        self.retains.lock().unwrap().clone()
    }

    pub(crate) fn snapshot(&self) -> HashMap<Handle, Vec<u8>> {
        self.entries.lock().unwrap().clone()
    }
}

impl Cache for MemoryCache {
    fn has(&self, handle: &Handle) -> bool {
        self.entries.lock().unwrap().contains_key(handle)
    }

    fn save(&self, handle: &Handle, reader: &mut dyn Read) -> Result<()> {
        if self.fail_save {
            return Err(Error::cache_write(handle, "disk full"));
        }

        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .map_err(|e| Error::cache_write(handle, e.to_string()))?;

        self.saves.lock().unwrap().push(*handle);
        self.entries.lock().unwrap().insert(*handle, data);
        Ok(())
    }

    fn retain(&self, object_type: ObjectType, valid: &IdSet) -> Result<RetainStats> {
        if self.fail_retain {
            return Err(Error::cache_write_type(object_type, "read-only filesystem"));
        }

        self.retains.lock().unwrap().push(object_type);

        let mut stats = RetainStats::default();
        self.entries.lock().unwrap().retain(|h, data| {
            let keep = h.object_type != object_type || valid.contains(&h.id);
            if !keep {
                stats.objects_deleted += 1;
                stats.bytes_freed += data.len() as u64;
            }
            keep
        });
        Ok(stats)
    }
}
