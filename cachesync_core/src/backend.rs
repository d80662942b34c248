//! Repository access: listing objects by type and loading their content.

use crate::cancel::CancelToken;
use crate::config;
use crate::error::{Error, Result};
use crate::handle::{Handle, ObjectType};
use crate::id::ObjectId;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Lazy, finite sequence of ids reported by [`Backend::list`].
pub type IdStream<'a> = Box<dyn Iterator<Item = Result<ObjectId>> + 'a>;

/// Readable content of one object.
///
/// The stream must be released with [`ObjectStream::close`] once it has been
/// drained or persisted. Releasing can fail.
pub trait ObjectStream: Read + Send {
    fn close(self: Box<Self>) -> io::Result<()>;
}

/// A repository holding immutable objects addressed by [`Handle`].
pub trait Backend: Send + Sync {
    /// List the ids of every object of `object_type`, in no particular order.
    ///
    /// A fresh call re-enumerates. An `Err` item aborts the listing.
    fn list<'a>(&'a self, object_type: ObjectType, cancel: &'a CancelToken)
    -> Result<IdStream<'a>>;

    /// Open an object for reading.
    ///
    /// `offset` and `length` select a byte range; `length == 0` reads to the
    /// end, so `(0, 0)` loads the whole object.
    fn load(
        &self,
        handle: &Handle,
        offset: u64,
        length: u64,
        cancel: &CancelToken,
    ) -> Result<Box<dyn ObjectStream>>;
}

/// Name of the repository marker file.
const CONFIG_FILE: &str = "config";

/// A repository on the local filesystem.
///
/// Layout:
/// - `config`
/// - `data/{prefix}/{id}` for packs
/// - `{snapshots,index,keys,locks}/{id}`
#[derive(Debug)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create the repository directory structure at `root`.
    pub fn init<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        for object_type in ObjectType::ALL {
            if object_type != ObjectType::Config {
                fs::create_dir_all(root.join(object_type.dir_name()))?;
            }
        }

        fs::write(root.join(CONFIG_FILE), config::render_version())?;

        Ok(Self { root })
    }

    /// Open an existing repository.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.is_dir() {
            return Err(Error::invalid_repository(&root, "directory does not exist"));
        }

        let config_path = root.join(CONFIG_FILE);
        if !config_path.is_file() {
            return Err(Error::invalid_repository(&root, "config file not found"));
        }

        let content = fs::read_to_string(&config_path)?;
        config::check_version(&content).map_err(|reason| Error::invalid_repository(&root, reason))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file holding `handle`.
    pub fn object_path(&self, handle: &Handle) -> PathBuf {
        match handle.object_type {
            ObjectType::Config => self.root.join(CONFIG_FILE),
            ObjectType::Data => self
                .root
                .join(ObjectType::Data.dir_name())
                .join(handle.id.prefix())
                .join(handle.id.to_hex()),
            other => self.root.join(other.dir_name()).join(handle.id.to_hex()),
        }
    }

    /// Write an object atomically.
    pub fn save(&self, handle: &Handle, data: &[u8]) -> Result<()> {
        let path = self.object_path(handle);
        let parent = path
            .parent()
            .ok_or_else(|| Error::invalid_repository(&self.root, "object path has no parent"))?;
        fs::create_dir_all(parent)?;

        let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
        temp_file.write_all(data)?;
        temp_file.flush()?;
        temp_file.persist(&path)?;

        Ok(())
    }

    /// Remove an object.
    pub fn remove(&self, handle: &Handle) -> Result<()> {
        let path = self.object_path(handle);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::object_not_found(*handle)),
            Err(e) => Err(e.into()),
        }
    }
}

impl Backend for LocalBackend {
    fn list<'a>(
        &'a self,
        object_type: ObjectType,
        cancel: &'a CancelToken,
    ) -> Result<IdStream<'a>> {
        cancel.check()?;

        // The config file is not addressed by id.
        if object_type == ObjectType::Config {
            return Ok(Box::new(std::iter::empty()));
        }

        let dir = self.root.join(object_type.dir_name());
        let listing = match fs::read_dir(&dir) {
            Ok(listing) => Some(listing),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(Error::enumeration(object_type, e.to_string())),
        };

        let iter = if object_type == ObjectType::Data {
            DirIds {
                object_type,
                shards: listing,
                current: None,
                cancel,
            }
        } else {
            DirIds {
                object_type,
                shards: None,
                current: listing,
                cancel,
            }
        };

        Ok(Box::new(iter))
    }

    fn load(
        &self,
        handle: &Handle,
        offset: u64,
        length: u64,
        cancel: &CancelToken,
    ) -> Result<Box<dyn ObjectStream>> {
        cancel.check()?;

        let path = self.object_path(handle);
        let mut file = fs::File::open(&path).map_err(|e| Error::fetch(*handle, e))?;

        if offset > 0 {
            file.seek(SeekFrom::Start(offset))
                .map_err(|e| Error::fetch(*handle, e))?;
        }

        let limit = if length == 0 { u64::MAX } else { length };
        Ok(Box::new(FileStream {
            inner: file.take(limit),
        }))
    }
}

/// Stream over a repository file.
struct FileStream {
    inner: io::Take<fs::File>,
}

impl Read for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl ObjectStream for FileStream {
    fn close(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }
}

/// Lazily walks a type directory, descending into shard directories when
/// `shards` is set.
struct DirIds<'a> {
    object_type: ObjectType,
    shards: Option<fs::ReadDir>,
    current: Option<fs::ReadDir>,
    cancel: &'a CancelToken,
}

impl DirIds<'_> {
    fn fail(&mut self, err: io::Error) -> Option<Result<ObjectId>> {
        self.shards = None;
        self.current = None;
        Some(Err(Error::enumeration(self.object_type, err.to_string())))
    }
}

impl Iterator for DirIds<'_> {
    type Item = Result<ObjectId>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.cancel.is_cancelled() {
                self.shards = None;
                self.current = None;
                return Some(Err(Error::Cancelled));
            }

            if let Some(current) = self.current.as_mut() {
                match current.next() {
                    Some(Ok(entry)) => {
                        let path = entry.path();
                        if !path.is_file() {
                            continue;
                        }
                        // Temporary files and foreign names are not objects.
                        if let Some(id) = path
                            .file_name()
                            .and_then(|n| n.to_str())
                            .and_then(|n| ObjectId::from_hex(n).ok())
                        {
                            return Some(Ok(id));
                        }
                        continue;
                    }
                    Some(Err(e)) => return self.fail(e),
                    None => self.current = None,
                }
            }

            let shards = self.shards.as_mut()?;
            match shards.next() {
                Some(Ok(entry)) => {
                    let path = entry.path();
                    if path.is_dir() {
                        match fs::read_dir(&path) {
                            Ok(listing) => self.current = Some(listing),
                            Err(e) => return self.fail(e),
                        }
                    }
                }
                Some(Err(e)) => return self.fail(e),
                None => {
                    self.shards = None;
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::IdSet;
    use tempfile::TempDir;

    fn collect(backend: &LocalBackend, object_type: ObjectType) -> IdSet {
        let cancel = CancelToken::new();
        backend
            .list(object_type, &cancel)
            .unwrap()
            .collect::<Result<IdSet>>()
            .unwrap()
    }

    #[test]
    fn test_open_missing_repository() {
        let temp_dir = TempDir::new().unwrap();
        let err = LocalBackend::open(temp_dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, Error::InvalidRepository { .. }));

        let err = LocalBackend::open(temp_dir.path()).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn test_init_then_open() {
        let temp_dir = TempDir::new().unwrap();
        LocalBackend::init(temp_dir.path()).unwrap();
        let backend = LocalBackend::open(temp_dir.path()).unwrap();
        assert!(backend.root().join("snapshots").is_dir());
        assert!(backend.root().join("data").is_dir());
    }

    #[test]
    fn test_list_flat_and_sharded() {
        let temp_dir = TempDir::new().unwrap();
        let backend = LocalBackend::init(temp_dir.path()).unwrap();

        let snaps: IdSet = (0..3u8).map(|i| ObjectId::hash_bytes(&[b's', i])).collect();
        for id in &snaps {
            backend
                .save(&Handle::new(ObjectType::Snapshot, *id), b"snapshot")
                .unwrap();
        }
        let packs: IdSet = (0..4u8).map(|i| ObjectId::hash_bytes(&[b'p', i])).collect();
        for id in &packs {
            backend
                .save(&Handle::new(ObjectType::Data, *id), b"pack")
                .unwrap();
        }

        assert_eq!(collect(&backend, ObjectType::Snapshot), snaps);
        assert_eq!(collect(&backend, ObjectType::Data), packs);
        assert!(collect(&backend, ObjectType::Index).is_empty());
    }

    #[test]
    fn test_list_skips_foreign_files() {
        let temp_dir = TempDir::new().unwrap();
        let backend = LocalBackend::init(temp_dir.path()).unwrap();
        fs::write(backend.root().join("index").join(".tmpXYZ"), b"partial").unwrap();
        fs::write(backend.root().join("index").join("README"), b"hi").unwrap();

        assert!(collect(&backend, ObjectType::Index).is_empty());
    }

    #[test]
    fn test_list_cancelled() {
        let temp_dir = TempDir::new().unwrap();
        let backend = LocalBackend::init(temp_dir.path()).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(backend.list(ObjectType::Index, &cancel).is_err());
    }

    #[test]
    fn test_load_full_and_ranged() {
        let temp_dir = TempDir::new().unwrap();
        let backend = LocalBackend::init(temp_dir.path()).unwrap();
        let cancel = CancelToken::new();

        let handle = Handle::new(ObjectType::Data, ObjectId::hash_bytes(b"0123456789"));
        backend.save(&handle, b"0123456789").unwrap();

        let mut full = Vec::new();
        let mut rd = backend.load(&handle, 0, 0, &cancel).unwrap();
        rd.read_to_end(&mut full).unwrap();
        rd.close().unwrap();
        assert_eq!(full, b"0123456789");

        let mut part = Vec::new();
        let mut rd = backend.load(&handle, 3, 4, &cancel).unwrap();
        rd.read_to_end(&mut part).unwrap();
        rd.close().unwrap();
        assert_eq!(part, b"3456");
    }

    #[test]
    fn test_load_missing_is_fetch_error() {
        let temp_dir = TempDir::new().unwrap();
        let backend = LocalBackend::init(temp_dir.path()).unwrap();
        let handle = Handle::new(ObjectType::Index, ObjectId::hash_bytes(b"gone"));
        let err = backend
            .load(&handle, 0, 0, &CancelToken::new())
            .err()
            .unwrap();
        assert!(matches!(err, Error::Fetch { .. }));
    }

    #[test]
    fn test_remove() {
        let temp_dir = TempDir::new().unwrap();
        let backend = LocalBackend::init(temp_dir.path()).unwrap();
        let handle = Handle::new(ObjectType::Snapshot, ObjectId::hash_bytes(b"s"));
        backend.save(&handle, b"s").unwrap();
        backend.remove(&handle).unwrap();
        assert!(!backend.object_path(&handle).exists());
        assert!(matches!(
            backend.remove(&handle).unwrap_err(),
            Error::ObjectNotFound { .. }
        ));
    }
}
