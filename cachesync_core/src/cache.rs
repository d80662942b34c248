//! Local object cache.

use crate::config;
use crate::error::{Error, Result};
use crate::handle::{Handle, ObjectType};
use crate::id::{IdSet, ObjectId};
use serde::Serialize;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Statistics from a [`Cache::retain`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetainStats {
    /// Number of entries deleted.
    pub objects_deleted: usize,
    /// Bytes freed.
    pub bytes_freed: u64,
}

/// A local store of object copies keyed by [`Handle`].
///
/// Operations are idempotent and make no ordering guarantees across handles.
pub trait Cache: Send + Sync {
    /// Whether an entry for `handle` is present. Has no side effects.
    fn has(&self, handle: &Handle) -> bool;

    /// Persist everything `reader` yields as the entry for `handle`.
    fn save(&self, handle: &Handle, reader: &mut dyn Read) -> Result<()>;

    /// Delete every entry of `object_type` whose id is not in `valid`.
    ///
    /// Entries of other types are never touched.
    fn retain(&self, object_type: ObjectType, valid: &IdSet) -> Result<RetainStats>;
}

/// Name of the version marker file.
const VERSION_FILE: &str = "version";

/// Name of the cache directory tag file.
const CACHEDIR_TAG_FILE: &str = "CACHEDIR.TAG";

/// Contents of the cache directory tag, see <https://bford.info/cachedir/>.
const CACHEDIR_TAG: &str = "Signature: 8a477f597d28d172789f06886806bc55\n\
# This file is a cache directory tag created by cachesync.\n\
# For information about cache directory tags, see:\n\
#\thttps://bford.info/cachedir/\n";

/// Entry count and size of one object type in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeUsage {
    pub object_type: ObjectType,
    pub entries: usize,
    pub bytes: u64,
}

/// A cache on the local filesystem.
///
/// Entries live at `{root}/{type dir}/{prefix}/{suffix}`.
#[derive(Debug)]
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    /// Open the cache at `root`, creating it if it does not exist yet.
    pub fn open_or_create<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let version_path = root.join(VERSION_FILE);

        if version_path.exists() {
            let content = fs::read_to_string(&version_path)?;
            config::check_version(&content).map_err(|reason| Error::invalid_cache(&root, reason))?;
        } else {
            fs::create_dir_all(&root)?;
            fs::write(&version_path, config::render_version())?;
            debug!(path = %root.display(), "created cache directory");
        }

        let tag_path = root.join(CACHEDIR_TAG_FILE);
        if !tag_path.exists() {
            fs::write(&tag_path, CACHEDIR_TAG)?;
        }

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn type_dir(&self, object_type: ObjectType) -> PathBuf {
        self.root.join(object_type.dir_name())
    }

    /// Path of the entry for `handle`.
    pub fn entry_path(&self, handle: &Handle) -> PathBuf {
        self.type_dir(handle.object_type)
            .join(handle.id.prefix())
            .join(handle.id.suffix())
    }

    /// Open a cached entry for reading.
    pub fn load(&self, handle: &Handle) -> Result<fs::File> {
        match fs::File::open(self.entry_path(handle)) {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::object_not_found(*handle)),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove one entry. Removing an absent entry is not an error.
    pub fn remove(&self, handle: &Handle) -> Result<()> {
        match fs::remove_file(self.entry_path(handle)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Ids of every cached entry of `object_type`.
    pub fn list(&self, object_type: ObjectType) -> Result<IdSet> {
        let mut ids = IdSet::new();
        self.walk(object_type, |id, _path| {
            ids.insert(id);
            Ok(())
        })?;
        Ok(ids)
    }

    /// Entry count and bytes for every object type.
    pub fn stats(&self) -> Result<Vec<TypeUsage>> {
        let mut usage = Vec::new();

        for object_type in ObjectType::ALL {
            let mut entries = 0;
            let mut bytes = 0;
            self.walk(object_type, |_id, path| {
                entries += 1;
                bytes += fs::metadata(path)?.len();
                Ok(())
            })?;
            usage.push(TypeUsage {
                object_type,
                entries,
                bytes,
            });
        }

        Ok(usage)
    }

    /// Visit every entry of `object_type`, skipping anything that is not a
    /// well-formed entry file.
    fn walk<F>(&self, object_type: ObjectType, mut visit: F) -> io::Result<()>
    where
        F: FnMut(ObjectId, &Path) -> io::Result<()>,
    {
        let type_dir = self.type_dir(object_type);
        if !type_dir.exists() {
            return Ok(());
        }

        for shard_entry in fs::read_dir(&type_dir)? {
            let shard_path = shard_entry?.path();
            if !shard_path.is_dir() {
                continue;
            }

            let prefix = shard_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("")
                .to_string();

            for entry in fs::read_dir(&shard_path)? {
                let entry_path = entry?.path();
                if !entry_path.is_file() {
                    continue;
                }

                let suffix = entry_path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("");
                if let Ok(id) = ObjectId::from_hex(&format!("{}{}", prefix, suffix)) {
                    visit(id, &entry_path)?;
                }
            }
        }

        Ok(())
    }

    fn write_entry(&self, handle: &Handle, reader: &mut dyn Read) -> io::Result<()> {
        let path = self.entry_path(handle);
        let parent = path
            .parent()
            .ok_or_else(|| io::Error::other("entry path has no parent"))?;
        fs::create_dir_all(parent)?;

        let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
        io::copy(reader, &mut temp_file)?;
        temp_file.flush()?;
        temp_file.persist(&path).map_err(|e| e.error)?;

        Ok(())
    }

    fn sweep(&self, object_type: ObjectType, valid: &IdSet) -> io::Result<RetainStats> {
        let mut stale = Vec::new();
        self.walk(object_type, |id, path| {
            if !valid.contains(&id) {
                stale.push((id, path.to_path_buf()));
            }
            Ok(())
        })?;

        let mut stats = RetainStats::default();
        for (id, path) in stale {
            let len = fs::metadata(&path)?.len();
            fs::remove_file(&path)?;
            stats.objects_deleted += 1;
            stats.bytes_freed += len;
            debug!(handle = %Handle::new(object_type, id), "evicted cache entry");
        }

        if stats.objects_deleted > 0 {
            self.prune_empty_shards(object_type)?;
        }

        Ok(stats)
    }

    /// Remove shard directories left empty by evictions.
    fn prune_empty_shards(&self, object_type: ObjectType) -> io::Result<()> {
        for shard_entry in fs::read_dir(self.type_dir(object_type))? {
            let shard_path = shard_entry?.path();
            if shard_path.is_dir()
                && let Ok(mut entries) = fs::read_dir(&shard_path)
                && entries.next().is_none()
            {
                let _ = fs::remove_dir(&shard_path);
            }
        }
        Ok(())
    }
}

impl Cache for DiskCache {
    fn has(&self, handle: &Handle) -> bool {
        self.entry_path(handle).is_file()
    }

    fn save(&self, handle: &Handle, reader: &mut dyn Read) -> Result<()> {
        self.write_entry(handle, reader)
            .map_err(|e| Error::cache_write(handle, e.to_string()))
    }

    fn retain(&self, object_type: ObjectType, valid: &IdSet) -> Result<RetainStats> {
        self.sweep(object_type, valid)
            .map_err(|e| Error::cache_write_type(object_type, e.to_string()))
    }
}

/// Default location of the cache directory.
///
/// Uses `$XDG_CACHE_HOME/cachesync`, falling back to `$HOME/.cache/cachesync`.
pub fn default_cache_dir() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os("XDG_CACHE_HOME").filter(|d| !d.is_empty()) {
        return Some(PathBuf::from(dir).join("cachesync"));
    }

    std::env::var_os("HOME")
        .filter(|d| !d.is_empty())
        .map(|home| PathBuf::from(home).join(".cache").join("cachesync"))
}
