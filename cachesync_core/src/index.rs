//! Blob-to-pack index and the tree-pack query used for prefetching.

use crate::backend::Backend;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::handle::{Handle, ObjectType};
use crate::id::ObjectId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::io::Read;
use tracing::debug;

/// Source of the ids of packs holding at least one tree blob.
pub trait TreePackSource {
    fn tree_pack_ids(&self) -> Vec<ObjectId>;
}

/// Kind of blob stored in a pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobType {
    /// File content.
    Data,
    /// Directory metadata, read on every tree traversal.
    Tree,
}

/// Location of one blob inside a pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedBlob {
    pub id: ObjectId,
    pub blob_type: BlobType,
    pub pack_id: ObjectId,
    pub offset: u64,
    pub length: u64,
}

/// One index fragment mapping blobs to the packs containing them.
#[derive(Debug, Clone, Default)]
pub struct Index {
    blobs: HashMap<(BlobType, ObjectId), PackedBlob>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a blob location, replacing any earlier one for the same blob.
    pub fn store(&mut self, blob: PackedBlob) {
        self.blobs.insert((blob.blob_type, blob.id), blob);
    }

    pub fn has(&self, blob_type: BlobType, id: &ObjectId) -> bool {
        self.blobs.contains_key(&(blob_type, *id))
    }

    pub fn lookup(&self, blob_type: BlobType, id: &ObjectId) -> Option<&PackedBlob> {
        self.blobs.get(&(blob_type, *id))
    }

    /// Packs holding at least one tree blob, sorted and without duplicates.
    pub fn tree_packs(&self) -> Vec<ObjectId> {
        self.blobs
            .values()
            .filter(|b| b.blob_type == BlobType::Tree)
            .map(|b| b.pack_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Decode an unencrypted JSON index file.
    ///
    /// ```json
    /// {"packs":[{"id":"<hex>","blobs":[{"id":"<hex>","type":"tree","offset":0,"length":42}]}]}
    /// ```
    pub fn from_json(name: &str, data: &[u8]) -> Result<Self> {
        let file: IndexFile =
            serde_json::from_slice(data).map_err(|e| Error::invalid_index(name, e.to_string()))?;

        let mut index = Index::new();
        for pack in file.packs {
            for blob in pack.blobs {
                index.store(PackedBlob {
                    id: blob.id,
                    blob_type: blob.blob_type,
                    pack_id: pack.id,
                    offset: blob.offset,
                    length: blob.length,
                });
            }
        }

        Ok(index)
    }
}

impl TreePackSource for Index {
    fn tree_pack_ids(&self) -> Vec<ObjectId> {
        self.tree_packs()
    }
}

#[derive(Deserialize)]
struct IndexFile {
    packs: Vec<PackEntry>,
}

#[derive(Deserialize)]
struct PackEntry {
    id: ObjectId,
    blobs: Vec<BlobEntry>,
}

#[derive(Deserialize)]
struct BlobEntry {
    id: ObjectId,
    #[serde(rename = "type")]
    blob_type: BlobType,
    offset: u64,
    length: u64,
}

/// All index fragments of a repository, queried as one.
#[derive(Debug, Clone, Default)]
pub struct MasterIndex {
    indexes: Vec<Index>,
}

impl MasterIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: Index) {
        self.indexes.push(index);
    }

    pub fn has(&self, blob_type: BlobType, id: &ObjectId) -> bool {
        self.indexes.iter().any(|idx| idx.has(blob_type, id))
    }

    /// Location of a blob in the first fragment that knows it.
    pub fn lookup(&self, blob_type: BlobType, id: &ObjectId) -> Option<&PackedBlob> {
        self.indexes.iter().find_map(|idx| idx.lookup(blob_type, id))
    }

    /// Number of fragments.
    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    /// Load and decode every index object in the repository.
    pub fn load(backend: &dyn Backend, cancel: &CancelToken) -> Result<Self> {
        let mut master = MasterIndex::new();

        for id in backend.list(ObjectType::Index, cancel)? {
            let id = id?;
            let handle = Handle::new(ObjectType::Index, id);

            let mut rd = backend.load(&handle, 0, 0, cancel)?;
            let mut data = Vec::new();
            if let Err(e) = rd.read_to_end(&mut data) {
                let _ = rd.close();
                return Err(Error::fetch(handle, e));
            }
            rd.close().map_err(|e| Error::stream_release(handle, e))?;

            let index = Index::from_json(&id.to_hex(), &data)?;
            debug!(index = %id.short(), blobs = index.len(), "loaded index");
            master.insert(index);
        }

        Ok(master)
    }
}

impl TreePackSource for MasterIndex {
    /// Tree packs across all fragments; a pack named by several fragments
    /// appears once.
    fn tree_pack_ids(&self) -> Vec<ObjectId> {
        self.indexes
            .iter()
            .flat_map(|idx| idx.tree_packs())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
