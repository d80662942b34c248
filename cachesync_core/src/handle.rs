//! Object types and handles.

use crate::error::{Error, Result};
use crate::id::ObjectId;
use serde::Serialize;
use std::fmt;

/// Kinds of repository object. Each type has its own cache partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    /// Pack file holding data and tree blobs.
    Data,
    Key,
    Lock,
    Snapshot,
    Index,
    Config,
}

impl ObjectType {
    /// Every object type.
    pub const ALL: [ObjectType; 6] = [
        ObjectType::Data,
        ObjectType::Key,
        ObjectType::Lock,
        ObjectType::Snapshot,
        ObjectType::Index,
        ObjectType::Config,
    ];

    /// Returns the type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Data => "data",
            ObjectType::Key => "key",
            ObjectType::Lock => "lock",
            ObjectType::Snapshot => "snapshot",
            ObjectType::Index => "index",
            ObjectType::Config => "config",
        }
    }

    /// Parse a type name. Plural directory names are accepted as well.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "data" => Ok(ObjectType::Data),
            "key" | "keys" => Ok(ObjectType::Key),
            "lock" | "locks" => Ok(ObjectType::Lock),
            "snapshot" | "snapshots" => Ok(ObjectType::Snapshot),
            "index" => Ok(ObjectType::Index),
            "config" => Ok(ObjectType::Config),
            _ => Err(Error::unknown_object_type(s)),
        }
    }

    /// Directory holding objects of this type, in repositories and caches alike.
    pub fn dir_name(&self) -> &'static str {
        match self {
            ObjectType::Data => "data",
            ObjectType::Key => "keys",
            ObjectType::Lock => "locks",
            ObjectType::Snapshot => "snapshots",
            ObjectType::Index => "index",
            ObjectType::Config => "config",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for ObjectType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ObjectType::parse(s)
    }
}

/// Address of one object: its type plus its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    pub object_type: ObjectType,
    pub id: ObjectId,
}

impl Handle {
    pub fn new(object_type: ObjectType, id: ObjectId) -> Self {
        Self { object_type, id }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}/{}>", self.object_type, self.id.short())
    }
}
