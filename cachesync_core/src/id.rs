//! Content-derived object identifiers and identifier sets.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::collections::hash_set;
use std::fmt;

/// Id size in bytes (BLAKE3 produces 256-bit digests).
pub const ID_SIZE: usize = 32;

/// Number of hex characters shown by [`ObjectId::short`].
const SHORT_LEN: usize = 8;

/// A 32-byte identifier naming one repository object.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; ID_SIZE]);

impl ObjectId {
    /// Parse an id from a hex string (64 hex characters).
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        if hex_str.len() != ID_SIZE * 2 {
            return Err(Error::invalid_id(format!(
                "Expected {} hex characters, got {}",
                ID_SIZE * 2,
                hex_str.len()
            )));
        }

        let bytes =
            hex::decode(hex_str).map_err(|e| Error::invalid_id(format!("Invalid hex: {}", e)))?;

        let mut id = [0u8; ID_SIZE];
        id.copy_from_slice(&bytes);
        Ok(ObjectId(id))
    }

    /// Convert to hex string (64 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Abbreviated form used in progress output.
    pub fn short(&self) -> String {
        let mut s = self.to_hex();
        s.truncate(SHORT_LEN);
        s
    }

    /// First 2 hex characters (for directory sharding).
    pub fn prefix(&self) -> String {
        hex::encode(&self.0[..1])
    }

    /// Remaining 62 hex characters (for filename).
    pub fn suffix(&self) -> String {
        hex::encode(&self.0[1..])
    }

    /// Derive an id from raw bytes.
    pub fn hash_bytes(data: &[u8]) -> Self {
        ObjectId(*blake3::hash(data).as_bytes())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl std::str::FromStr for ObjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ObjectId::from_hex(s)
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ObjectId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A set of object ids.
///
/// Built fresh for every reconciliation pass of one object type and handed to
/// [`Cache::retain`](crate::Cache::retain) as the set of ids to keep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdSet(HashSet<ObjectId>);

impl IdSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an id. Returns `true` if it was not already present.
    pub fn insert(&mut self, id: ObjectId) -> bool {
        self.0.insert(id)
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.0.contains(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Ids in ascending order.
    pub fn to_sorted_vec(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self.0.iter().copied().collect();
        ids.sort();
        ids
    }
}

impl FromIterator<ObjectId> for IdSet {
    fn from_iter<I: IntoIterator<Item = ObjectId>>(iter: I) -> Self {
        IdSet(iter.into_iter().collect())
    }
}

impl IntoIterator for IdSet {
    type Item = ObjectId;
    type IntoIter = hash_set::IntoIter<ObjectId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a IdSet {
    type Item = &'a ObjectId;
    type IntoIter = hash_set::Iter<'a, ObjectId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_hello_world() {
        let id = ObjectId::hash_bytes(b"hello world");
        assert_eq!(
            id.to_hex(),
            "d74981efa70a0c880b8d8c1985d075dbcbf679b99a5f9914e5aaf96b831a9e24"
        );
        assert_eq!(id.short(), "d74981ef");
    }

    #[test]
    fn test_id_from_hex_invalid_length() {
        assert!(ObjectId::from_hex("abcd").is_err());
        assert!(ObjectId::from_hex("").is_err());
    }

    #[test]
    fn test_id_from_hex_invalid_chars() {
        let invalid = "z".repeat(64);
        assert!(ObjectId::from_hex(&invalid).is_err());
    }

    #[test]
    fn test_id_serde_as_hex_string() {
        let id = ObjectId::hash_bytes(b"x");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_hex()));
        let back: ObjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_id_set_insert_reports_new() {
        let a = ObjectId::hash_bytes(b"a");
        let mut set = IdSet::new();
        assert!(set.insert(a));
        assert!(!set.insert(a));
        assert_eq!(set.len(), 1);
        assert!(set.contains(&a));
    }

    #[test]
    fn test_id_set_sorted_vec() {
        let ids: Vec<ObjectId> = (0..5u8).map(|i| ObjectId::hash_bytes(&[i])).collect();
        let set: IdSet = ids.iter().rev().copied().collect();
        let mut expected = ids.clone();
        expected.sort();
        assert_eq!(set.to_sorted_vec(), expected);
    }

    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            max_shrink_iters: 10000,
            ..ProptestConfig::default()
        })]

        /// Hex encoding round-trips
        #[test]
        fn prop_hex_roundtrip(bytes in prop::array::uniform32(any::<u8>())) {
            let id = ObjectId(bytes);
            prop_assert_eq!(ObjectId::from_hex(&id.to_hex())?, id);
        }

        /// Prefix + suffix reconstruction equals full hex
        #[test]
        fn prop_prefix_suffix_concat(bytes in prop::array::uniform32(any::<u8>())) {
            let id = ObjectId(bytes);
            prop_assert_eq!(format!("{}{}", id.prefix(), id.suffix()), id.to_hex());
        }

        /// Set membership does not depend on insertion order
        #[test]
        fn prop_id_set_order_independent(
            seeds in prop::collection::vec(any::<u8>(), 0..32)
        ) {
            let ids: Vec<ObjectId> = seeds.iter().map(|s| ObjectId::hash_bytes(&[*s])).collect();
            let forward: IdSet = ids.iter().copied().collect();
            let backward: IdSet = ids.iter().rev().copied().collect();
            prop_assert_eq!(forward, backward);
        }
    }
}
