/*
 * Copyright 2024-2025 The cask-store developers
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! The embedded key-value index.
//!
//! The index holds the typed level-1 databases keyed by root digest, the
//! per-leaf size bookkeeping for the stage and cache areas, the staged set
//! consumed by the next commit, and the parent-commit markers.
//!
//! A level-1 value is either empty, meaning the object's leaves are not
//! cached locally, or the concatenation of the object's leaf digests, which
//! necessarily hashes back to its key.

use std::fmt;
use std::fs;
use std::ops::Bound;
use std::path::Path;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::digest::Digest;

mod level0;

pub use level0::Area;

/// The name of the index directory inside the repository state directory.
const MDB_DIR: &str = "mdb";

/// The maximum size of the memory map backing the index.
const MAP_SIZE: usize = 1 << 36;

/// The number of named databases in the index.
const MAX_DBS: u32 = 10;

/// The type tag of a level-1 object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Blob,
    Commit,
    Prefix,
    Tree,
    Snapshot,
}

/// The probe order for `Store::get_any`.
///
/// Digests are unique across types, so at most one database can hold a given
/// key; the fixed order only makes the probe deterministic.
const PROBE_ORDER: [ObjectType; 5] = [
    ObjectType::Blob,
    ObjectType::Commit,
    ObjectType::Prefix,
    ObjectType::Tree,
    ObjectType::Snapshot,
];

/// The transactional index of a repository.
pub struct Store {
    env: Env,
    stage: Database<Bytes, Bytes>,
    blobs: Database<Bytes, Bytes>,
    commits: Database<Bytes, Bytes>,
    prefixes: Database<Bytes, Bytes>,
    trees: Database<Bytes, Bytes>,
    snapshots: Database<Bytes, Bytes>,
    parents: Database<Bytes, Bytes>,
    level0_stage: Database<Bytes, Bytes>,
    level0_cache: Database<Bytes, Bytes>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").field("path", &self.env.path()).finish()
    }
}

impl Store {
    /// Open the index of the repository described by `config`, creating it if
    /// necessary.
    ///
    /// # Errors
    /// - `Error::Io`: The index directory could not be created.
    /// - `Error::Index`: The environment could not be opened.
    pub fn open(config: &Config) -> crate::Result<Self> {
        let mdb_dir = config.cask_dir().join(MDB_DIR);
        fs::create_dir_all(&mdb_dir)?;
        Self::open_at(&mdb_dir)
    }

    fn open_at(mdb_dir: &Path) -> crate::Result<Self> {
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(MAP_SIZE)
                .max_dbs(MAX_DBS)
                .open(mdb_dir)?
        };

        let mut txn = env.write_txn()?;
        let stage = env.create_database(&mut txn, Some("stage"))?;
        let blobs = env.create_database(&mut txn, Some("l1blobs"))?;
        let commits = env.create_database(&mut txn, Some("l1commits"))?;
        let prefixes = env.create_database(&mut txn, Some("l1prefixes"))?;
        let trees = env.create_database(&mut txn, Some("l1trees"))?;
        let snapshots = env.create_database(&mut txn, Some("l1snapshots"))?;
        let parents = env.create_database(&mut txn, Some("l1parents"))?;
        let level0_stage = env.create_database(&mut txn, Some("l0stage"))?;
        let level0_cache = env.create_database(&mut txn, Some("l0cache"))?;
        txn.commit()?;

        Ok(Store {
            env,
            stage,
            blobs,
            commits,
            prefixes,
            trees,
            snapshots,
            parents,
            level0_stage,
            level0_cache,
        })
    }

    /// The level-1 database holding objects of the given type.
    fn level1(&self, object_type: ObjectType) -> Database<Bytes, Bytes> {
        match object_type {
            ObjectType::Blob => self.blobs,
            ObjectType::Commit => self.commits,
            ObjectType::Prefix => self.prefixes,
            ObjectType::Tree => self.trees,
            ObjectType::Snapshot => self.snapshots,
        }
    }

    /// Upsert a level-1 entry into the database for its type.
    pub fn put_typed(&self, key: &Digest, value: &[u8], object_type: ObjectType) -> crate::Result<()> {
        let mut txn = self.env.write_txn()?;
        self.level1(object_type).put(&mut txn, key.as_bytes(), value)?;
        txn.commit()?;
        Ok(())
    }

    /// Insert empty-valued level-1 entries for every key not already
    /// present, in a single transaction.
    ///
    /// Level-1 entries are never mutated in place, so a key which is already
    /// present keeps its value.
    pub fn put_absent_batch(&self, keys: &[Digest], object_type: ObjectType) -> crate::Result<()> {
        let database = self.level1(object_type);
        let mut txn = self.env.write_txn()?;
        for key in keys {
            if database.get(&txn, key.as_bytes())?.is_none() {
                database.put(&mut txn, key.as_bytes(), &[])?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Return the value of the level-1 entry of the given type, if present.
    pub fn get_typed(&self, object_type: ObjectType, key: &Digest) -> crate::Result<Option<Vec<u8>>> {
        let txn = self.env.read_txn()?;
        let value = self.level1(object_type).get(&txn, key.as_bytes())?;
        Ok(value.map(<[u8]>::to_vec))
    }

    /// Probe the level-1 databases for `key` and return its value and type.
    pub fn get_any(&self, key: &Digest) -> crate::Result<Option<(Vec<u8>, ObjectType)>> {
        let txn = self.env.read_txn()?;
        for object_type in PROBE_ORDER {
            if let Some(value) = self.level1(object_type).get(&txn, key.as_bytes())? {
                return Ok(Some((value.to_vec(), object_type)));
            }
        }
        Ok(None)
    }

    /// Return whether a level-1 entry of the given type exists.
    pub fn contains(&self, object_type: ObjectType, key: &Digest) -> crate::Result<bool> {
        let txn = self.env.read_txn()?;
        Ok(self.level1(object_type).get(&txn, key.as_bytes())?.is_some())
    }

    /// List the keys of a level-1 database whose hex form starts with
    /// `hex_prefix`, in ascending key order.
    ///
    /// The listing seeks the cursor to the first candidate key and stops at
    /// the first key which no longer matches the prefix.
    pub fn list_typed(&self, object_type: ObjectType, hex_prefix: &str) -> crate::Result<Vec<Digest>> {
        let mut padded = hex_prefix.to_owned();
        if padded.len() % 2 == 1 {
            padded.push('0');
        }
        let start = hex::decode(&padded).map_err(|_| crate::Error::BadDigestSize)?;

        let txn = self.env.read_txn()?;
        let mut keys = Vec::new();
        let range = (Bound::Included(start.as_slice()), Bound::<&[u8]>::Unbounded);
        for item in self.level1(object_type).range(&txn, &range)? {
            let (key, _) = item?;
            if !hex::encode(key).starts_with(hex_prefix) {
                break;
            }
            keys.push(Digest::from_bytes(key)?);
        }
        Ok(keys)
    }

    /// The number of blob entries in the level-1 index.
    pub fn blob_count(&self) -> crate::Result<u64> {
        let txn = self.env.read_txn()?;
        Ok(self.blobs.len(&txn)?)
    }

    /// Add a root digest to the staged set.
    pub fn stage_add(&self, key: &Digest) -> crate::Result<()> {
        let mut txn = self.env.write_txn()?;
        self.stage.put(&mut txn, key.as_bytes(), &[])?;
        txn.commit()?;
        Ok(())
    }

    /// List the staged set in ascending key order.
    pub fn stage_list(&self) -> crate::Result<Vec<Digest>> {
        let txn = self.env.read_txn()?;
        let mut keys = Vec::new();
        for item in self.stage.iter(&txn)? {
            let (key, _) = item?;
            keys.push(Digest::from_bytes(key)?);
        }
        Ok(keys)
    }

    /// Remove every entry from the staged set.
    pub fn stage_clear(&self) -> crate::Result<()> {
        let mut txn = self.env.write_txn()?;
        self.stage.clear(&mut txn)?;
        txn.commit()?;
        Ok(())
    }

    /// Mark a commit as being the parent of another commit.
    pub fn mark_parent(&self, key: &Digest) -> crate::Result<()> {
        let mut txn = self.env.write_txn()?;
        self.parents.put(&mut txn, key.as_bytes(), &[])?;
        txn.commit()?;
        Ok(())
    }

    /// Return whether a commit is marked as a parent.
    pub fn is_parent(&self, key: &Digest) -> crate::Result<bool> {
        let txn = self.env.read_txn()?;
        Ok(self.parents.get(&txn, key.as_bytes())?.is_some())
    }

    /// List the commits which are not marked as the parent of any other
    /// commit.
    pub fn top_most_commits(&self) -> crate::Result<Vec<Digest>> {
        let txn = self.env.read_txn()?;
        let mut keys = Vec::new();
        for item in self.commits.iter(&txn)? {
            let (key, _) = item?;
            if self.parents.get(&txn, key)?.is_none() {
                keys.push(Digest::from_bytes(key)?);
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    use crate::digest::leaf_digest;

    fn open_store(directory: &Path) -> Store {
        Store::open_at(directory).unwrap()
    }

    fn digest_of(data: &[u8]) -> Digest {
        leaf_digest(data, 1024, 0, true)
    }

    #[test]
    fn get_any_probes_all_types() {
        let directory = tempdir().unwrap();
        let store = open_store(directory.path());

        let key = digest_of(b"tree");
        store.put_typed(&key, b"value", ObjectType::Tree).unwrap();

        let (value, object_type) = store.get_any(&key).unwrap().unwrap();
        assert_eq!(value, b"value");
        assert_eq!(object_type, ObjectType::Tree);
        assert!(store.get_any(&digest_of(b"other")).unwrap().is_none());
    }

    #[test]
    fn list_typed_respects_hex_prefix() {
        let directory = tempdir().unwrap();
        let store = open_store(directory.path());

        let keys = (0u8..8)
            .map(|index| digest_of(&[index]))
            .collect::<Vec<_>>();
        for key in &keys {
            store.put_typed(key, &[], ObjectType::Blob).unwrap();
        }

        let all = store.list_typed(ObjectType::Blob, "").unwrap();
        assert_eq!(all.len(), keys.len());

        let prefix = &keys[3].to_hex()[..3];
        let matches = store.list_typed(ObjectType::Blob, prefix).unwrap();
        assert!(matches.contains(&keys[3]));
        for key in &matches {
            assert!(key.to_hex().starts_with(prefix));
        }
    }

    #[test]
    fn stage_add_list_clear() {
        let directory = tempdir().unwrap();
        let store = open_store(directory.path());

        let first = digest_of(b"first");
        let second = digest_of(b"second");
        store.stage_add(&first).unwrap();
        store.stage_add(&second).unwrap();
        // Staging the same digest twice is idempotent.
        store.stage_add(&first).unwrap();

        let staged = store.stage_list().unwrap();
        assert_eq!(staged.len(), 2);

        store.stage_clear().unwrap();
        assert!(store.stage_list().unwrap().is_empty());
    }

    #[test]
    fn top_most_excludes_parents() {
        let directory = tempdir().unwrap();
        let store = open_store(directory.path());

        let parent = digest_of(b"parent");
        let child = digest_of(b"child");
        store.put_typed(&parent, b"x", ObjectType::Commit).unwrap();
        store.put_typed(&child, b"y", ObjectType::Commit).unwrap();
        store.mark_parent(&parent).unwrap();

        let tops = store.top_most_commits().unwrap();
        assert_eq!(tops, vec![child]);
        assert!(store.is_parent(&parent).unwrap());
        assert!(!store.is_parent(&child).unwrap());
    }
}
