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

//! Per-leaf bookkeeping.
//!
//! Every leaf file on disk has an entry in the size database of its area,
//! mapping the leaf digest to its on-disk size as a little-endian `u32`.

use std::convert::TryInto;
use std::ops::Bound;

use heed::types::Bytes;
use heed::Database;
use rand::Rng;

use crate::digest::Digest;

use super::Store;

/// The area of the local store a leaf lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Area {
    /// Leaves produced by local writes which have not been pushed.
    Stage,

    /// Leaves which have been pushed or pulled; evictable.
    Cache,
}

impl Area {
    /// The directory name of this area.
    pub fn dir_name(self) -> &'static str {
        match self {
            Area::Stage => "stage",
            Area::Cache => "cache",
        }
    }
}

fn decode_size(value: &[u8]) -> crate::Result<u32> {
    let bytes: [u8; 4] = value
        .try_into()
        .map_err(|_| crate::Error::BrokenInvariant(String::from("leaf size entry is not 4 bytes")))?;
    Ok(u32::from_le_bytes(bytes))
}

impl Store {
    fn level0(&self, area: Area) -> Database<Bytes, Bytes> {
        match area {
            Area::Stage => self.level0_stage,
            Area::Cache => self.level0_cache,
        }
    }

    /// Record the on-disk size of a leaf in the given area.
    pub fn set_leaf_size(&self, area: Area, leaf: &Digest, size: u32) -> crate::Result<()> {
        let mut txn = self.env.write_txn()?;
        self.level0(area).put(&mut txn, leaf.as_bytes(), &size.to_le_bytes())?;
        txn.commit()?;
        Ok(())
    }

    /// Return the recorded size of a leaf, probing the stage area first.
    pub fn leaf_size(&self, leaf: &Digest) -> crate::Result<Option<u32>> {
        let txn = self.env.read_txn()?;
        for database in [self.level0_stage, self.level0_cache] {
            if let Some(value) = database.get(&txn, leaf.as_bytes())? {
                return Ok(Some(decode_size(value)?));
            }
        }
        Ok(None)
    }

    /// Move a leaf's size entry from the stage area to the cache area.
    ///
    /// # Errors
    /// - `Error::NotFound`: The leaf has no entry in the stage area.
    pub fn move_leaf_to_cache(&self, leaf: &Digest) -> crate::Result<()> {
        let mut txn = self.env.write_txn()?;
        let value = self
            .level0_stage
            .get(&txn, leaf.as_bytes())?
            .map(<[u8]>::to_vec)
            .ok_or(crate::Error::NotFound)?;
        self.level0_stage.delete(&mut txn, leaf.as_bytes())?;
        self.level0_cache.put(&mut txn, leaf.as_bytes(), &value)?;
        txn.commit()?;
        Ok(())
    }

    /// Remove a leaf's size entry from the cache area.
    pub fn remove_cache_leaf(&self, leaf: &Digest) -> crate::Result<()> {
        let mut txn = self.env.write_txn()?;
        self.level0_cache.delete(&mut txn, leaf.as_bytes())?;
        txn.commit()?;
        Ok(())
    }

    /// The total recorded size of all leaves in the given area.
    pub fn area_size(&self, area: Area) -> crate::Result<u64> {
        let txn = self.env.read_txn()?;
        let mut total = 0u64;
        for item in self.level0(area).iter(&txn)? {
            let (_, value) = item?;
            total += u64::from(decode_size(value)?);
        }
        Ok(total)
    }

    /// The number of leaves recorded in the cache area.
    pub fn cache_leaf_count(&self) -> crate::Result<u64> {
        let txn = self.env.read_txn()?;
        Ok(self.level0_cache.len(&txn)?)
    }

    /// Return up to `limit` leaf digests from the cache area, starting at a
    /// random point in key order.
    pub fn random_cache_leaves(&self, limit: usize) -> crate::Result<Vec<Digest>> {
        let start: [u8; 2] = rand::thread_rng().gen();

        let txn = self.env.read_txn()?;
        let mut leaves = Vec::with_capacity(limit);
        let range = (Bound::Included(&start[..]), Bound::<&[u8]>::Unbounded);
        for item in self.level0_cache.range(&txn, &range)? {
            let (key, _) = item?;
            leaves.push(Digest::from_bytes(key)?);
            if leaves.len() == limit {
                return Ok(leaves);
            }
        }

        // Wrap around to the beginning of the key range.
        for item in self.level0_cache.iter(&txn)? {
            let (key, _) = item?;
            let digest = Digest::from_bytes(key)?;
            if leaves.contains(&digest) {
                break;
            }
            leaves.push(digest);
            if leaves.len() == limit {
                break;
            }
        }
        Ok(leaves)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    use crate::digest::leaf_digest;

    #[test]
    fn sizes_are_tracked_per_area() {
        let directory = tempdir().unwrap();
        let store = Store::open_at(directory.path()).unwrap();

        let first = leaf_digest(b"first", 1024, 0, true);
        let second = leaf_digest(b"second", 1024, 0, true);
        store.set_leaf_size(Area::Stage, &first, 100).unwrap();
        store.set_leaf_size(Area::Stage, &second, 200).unwrap();

        assert_eq!(store.area_size(Area::Stage).unwrap(), 300);
        assert_eq!(store.area_size(Area::Cache).unwrap(), 0);
        assert_eq!(store.leaf_size(&first).unwrap(), Some(100));

        store.move_leaf_to_cache(&first).unwrap();
        assert_eq!(store.area_size(Area::Stage).unwrap(), 200);
        assert_eq!(store.area_size(Area::Cache).unwrap(), 100);
        assert_eq!(store.cache_leaf_count().unwrap(), 1);

        store.remove_cache_leaf(&first).unwrap();
        assert_eq!(store.area_size(Area::Cache).unwrap(), 0);
    }

    #[test]
    fn moving_a_missing_leaf_fails() {
        let directory = tempdir().unwrap();
        let store = Store::open_at(directory.path()).unwrap();

        let leaf = leaf_digest(b"missing", 1024, 0, true);
        assert!(matches!(
            store.move_leaf_to_cache(&leaf),
            Err(crate::Error::NotFound)
        ));
    }

    #[test]
    fn random_sample_is_bounded() {
        let directory = tempdir().unwrap();
        let store = Store::open_at(directory.path()).unwrap();

        for index in 0u8..16 {
            let leaf = leaf_digest(&[index], 1024, 0, true);
            store.set_leaf_size(Area::Cache, &leaf, 1).unwrap();
        }

        let sample = store.random_cache_leaves(4).unwrap();
        assert_eq!(sample.len(), 4);

        let all = store.random_cache_leaves(100).unwrap();
        assert_eq!(all.len(), 16);
    }
}
