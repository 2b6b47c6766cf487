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

//! Bounded-size eviction of leaves from the cache area.
//!
//! Leaves in the stage area are never evicted. An evicted leaf remains
//! discoverable through its level-1 entry and is re-pulled from the remote
//! on the next read.

use std::fs;

use tracing::info;

use crate::config::Config;
use crate::digest::Digest;
use crate::kv::{Area, Store};

/// The number of leaves evicted per pruning round.
const EVICTION_BATCH: usize = 100;

/// The number of cache leaves below which eviction stops.
const EVICTION_FLOOR: u64 = 100;

/// Eviction stops once the total size drops below this fraction of the
/// maximum repository size.
const EVICTION_TARGET: f64 = 0.95;

/// Enforce the maximum local repository size.
///
/// Called before any new leaf file is created. When the combined size of the
/// stage and cache areas exceeds the configured maximum, random batches of
/// cache leaves are deleted until the total drops below 95% of the maximum or
/// fewer than `EVICTION_FLOOR` leaves remain in the cache.
pub(crate) fn enforce_repo_size(kv: &Store, config: &Config) -> crate::Result<()> {
    let stage_size = kv.area_size(Area::Stage)?;
    let mut cache_size = kv.area_size(Area::Cache)?;

    if stage_size + cache_size <= config.max_repo_size {
        return Ok(());
    }

    let threshold = (config.max_repo_size as f64 * EVICTION_TARGET) as u64;
    info!(
        stage_size,
        cache_size,
        max_repo_size = config.max_repo_size,
        "repository over size limit, evicting cache leaves"
    );

    loop {
        if kv.cache_leaf_count()? < EVICTION_FLOOR || stage_size + cache_size < threshold {
            break;
        }

        for leaf in kv.random_cache_leaves(EVICTION_BATCH)? {
            delete_leaf_from_cache(kv, config, &leaf)?;
        }

        cache_size = kv.area_size(Area::Cache)?;
    }

    Ok(())
}

/// Delete a single leaf from the cache area.
///
/// The file removal is best effort; the bookkeeping entry is removed either
/// way.
pub(crate) fn delete_leaf_from_cache(kv: &Store, config: &Config, leaf: &Digest) -> crate::Result<()> {
    let path = super::leaf_path_in(config, leaf, Area::Cache);
    if path.exists() {
        fs::remove_file(path)?;
    }
    kv.remove_cache_leaf(leaf)?;
    Ok(())
}

/// Delete the cached leaves of a blob and blank its level-1 value.
///
/// Blanking the value restores the rule that a hydrated entry's leaves are
/// present on disk; the object is re-pulled from the remote if it is read
/// again.
pub(crate) fn delete_leaves_for_blob(kv: &Store, config: &Config, hash: &str) -> crate::Result<()> {
    let key = Digest::from_hex(hash)?;
    let (value, object_type) = kv.get_any(&key)?.ok_or(crate::Error::NotFound)?;

    for leaf in super::parse_leaves(&value)? {
        delete_leaf_from_cache(kv, config, &leaf)?;
    }

    kv.put_typed(&key, &[], object_type)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    use tempfile::tempdir;

    use crate::config::Config;
    use crate::digest::leaf_digest;

    const LEAF_SIZE: u32 = 1024;

    fn leaf_of(index: u32) -> Digest {
        leaf_digest(&index.to_le_bytes(), LEAF_SIZE, 0, true)
    }

    fn write_leaf(kv: &Store, config: &Config, area: Area, index: u32) {
        let leaf = leaf_of(index);
        let mut file = crate::cas::create_leaf(config, &leaf, area).unwrap();
        file.write_all(&vec![0u8; LEAF_SIZE as usize]).unwrap();
        kv.set_leaf_size(area, &leaf, LEAF_SIZE).unwrap();
    }

    #[test]
    fn eviction_prunes_cache_but_never_stage() {
        let directory = tempdir().unwrap();
        // The minimum repository size of 1 MiB.
        let config = Config::new(directory.path(), LEAF_SIZE, 1);
        let kv = Store::open(&config).unwrap();

        for index in 0..10 {
            write_leaf(&kv, &config, Area::Stage, index);
        }
        for index in 10..1210 {
            write_leaf(&kv, &config, Area::Cache, index);
        }
        assert!(kv.area_size(Area::Stage).unwrap() + kv.area_size(Area::Cache).unwrap()
            > config.max_repo_size);

        enforce_repo_size(&kv, &config).unwrap();

        let stage_size = kv.area_size(Area::Stage).unwrap();
        let cache_size = kv.area_size(Area::Cache).unwrap();
        assert_eq!(stage_size, 10 * u64::from(LEAF_SIZE));
        assert!(stage_size + cache_size < (config.max_repo_size as f64 * 0.95) as u64);

        // The stage leaf files survive untouched.
        for index in 0..10 {
            assert!(super::super::leaf_path(&config, &leaf_of(index)).is_some());
        }
    }

    #[test]
    fn under_limit_repository_is_left_alone() {
        let directory = tempdir().unwrap();
        let config = Config::new(directory.path(), LEAF_SIZE, 1);
        let kv = Store::open(&config).unwrap();

        for index in 0..8 {
            write_leaf(&kv, &config, Area::Cache, index);
        }

        enforce_repo_size(&kv, &config).unwrap();
        assert_eq!(kv.cache_leaf_count().unwrap(), 8);
    }

    #[test]
    fn deleting_blob_leaves_blanks_the_level1_value() {
        let directory = tempdir().unwrap();
        let config = Config::new(directory.path(), LEAF_SIZE, 1);
        let kv = Store::open(&config).unwrap();

        let mut writer = crate::cas::Writer::new(&kv, &config, crate::kv::ObjectType::Blob);
        writer.set_area(Area::Cache);
        writer.append(&vec![3u8; LEAF_SIZE as usize + 7]).unwrap();
        let (hash, _, _) = writer.finish().unwrap();

        delete_leaves_for_blob(&kv, &config, &hash).unwrap();

        let key = Digest::from_hex(&hash).unwrap();
        let (value, _) = kv.get_any(&key).unwrap().unwrap();
        assert!(value.is_empty());
        assert_eq!(kv.cache_leaf_count().unwrap(), 0);
    }
}
