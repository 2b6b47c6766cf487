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

//! The chunked content-addressed store.
//!
//! Leaves are stored as individual files in a two-level hex fan-out below the
//! stage or cache area:
//! `<repoRoot>/.cask/<area>/<hex[0:2]>/<hex[2:4]>/<hex[4:]>`.

use std::fs::{self, File, OpenOptions};
use std::io::Read;
use std::path::PathBuf;

use crate::config::Config;
use crate::digest::Digest;
use crate::error::Error;
use crate::kv::{Area, Store};
use crate::store::ObjectStore;

pub mod prune;
pub mod reader;
pub mod writer;

pub use reader::Reader;
pub use writer::Writer;

/// Return the path of a leaf file within the given area.
pub(crate) fn leaf_path_in(config: &Config, leaf: &Digest, area: Area) -> PathBuf {
    let hex = leaf.to_hex();
    config
        .cask_dir()
        .join(area.dir_name())
        .join(&hex[0..2])
        .join(&hex[2..4])
        .join(&hex[4..])
}

/// Locate the file of a leaf, probing the stage area before the cache area.
///
/// Returns `None` if the leaf is not cached locally.
pub(crate) fn leaf_path(config: &Config, leaf: &Digest) -> Option<PathBuf> {
    let in_stage = leaf_path_in(config, leaf, Area::Stage);
    if in_stage.exists() {
        return Some(in_stage);
    }
    let in_cache = leaf_path_in(config, leaf, Area::Cache);
    if in_cache.exists() {
        return Some(in_cache);
    }
    None
}

/// Create the file for a new leaf, creating intermediate directories.
pub(crate) fn create_leaf(config: &Config, leaf: &Digest, area: Area) -> crate::Result<File> {
    let path = leaf_path_in(config, leaf, area);
    fs::create_dir_all(path.parent().expect("leaf path has no parent"))?;
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    Ok(file)
}

/// Move every leaf of a blob from the stage area to the cache area.
///
/// A leaf which is already present in the cache area is treated as moved. A
/// leaf which is present in neither area is an error.
pub(crate) fn move_blob_to_cache(kv: &Store, config: &Config, hash: &str) -> crate::Result<()> {
    let leaves = open_root(kv, config, hash)?;

    for leaf in leaves {
        let stage_path = leaf_path_in(config, &leaf, Area::Stage);
        let cache_path = leaf_path_in(config, &leaf, Area::Cache);

        if !stage_path.exists() {
            if cache_path.exists() {
                continue;
            }
            return Err(Error::BrokenInvariant(format!(
                "leaf {} of blob {} is in neither the stage nor the cache area",
                leaf, hash
            )));
        }

        fs::create_dir_all(cache_path.parent().expect("leaf path has no parent"))?;
        fs::rename(&stage_path, &cache_path)?;
        kv.move_leaf_to_cache(&leaf)?;
    }

    Ok(())
}

/// Return the ordered leaf digests of a root, pulling the level-1 entry from
/// the remote if it has not been hydrated locally.
pub(crate) fn open_root(kv: &Store, config: &Config, hash: &str) -> crate::Result<Vec<Digest>> {
    let key = Digest::from_hex(hash)?;
    let (value, _) = kv.get_any(&key)?.ok_or(Error::NotFound)?;

    let value = if value.is_empty() {
        crate::sync::pull::pull_on_demand(kv, config, hash)?
    } else {
        value
    };

    parse_leaves(&value)
}

/// Split a level-1 value into its leaf digests.
pub(crate) fn parse_leaves(value: &[u8]) -> crate::Result<Vec<Digest>> {
    if value.len() % crate::digest::DIGEST_SIZE != 0 {
        return Err(Error::CorruptObject);
    }
    value
        .chunks(crate::digest::DIGEST_SIZE)
        .map(Digest::from_bytes)
        .collect()
}

/// Upload a single leaf file to the remote store.
pub(crate) fn push_leaf(
    config: &Config,
    client: &dyn ObjectStore,
    leaf: &Digest,
) -> crate::Result<()> {
    let path = leaf_path(config, leaf).ok_or(Error::NotFound)?;
    let mut file = File::open(path)?;
    client
        .upload(&leaf.to_hex(), &mut file)
        .map_err(Error::Remote)?;
    Ok(())
}

/// Download a single leaf into the cache area and record its size.
///
/// A leaf which is already present locally is not downloaded again.
pub(crate) fn fetch_leaf(
    kv: &Store,
    config: &Config,
    client: &dyn ObjectStore,
    leaf: &Digest,
) -> crate::Result<()> {
    if leaf_path(config, leaf).is_some() {
        return Ok(());
    }

    prune::enforce_repo_size(kv, config)?;

    let mut file = create_leaf(config, leaf, Area::Cache)?;
    client
        .download(&leaf.to_hex(), &mut file)
        .map_err(Error::Remote)?;
    file.sync_all()?;

    let size = file.metadata()?.len() as u32;
    kv.set_leaf_size(Area::Cache, leaf, size)?;
    Ok(())
}

/// Read a whole leaf file into memory.
pub(crate) fn read_leaf(config: &Config, leaf: &Digest) -> crate::Result<Option<Vec<u8>>> {
    let path = match leaf_path(config, leaf) {
        Some(path) => path,
        None => return Ok(None),
    };
    let mut file = File::open(path)?;
    let mut contents = Vec::with_capacity(file.metadata()?.len() as usize);
    file.read_to_end(&mut contents)?;
    Ok(Some(contents))
}
