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
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::config::Config;
use crate::digest::{self, Digest, DIGEST_SIZE};
use crate::error::Error;
use crate::kv::{Area, ObjectType, Store};
use crate::store::ObjectStore;

use super::writer::Writer;

/// A reader over the contents of a stored blob.
///
/// The reader walks the blob's leaves in order, loading each leaf file into
/// memory as it is reached. A leaf which is missing locally is pulled from
/// the remote on demand.
pub struct Reader<'a> {
    kv: &'a Store,
    config: &'a Config,
    hash: String,
    leaves: Vec<Digest>,
    leaf_index: usize,
    chunk: Option<Vec<u8>>,
    chunk_offset: usize,
}

impl<'a> Reader<'a> {
    /// Open a reader over the blob with the given root digest.
    ///
    /// # Errors
    /// - `Error::NotFound`: No object with this digest exists.
    /// - `Error::Remote`: The object is not hydrated and could not be pulled.
    pub(crate) fn open(kv: &'a Store, config: &'a Config, hash: &str) -> crate::Result<Self> {
        let leaves = super::open_root(kv, config, hash)?;
        Ok(Reader {
            kv,
            config,
            hash: hash.to_owned(),
            leaves,
            leaf_index: 0,
            chunk: None,
            chunk_offset: 0,
        })
    }

    /// Read the remaining contents into a string.
    pub fn read_into_string(mut self) -> crate::Result<String> {
        let mut contents = String::new();
        self.read_to_string(&mut contents)?;
        Ok(contents)
    }

    fn load_next_chunk(&mut self) -> crate::Result<()> {
        let leaf = self.leaves[self.leaf_index];

        if super::leaf_path(self.config, &leaf).is_none() {
            // The leaf was evicted or never fetched; re-pull the whole blob.
            debug!(blob = %self.hash, leaf = %leaf, "leaf missing locally, pulling on demand");
            crate::sync::pull::pull_on_demand(self.kv, self.config, &self.hash)?;
        }

        let chunk = super::read_leaf(self.config, &leaf)?.ok_or_else(|| {
            Error::BrokenInvariant(format!(
                "failed to fetch missing leaf {} from the remote store",
                leaf
            ))
        })?;

        self.chunk = Some(chunk);
        self.chunk_offset = 0;
        self.leaf_index += 1;
        Ok(())
    }
}

impl Read for Reader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            if self.chunk.is_none() {
                if self.leaf_index == self.leaves.len() {
                    return Ok(0);
                }
                self.load_next_chunk()
                    .map_err(|error| io::Error::new(io::ErrorKind::Other, error))?;
            }

            let chunk = self.chunk.as_ref().expect("chunk was just loaded");
            let remaining = chunk.len() - self.chunk_offset;
            let take = remaining.min(buf.len());
            buf[..take].copy_from_slice(&chunk[self.chunk_offset..self.chunk_offset + take]);
            self.chunk_offset += take;

            if self.chunk_offset == chunk.len() {
                self.chunk = None;
            }

            if take > 0 || self.leaf_index == self.leaves.len() {
                return Ok(take);
            }
        }
    }
}

/// Download an object from the remote store into a temporary file.
pub(crate) fn fetch_to_temp_file(
    client: &dyn ObjectStore,
    hash: &str,
) -> crate::Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    client
        .download(hash, file.as_file_mut())
        .map_err(Error::Remote)?;
    Ok(file)
}

/// Ingest a fetched file into the cache area of the CAS.
///
/// Returns the concatenation of the object's leaf digests.
pub(crate) fn store_blob_in_cache(
    kv: &Store,
    config: &Config,
    path: &Path,
    object_type: ObjectType,
) -> crate::Result<Vec<u8>> {
    let mut file = File::open(path)?;

    let mut writer = if object_type == ObjectType::Prefix {
        Writer::new_cheat(kv, config, object_type)
    } else {
        Writer::new(kv, config, object_type)
    };
    // Pulled objects land in the cache area, not the stage.
    writer.set_area(Area::Cache);

    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        writer.append(&buffer[..bytes_read])?;
    }

    let (_, leaf_concat, _) = writer.finish()?;
    Ok(leaf_concat)
}

/// Test whether a fetched file holds a blob in deduped form.
///
/// An object is stored deduped when its size is a multiple of the digest size
/// and hashing its contents as a leaf-digest concatenation reproduces the
/// advertised digest. Returns the parsed leaf digests if so.
pub(crate) fn test_for_deduped_blob(
    config: &Config,
    hash: &str,
    path: &Path,
) -> crate::Result<Option<Vec<Digest>>> {
    let size = path.metadata()?.len();
    if size == 0 || size % DIGEST_SIZE as u64 != 0 {
        return Ok(None);
    }

    let contents = std::fs::read(path)?;
    let leaves = super::parse_leaves(&contents)?;
    let root = digest::root_digest(&leaves, config.leaf_size);

    if root.to_hex() == hash {
        Ok(Some(leaves))
    } else {
        Ok(None)
    }
}

/// Pull a blob from the remote store down to the local disk.
///
/// A blob stored in deduped form has its level-1 entry registered from the
/// fetched leaf-digest concatenation and its leaves fetched individually into
/// the cache area; a hydrated blob is ingested through the CAS writer.
/// Returns the concatenation of the blob's leaf digests.
pub(crate) fn pull_blob_to_local_disk(
    kv: &Store,
    config: &Config,
    hash: &str,
    object_type: ObjectType,
    client: &dyn ObjectStore,
) -> crate::Result<Vec<u8>> {
    let temp_file = fetch_to_temp_file(client, hash)?;

    if let Some(leaves) = test_for_deduped_blob(config, hash, temp_file.path())? {
        let key = Digest::from_hex(hash)?;
        let mut leaf_concat = Vec::with_capacity(leaves.len() * DIGEST_SIZE);
        for leaf in &leaves {
            leaf_concat.extend_from_slice(leaf.as_bytes());
        }
        kv.put_typed(&key, &leaf_concat, object_type)?;

        crate::sync::fetch_leaves(kv, config, client, &leaves)?;
        return Ok(leaf_concat);
    }

    store_blob_in_cache(kv, config, temp_file.path(), object_type)
}
