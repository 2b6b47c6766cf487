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
use std::io::{self, Write as IoWrite};

use crate::config::Config;
use crate::digest::{self, Digest};
use crate::kv::{Area, ObjectType, Store};
use crate::object::prefix::{PREFIX_CHEAT, PREFIX_NUM};

use super::prune;

/// A writer which splits a byte stream into leaves and registers the root in
/// the level-1 index.
///
/// Leaves are written to the stage area as they fill; `finish` hashes the
/// concatenation of the leaf digests into the root digest and upserts the
/// level-1 entry. A stream whose length is an exact multiple of the leaf size
/// ends in a zero-length last leaf.
pub struct Writer<'a> {
    kv: &'a Store,
    config: &'a Config,
    object_type: ObjectType,
    area: Area,
    cheat_mode: bool,
    leaves: Vec<Digest>,
    buffer: Vec<u8>,
}

impl<'a> Writer<'a> {
    /// Return a new writer targeting the stage area.
    pub fn new(kv: &'a Store, config: &'a Config, object_type: ObjectType) -> Self {
        Writer {
            kv,
            config,
            object_type,
            area: Area::Stage,
            cheat_mode: false,
            leaves: Vec::new(),
            buffer: Vec::with_capacity(config.leaf_size as usize),
        }
    }

    /// Return a new writer in cheat mode, used only for prefix objects.
    pub fn new_cheat(kv: &'a Store, config: &'a Config, object_type: ObjectType) -> Self {
        let mut writer = Self::new(kv, config, object_type);
        writer.cheat_mode = true;
        writer
    }

    /// Redirect leaf files into the given area. Pulls write to the cache area
    /// instead of the stage area.
    pub fn set_area(&mut self, area: Area) {
        self.area = area;
    }

    /// Append bytes to the stream, flushing a leaf whenever the buffer fills.
    pub fn append(&mut self, mut data: &[u8]) -> crate::Result<()> {
        let leaf_size = self.config.leaf_size as usize;

        while !data.is_empty() {
            let remaining = leaf_size - self.buffer.len();
            let take = remaining.min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.buffer.len() == leaf_size {
                self.flush_leaf(false)?;
            }
        }

        Ok(())
    }

    /// Write out the buffered leaf and record it.
    fn flush_leaf(&mut self, last: bool) -> crate::Result<()> {
        let leaf = digest::leaf_digest(
            &self.buffer,
            self.config.leaf_size,
            self.leaves.len() as u64,
            last,
        );
        self.leaves.push(leaf);

        prune::enforce_repo_size(self.kv, self.config)?;

        let mut file = super::create_leaf(self.config, &leaf, self.area)?;
        file.write_all(&self.buffer)?;
        file.sync_all()?;

        self.kv.set_leaf_size(self.area, &leaf, self.buffer.len() as u32)?;

        self.buffer.clear();
        Ok(())
    }

    /// Flush the last leaf, compute the root digest, and register the level-1
    /// entry.
    ///
    /// Returns the root digest in hex form, the concatenation of the leaf
    /// digests, and whether a new level-1 entry was inserted. An entry which
    /// is already present with a non-empty value is left untouched and
    /// reported as not new; an entry present with an empty value has its
    /// value rewritten.
    pub fn finish(mut self) -> crate::Result<(String, Vec<u8>, bool)> {
        self.flush_leaf(true)?;

        let root = digest::root_digest(&self.leaves, self.config.leaf_size);
        let mut root_hex = root.to_hex();

        if self.cheat_mode {
            root_hex = cheat_identifier(&root_hex);
        }

        let mut leaf_concat = Vec::with_capacity(self.leaves.len() * digest::DIGEST_SIZE);
        for leaf in &self.leaves {
            leaf_concat.extend_from_slice(leaf.as_bytes());
        }

        let key = Digest::from_hex(&root_hex)?;
        let existing = self.kv.get_typed(self.object_type, &key)?;
        let is_new = match existing {
            None => true,
            Some(value) => value.is_empty(),
        };

        if is_new {
            self.kv.put_typed(&key, &leaf_concat, self.object_type)?;
        }

        Ok((root_hex, leaf_concat, is_new))
    }
}

/// Overwrite the cheat range of a prefix root digest.
///
/// The hex characters at positions `[PREFIX_NUM - PREFIX_CHEAT, PREFIX_NUM)`
/// are replaced with copies of the character just before the range. The
/// result is the object's stored identifier but no longer a true BLAKE2b
/// digest; the quirk is preserved for wire compatibility.
fn cheat_identifier(root_hex: &str) -> String {
    let repeated = root_hex[PREFIX_NUM - PREFIX_CHEAT - 1..PREFIX_NUM - PREFIX_CHEAT]
        .repeat(PREFIX_CHEAT);
    format!(
        "{}{}{}",
        &root_hex[..PREFIX_NUM - PREFIX_CHEAT],
        repeated,
        &root_hex[PREFIX_NUM..]
    )
}

impl io::Write for Writer<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.append(data)
            .map_err(|error| io::Error::new(io::ErrorKind::Other, error))?;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
