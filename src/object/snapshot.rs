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
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::Error;
use crate::kv::{ObjectType, Store};

/// The mode string of a directory entry; its blob is a nested snapshot.
pub const DIRECTORY_MODE: &str = "040000";

/// A single entry of a snapshot object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// Unix file mode, `040000` for directories.
    pub mode: String,

    /// The file or directory name.
    pub name: String,

    /// The digest of the entry's blob, or of a nested snapshot object for
    /// directories.
    pub blob: String,
}

impl SnapshotEntry {
    /// Whether this entry refers to a nested snapshot.
    pub fn is_directory(&self) -> bool {
        self.mode.starts_with(&DIRECTORY_MODE[..3])
    }

    /// The permission bits encoded in the mode string.
    pub fn permissions(&self) -> u32 {
        u32::from_str_radix(&self.mode[3..], 8).unwrap_or(0o644)
    }
}

/// A snapshot of a directory hierarchy at commit time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotObject {
    pub version: u32,

    #[serde(rename = "type")]
    pub object_type: ObjectType,

    pub entries: Vec<SnapshotEntry>,

    pub padding: String,
}

impl SnapshotObject {
    fn new(entries: Vec<SnapshotEntry>) -> Self {
        SnapshotObject {
            version: 1,
            object_type: ObjectType::Snapshot,
            entries,
            padding: String::new(),
        }
    }

    /// Load the snapshot object with the given digest from the CAS.
    pub fn load(kv: &Store, config: &Config, hash: &str) -> crate::Result<Self> {
        super::decode(&super::read_envelope(kv, config, hash)?)
    }

    /// Parse a snapshot object from its serialized contents.
    pub fn from_contents(contents: &str) -> crate::Result<Self> {
        super::decode(contents)
    }
}

/// Whether a directory entry belongs to the repository itself.
fn is_repo_state(name: &OsStr) -> bool {
    name == OsStr::new(crate::config::CASK_DIR) || name == OsStr::new(crate::config::CONFIG_FILE)
}

/// Build and store the snapshot objects for a directory hierarchy.
///
/// `add` is called for every regular file and returns the digest of its
/// stored blob. Nested directories become nested snapshot objects; the walk
/// yields a directory after its contents, so every child object is stored
/// before its parent's entry is written. The repository's own state
/// directory and configuration file are skipped. Returns the digest of the
/// root snapshot object.
pub fn store_snapshot(
    kv: &Store,
    config: &Config,
    directory: &Path,
    add: &mut dyn FnMut(&Path) -> crate::Result<String>,
) -> crate::Result<String> {
    let mut children: HashMap<PathBuf, Vec<SnapshotEntry>> = HashMap::new();
    let mut root_hash = None;

    let walker = WalkDir::new(directory)
        .contents_first(true)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_repo_state(entry.file_name()));

    for entry in walker {
        let entry = entry.map_err(io::Error::from)?;
        let name = match entry.file_name().to_str() {
            Some(name) => name.to_owned(),
            None => continue,
        };

        if entry.file_type().is_file() {
            let metadata = entry.metadata().map_err(io::Error::from)?;
            let blob = add(entry.path())?;
            children
                .entry(parent_of(entry.path()))
                .or_default()
                .push(SnapshotEntry {
                    mode: format!("100{:03o}", file_permissions(&metadata)),
                    name,
                    blob,
                });
        } else if entry.file_type().is_dir() {
            let mut entries = children.remove(entry.path()).unwrap_or_default();
            entries.sort_by(|a, b| a.name.cmp(&b.name));

            let snapshot = SnapshotObject::new(entries);
            let encoded = super::encode_padded(&snapshot)?;
            let hash = super::write_envelope(kv, config, &encoded, ObjectType::Snapshot)?;

            if entry.depth() == 0 {
                root_hash = Some(hash);
            } else {
                children
                    .entry(parent_of(entry.path()))
                    .or_default()
                    .push(SnapshotEntry {
                        mode: String::from(DIRECTORY_MODE),
                        name,
                        blob: hash,
                    });
            }
        }
    }

    root_hash.ok_or_else(|| {
        Error::BrokenInvariant(format!(
            "`{}` is not a directory that can be snapshotted",
            directory.display()
        ))
    })
}

fn parent_of(path: &Path) -> PathBuf {
    path.parent().expect("walked entry has no parent").to_owned()
}

/// Materialize a snapshot into a directory.
///
/// `write_blob` is called for every file entry with the blob digest, the
/// target path, and the permission bits.
pub fn checkout(
    kv: &Store,
    config: &Config,
    hash: &str,
    directory: &Path,
    write_blob: &mut dyn FnMut(&str, &Path, u32) -> crate::Result<()>,
) -> crate::Result<()> {
    fs::create_dir_all(directory)?;
    let snapshot = SnapshotObject::load(kv, config, hash)?;

    for entry in &snapshot.entries {
        if entry.name.contains('/') || entry.name == ".." {
            return Err(Error::CorruptObject);
        }

        let target = directory.join(&entry.name);
        if entry.is_directory() {
            checkout(kv, config, &entry.blob, &target, write_blob)?;
        } else {
            write_blob(&entry.blob, &target, entry.permissions())?;
        }
    }

    Ok(())
}

#[cfg(unix)]
fn file_permissions(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn file_permissions(_metadata: &fs::Metadata) -> u32 {
    0o644
}
