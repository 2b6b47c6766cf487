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
use std::fs::{create_dir_all, read_dir, remove_file, rename, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use uuid::Uuid;

use crate::config::RemoteConfig;
use crate::error::Error;

use super::ObjectStore;

/// The directory holding partially written objects.
const STAGING_DIRECTORY: &str = ".staging";

/// An `ObjectStore` which stores objects in a directory in the local file
/// system.
///
/// This is the driver behind `fake` remotes: a stand-in for a real storage
/// service which behaves like one, including atomic overwrites via a staging
/// directory.
#[derive(Debug)]
pub struct DirectoryStore {
    path: PathBuf,
}

impl DirectoryStore {
    /// Open the store backing the given `fake` remote.
    ///
    /// # Errors
    /// - `Error::Config`: The remote has no directory configured.
    pub fn open(remote: &RemoteConfig) -> crate::Result<Self> {
        if remote.fake_directory.is_empty() {
            return Err(Error::Config(String::from(
                "fake remote has no directory configured",
            )));
        }
        Self::new(Path::new(&remote.fake_directory))
    }

    /// Open a store rooted at `path`, creating the directory if necessary.
    pub fn new(path: &Path) -> crate::Result<Self> {
        create_dir_all(path)?;
        create_dir_all(path.join(STAGING_DIRECTORY))?;
        Ok(DirectoryStore {
            path: path.to_owned(),
        })
    }

    fn object_path(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Return a new staging path.
    fn staging_path(&self) -> PathBuf {
        let uuid_str = Uuid::new_v4().as_hyphenated().to_string();
        self.path.join(STAGING_DIRECTORY).join(uuid_str)
    }
}

impl ObjectStore for DirectoryStore {
    fn upload(&self, name: &str, reader: &mut dyn Read) -> anyhow::Result<()> {
        let staging_path = self.staging_path();

        // Write to a staging file and then atomically move it into place.
        let mut staging_file = File::create(&staging_path)?;
        io::copy(reader, &mut staging_file)?;
        staging_file.sync_all()?;
        rename(&staging_path, self.object_path(name))?;

        Ok(())
    }

    fn download(&self, name: &str, writer: &mut dyn Write) -> anyhow::Result<()> {
        let object_path = self.object_path(name);
        if !object_path.exists() {
            return Err(anyhow!("no object named `{}` exists", name));
        }

        let mut file = File::open(object_path)?;
        io::copy(&mut file, writer)?;
        Ok(())
    }

    fn exists(&self, name: &str) -> anyhow::Result<bool> {
        Ok(self.object_path(name).exists())
    }

    fn list(&self, prefix: &str, callback: &mut dyn FnMut(&str)) -> anyhow::Result<()> {
        for entry in read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }

            let file_name = entry.file_name();
            let name = file_name
                .to_str()
                .ok_or_else(|| anyhow!("object file name is invalid"))?;
            if name.starts_with(prefix) {
                callback(name);
            }
        }
        Ok(())
    }
}

impl DirectoryStore {
    /// Remove any staging files left behind by interrupted uploads.
    pub fn clean_staging(&self) -> anyhow::Result<()> {
        for entry in read_dir(self.path.join(STAGING_DIRECTORY))? {
            remove_file(entry?.path())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    #[test]
    fn upload_then_download_round_trips() {
        let directory = tempdir().unwrap();
        let store = DirectoryStore::new(directory.path()).unwrap();

        store.upload("abcd", &mut &b"contents"[..]).unwrap();

        let mut downloaded = Vec::new();
        store.download("abcd", &mut downloaded).unwrap();
        assert_eq!(downloaded, b"contents");

        assert!(store.exists("abcd").unwrap());
        assert!(!store.exists("missing").unwrap());
    }

    #[test]
    fn download_of_missing_object_fails() {
        let directory = tempdir().unwrap();
        let store = DirectoryStore::new(directory.path()).unwrap();

        let mut sink = Vec::new();
        assert!(store.download("missing", &mut sink).is_err());
    }

    #[test]
    fn list_filters_by_prefix() {
        let directory = tempdir().unwrap();
        let store = DirectoryStore::new(directory.path()).unwrap();

        store.upload("0000aa", &mut &b"a"[..]).unwrap();
        store.upload("0000ab", &mut &b"b"[..]).unwrap();
        store.upload("ffff00", &mut &b"c"[..]).unwrap();

        let mut names = Vec::new();
        store.list("0000", &mut |name| names.push(name.to_owned())).unwrap();
        names.sort_unstable();
        assert_eq!(names, vec!["0000aa", "0000ab"]);
    }
}
