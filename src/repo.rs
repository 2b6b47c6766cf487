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
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, FixedOffset};
use fs2::FileExt;

use crate::cas;
use crate::config::{Config, RemoteConfig};
use crate::digest::Digest;
use crate::error::Error;
use crate::kv::{self, ObjectType};
use crate::object::{self, commit::store_commit, snapshot, CommitObject};
use crate::sync;

/// The name of the repository lock file.
const LOCK_FILE: &str = "lock";

/// The default branch commits go to.
const DEFAULT_BRANCH: &str = "master";

/// A commit as reported by `Repository::list_commits`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub hash: String,
    pub message: String,
    pub time_stamp: String,
    pub warm_parents: Vec<String>,
    pub cold_parents: Vec<String>,
}

/// Statistics about the contents of a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Statistics {
    /// The number of blob objects in the level-1 index.
    pub objects: u64,
}

/// Options for `Repository::clone_with`.
#[derive(Debug, Default)]
pub struct CloneOptions {
    leaf_size: u32,
    max_repo_size: u64,
}

impl CloneOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// The leaf size of the new repository. Zero selects the default.
    pub fn leaf_size(mut self, leaf_size: u32) -> Self {
        self.leaf_size = leaf_size;
        self
    }

    /// The maximum local size of the new repository. Zero selects the
    /// default.
    pub fn max_repo_size(mut self, max_repo_size: u64) -> Self {
        self.max_repo_size = max_repo_size;
        self
    }
}

/// A local repository of content-addressed, versioned objects.
///
/// The repository stages blobs locally, commits them into a DAG of versioned
/// objects, and synchronizes those commits with a remote object store.
#[derive(Debug)]
pub struct Repository {
    config: Config,
    kv: kv::Store,
    lock_file: File,
}

impl Repository {
    /// Initialize a new repository at `path` with default sizes.
    pub fn init(path: &Path) -> crate::Result<Self> {
        Self::init_with(path, 0, 0)
    }

    /// Initialize a new repository at `path`.
    ///
    /// A `leaf_size` or `max_repo_size` of zero selects the default; values
    /// below the minimums are clamped up.
    pub fn init_with(path: &Path, leaf_size: u32, max_repo_size: u64) -> crate::Result<Self> {
        if Config::load(path)?.is_none() {
            Config::new(path, leaf_size, max_repo_size).save()?;
        }
        Self::open(path)
    }

    /// Open the existing repository at `path`.
    ///
    /// # Errors
    /// - `Error::Config`: The directory is not a repository.
    /// - `Error::Locked`: Another process holds the repository open.
    pub fn open(path: &Path) -> crate::Result<Self> {
        let config = Config::load(path)?.ok_or_else(|| {
            Error::Config(format!(
                "`{}` is not a cask repository; initialize it first",
                path.display()
            ))
        })?;

        fs::create_dir_all(config.cask_dir())?;
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(config.cask_dir().join(LOCK_FILE))?;
        lock_file.try_lock_exclusive().map_err(|_| Error::Locked)?;

        let kv = kv::Store::open(&config)?;

        Ok(Repository {
            config,
            kv,
            lock_file,
        })
    }

    /// Clone a remote into a new repository at `path`.
    pub fn clone_with(
        remote: RemoteConfig,
        path: &Path,
        options: CloneOptions,
    ) -> crate::Result<Self> {
        let mut config = Config::new(path, options.leaf_size, options.max_repo_size);
        config.remotes.push(remote);
        config.save()?;

        let repo = Self::open(path)?;
        sync::clone::clone(&repo.kv, &repo.config, &mut |_| {}, &mut |_| {})?;
        Ok(repo)
    }

    /// Clone a remote, reporting download and processing progress.
    pub fn clone_with_progress(
        remote: RemoteConfig,
        path: &Path,
        options: CloneOptions,
        progress_downloading: &mut dyn FnMut(u64),
        progress_processing: &mut dyn FnMut(u64),
    ) -> crate::Result<Self> {
        let mut config = Config::new(path, options.leaf_size, options.max_repo_size);
        config.remotes.push(remote);
        config.save()?;

        let repo = Self::open(path)?;
        sync::clone::clone(&repo.kv, &repo.config, progress_downloading, progress_processing)?;
        Ok(repo)
    }

    /// The remotes configured for this repository.
    pub fn remotes(&self) -> &[RemoteConfig] {
        &self.config.remotes
    }

    /// Add a remote to the repository configuration.
    pub fn add_remote(&mut self, remote: RemoteConfig) -> crate::Result<()> {
        self.config.add_remote(remote)
    }

    /// Add a stream to the repository, staging it for the next commit.
    ///
    /// Returns the blob's root digest in hex form and whether the blob is
    /// new. A blob which is already in the repository is not staged again.
    pub fn add(&self, mut reader: impl Read) -> crate::Result<(String, bool)> {
        let mut writer = cas::Writer::new(&self.kv, &self.config, ObjectType::Blob);

        let mut buffer = vec![0u8; 64 * 1024];
        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            writer.append(&buffer[..bytes_read])?;
        }

        let (hash, _, is_new) = writer.finish()?;
        if is_new {
            self.kv.stage_add(&Digest::from_hex(&hash)?)?;
        }

        Ok((hash, is_new))
    }

    /// Open a reader over the blob with the given digest.
    pub fn get(&self, hash: &str) -> crate::Result<cas::Reader<'_>> {
        cas::Reader::open(&self.kv, &self.config, hash)
    }

    /// Compute the digest a stream would be stored under, without storing
    /// it.
    pub fn sum(&self, reader: impl Read) -> crate::Result<String> {
        Ok(crate::digest::sum_reader(reader, self.config.leaf_size)?.to_hex())
    }

    /// Commit the staged set to the default branch.
    ///
    /// Returns the commit digest, or `empty = true` when nothing is staged.
    pub fn commit(&self, message: &str) -> crate::Result<(String, bool)> {
        self.commit_to_branch(message, DEFAULT_BRANCH)
    }

    /// Commit the staged set to the named branch.
    pub fn commit_to_branch(&self, message: &str, branch: &str) -> crate::Result<(String, bool)> {
        self.commit_full(message, branch, "", &[])
    }

    /// Commit the staged set with an explicit set of parent commits.
    ///
    /// Top-most commits listed in `parents` become warm parents of the new
    /// commit; top-most commits not listed are forked off as cold parents.
    pub fn commit_with_parents(
        &self,
        message: &str,
        branch: &str,
        parents: &[String],
    ) -> crate::Result<(String, bool)> {
        self.commit_full(message, branch, "", parents)
    }

    fn commit_full(
        &self,
        message: &str,
        branch: &str,
        snapshot_hash: &str,
        parents: &[String],
    ) -> crate::Result<(String, bool)> {
        let top_most = self
            .kv
            .top_most_commits()?
            .iter()
            .map(Digest::to_hex)
            .collect::<Vec<_>>();

        let mut warm_parents = Vec::new();
        let mut cold_parents = Vec::new();

        if parents.is_empty() {
            warm_parents.extend(top_most);
            if warm_parents.len() > 1 {
                return Err(Error::BrokenInvariant(String::from(
                    "multiple top-most commits found as parents",
                )));
            }
        } else {
            for head in top_most {
                if parents.contains(&head) {
                    warm_parents.push(head);
                } else {
                    cold_parents.push(head);
                }
            }
        }

        self.commit_with_warm_and_cold_parents(message, branch, snapshot_hash, warm_parents, cold_parents)
    }

    /// Commit the staged set with explicit warm and cold parent sets.
    pub fn commit_with_warm_and_cold_parents(
        &self,
        message: &str,
        branch: &str,
        snapshot_hash: &str,
        warm_parents: Vec<String>,
        cold_parents: Vec<String>,
    ) -> crate::Result<(String, bool)> {
        let staged = self.kv.stage_list()?;

        let (commit_hash, empty) = store_commit(
            &self.kv,
            &self.config,
            message,
            branch,
            snapshot_hash,
            warm_parents,
            cold_parents,
            &staged,
            &[],
        )?;
        if empty {
            return Ok((String::new(), true));
        }

        self.kv.stage_clear()?;

        object::prefix::store_prefix(&self.kv, &self.config, &commit_hash)?;

        Ok((commit_hash, false))
    }

    /// List all commits reachable from the top-most commits, newest first.
    ///
    /// Heads are merged by descending timestamp with the commit digest as
    /// the tie-break; a commit reachable through several parents is reported
    /// once.
    pub fn list_commits(&self) -> crate::Result<Vec<Commit>> {
        let mut frontier = BinaryHeap::new();
        for head in self.kv.top_most_commits()? {
            frontier.push(WalkEntry::load(&self.kv, &self.config, &head.to_hex())?);
        }

        let mut visited = HashSet::new();
        let mut commits = Vec::new();

        while let Some(entry) = frontier.pop() {
            if !visited.insert(entry.hash.clone()) {
                continue;
            }

            for parent in &entry.commit.warm_parents {
                if !visited.contains(parent) {
                    frontier.push(WalkEntry::load(&self.kv, &self.config, parent)?);
                }
            }

            commits.push(Commit {
                hash: entry.hash,
                message: entry.commit.message,
                time_stamp: entry.commit.time_stamp,
                warm_parents: entry.commit.warm_parents,
                cold_parents: entry.commit.cold_parents,
            });
        }

        Ok(commits)
    }

    /// The staged set as hex digests.
    pub fn status(&self) -> crate::Result<Vec<String>> {
        Ok(self
            .kv
            .stage_list()?
            .iter()
            .map(Digest::to_hex)
            .collect())
    }

    /// List blob digests whose hex form starts with `prefix`.
    pub fn list(&self, prefix: &str) -> crate::Result<Vec<String>> {
        Ok(self
            .kv
            .list_typed(ObjectType::Blob, prefix)?
            .iter()
            .map(Digest::to_hex)
            .collect())
    }

    /// Statistics about this repository.
    pub fn statistics(&self) -> crate::Result<Statistics> {
        Ok(Statistics {
            objects: self.kv.blob_count()?,
        })
    }

    /// Push local commit chains to the remote.
    ///
    /// With `hydrated` set, blobs are uploaded as their original byte
    /// streams where possible; otherwise leaves are uploaded individually.
    pub fn push(&self, hydrated: bool, mut progress: impl FnMut(u64)) -> crate::Result<()> {
        sync::push::push(&self.kv, &self.config, hydrated, &mut progress)
    }

    /// Pull missing commit chains from the remote.
    pub fn pull(&self, mut progress: impl FnMut(u64)) -> crate::Result<()> {
        sync::pull::pull(&self.kv, &self.config, &mut progress)
    }

    /// Snapshot a directory hierarchy and commit it.
    ///
    /// Every file below `directory` is added as a blob and recorded in
    /// nested snapshot objects; the resulting commit references the root
    /// snapshot.
    pub fn snapshot(&self, message: &str, directory: &Path) -> crate::Result<(String, bool)> {
        let snapshot_hash = snapshot::store_snapshot(
            &self.kv,
            &self.config,
            directory,
            &mut |path: &Path| {
                let file = File::open(path)?;
                let (hash, _) = self.add(file)?;
                Ok(hash)
            },
        )?;

        self.commit_full(message, DEFAULT_BRANCH, &snapshot_hash, &[])
    }

    /// Materialize the snapshot of a commit into a directory.
    ///
    /// # Errors
    /// - `Error::NotFound`: The commit has no snapshot.
    pub fn checkout(&self, commit_hash: &str, directory: &Path) -> crate::Result<()> {
        let commit = CommitObject::load(&self.kv, &self.config, commit_hash)?;
        if commit.snapshot.is_empty() {
            return Err(Error::NotFound);
        }

        sync::pull::warm_cache_for_checkout(&self.kv, &self.config, &commit.snapshot)?;

        snapshot::checkout(
            &self.kv,
            &self.config,
            &commit.snapshot,
            directory,
            &mut |hash, path, permissions| {
                let mut reader = cas::Reader::open(&self.kv, &self.config, hash)?;
                let mut file = File::create(path)?;
                std::io::copy(&mut reader, &mut file)?;
                set_permissions(&file, permissions)?;
                Ok(())
            },
        )
    }
}

impl Drop for Repository {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

#[cfg(unix)]
fn set_permissions(file: &File, permissions: u32) -> crate::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(permissions))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_permissions(_file: &File, _permissions: u32) -> crate::Result<()> {
    Ok(())
}

/// A head in the commit walk, ordered by timestamp with the digest as the
/// tie-break.
struct WalkEntry {
    time: DateTime<FixedOffset>,
    hash: String,
    commit: CommitObject,
}

impl WalkEntry {
    fn load(kv: &kv::Store, config: &Config, hash: &str) -> crate::Result<Self> {
        let commit = CommitObject::load(kv, config, hash)?;
        let time = commit.parse_time()?;
        Ok(WalkEntry {
            time,
            hash: hash.to_owned(),
            commit,
        })
    }
}

impl PartialEq for WalkEntry {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for WalkEntry {}

impl Ord for WalkEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.hash.cmp(&other.hash))
    }
}

impl PartialOrd for WalkEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
