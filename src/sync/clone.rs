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

//! Cloning a remote repository into a fresh local one.
//!
//! Cloning differs from a plain pull in scale: instead of inserting blob
//! keys as each tree arrives, the incoming keys are sharded by leading byte
//! into 256 temporary files, sorted per shard, and bulk-inserted into the
//! index at the end.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::thread;

use crossbeam_channel::bounded;
use tracing::info;

use crate::cas::{prune, reader};
use crate::config::Config;
use crate::digest::{Digest, DIGEST_SIZE};
use crate::kv::{ObjectType, Store};
use crate::object::{CommitObject, PrefixObject, TreeObject};
use crate::store::ObjectStore;

/// The number of workers downloading tree objects.
const TREE_WORKERS: usize = 16;

/// Download every commit chain at the remote into a fresh repository.
pub fn clone(
    kv: &Store,
    config: &Config,
    progress_downloading: &mut dyn FnMut(u64),
    progress_processing: &mut dyn FnMut(u64),
) -> crate::Result<()> {
    let client = crate::store::default_remote(config)?;
    let client = &*client;

    let remote_prefixes = super::list_remote_prefixes(client)?;
    if remote_prefixes.is_empty() {
        return Ok(());
    }

    info!(chains = remote_prefixes.len(), "cloning commit chains");
    let chain_count = remote_prefixes.len() as u64;
    progress_downloading(chain_count);

    let shards = KeyShards::new(config);

    let (tree_tx, tree_rx) = bounded::<String>(TREE_WORKERS);
    let (added_tx, added_rx) = bounded::<Vec<String>>(TREE_WORKERS);

    let result: crate::Result<()> = thread::scope(|scope| {
        let mut workers = Vec::with_capacity(TREE_WORKERS);
        for _ in 0..TREE_WORKERS {
            let tree_rx = tree_rx.clone();
            let added_tx = added_tx.clone();
            let worker = scope.spawn(move || -> crate::Result<()> {
                for tree_hash in tree_rx {
                    reader::pull_blob_to_local_disk(
                        kv,
                        config,
                        &tree_hash,
                        ObjectType::Tree,
                        client,
                    )?;
                    let tree_object = TreeObject::load(kv, config, &tree_hash)?;

                    if added_tx.send(tree_object.added).is_err() {
                        return Ok(());
                    }

                    // The tree's contents are unlikely to be read again.
                    prune::delete_leaves_for_blob(kv, config, &tree_hash)?;
                }
                Ok(())
            });
            workers.push(worker);
        }
        drop(tree_rx);
        drop(added_tx);

        // Shard the incoming blob keys while the downloads proceed.
        let shards = &shards;
        let collector = scope.spawn(move || -> crate::Result<()> {
            for added in added_rx {
                shards.append(&added)?;
            }
            Ok(())
        });

        for prefix_hash in &remote_prefixes {
            reader::pull_blob_to_local_disk(kv, config, prefix_hash, ObjectType::Prefix, client)?;
            let prefix_object = PrefixObject::load(kv, config, prefix_hash)?;

            reader::pull_blob_to_local_disk(
                kv,
                config,
                &prefix_object.follow_me,
                ObjectType::Commit,
                client,
            )?;
            let commit_object = CommitObject::load(kv, config, &prefix_object.follow_me)?;

            commit_object.mark_parents(kv)?;

            if !commit_object.tree.is_empty() && tree_tx.send(commit_object.tree.clone()).is_err() {
                break;
            }

            if !commit_object.snapshot.is_empty() {
                super::pull::pull_snapshot_objects(kv, config, &commit_object.snapshot, client)?;
            }

            progress_downloading(chain_count);
        }
        drop(tree_tx);

        for worker in workers {
            worker.join().expect("tree downloader panicked")?;
        }
        collector.join().expect("key shard collector panicked")
    });
    result?;

    shards.sort_and_import(kv, progress_processing)
}

/// The 256 temporary shard files blob keys are distributed into.
struct KeyShards {
    dir: PathBuf,
}

impl KeyShards {
    fn new(config: &Config) -> Self {
        KeyShards {
            dir: config.cask_dir(),
        }
    }

    fn shard_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!(".keys-0x{:02x}.dat", index))
    }

    /// Append the given keys to their shard files by leading byte.
    fn append(&self, added: &[String]) -> crate::Result<()> {
        let mut sharded: Vec<Vec<u8>> = vec![Vec::new(); 256];
        for hash in added {
            let key = Digest::from_hex(hash)?;
            sharded[key.as_bytes()[0] as usize].extend_from_slice(key.as_bytes());
        }

        for (index, keys) in sharded.iter().enumerate() {
            if keys.is_empty() {
                continue;
            }
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.shard_path(index))?;
            file.write_all(keys)?;
        }

        Ok(())
    }

    /// Sort each shard and bulk-insert its keys into the blob index, removing
    /// the shard files as they are consumed.
    fn sort_and_import(
        &self,
        kv: &Store,
        progress: &mut dyn FnMut(u64),
    ) -> crate::Result<()> {
        let mut shard_paths = Vec::new();
        for index in 0..256 {
            let path = self.shard_path(index);
            match path.metadata() {
                Ok(metadata) if metadata.len() > 0 => shard_paths.push(path),
                Ok(_) => fs::remove_file(&path)?,
                Err(_) => {}
            }
        }

        let shard_count = shard_paths.len() as u64;
        progress(shard_count);

        for path in shard_paths {
            let contents = fs::read(&path)?;
            let mut keys = contents
                .chunks(DIGEST_SIZE)
                .map(Digest::from_bytes)
                .collect::<crate::Result<Vec<_>>>()?;
            keys.sort_unstable();

            let mut batch = Vec::with_capacity(super::pull::KEY_BATCH_SIZE.min(keys.len()));
            for key in keys {
                batch.push(key);
                if batch.len() == super::pull::KEY_BATCH_SIZE {
                    kv.put_absent_batch(&batch, ObjectType::Blob)?;
                    batch.clear();
                }
            }
            if !batch.is_empty() {
                kv.put_absent_batch(&batch, ObjectType::Blob)?;
            }

            fs::remove_file(&path)?;
            progress(shard_count);
        }

        Ok(())
    }
}
