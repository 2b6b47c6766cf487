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
use std::fs;
use std::thread;

use crossbeam_channel::bounded;
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::cas::{prune, reader};
use crate::config::Config;
use crate::digest::Digest;
use crate::error::Error;
use crate::kv::{ObjectType, Store};
use crate::object::{CommitObject, PrefixObject, SnapshotObject, TreeObject};
use crate::store::ObjectStore;

/// The number of workers pulling prefix chains in parallel.
const CHAIN_WORKERS: usize = 16;

/// The number of blob keys inserted into the index per transaction.
pub(crate) const KEY_BATCH_SIZE: usize = 0x4000;

/// Pull every commit chain advertised at the remote which is missing
/// locally.
///
/// A failed chain aborts only itself; the remaining chains are still
/// pulled, and the first failure is reported once they finish.
pub fn pull(kv: &Store, config: &Config, progress: &mut dyn FnMut(u64)) -> crate::Result<()> {
    let client = crate::store::default_remote(config)?;

    let remote_prefixes = super::list_remote_prefixes(&*client)?;

    let mut to_fetch = Vec::new();
    for prefix in remote_prefixes {
        let key = Digest::from_hex(&prefix)?;
        if !kv.contains(ObjectType::Prefix, &key)? {
            to_fetch.push(prefix);
        }
    }

    if to_fetch.is_empty() {
        return Ok(());
    }

    info!(chains = to_fetch.len(), "pulling commit chains");
    let chain_count = to_fetch.len() as u64;
    progress(chain_count);

    let workers = to_fetch.len().min(CHAIN_WORKERS);
    let (task_tx, task_rx) = bounded::<&str>(workers);
    let (result_tx, result_rx) = bounded::<crate::Result<()>>(workers);

    let client = &*client;
    thread::scope(|scope| {
        for _ in 0..workers {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                for prefix in task_rx {
                    let result = fetch_prefix_chain(kv, config, prefix, client);
                    if let Err(error) = &result {
                        warn!(prefix, %error, "failed to pull commit chain");
                    }
                    if result_tx.send(result).is_err() {
                        return;
                    }
                }
            });
        }
        drop(task_rx);
        drop(result_tx);

        let to_fetch = &to_fetch;
        scope.spawn(move || {
            for prefix in to_fetch {
                if task_tx.send(prefix.as_str()).is_err() {
                    return;
                }
            }
        });

        let mut first_error = None;
        for result in result_rx {
            if result.is_ok() {
                progress(chain_count);
            } else if first_error.is_none() {
                first_error = result.err();
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    })
}

/// Fetch a prefix object and everything it references.
///
/// The level-1 entries are stored in reverse dependency order: the blob keys
/// of the tree first, then the tree, then the commit, and the prefix object
/// as the very last step. An interrupted pull therefore leaves the prefix
/// entry missing and the next run retries the whole chain.
fn fetch_prefix_chain(
    kv: &Store,
    config: &Config,
    prefix_hash: &str,
    client: &dyn ObjectStore,
) -> crate::Result<()> {
    let (prefix_file, prefix_contents) = fetch_temp_and_contents(client, prefix_hash)?;
    let prefix_object = PrefixObject::from_contents(&prefix_contents)?;

    let (commit_file, commit_contents) =
        fetch_temp_and_contents(client, &prefix_object.follow_me)?;
    let commit_object = CommitObject::from_contents(&commit_contents)?;

    let (tree_file, tree_contents) = fetch_temp_and_contents(client, &commit_object.tree)?;
    let tree_object = TreeObject::from_contents(&tree_contents)?;

    // Record the root keys of all added blobs; their contents are fetched
    // lazily on first read.
    cache_keys_for_blobs(kv, &tree_object.added)?;

    reader::store_blob_in_cache(kv, config, tree_file.path(), ObjectType::Tree)?;

    // The tree's contents are unlikely to be read again.
    prune::delete_leaves_for_blob(kv, config, &commit_object.tree)?;

    reader::store_blob_in_cache(kv, config, commit_file.path(), ObjectType::Commit)?;
    commit_object.mark_parents(kv)?;

    reader::store_blob_in_cache(kv, config, prefix_file.path(), ObjectType::Prefix)?;

    Ok(())
}

/// Fetch an object into a temporary file and return the file together with
/// its contents.
pub(crate) fn fetch_temp_and_contents(
    client: &dyn ObjectStore,
    hash: &str,
) -> crate::Result<(NamedTempFile, String)> {
    let file = reader::fetch_to_temp_file(client, hash)?;
    let contents = fs::read_to_string(file.path())?;
    Ok((file, contents))
}

/// Record the root keys of blobs with empty values, in batches.
///
/// Blobs the repository already holds keep their hydrated entries.
pub(crate) fn cache_keys_for_blobs(kv: &Store, added: &[String]) -> crate::Result<()> {
    let mut batch = Vec::with_capacity(KEY_BATCH_SIZE.min(added.len()));

    for hash in added {
        batch.push(Digest::from_hex(hash)?);

        if batch.len() == KEY_BATCH_SIZE {
            kv.put_absent_batch(&batch, ObjectType::Blob)?;
            batch.clear();
        }
    }

    if !batch.is_empty() {
        kv.put_absent_batch(&batch, ObjectType::Blob)?;
    }

    Ok(())
}

/// Pull a single object from the remote on demand.
///
/// Invoked by the CAS reader when a level-1 value is empty or a leaf file is
/// missing. Returns the object's leaf-digest concatenation.
pub(crate) fn pull_on_demand(kv: &Store, config: &Config, hash: &str) -> crate::Result<Vec<u8>> {
    let client = crate::store::default_remote(config)?;

    let key = Digest::from_hex(hash)?;
    let (_, object_type) = kv.get_any(&key)?.ok_or(Error::NotFound)?;

    reader::pull_blob_to_local_disk(kv, config, hash, object_type, &*client)
}

/// Pull the closure of snapshot objects reachable from `hash`.
///
/// Only the snapshot envelopes are fetched; the blobs they reference are
/// left to be pulled on first read.
pub(crate) fn pull_snapshot_objects(
    kv: &Store,
    config: &Config,
    hash: &str,
    client: &dyn ObjectStore,
) -> crate::Result<()> {
    reader::pull_blob_to_local_disk(kv, config, hash, ObjectType::Snapshot, client)?;

    let snapshot = SnapshotObject::load(kv, config, hash)?;
    for entry in &snapshot.entries {
        if entry.is_directory() {
            pull_snapshot_objects(kv, config, &entry.blob, client)?;
        } else {
            // Only the key is recorded; contents stay remote.
            kv.put_typed(&Digest::from_hex(&entry.blob)?, &[], ObjectType::Blob)?;
        }
    }

    Ok(())
}

/// Warm the cache for a checkout by pulling missing blobs in parallel.
pub(crate) fn warm_cache_for_checkout(
    kv: &Store,
    config: &Config,
    snapshot_hash: &str,
) -> crate::Result<()> {
    if config.remotes.is_empty() {
        return Ok(());
    }
    let client = crate::store::default_remote(config)?;

    let mut blobs = Vec::new();
    collect_snapshot_blobs(kv, config, snapshot_hash, &mut blobs)?;

    let workers = blobs.len().min(super::LEAF_FETCH_WORKERS);
    if workers == 0 {
        return Ok(());
    }

    let client = &*client;
    let (task_tx, task_rx) = bounded::<&str>(workers);

    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let task_rx = task_rx.clone();
            let handle = scope.spawn(move || -> crate::Result<()> {
                for hash in task_rx {
                    let key = Digest::from_hex(hash)?;
                    let hydrated = match kv.get_any(&key)? {
                        Some((value, _)) => !value.is_empty(),
                        None => false,
                    };
                    if !hydrated {
                        reader::pull_blob_to_local_disk(
                            kv,
                            config,
                            hash,
                            ObjectType::Blob,
                            client,
                        )?;
                    }
                }
                Ok(())
            });
            handles.push(handle);
        }
        drop(task_rx);

        for blob in &blobs {
            if task_tx.send(blob.as_str()).is_err() {
                break;
            }
        }
        drop(task_tx);

        let mut first_error = None;
        for handle in handles {
            if let Err(error) = handle.join().expect("cache warming worker panicked") {
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    })
}

fn collect_snapshot_blobs(
    kv: &Store,
    config: &Config,
    snapshot_hash: &str,
    blobs: &mut Vec<String>,
) -> crate::Result<()> {
    let snapshot = SnapshotObject::load(kv, config, snapshot_hash)?;
    for entry in &snapshot.entries {
        if entry.is_directory() {
            collect_snapshot_blobs(kv, config, &entry.blob, blobs)?;
        } else {
            blobs.push(entry.blob.clone());
        }
    }
    Ok(())
}
