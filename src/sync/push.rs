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
use std::thread;

use crossbeam_channel::bounded;
use tracing::{debug, info};

use crate::cas;
use crate::config::Config;
use crate::digest::Digest;
use crate::error::Error;
use crate::kv::{ObjectType, Store};
use crate::object::{CommitObject, PrefixObject, TreeObject};
use crate::store::ObjectStore;

/// The maximum number of workers pushing the blobs of a single commit.
const BLOB_PUSH_WORKERS: usize = 100;

/// Push every commit chain which is not yet advertised at the remote.
///
/// For each pending prefix the upload order is blobs, tree, commit, and the
/// prefix object last; an interrupted push leaves the advertisement absent
/// and is redone by the next run. `progress` is invoked with the number of
/// pending chains before each chain completes.
pub fn push(
    kv: &Store,
    config: &Config,
    hydrated: bool,
    progress: &mut dyn FnMut(u64),
) -> crate::Result<()> {
    let client = crate::store::default_remote(config)?;

    let remote_prefixes = super::list_remote_prefixes(&*client)?;

    let mut pending = Vec::new();
    for prefix in kv.list_typed(ObjectType::Prefix, "")? {
        let hex = prefix.to_hex();
        // A chain whose prefix object is at the remote is fully pushed.
        if !remote_prefixes.contains(&hex) {
            pending.push(hex);
        }
    }

    if pending.is_empty() {
        return Ok(());
    }

    info!(chains = pending.len(), "pushing commit chains");
    progress(pending.len() as u64);

    for prefix_hash in &pending {
        let prefix_object = PrefixObject::load(kv, config, prefix_hash)?;
        let commit_object = CommitObject::load(kv, config, &prefix_object.follow_me)?;
        let tree_object = TreeObject::load(kv, config, &commit_object.tree)?;

        push_blob_range(kv, config, &tree_object.added, hydrated, &*client)?;
        push_blob(kv, config, &commit_object.tree, &*client)?;
        push_blob(kv, config, &prefix_object.follow_me, &*client)?;

        // The advertisement goes last; everything it references is now
        // durable at the remote.
        push_blob(kv, config, prefix_hash, &*client)?;

        progress(pending.len() as u64);
    }

    Ok(())
}

/// Upload a blob in hydrated form and move its leaves to the cache area.
fn push_blob(
    kv: &Store,
    config: &Config,
    hash: &str,
    client: &dyn ObjectStore,
) -> crate::Result<()> {
    debug!(blob = hash, "uploading hydrated");

    let mut reader = cas::Reader::open(kv, config, hash)?;
    client.upload(hash, &mut reader).map_err(Error::Remote)?;

    cas::move_blob_to_cache(kv, config, hash)
}

/// Upload a blob in deduped form: each leaf under its own digest, then the
/// leaf-digest concatenation under the root digest.
fn push_blob_deduped(
    kv: &Store,
    config: &Config,
    hash: &str,
    client: &dyn ObjectStore,
) -> crate::Result<()> {
    debug!(blob = hash, "uploading deduped");

    let key = Digest::from_hex(hash)?;
    let (leaf_concat, _) = kv.get_any(&key)?.ok_or(Error::NotFound)?;
    if leaf_concat.is_empty() {
        return Err(Error::BrokenInvariant(format!(
            "cannot push blob {} without its leaf digests",
            hash
        )));
    }

    for leaf in cas::parse_leaves(&leaf_concat)? {
        cas::push_leaf(config, client, &leaf)?;
    }

    client
        .upload(hash, &mut leaf_concat.as_slice())
        .map_err(Error::Remote)?;

    cas::move_blob_to_cache(kv, config, hash)
}

/// Whether every leaf of a blob except the last has the configured leaf
/// size.
///
/// A blob which fails this check cannot be pushed hydrated, because the
/// remote copy would chunk differently when re-ingested.
fn leaves_are_equal_size(kv: &Store, config: &Config, hash: &str) -> crate::Result<bool> {
    let key = Digest::from_hex(hash)?;
    let (leaf_concat, _) = kv.get_any(&key)?.ok_or(Error::NotFound)?;
    let leaves = cas::parse_leaves(&leaf_concat)?;

    for leaf in leaves.iter().take(leaves.len().saturating_sub(1)) {
        match kv.leaf_size(leaf)? {
            Some(size) if size == config.leaf_size => {}
            _ => return Ok(false),
        }
    }
    Ok(true)
}

/// Push a range of blobs on a bounded worker pool.
///
/// The first error aborts the range and is reported; blobs already in
/// flight finish their current upload.
fn push_blob_range(
    kv: &Store,
    config: &Config,
    hashes: &[String],
    hydrated: bool,
    client: &dyn ObjectStore,
) -> crate::Result<()> {
    let workers = hashes.len().min(BLOB_PUSH_WORKERS);
    if workers == 0 {
        return Ok(());
    }

    let (task_tx, task_rx) = bounded::<&str>(workers);
    let (result_tx, result_rx) = bounded::<crate::Result<()>>(workers);

    thread::scope(|scope| {
        for _ in 0..workers {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                for hash in task_rx {
                    // Hydrated upload requires the remote copy to re-chunk
                    // into the same leaves.
                    let push_hydrated = hydrated
                        && matches!(leaves_are_equal_size(kv, config, hash), Ok(true));
                    let result = if push_hydrated {
                        push_blob(kv, config, hash, client)
                    } else {
                        push_blob_deduped(kv, config, hash, client)
                    };
                    if result_tx.send(result).is_err() {
                        return;
                    }
                }
            });
        }
        drop(task_rx);
        drop(result_tx);

        scope.spawn(move || {
            for hash in hashes {
                if task_tx.send(hash.as_str()).is_err() {
                    return;
                }
            }
        });

        let mut first_error = None;
        for result in result_rx {
            if let Err(error) = result {
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
