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

//! Synchronization of commit chains with a remote object store.
//!
//! Transfers are ordered so that the advertising prefix object is always the
//! last object written on push and the last entry stored on pull. A crashed
//! or interrupted transfer therefore leaves the advertisement absent, and
//! re-running the operation redoes only the missing chains.

use std::collections::HashSet;
use std::thread;

use crossbeam_channel::bounded;

use crate::config::Config;
use crate::digest::Digest;
use crate::kv::Store;
use crate::object::prefix::identifier_prefix;
use crate::store::ObjectStore;

pub mod clone;
pub mod pull;
pub mod push;

/// The number of concurrent list operations used to enumerate a remote.
const LIST_WORKERS: usize = 16;

/// The number of concurrent leaf downloads for a deduped blob.
const LEAF_FETCH_WORKERS: usize = 50;

/// List every prefix-object identifier at the remote.
///
/// Sixteen list operations run in parallel, one per hex nibble following the
/// fixed zero run; their results are unioned.
pub(crate) fn list_remote_prefixes(
    client: &dyn ObjectStore,
) -> crate::Result<HashSet<String>> {
    let results = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(LIST_WORKERS);
        for nibble in 0..LIST_WORKERS {
            let handle = scope.spawn(move || -> anyhow::Result<Vec<String>> {
                let mut names = Vec::new();
                let query = format!("{}{:x}", identifier_prefix(), nibble);
                client.list(&query, &mut |name| names.push(name.to_owned()))?;
                Ok(names)
            });
            handles.push(handle);
        }

        handles
            .into_iter()
            .map(|handle| handle.join().expect("remote list worker panicked"))
            .collect::<Vec<_>>()
    });

    let mut prefixes = HashSet::new();
    for result in results {
        prefixes.extend(result.map_err(crate::Error::Remote)?);
    }
    Ok(prefixes)
}

/// Fetch the given leaves into the cache area on a bounded worker pool.
///
/// Leaves already present locally are skipped.
pub(crate) fn fetch_leaves(
    kv: &Store,
    config: &Config,
    client: &dyn ObjectStore,
    leaves: &[Digest],
) -> crate::Result<()> {
    let workers = leaves.len().min(LEAF_FETCH_WORKERS);
    if workers <= 1 {
        for leaf in leaves {
            crate::cas::fetch_leaf(kv, config, client, leaf)?;
        }
        return Ok(());
    }

    let (task_tx, task_rx) = bounded::<Digest>(workers);
    let (result_tx, result_rx) = bounded::<crate::Result<()>>(workers);

    thread::scope(|scope| {
        for _ in 0..workers {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                for leaf in task_rx {
                    let result = crate::cas::fetch_leaf(kv, config, client, &leaf);
                    if result_tx.send(result).is_err() {
                        return;
                    }
                }
            });
        }
        drop(task_rx);
        drop(result_tx);

        scope.spawn(move || {
            for leaf in leaves {
                if task_tx.send(*leaf).is_err() {
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
