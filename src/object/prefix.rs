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

//! Prefix objects and the brute-force search for their identifiers.
//!
//! A prefix object advertises a commit at the remote store. Its identifier
//! starts with `PREFIX_NUM` hex zeros so that every commit chain can be
//! discovered by listing a handful of fixed key prefixes. The last
//! `PREFIX_CHEAT` characters of the zero run are not mined but overwritten
//! by the CAS writer in cheat mode; only the remaining characters are found
//! by brute force over the `magic` field.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam_channel::bounded;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::digest::{leaf_digest, root_digest, DIGEST_SIZE};
use crate::error::Error;
use crate::kv::{ObjectType, Store};

/// The character a prefix identifier starts with.
pub(crate) const PREFIX_CHAR: char = '0';

/// The number of `PREFIX_CHAR` characters a prefix identifier starts with.
pub(crate) const PREFIX_NUM: usize = 7;

/// The number of prefix characters which are overwritten rather than mined.
pub(crate) const PREFIX_CHEAT: usize = 3;

/// The number of candidates buffered for the mining workers.
const CANDIDATE_BUFFER: usize = 512;

/// Return the hex prefix shared by all prefix-object identifiers.
pub(crate) fn identifier_prefix() -> String {
    PREFIX_CHAR.to_string().repeat(PREFIX_NUM)
}

/// A prefix object pointing at a commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefixObject {
    pub version: u32,

    #[serde(rename = "type")]
    pub object_type: ObjectType,

    /// The digest of the advertised commit.
    pub follow_me: String,

    /// The mined filler which gives the identifier its zero prefix.
    pub magic: String,
}

impl PrefixObject {
    fn new(follow_me: &str) -> Self {
        PrefixObject {
            version: 1,
            object_type: ObjectType::Prefix,
            follow_me: follow_me.to_owned(),
            magic: String::new(),
        }
    }

    /// Load the prefix object with the given identifier from the CAS.
    pub fn load(kv: &Store, config: &Config, hash: &str) -> crate::Result<Self> {
        super::decode(&super::read_envelope(kv, config, hash)?)
    }

    /// Parse a prefix object from its serialized contents.
    pub fn from_contents(contents: &str) -> crate::Result<Self> {
        super::decode(contents)
    }
}

/// Mine and store the prefix object advertising `commit_hash`.
pub fn store_prefix(kv: &Store, config: &Config, commit_hash: &str) -> crate::Result<()> {
    let contents = mine(config, commit_hash)?;
    super::write_envelope(kv, config, &contents, ObjectType::Prefix)?;
    Ok(())
}

/// Check a candidate root digest against the mining target.
///
/// Only the first `PREFIX_NUM - PREFIX_CHEAT` characters must be zero; the
/// character directly after the full prefix must not be, so that a longer
/// zero run can never be mistaken for a different prefix length.
fn matches_target(hex: &str) -> bool {
    let wanted = PREFIX_NUM - PREFIX_CHEAT;
    hex.bytes().take(wanted).all(|b| b == PREFIX_CHAR as u8)
        && hex.as_bytes()[PREFIX_NUM] != PREFIX_CHAR as u8
}

/// Brute-force the serialized prefix object for `follow_me`.
///
/// Workers race over candidate magic values, decimal counters left-padded to
/// the magic length; the first solution wins and stops the rest.
fn mine(config: &Config, follow_me: &str) -> crate::Result<String> {
    let object = PrefixObject::new(follow_me);
    let mut base = serde_json::to_string(&object).map_err(|_| Error::CorruptObject)?;
    base.push('\n');

    if base.len() > config.leaf_size as usize {
        return Err(Error::BrokenInvariant(String::from(
            "prefix object does not fit in a single leaf",
        )));
    }

    // The magic rounds the object up to a multiple of 64 bytes; it is also
    // given a minimum length so the search space cannot be exhausted.
    let mut magic_len = DIGEST_SIZE - (base.len() % DIGEST_SIZE);
    if magic_len < DIGEST_SIZE * 3 / 4 {
        magic_len += DIGEST_SIZE;
    }

    let splice_at = base.len() - super::SPLICE_OFFSET;
    let head = &base[..splice_at];
    let tail = &base[splice_at..];
    let leaf_size = config.leaf_size;

    let (candidate_tx, candidate_rx) = bounded::<u64>(CANDIDATE_BUFFER);
    let (winner_tx, winner_rx) = bounded::<String>(1);
    let done = AtomicBool::new(false);

    let contents = thread::scope(|scope| {
        for _ in 0..num_cpus::get() {
            let candidate_rx = candidate_rx.clone();
            let winner_tx = winner_tx.clone();
            let done = &done;
            scope.spawn(move || {
                for counter in candidate_rx {
                    if done.load(Ordering::Relaxed) {
                        return;
                    }

                    let magic = format!("{:0>width$}", counter, width = magic_len);
                    let candidate = format!("{}{}{}", head, magic, tail);

                    // Prefix objects always fit in a single leaf.
                    let leaf = leaf_digest(candidate.as_bytes(), leaf_size, 0, true);
                    let root = root_digest(&[leaf], leaf_size);

                    if matches_target(&root.to_hex()) {
                        done.store(true, Ordering::Relaxed);
                        let _ = winner_tx.try_send(candidate);
                        return;
                    }
                }
            });
        }
        drop(candidate_rx);
        drop(winner_tx);

        // The sender moves into the producer so the candidate channel closes
        // when it stops, releasing any worker still blocked on it.
        let producer = {
            let done = &done;
            scope.spawn(move || {
                let mut counter = 0u64;
                loop {
                    if done.load(Ordering::Relaxed) {
                        return;
                    }
                    match candidate_tx.try_send(counter) {
                        Ok(()) => counter += 1,
                        Err(error) if error.is_full() => thread::yield_now(),
                        Err(_) => return,
                    }
                }
            })
        };

        let winner = winner_rx.recv();
        done.store(true, Ordering::Relaxed);
        producer.join().expect("candidate producer panicked");
        winner
    })
    .map_err(|_| {
        Error::BrokenInvariant(String::from("prefix mining stopped without a solution"))
    })?;

    debug!(commit = follow_me, "mined prefix object");
    Ok(contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_requires_zero_run_and_boundary() {
        let tail = "a".repeat(120);
        assert!(matches_target(&format!("0000abc{}", &tail[..121])));
        assert!(!matches_target(&format!("0001abc{}", &tail[..121])));
        // A zero directly after the full prefix would over-match.
        assert!(!matches_target(&format!("0000abc0{}", &tail[..120])));
    }

    #[test]
    fn identifier_prefix_has_the_configured_length() {
        assert_eq!(identifier_prefix(), "0000000");
    }
}
