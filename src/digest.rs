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
use std::collections::BTreeMap;
use std::fmt::{self, Debug, Display, Formatter};
use std::io::Read;
use std::thread;

use blake2b_simd::Params;
use crossbeam_channel::bounded;

/// The size of a digest in bytes.
pub const DIGEST_SIZE: usize = 64;

/// The size of a digest in hex characters.
pub const DIGEST_SIZE_HEX: usize = DIGEST_SIZE * 2;

/// The number of worker threads used for hashing the leaves of a stream.
const SUM_WORKERS: usize = 8;

/// The digest which identifies data stored in the CAS.
///
/// A digest is the 64-byte output of BLAKE2b in tree mode and is displayed as
/// 128 lowercase hex characters. Digests are immutable; equality is byte
/// equality.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest([u8; DIGEST_SIZE]);

impl Digest {
    /// Construct a digest from raw bytes.
    ///
    /// # Errors
    /// - `Error::BadDigestSize`: The input is not `DIGEST_SIZE` bytes long.
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        if bytes.len() != DIGEST_SIZE {
            return Err(crate::Error::BadDigestSize);
        }
        let mut digest = [0u8; DIGEST_SIZE];
        digest.copy_from_slice(bytes);
        Ok(Digest(digest))
    }

    /// Construct a digest from its hex form.
    ///
    /// # Errors
    /// - `Error::BadDigestSize`: The input is not 128 lowercase hex characters.
    pub fn from_hex(hex_str: &str) -> crate::Result<Self> {
        let bytes = hex::decode(hex_str).map_err(|_| crate::Error::BadDigestSize)?;
        Self::from_bytes(&bytes)
    }

    /// Return the raw bytes of this digest.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Return the hex form of this digest.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Debug for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

/// Return the BLAKE2b parameters shared by all nodes of the hash tree.
fn tree_params(leaf_size: u32) -> Params {
    let mut params = Params::new();
    params
        .hash_length(DIGEST_SIZE)
        .fanout(0)
        .max_depth(2)
        .max_leaf_length(leaf_size)
        .inner_hash_length(DIGEST_SIZE);
    params
}

/// Compute the digest of a single leaf.
///
/// The leaf `index` is encoded into the hash as the node offset, so leaves of
/// the same blob must be hashed with consecutive indices starting at zero.
/// `last` must be set for the final leaf of a blob and for no other.
pub fn leaf_digest(data: &[u8], leaf_size: u32, index: u64, last: bool) -> Digest {
    let mut params = tree_params(leaf_size);
    params.node_offset(index).node_depth(0).last_node(last);
    let hash = params.hash(data);
    let mut digest = [0u8; DIGEST_SIZE];
    digest.copy_from_slice(hash.as_bytes());
    Digest(digest)
}

/// Compute the root digest over the concatenation of leaf digests.
pub fn root_digest(leaves: &[Digest], leaf_size: u32) -> Digest {
    let mut params = tree_params(leaf_size);
    params.node_offset(0).node_depth(1).last_node(true);
    let mut state = params.to_state();
    for leaf in leaves {
        state.update(leaf.as_bytes());
    }
    let hash = state.finalize();
    let mut digest = [0u8; DIGEST_SIZE];
    digest.copy_from_slice(hash.as_bytes());
    Digest(digest)
}

/// Fill `buffer` from `reader`, stopping only at end-of-stream.
///
/// Returns the number of bytes read, which is less than the buffer size only
/// when the stream ended.
fn read_full(reader: &mut impl Read, buffer: &mut [u8]) -> crate::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let bytes_read = reader.read(&mut buffer[filled..])?;
        if bytes_read == 0 {
            break;
        }
        filled += bytes_read;
    }
    Ok(filled)
}

/// Compute the root digest of a stream without storing it.
///
/// The stream is split into leaves of `leaf_size` bytes which are hashed on a
/// pool of worker threads; the concatenation order of the leaf digests is
/// restored from the leaf index. A stream whose length is an exact multiple of
/// `leaf_size` ends in a zero-length last leaf, matching what the CAS writer
/// stores.
///
/// # Errors
/// - `Error::Io`: An I/O error occurred reading the stream.
pub fn sum_reader(mut reader: impl Read, leaf_size: u32) -> crate::Result<Digest> {
    let (task_tx, task_rx) = bounded::<(u64, Vec<u8>, bool)>(SUM_WORKERS * 2);
    let (digest_tx, digest_rx) = bounded::<(u64, Digest)>(SUM_WORKERS * 2);

    thread::scope(|scope| {
        for _ in 0..SUM_WORKERS {
            let task_rx = task_rx.clone();
            let digest_tx = digest_tx.clone();
            scope.spawn(move || {
                for (index, buffer, last) in task_rx {
                    let digest = leaf_digest(&buffer, leaf_size, index, last);
                    if digest_tx.send((index, digest)).is_err() {
                        return;
                    }
                }
            });
        }
        drop(task_rx);
        drop(digest_tx);

        let collector = scope.spawn(move || {
            let mut digests = BTreeMap::new();
            for (index, digest) in digest_rx {
                digests.insert(index, digest);
            }
            digests
        });

        let mut index = 0u64;
        loop {
            let mut buffer = vec![0u8; leaf_size as usize];
            let filled = read_full(&mut reader, &mut buffer)?;
            buffer.truncate(filled);

            // A full leaf is never the last one; a stream ending on a leaf
            // boundary gets a zero-length last leaf.
            let last = filled < leaf_size as usize;
            if task_tx.send((index, buffer, last)).is_err() {
                break;
            }
            if last {
                break;
            }
            index += 1;
        }
        drop(task_tx);

        let digests = collector.join().expect("hash collector panicked");
        let leaves = digests.into_iter().map(|(_, digest)| digest).collect::<Vec<_>>();
        Ok(root_digest(&leaves, leaf_size))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEAF_SIZE: u32 = 1024;

    #[test]
    fn hex_round_trip() {
        let digest = leaf_digest(b"some data", LEAF_SIZE, 0, true);
        let hex_form = digest.to_hex();
        assert_eq!(hex_form.len(), DIGEST_SIZE_HEX);
        assert_eq!(Digest::from_hex(&hex_form).unwrap(), digest);
    }

    #[test]
    fn rejects_wrong_size() {
        assert!(matches!(
            Digest::from_bytes(&[0u8; 32]),
            Err(crate::Error::BadDigestSize)
        ));
        assert!(matches!(
            Digest::from_hex("abcdef"),
            Err(crate::Error::BadDigestSize)
        ));
    }

    #[test]
    fn leaf_index_changes_digest() {
        let first = leaf_digest(b"data", LEAF_SIZE, 0, false);
        let second = leaf_digest(b"data", LEAF_SIZE, 1, false);
        assert_ne!(first, second);
    }

    #[test]
    fn last_node_flag_changes_digest() {
        let inner = leaf_digest(b"data", LEAF_SIZE, 0, false);
        let last = leaf_digest(b"data", LEAF_SIZE, 0, true);
        assert_ne!(inner, last);
    }

    #[test]
    fn sum_matches_manual_hash() {
        let data = vec![7u8; LEAF_SIZE as usize + 100];
        let leaves = vec![
            leaf_digest(&data[..LEAF_SIZE as usize], LEAF_SIZE, 0, false),
            leaf_digest(&data[LEAF_SIZE as usize..], LEAF_SIZE, 1, true),
        ];
        let expected = root_digest(&leaves, LEAF_SIZE);
        assert_eq!(sum_reader(data.as_slice(), LEAF_SIZE).unwrap(), expected);
    }

    #[test]
    fn sum_of_exact_multiple_ends_with_empty_leaf() {
        let data = vec![1u8; LEAF_SIZE as usize];
        let leaves = vec![
            leaf_digest(&data, LEAF_SIZE, 0, false),
            leaf_digest(&[], LEAF_SIZE, 1, true),
        ];
        let expected = root_digest(&leaves, LEAF_SIZE);
        assert_eq!(sum_reader(data.as_slice(), LEAF_SIZE).unwrap(), expected);
    }
}
