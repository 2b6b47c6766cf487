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
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::digest::Digest;
use crate::kv::{ObjectType, Store};

/// The tree object of a commit: the set of blobs added and removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeObject {
    pub version: u32,

    #[serde(rename = "type")]
    pub object_type: ObjectType,

    /// The root digests added by the commit, in ascending hex order.
    pub added: Vec<String>,

    /// The names removed by the commit, in ascending order.
    pub removed: Vec<String>,

    pub padding: String,
}

impl TreeObject {
    /// Build a tree object from the staged set.
    pub fn new(added: &[Digest], removed: &[String]) -> Self {
        let mut added = added.iter().map(Digest::to_hex).collect::<Vec<_>>();
        added.sort_unstable();

        let mut removed = removed.to_vec();
        removed.sort_unstable();

        TreeObject {
            version: 1,
            object_type: ObjectType::Tree,
            added,
            removed,
            padding: String::new(),
        }
    }

    /// A tree which adds and removes nothing produces an empty commit.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Serialize this tree and write it to the CAS.
    pub fn store(&self, kv: &Store, config: &Config) -> crate::Result<String> {
        let encoded = super::encode_padded(self)?;
        super::write_envelope(kv, config, &encoded, ObjectType::Tree)
    }

    /// Load the tree object with the given digest from the CAS.
    pub fn load(kv: &Store, config: &Config, hash: &str) -> crate::Result<Self> {
        super::decode(&super::read_envelope(kv, config, hash)?)
    }

    /// Parse a tree object from its serialized contents.
    pub fn from_contents(contents: &str) -> crate::Result<Self> {
        super::decode(contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::digest::leaf_digest;

    #[test]
    fn added_digests_are_sorted() {
        let digests = (0u8..4)
            .map(|index| leaf_digest(&[index], 1024, 0, true))
            .collect::<Vec<_>>();
        let tree = TreeObject::new(&digests, &[]);

        let mut sorted = tree.added.clone();
        sorted.sort_unstable();
        assert_eq!(tree.added, sorted);
    }

    #[test]
    fn serialized_form_is_64_aligned_and_round_trips() {
        let digests = vec![leaf_digest(b"blob", 1024, 0, true)];
        let tree = TreeObject::new(&digests, &[String::from("removed-name")]);

        let encoded = super::super::encode_padded(&tree).unwrap();
        assert_eq!(encoded.len() % 64, 0);

        let decoded = TreeObject::from_contents(&encoded).unwrap();
        assert_eq!(decoded.added, tree.added);
        assert_eq!(decoded.removed, tree.removed);
        assert_eq!(decoded.object_type, ObjectType::Tree);
    }

    #[test]
    fn empty_tree_is_detected() {
        assert!(TreeObject::new(&[], &[]).is_empty());
        assert!(!TreeObject::new(&[leaf_digest(b"x", 1024, 0, true)], &[]).is_empty());
    }
}
