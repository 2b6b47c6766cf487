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
use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::digest::Digest;
use crate::error::Error;
use crate::identity::Identity;
use crate::kv::{ObjectType, Store};

use super::tree::TreeObject;

/// A commit object.
///
/// Warm parents are the parents which remain on the active chain; cold
/// parents are the heads which were forked off when this commit was made.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitObject {
    pub version: u32,

    #[serde(rename = "type")]
    pub object_type: ObjectType,

    pub message: String,
    pub committer_name: String,
    pub committer_email: String,
    pub branch: String,

    /// The digest of the commit's tree object.
    pub tree: String,

    /// The digest of the commit's snapshot object, or empty.
    pub snapshot: String,

    pub warm_parents: Vec<String>,
    pub cold_parents: Vec<String>,

    /// RFC 3339 commit time.
    pub time_stamp: String,

    pub padding: String,
}

impl CommitObject {
    fn new(
        message: &str,
        branch: &str,
        tree: &str,
        snapshot: &str,
        warm_parents: Vec<String>,
        cold_parents: Vec<String>,
        identity: &Identity,
    ) -> Self {
        CommitObject {
            version: 1,
            object_type: ObjectType::Commit,
            message: message.to_owned(),
            committer_name: identity.name.clone(),
            committer_email: identity.email.clone(),
            branch: branch.to_owned(),
            tree: tree.to_owned(),
            snapshot: snapshot.to_owned(),
            warm_parents,
            cold_parents,
            time_stamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            padding: String::new(),
        }
    }

    /// Parse the commit time.
    ///
    /// # Errors
    /// - `Error::CorruptObject`: The timestamp is not RFC 3339.
    pub fn parse_time(&self) -> crate::Result<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(&self.time_stamp).map_err(|_| Error::CorruptObject)
    }

    /// Mark every warm and cold parent of this commit as a parent.
    pub fn mark_parents(&self, kv: &Store) -> crate::Result<()> {
        for parent in self.warm_parents.iter().chain(self.cold_parents.iter()) {
            kv.mark_parent(&Digest::from_hex(parent)?)?;
        }
        Ok(())
    }

    /// Load the commit object with the given digest from the CAS.
    pub fn load(kv: &Store, config: &Config, hash: &str) -> crate::Result<Self> {
        super::decode(&super::read_envelope(kv, config, hash)?)
    }

    /// Parse a commit object from its serialized contents.
    pub fn from_contents(contents: &str) -> crate::Result<Self> {
        super::decode(contents)
    }
}

/// Build and store the tree and commit objects for the staged set.
///
/// Returns the commit digest, or `empty = true` without mutating anything
/// when the staged set adds and removes nothing.
pub fn store_commit(
    kv: &Store,
    config: &Config,
    message: &str,
    branch: &str,
    snapshot: &str,
    warm_parents: Vec<String>,
    cold_parents: Vec<String>,
    added: &[Digest],
    removed: &[String],
) -> crate::Result<(String, bool)> {
    let tree = TreeObject::new(added, removed);
    if tree.is_empty() {
        return Ok((String::new(), true));
    }
    let tree_hash = tree.store(kv, config)?;

    let identity = crate::identity::resolve()?;
    let commit = CommitObject::new(
        message,
        branch,
        &tree_hash,
        snapshot,
        warm_parents,
        cold_parents,
        &identity,
    );

    let encoded = super::encode_padded(&commit)?;
    let commit_hash = super::write_envelope(kv, config, &encoded, ObjectType::Commit)?;

    commit.mark_parents(kv)?;

    Ok((commit_hash, false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_parse_as_rfc3339() {
        let identity = Identity {
            name: String::from("Test User"),
            email: String::from("test@example.com"),
        };
        let commit = CommitObject::new("message", "master", "tree", "", vec![], vec![], &identity);
        assert!(commit.parse_time().is_ok());
    }

    #[test]
    fn serialized_commit_round_trips() {
        let identity = Identity {
            name: String::from("Test User"),
            email: String::from("test@example.com"),
        };
        let commit = CommitObject::new(
            "a message",
            "main",
            "treedigest",
            "",
            vec![String::from("parent-a")],
            vec![String::from("parent-b")],
            &identity,
        );

        let encoded = super::super::encode_padded(&commit).unwrap();
        assert_eq!(encoded.len() % 64, 0);

        let decoded = CommitObject::from_contents(&encoded).unwrap();
        assert_eq!(decoded.message, commit.message);
        assert_eq!(decoded.branch, commit.branch);
        assert_eq!(decoded.tree, commit.tree);
        assert_eq!(decoded.warm_parents, commit.warm_parents);
        assert_eq!(decoded.cold_parents, commit.cold_parents);
        assert_eq!(decoded.time_stamp, commit.time_stamp);
    }
}
