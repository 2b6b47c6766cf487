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

//! The repository configuration file.
//!
//! The configuration is a JSON document at `<repoRoot>/.cask.config`. Leaf
//! size and maximum repository size are clamped to their minimums when the
//! file is saved, and missing values fall back to their defaults when it is
//! loaded.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// The name of the configuration file in the repository root.
pub const CONFIG_FILE: &str = ".cask.config";

/// The name of the directory holding repository state.
pub const CASK_DIR: &str = ".cask";

/// The smallest allowed leaf size in bytes.
pub const LEAF_SIZE_MIN: u32 = 1024;

/// The default leaf size in bytes.
pub const LEAF_SIZE_DEFAULT: u32 = 5 * 1024 * 1024;

/// The smallest allowed local repository size in bytes.
pub const MAX_REPO_SIZE_MIN: u64 = 1024 * 1024;

/// The default maximum local repository size in bytes.
pub const MAX_REPO_SIZE_DEFAULT: u64 = 25 * 1024 * 1024 * 1024;

/// The type of back end a remote refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteKind {
    /// An S3-compatible bucket.
    S3,

    /// A directory in the local file system, used as a stand-in remote.
    Fake,

    /// Amazon Cloud Drive. No driver is provided for this type.
    Acd,

    /// A DynamoDB key-blob table. No driver is provided for this type.
    #[serde(rename = "dynamodb")]
    DynamoDb,
}

/// The configuration of a single remote.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: RemoteKind,

    /// Whether blobs are pushed hydrated rather than deduped.
    #[serde(default)]
    pub hydrate: bool,

    #[serde(default)]
    pub s3_bucket: String,
    #[serde(default)]
    pub s3_region: String,
    #[serde(default)]
    pub s3_access_key: String,
    #[serde(default)]
    pub s3_secret_key: String,
    #[serde(default)]
    pub s3_endpoint: String,

    #[serde(default)]
    pub acd_refresh_token: String,

    /// The directory backing a `fake` remote.
    #[serde(default)]
    pub fake_directory: String,
}

impl RemoteConfig {
    /// A `fake` remote backed by the given directory.
    pub fn fake(name: &str, directory: &Path) -> Self {
        RemoteConfig {
            name: name.to_owned(),
            kind: RemoteKind::Fake,
            hydrate: false,
            s3_bucket: String::new(),
            s3_region: String::new(),
            s3_access_key: String::new(),
            s3_secret_key: String::new(),
            s3_endpoint: String::new(),
            acd_refresh_token: String::new(),
            fake_directory: directory.to_string_lossy().into_owned(),
        }
    }

    /// An `s3` remote for the given bucket.
    pub fn s3(name: &str, bucket: &str, region: &str, access_key: &str, secret_key: &str) -> Self {
        RemoteConfig {
            name: name.to_owned(),
            kind: RemoteKind::S3,
            hydrate: false,
            s3_bucket: bucket.to_owned(),
            s3_region: region.to_owned(),
            s3_access_key: access_key.to_owned(),
            s3_secret_key: secret_key.to_owned(),
            s3_endpoint: String::new(),
            acd_refresh_token: String::new(),
            fake_directory: String::new(),
        }
    }
}

/// The repository configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub version: u32,

    #[serde(rename = "type")]
    pub document_type: String,

    pub base_path: PathBuf,
    pub leaf_size: u32,
    pub max_repo_size: u64,

    #[serde(default)]
    pub rolling_hash_bits: u32,
    #[serde(default)]
    pub rolling_hash_min: u32,

    #[serde(default)]
    pub remotes: Vec<RemoteConfig>,
}

impl Config {
    /// Build a new configuration for the repository at `base_path`.
    ///
    /// A `leaf_size` or `max_repo_size` of zero selects the default; values
    /// below the minimum are clamped up.
    pub fn new(base_path: &Path, leaf_size: u32, max_repo_size: u64) -> Self {
        let leaf_size = if leaf_size == 0 {
            LEAF_SIZE_DEFAULT
        } else {
            leaf_size.max(LEAF_SIZE_MIN)
        };
        let max_repo_size = if max_repo_size == 0 {
            MAX_REPO_SIZE_DEFAULT
        } else {
            max_repo_size.max(MAX_REPO_SIZE_MIN)
        };

        Config {
            version: 1,
            document_type: String::from("config"),
            base_path: base_path.to_owned(),
            leaf_size,
            max_repo_size,
            rolling_hash_bits: 0,
            rolling_hash_min: 0,
            remotes: Vec::new(),
        }
    }

    /// The path of the configuration file.
    fn file_path(base_path: &Path) -> PathBuf {
        base_path.join(CONFIG_FILE)
    }

    /// The path of the repository state directory.
    pub fn cask_dir(&self) -> PathBuf {
        self.base_path.join(CASK_DIR)
    }

    /// Load the configuration for the repository at `base_path`.
    ///
    /// Returns `None` if no configuration file exists at that path.
    ///
    /// # Errors
    /// - `Error::Config`: The configuration file could not be parsed.
    pub fn load(base_path: &Path) -> crate::Result<Option<Self>> {
        let contents = match fs::read_to_string(Self::file_path(base_path)) {
            Ok(contents) => contents,
            Err(_) => return Ok(None),
        };

        let mut config: Config = serde_json::from_str(&contents)
            .map_err(|error| crate::Error::Config(error.to_string()))?;

        if config.leaf_size == 0 {
            config.leaf_size = LEAF_SIZE_DEFAULT;
        }
        if config.max_repo_size == 0 {
            config.max_repo_size = MAX_REPO_SIZE_DEFAULT;
        }

        Ok(Some(config))
    }

    /// Save this configuration to its repository root.
    ///
    /// # Errors
    /// - `Error::Io`: The configuration file could not be written.
    pub fn save(&self) -> crate::Result<()> {
        let mut json = serde_json::to_string(self)
            .map_err(|error| crate::Error::Config(error.to_string()))?;
        json.push('\n');
        fs::write(Self::file_path(&self.base_path), json)?;
        Ok(())
    }

    /// Add a remote to this configuration and save it.
    ///
    /// # Errors
    /// - `Error::Config`: A remote with the same name exists, or a remote is
    ///   already configured.
    pub fn add_remote(&mut self, remote: RemoteConfig) -> crate::Result<()> {
        if self.remotes.iter().any(|existing| existing.name == remote.name) {
            return Err(crate::Error::Config(format!(
                "a remote named `{}` already exists",
                remote.name
            )));
        }

        // Current restriction of a single remote.
        if !self.remotes.is_empty() {
            return Err(crate::Error::Config(String::from(
                "only a single remote is supported",
            )));
        }

        self.remotes.push(remote);
        self.save()
    }
}

/// Return `value`, unless the environment variable `env_name` is set.
pub(crate) fn env_override(value: &str, env_name: &str) -> String {
    match env::var(env_name) {
        Ok(env_value) if !env_value.is_empty() => env_value,
        _ => value.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    #[test]
    fn zero_sizes_select_defaults() {
        let config = Config::new(Path::new("/tmp/repo"), 0, 0);
        assert_eq!(config.leaf_size, LEAF_SIZE_DEFAULT);
        assert_eq!(config.max_repo_size, MAX_REPO_SIZE_DEFAULT);
    }

    #[test]
    fn sizes_below_minimum_are_clamped() {
        let config = Config::new(Path::new("/tmp/repo"), 1, 1);
        assert_eq!(config.leaf_size, LEAF_SIZE_MIN);
        assert_eq!(config.max_repo_size, MAX_REPO_SIZE_MIN);
    }

    #[test]
    fn save_and_load_round_trip() {
        let directory = tempdir().unwrap();
        let mut config = Config::new(directory.path(), 2048, 0);
        config
            .add_remote(RemoteConfig::fake("origin", Path::new("/tmp/remote")))
            .unwrap();

        let loaded = Config::load(directory.path()).unwrap().unwrap();
        assert_eq!(loaded.leaf_size, 2048);
        assert_eq!(loaded.remotes.len(), 1);
        assert_eq!(loaded.remotes[0].kind, RemoteKind::Fake);
    }

    #[test]
    fn load_missing_config_returns_none() {
        let directory = tempdir().unwrap();
        assert!(Config::load(directory.path()).unwrap().is_none());
    }

    #[test]
    fn second_remote_is_rejected() {
        let directory = tempdir().unwrap();
        let mut config = Config::new(directory.path(), 0, 0);
        config
            .add_remote(RemoteConfig::fake("origin", Path::new("/tmp/remote")))
            .unwrap();
        assert!(matches!(
            config.add_remote(RemoteConfig::fake("backup", Path::new("/tmp/other"))),
            Err(crate::Error::Config(_))
        ));
    }
}
