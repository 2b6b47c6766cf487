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

#![allow(dead_code)]

use std::env;
use std::path::Path;

use cask_store::config::RemoteConfig;
use cask_store::Repository;
use rand::rngs::SmallRng;
use rand::{Rng, RngCore, SeedableRng};
use tempfile::TempDir;
use walkdir::WalkDir;

/// The leaf size used for testing, small enough to exercise multi-leaf
/// blobs.
pub const TEST_LEAF_SIZE: u32 = 1024;

/// The minimum size of test data buffers.
pub const MIN_BUFFER_SIZE: usize = 2048;

/// The maximum size of test data buffers.
pub const MAX_BUFFER_SIZE: usize = 4096;

/// A repository in a temporary directory.
pub struct TestRepo {
    pub repo: Repository,
    pub directory: TempDir,
}

/// Make sure commits have a committer identity without relying on git being
/// configured on the test machine.
pub fn set_test_identity() {
    env::set_var("CASK_COMMITTER_NAME", "Test Committer");
    env::set_var("CASK_COMMITTER_EMAIL", "committer@example.com");
}

/// Initialize a repository in a temporary directory.
pub fn test_repo() -> TestRepo {
    set_test_identity();
    let directory = TempDir::new().unwrap();
    let repo = Repository::init_with(directory.path(), TEST_LEAF_SIZE, 0).unwrap();
    TestRepo { repo, directory }
}

/// Initialize a repository with a `fake` remote backed by `remote_dir`.
pub fn test_repo_with_remote(remote_dir: &Path) -> TestRepo {
    let mut fixture = test_repo();
    fixture
        .repo
        .add_remote(RemoteConfig::fake("origin", remote_dir))
        .unwrap();
    fixture
}

/// Return a buffer containing `size` random bytes for testing purposes.
pub fn random_bytes(size: usize) -> Vec<u8> {
    let mut rng = SmallRng::from_entropy();
    let mut buffer = vec![0u8; size];
    rng.fill_bytes(&mut buffer);
    buffer
}

/// Generate a random buffer of bytes of a random size.
pub fn random_buffer() -> Vec<u8> {
    let mut rng = SmallRng::from_entropy();
    random_bytes(rng.gen_range(MIN_BUFFER_SIZE..MAX_BUFFER_SIZE))
}

/// Count the leaf files below an area of the repository state directory.
pub fn count_leaf_files(repo_root: &Path, area: &str) -> usize {
    WalkDir::new(repo_root.join(".cask").join(area))
        .min_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .count()
}
