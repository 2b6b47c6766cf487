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

//! Back ends for remote object storage.
//!
//! A remote holds flat byte streams keyed by hex digest, with no sidecar
//! metadata. Back ends only provide the most basic operations; dependency
//! ordering, dedup detection, and resume semantics are implemented at a
//! higher level, so that supporting a new storage service is relatively
//! painless.

use std::fmt::{self, Debug, Formatter};
use std::io::{Read, Write};

use static_assertions::assert_obj_safe;

use crate::config::{Config, RemoteConfig, RemoteKind};
use crate::error::Error;

pub use self::directory::DirectoryStore;
pub use self::memory::MemoryStore;
#[cfg(feature = "store-s3")]
pub use self::s3::S3Store;

mod directory;
mod memory;
mod s3;

/// A remote store of named byte streams.
///
/// Implementations must tolerate concurrent calls; the transfer engine
/// shares one client across its worker pool.
pub trait ObjectStore: Send + Sync {
    /// Store the contents of `reader` under `name`, overwriting any existing
    /// object. Uploads are idempotent.
    fn upload(&self, name: &str, reader: &mut dyn Read) -> anyhow::Result<()>;

    /// Write the contents of the object named `name` into `writer`.
    ///
    /// Downloading a missing object is an error.
    fn download(&self, name: &str, writer: &mut dyn Write) -> anyhow::Result<()>;

    /// Return whether an object named `name` exists.
    fn exists(&self, name: &str) -> anyhow::Result<bool>;

    /// Invoke `callback` with the name of every object starting with
    /// `prefix`.
    fn list(&self, prefix: &str, callback: &mut dyn FnMut(&str)) -> anyhow::Result<()>;
}

assert_obj_safe!(ObjectStore);

impl Debug for dyn ObjectStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("ObjectStore")
    }
}

/// Open a client for the given remote.
///
/// # Errors
/// - `Error::Config`: The remote's type has no driver.
pub fn open_remote(remote: &RemoteConfig) -> crate::Result<Box<dyn ObjectStore>> {
    match remote.kind {
        RemoteKind::Fake => Ok(Box::new(DirectoryStore::open(remote)?)),
        #[cfg(feature = "store-s3")]
        RemoteKind::S3 => Ok(Box::new(s3::S3Store::open(remote)?)),
        kind => Err(Error::Config(format!(
            "no driver is available for remote type {:?}",
            kind
        ))),
    }
}

/// Open a client for the repository's default remote.
///
/// # Errors
/// - `Error::Config`: No remotes are configured.
pub(crate) fn default_remote(config: &Config) -> crate::Result<Box<dyn ObjectStore>> {
    let remote = config
        .remotes
        .first()
        .ok_or_else(|| Error::Config(String::from("no remotes configured")))?;
    open_remote(remote)
}
