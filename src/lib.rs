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

//! `cask-store` is a library for content-addressed, versioned binary-object
//! storage over object-store back ends.
//!
//! Clients stage blobs locally, commit them into a DAG of versioned objects,
//! and synchronize those commits with a remote store. Byte streams are split
//! into fixed-size leaves hashed with BLAKE2b in tree mode; a blob is
//! identified by the root digest over its leaf digests, which makes storage
//! deduplicated and lets blobs be transferred either hydrated (the original
//! bytes) or deduped (each leaf separately).
//!
//! Commits are discoverable at the remote through mined prefix objects whose
//! identifiers start with a fixed run of zeros, so that a handful of listing
//! calls enumerates every commit chain. Because the prefix object is always
//! transferred last, interrupted pushes and pulls are resumed safely by
//! re-running them.
//!
//! # Examples
//! ```no_run
//! use cask_store::Repository;
//!
//! fn main() -> cask_store::Result<()> {
//!     let repo = Repository::init(std::path::Path::new("/tmp/repo"))?;
//!
//!     let (hash, _) = repo.add(&b"hello cask"[..])?;
//!     repo.commit("first commit")?;
//!
//!     let mut contents = Vec::new();
//!     std::io::Read::read_to_end(&mut repo.get(&hash)?, &mut contents)?;
//!     assert_eq!(contents, b"hello cask");
//!
//!     Ok(())
//! }
//! ```
//!
//! # Features
//! Some functionality is gated behind cargo features.
//!
//! Feature | Description | Default
//! --- | --- | ---
//! `store-s3` | Store data in an Amazon S3 bucket | No

#![allow(dead_code)]

pub use anyhow;

pub use cas::Reader;
pub use digest::Digest;
pub use error::{Error, Result};
pub use repo::{CloneOptions, Commit, Repository, Statistics};

mod cas;
pub mod config;
mod digest;
mod error;
mod identity;
mod kv;
mod object;
mod repo;
pub mod store;
mod sync;
