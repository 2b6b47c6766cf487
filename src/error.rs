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
use std::io;
use std::result;

use thiserror::Error as DeriveError;

/// The error type for operations with a repository.
#[derive(Debug, DeriveError)]
pub enum Error {
    /// A digest was constructed from input which is not 64 bytes long.
    #[error("A digest must be exactly 64 bytes long.")]
    BadDigestSize,

    /// An object was not found.
    #[error("The object was not found.")]
    NotFound,

    /// An object with the same digest already exists.
    #[error("The object already exists.")]
    AlreadyExists,

    /// An object could not be decoded or does not hash to its digest.
    #[error("The object is corrupt.")]
    CorruptObject,

    /// The repository is locked by another process.
    #[error("The repository is locked.")]
    Locked,

    /// The repository violates one of its invariants.
    #[error("The repository violates an invariant: {0}")]
    BrokenInvariant(String),

    /// The repository configuration is missing or invalid.
    #[error("The configuration is invalid: {0}")]
    Config(String),

    /// An error occurred in the remote object store.
    #[error("An error occurred in the remote store: {0}")]
    Remote(#[source] anyhow::Error),

    /// An I/O error occurred.
    #[error("{0}")]
    Io(#[from] io::Error),

    /// An error occurred in the key-value index.
    #[error("{0}")]
    Index(#[from] heed::Error),
}

/// The result type for operations with a repository.
pub type Result<T> = result::Result<T, Error>;
