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

#![cfg(feature = "store-s3")]

use std::io::{Read, Write};
use std::str::FromStr;

use anyhow::anyhow;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::region::Region;

use crate::config::{env_override, RemoteConfig};
use crate::error::Error;

use super::ObjectStore;

/// The MIME content type to use for binary data.
const BINARY_CONTENT_TYPE: &str = "application/octet-stream";

/// HTTP status codes.
const NOT_FOUND_CODE: u16 = 404;
const OK_CODE: u16 = 200;

/// An `ObjectStore` which stores objects in an S3-compatible bucket.
#[derive(Debug)]
pub struct S3Store {
    bucket: Bucket,
}

impl S3Store {
    /// Open a client for the bucket described by the given remote.
    ///
    /// The `CASK_S3_ACCESS_KEY`, `CASK_S3_SECRET_KEY`, `CASK_S3_ENDPOINT`,
    /// and `CASK_S3_REGION` environment variables override the configured
    /// values when set.
    pub fn open(remote: &RemoteConfig) -> crate::Result<Self> {
        let access_key = env_override(&remote.s3_access_key, "CASK_S3_ACCESS_KEY");
        let secret_key = env_override(&remote.s3_secret_key, "CASK_S3_SECRET_KEY");
        let endpoint = env_override(&remote.s3_endpoint, "CASK_S3_ENDPOINT");
        let region_name = env_override(&remote.s3_region, "CASK_S3_REGION");

        let region = if endpoint.is_empty() {
            Region::from_str(&region_name)
                .map_err(|_| Error::Config(format!("unknown S3 region `{}`", region_name)))?
        } else {
            Region::Custom {
                region: region_name,
                endpoint,
            }
        };

        let credentials = Credentials::new(
            Some(&access_key),
            Some(&secret_key),
            None,
            None,
            None,
        )
        .map_err(|error| Error::Config(error.to_string()))?;

        let bucket = Bucket::new(&remote.s3_bucket, region, credentials)
            .map_err(|error| Error::Config(error.to_string()))?;

        Ok(S3Store { bucket })
    }
}

impl ObjectStore for S3Store {
    fn upload(&self, name: &str, reader: &mut dyn Read) -> anyhow::Result<()> {
        let mut contents = Vec::new();
        reader.read_to_end(&mut contents)?;

        let (_, code) = self
            .bucket
            .put_object_with_content_type(name, &contents, BINARY_CONTENT_TYPE)?;
        if code != OK_CODE {
            return Err(anyhow!("uploading `{}` returned HTTP status {}", name, code));
        }
        Ok(())
    }

    fn download(&self, name: &str, writer: &mut dyn Write) -> anyhow::Result<()> {
        let (contents, code) = self.bucket.get_object(name)?;
        if code == NOT_FOUND_CODE {
            return Err(anyhow!("no object named `{}` exists", name));
        }
        if code != OK_CODE {
            return Err(anyhow!("downloading `{}` returned HTTP status {}", name, code));
        }
        writer.write_all(&contents)?;
        Ok(())
    }

    fn exists(&self, name: &str) -> anyhow::Result<bool> {
        let (_, code) = self.bucket.get_object(name)?;
        Ok(code != NOT_FOUND_CODE)
    }

    fn list(&self, prefix: &str, callback: &mut dyn FnMut(&str)) -> anyhow::Result<()> {
        let results = self.bucket.list_all(prefix.to_owned(), None)?;
        for (list, _) in results {
            for object in list.contents {
                callback(&object.key);
            }
        }
        Ok(())
    }
}
