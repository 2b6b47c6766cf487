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
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;

use super::ObjectStore;

/// An `ObjectStore` which keeps objects in memory.
///
/// Objects are not stored persistently and are only accessible to the
/// current process. Clones share the same underlying map, which makes this
/// store useful for testing.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    /// Create a new empty `MemoryStore`.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of objects in the store.
    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// Whether the store holds no objects.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObjectStore for MemoryStore {
    fn upload(&self, name: &str, reader: &mut dyn Read) -> anyhow::Result<()> {
        let mut contents = Vec::new();
        reader.read_to_end(&mut contents)?;
        self.objects.lock().unwrap().insert(name.to_owned(), contents);
        Ok(())
    }

    fn download(&self, name: &str, writer: &mut dyn Write) -> anyhow::Result<()> {
        let objects = self.objects.lock().unwrap();
        let contents = objects
            .get(name)
            .ok_or_else(|| anyhow!("no object named `{}` exists", name))?;
        writer.write_all(contents)?;
        Ok(())
    }

    fn exists(&self, name: &str) -> anyhow::Result<bool> {
        Ok(self.objects.lock().unwrap().contains_key(name))
    }

    fn list(&self, prefix: &str, callback: &mut dyn FnMut(&str)) -> anyhow::Result<()> {
        for name in self.objects.lock().unwrap().keys() {
            if name.starts_with(prefix) {
                callback(name);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_contents() {
        let store = MemoryStore::new();
        let clone = store.clone();

        store.upload("name", &mut &b"data"[..]).unwrap();
        assert!(clone.exists("name").unwrap());
        assert_eq!(clone.len(), 1);
    }

    #[test]
    fn overwrites_are_idempotent() {
        let store = MemoryStore::new();
        store.upload("name", &mut &b"first"[..]).unwrap();
        store.upload("name", &mut &b"second"[..]).unwrap();

        let mut contents = Vec::new();
        store.download("name", &mut contents).unwrap();
        assert_eq!(contents, b"second");
        assert_eq!(store.len(), 1);
    }
}
