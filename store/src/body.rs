// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Message body persister
//!
//! Message rows only hold a `message_location`; the serialized message lives in a
//! [`MessageBodyStore`]. Locations are opaque strings produced by the store that wrote them.
//!

use crate::error::Error;

use tracing::debug;

use std::{
    collections::HashMap,
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

/// Persists message bodies outside the datastore.
pub trait MessageBodyStore: Send + Sync + 'static {
    /// Stores a new body for `ebms_message_id` and returns its location.
    fn save(&self, ebms_message_id: &str, body: &[u8]) -> Result<String, Error>;

    /// Loads the body at `location`.
    fn load(&self, location: &str) -> Result<Vec<u8>, Error>;

    /// Replaces the body at `location`.
    fn update(&self, location: &str, body: &[u8]) -> Result<(), Error>;
}

const MEMORY_SCHEME: &str = "memory://";
const FILE_SCHEME: &str = "file://";

/// Keeps bodies in process memory.
#[derive(Default, Clone)]
pub struct MemoryBodyStore {
    bodies: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MessageBodyStore for MemoryBodyStore {
    fn save(&self, ebms_message_id: &str, body: &[u8]) -> Result<String, Error> {
        let mut lock = self
            .bodies
            .write()
            .map_err(|e| Error::Store(format!("Can not lock bodies: {}", e)))?;
        let mut location = format!("{}{}", MEMORY_SCHEME, ebms_message_id);
        let mut n = 1;
        while lock.contains_key(&location) {
            location = format!("{}{}.{}", MEMORY_SCHEME, ebms_message_id, n);
            n += 1;
        }
        lock.insert(location.clone(), body.to_vec());
        Ok(location)
    }

    fn load(&self, location: &str) -> Result<Vec<u8>, Error> {
        let lock = self
            .bodies
            .read()
            .map_err(|e| Error::Store(format!("Can not lock bodies: {}", e)))?;
        lock.get(location)
            .cloned()
            .ok_or_else(|| Error::EntryNotFound(location.to_owned()))
    }

    fn update(&self, location: &str, body: &[u8]) -> Result<(), Error> {
        let mut lock = self
            .bodies
            .write()
            .map_err(|e| Error::Store(format!("Can not lock bodies: {}", e)))?;
        match lock.get_mut(location) {
            Some(stored) => {
                *stored = body.to_vec();
                Ok(())
            }
            None => Err(Error::EntryNotFound(location.to_owned())),
        }
    }
}

/// Keeps bodies as files below a root directory.
#[derive(Clone)]
pub struct FileBodyStore {
    root: PathBuf,
}

impl FileBodyStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, Error> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            debug!("Creating message body directory {}", root.display());
            fs::create_dir_all(&root).map_err(|e| {
                Error::CreateStore(format!("fail create body directory: {}", e))
            })?;
        }
        Ok(Self { root })
    }

    fn path_of(&self, location: &str) -> Result<PathBuf, Error> {
        let relative = location.strip_prefix(FILE_SCHEME).ok_or_else(|| {
            Error::InvalidValue(format!("'{}' is not a file location", location))
        })?;
        if relative.contains("..") || relative.contains('/') || relative.contains('\\') {
            return Err(Error::InvalidValue(format!(
                "'{}' escapes the body directory",
                location
            )));
        }
        Ok(self.root.join(relative))
    }
}

/// Keeps ebMS ids usable as file names.
fn file_name(ebms_message_id: &str) -> String {
    ebms_message_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' { c } else { '_' })
        .collect::<String>()
        .replace("..", "_")
}

impl MessageBodyStore for FileBodyStore {
    fn save(&self, ebms_message_id: &str, body: &[u8]) -> Result<String, Error> {
        let base = file_name(ebms_message_id);
        let mut name = format!("{}.as4", base);
        let mut n = 1;
        // The name is claimed by creating the file, so concurrent saves never share one.
        let mut file = loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(self.root.join(&name))
            {
                Ok(file) => break file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    name = format!("{}.{}.as4", base, n);
                    n += 1;
                }
                Err(e) => return Err(e.into()),
            }
        };
        file.write_all(body)?;
        Ok(format!("{}{}", FILE_SCHEME, name))
    }

    fn load(&self, location: &str) -> Result<Vec<u8>, Error> {
        let path = self.path_of(location)?;
        fs::read(&path).map_err(|e| Error::EntryNotFound(format!("{}: {}", location, e)))
    }

    fn update(&self, location: &str, body: &[u8]) -> Result<(), Error> {
        let path = self.path_of(location)?;
        if !path.exists() {
            return Err(Error::EntryNotFound(location.to_owned()));
        }
        fs::write(path, body)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tracing_test::traced_test;

    use std::sync::Barrier;

    fn exercise(store: &dyn MessageBodyStore) {
        let first = store.save("message-1@as4", b"first").unwrap();
        let second = store.save("message-1@as4", b"second").unwrap();
        assert_ne!(first, second);
        assert_eq!(store.load(&first).unwrap(), b"first");

        store.update(&first, b"changed").unwrap();
        assert_eq!(store.load(&first).unwrap(), b"changed");
        assert_eq!(store.load(&second).unwrap(), b"second");

        assert!(matches!(
            store.update("memory://missing", b""),
            Err(Error::EntryNotFound(_)) | Err(Error::InvalidValue(_))
        ));
    }

    #[test]
    fn test_memory_body_store() {
        exercise(&MemoryBodyStore::default());
    }

    #[test]
    fn test_file_body_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBodyStore::new(dir.path().join("bodies")).unwrap();
        exercise(&store);
        assert!(store.load("file://../secret").is_err());
    }

    #[test]
    fn test_concurrent_saves_keep_every_body() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBodyStore::new(dir.path()).unwrap();
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .map(|round| {
                            barrier.wait();
                            let body = format!("{}-{}", i, round).into_bytes();
                            (store.save("receive-exception", &body).unwrap(), body)
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut locations = std::collections::HashSet::new();
        for handle in handles {
            for (location, body) in handle.join().unwrap() {
                assert_eq!(store.load(&location).unwrap(), body);
                assert!(locations.insert(location));
            }
        }
        assert_eq!(locations.len(), 16 * 50);
    }

    #[test]
    #[traced_test]
    fn test_file_body_store_creates_its_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("bodies");
        FileBodyStore::new(&root).unwrap();
        assert!(root.is_dir());
        assert!(logs_contain("Creating message body directory"));
    }
}
