// src/store.rs
// Durable key-value storage boundary for the trust gate.
// Values are raw bytes; callers store UTF-8 JSON documents under fixed keys.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ()>;
    fn set(&self, key: &str, value: &[u8]) -> Result<(), ()>;
    fn delete(&self, key: &str) -> Result<(), ()>;
    fn get_keys(&self) -> Result<Vec<String>, ()> {
        Ok(Vec::new())
    }
}

/// In-memory store. Backs tests and sessions that opt out of persistence.
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            map: Mutex::new(HashMap::new()),
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ()> {
        let m = self.map.lock().map_err(|_| ())?;
        Ok(m.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), ()> {
        let mut m = self.map.lock().map_err(|_| ())?;
        m.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), ()> {
        let mut m = self.map.lock().map_err(|_| ())?;
        m.remove(key);
        Ok(())
    }

    fn get_keys(&self) -> Result<Vec<String>, ()> {
        let m = self.map.lock().map_err(|_| ())?;
        Ok(m.keys().cloned().collect())
    }
}

/// Single-document JSON store on disk.
///
/// Every write rewrites the whole document synchronously. There is no
/// cross-process transaction: concurrent writers follow last-writer-wins,
/// which is the storage model the engine is specified against.
pub struct FileStore {
    path: PathBuf,
    cache: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Opens (or creates) the backing document. An unreadable or corrupt
    /// document starts the store empty rather than failing the session.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let cache = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, String>>(&bytes) {
                Ok(map) => map,
                Err(err) => {
                    tracing::error!(path = %path.display(), %err, "store document corrupt; starting empty");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        FileStore {
            path,
            cache: Mutex::new(cache),
        }
    }

    fn persist(&self, map: &HashMap<String, String>) -> Result<(), ()> {
        let payload = serde_json::to_vec(map).map_err(|_| ())?;
        fs::write(&self.path, payload).map_err(|_| ())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ()> {
        let m = self.cache.lock().map_err(|_| ())?;
        Ok(m.get(key).map(|v| v.as_bytes().to_vec()))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), ()> {
        // Values in this crate are always UTF-8 JSON documents.
        let text = String::from_utf8(value.to_vec()).map_err(|_| ())?;
        let mut m = self.cache.lock().map_err(|_| ())?;
        m.insert(key.to_string(), text);
        self.persist(&m)
    }

    fn delete(&self, key: &str) -> Result<(), ()> {
        let mut m = self.cache.lock().map_err(|_| ())?;
        m.remove(key);
        self.persist(&m)
    }

    fn get_keys(&self) -> Result<Vec<String>, ()> {
        let m = self.cache.lock().map_err(|_| ())?;
        Ok(m.keys().cloned().collect())
    }
}

/// Reads a JSON document, treating absence, store errors, and corrupt
/// payloads alike as the empty default. Corruption is logged; it must
/// never surface to the caller.
pub(crate) fn read_json_or_default<T>(store: &impl KeyValueStore, key: &str) -> T
where
    T: DeserializeOwned + Default,
{
    match store.get(key) {
        Ok(Some(val)) => match serde_json::from_slice::<T>(&val) {
            Ok(doc) => doc,
            Err(err) => {
                tracing::error!(key, %err, "stored document corrupt; treating as empty");
                T::default()
            }
        },
        _ => T::default(),
    }
}

pub(crate) fn write_json<T: Serialize>(
    store: &impl KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), ()> {
    let payload = serde_json::to_vec(value).map_err(|_| ())?;
    store.set(key, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        store.set("k", b"v").unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"v".to_vec()));
        store.delete("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn memory_store_lists_keys() {
        let store = MemoryStore::new();
        store.set("a", b"1").unwrap();
        store.set("b", b"2").unwrap();
        let mut keys = store.get_keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trust.json");
        {
            let store = FileStore::open(&path);
            store.set("banned", b"[\"a@b.com\"]").unwrap();
        }
        let store = FileStore::open(&path);
        assert_eq!(store.get("banned").unwrap(), Some(b"[\"a@b.com\"]".to_vec()));
    }

    #[test]
    fn file_store_starts_empty_on_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trust.json");
        std::fs::write(&path, b"not json {{{").unwrap();
        let store = FileStore::open(&path);
        assert_eq!(store.get("banned").unwrap(), None);
    }

    #[test]
    fn corrupt_json_reads_as_default() {
        let store = MemoryStore::new();
        store.set("list", b"{broken").unwrap();
        let out: Vec<String> = read_json_or_default(&store, "list");
        assert!(out.is_empty());
    }

    #[test]
    fn write_json_roundtrips_through_read() {
        let store = MemoryStore::new();
        write_json(&store, "list", &vec!["x".to_string()]).unwrap();
        let out: Vec<String> = read_json_or_default(&store, "list");
        assert_eq!(out, vec!["x".to_string()]);
    }
}
