use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use directories::BaseDirs;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::Builder;
use tracing::{debug, warn};

use crate::error::HydroError;

/// Maximum number of entries kept in the discharge collection.
pub const CACHE_CAPACITY: usize = 300;
/// Upper bound on the header line read while listing a collection.
const MAX_HEADER_BYTES: u64 = 4096;

static LAST_TIMESTAMP: AtomicI64 = AtomicI64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Forecast, retrospective and return-period payloads. Capacity bounded.
    Discharge,
    /// The global river identifier list. Unbounded.
    Rivers,
}

impl Collection {
    pub const ALL: [Collection; 2] = [Collection::Discharge, Collection::Rivers];

    pub fn name(&self) -> &'static str {
        match self {
            Collection::Discharge => "discharge",
            Collection::Rivers => "rivers",
        }
    }

    pub fn is_bounded(&self) -> bool {
        matches!(self, Collection::Discharge)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub data: Value,
    pub timestamp: i64,
}

/// First line of every entry file; the payload follows on the second line.
#[derive(Serialize, Deserialize)]
struct EntryHeader {
    key: String,
    timestamp: i64,
}

#[derive(Default)]
struct Listing {
    headers: Vec<(i64, String)>,
    /// Files whose header cannot be decoded. They can never be read back.
    corrupt: Vec<PathBuf>,
}

/// Persistent key-value cache, one file per entry under
/// `<root>/<collection>/`. Every write replaces the whole entry atomically.
/// Entry files hold a JSON header line (`key`, `timestamp`) followed by the
/// JSON payload, so listing a collection never parses payloads.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: Utf8PathBuf,
    capacity: usize,
}

impl CacheStore {
    pub fn new() -> Result<Self, HydroError> {
        Ok(Self::new_with_root(Self::default_root()?, CACHE_CAPACITY))
    }

    /// `~/.cache/hydroviewer`.
    pub fn default_root() -> Result<Utf8PathBuf, HydroError> {
        BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("hydroviewer")).ok()
            })
            .ok_or_else(|| HydroError::Storage("unable to resolve cache directory".to_string()))
    }

    pub fn new_with_root(root: Utf8PathBuf, capacity: usize) -> Self {
        Self { root, capacity }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn collection_dir(&self, collection: Collection) -> Utf8PathBuf {
        self.root.join(collection.name())
    }

    pub fn entry_path(&self, collection: Collection, key: &str) -> Utf8PathBuf {
        self.collection_dir(collection)
            .join(format!("{}.json", encode_key(key)))
    }

    /// Creates every collection. Safe to call repeatedly.
    pub fn open(&self) -> Result<(), HydroError> {
        for collection in Collection::ALL {
            fs::create_dir_all(self.collection_dir(collection).as_std_path())
                .map_err(|err| HydroError::Storage(err.to_string()))?;
        }
        Ok(())
    }

    pub fn read<T: DeserializeOwned>(
        &self,
        collection: Collection,
        key: &str,
    ) -> Result<Option<T>, HydroError> {
        match self.read_entry(collection, key)? {
            Some(entry) => serde_json::from_value(entry.data)
                .map(Some)
                .map_err(|err| HydroError::Storage(format!("decode {key}: {err}"))),
            None => Ok(None),
        }
    }

    pub fn read_entry(
        &self,
        collection: Collection,
        key: &str,
    ) -> Result<Option<CacheEntry>, HydroError> {
        let path = self.entry_path(collection, key);
        let content = match fs::read(path.as_std_path()) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(HydroError::Storage(err.to_string())),
        };
        let corrupt = |reason: String| HydroError::Storage(format!("corrupt entry {path}: {reason}"));
        let split = content
            .iter()
            .position(|byte| *byte == b'\n')
            .ok_or_else(|| corrupt("missing header line".to_string()))?;
        let header: EntryHeader =
            serde_json::from_slice(&content[..split]).map_err(|err| corrupt(err.to_string()))?;
        let data: Value =
            serde_json::from_slice(&content[split + 1..]).map_err(|err| corrupt(err.to_string()))?;
        Ok(Some(CacheEntry {
            key: header.key,
            data,
            timestamp: header.timestamp,
        }))
    }

    /// Upserts `value` under `key`. On the bounded collection the oldest
    /// entries are evicted once the write has been committed; eviction
    /// failures are logged and do not fail the write.
    pub fn write<T: Serialize>(
        &self,
        collection: Collection,
        key: &str,
        value: &T,
    ) -> Result<(), HydroError> {
        let data =
            serde_json::to_value(value).map_err(|err| HydroError::Storage(err.to_string()))?;
        let entry = CacheEntry {
            key: key.to_string(),
            data,
            timestamp: next_timestamp(),
        };
        self.commit(collection, &entry)?;
        debug!(collection = collection.name(), key, "cache write committed");

        if collection.is_bounded() {
            match self.prune(collection) {
                Ok(0) => {}
                Ok(removed) => debug!(collection = collection.name(), removed, "cache pruned"),
                Err(err) => warn!(collection = collection.name(), %err, "cache eviction failed"),
            }
        }
        Ok(())
    }

    fn commit(&self, collection: Collection, entry: &CacheEntry) -> Result<(), HydroError> {
        let dir = self.collection_dir(collection);
        fs::create_dir_all(dir.as_std_path()).map_err(|err| HydroError::Storage(err.to_string()))?;
        let header = EntryHeader {
            key: entry.key.clone(),
            timestamp: entry.timestamp,
        };
        let mut content =
            serde_json::to_vec(&header).map_err(|err| HydroError::Storage(err.to_string()))?;
        content.push(b'\n');
        serde_json::to_writer(&mut content, &entry.data)
            .map_err(|err| HydroError::Storage(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix("hydroviewer-entry")
            .tempfile_in(dir.as_std_path())
            .map_err(|err| HydroError::Storage(err.to_string()))?;
        temp.write_all(&content)
            .map_err(|err| HydroError::Storage(err.to_string()))?;
        temp.persist(self.entry_path(collection, &entry.key).as_std_path())
            .map_err(|err| HydroError::Storage(err.to_string()))?;
        Ok(())
    }

    /// Deletes undecodable entry files, then the oldest entries until the
    /// collection holds at most `capacity` entries. Returns how many files
    /// were removed.
    pub fn prune(&self, collection: Collection) -> Result<usize, HydroError> {
        let Listing {
            mut headers,
            corrupt,
        } = self.list(collection)?;
        let mut removed = 0;
        for path in corrupt {
            warn!(path = %path.display(), "removing undecodable cache entry");
            if remove_entry_file(&path)? {
                removed += 1;
            }
        }
        if headers.len() <= self.capacity {
            return Ok(removed);
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        let excess = headers.len() - self.capacity;
        for (_, key) in headers.into_iter().take(excess) {
            if remove_entry_file(self.entry_path(collection, &key).as_std_path())? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Number of readable entries.
    pub fn len(&self, collection: Collection) -> Result<usize, HydroError> {
        Ok(self.list(collection)?.headers.len())
    }

    pub fn is_empty(&self, collection: Collection) -> Result<bool, HydroError> {
        Ok(self.len(collection)? == 0)
    }

    /// Keys currently stored, oldest write first.
    pub fn keys(&self, collection: Collection) -> Result<Vec<String>, HydroError> {
        let mut headers = self.list(collection)?.headers;
        headers.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        Ok(headers.into_iter().map(|(_, key)| key).collect())
    }

    /// Empties every collection.
    pub fn clear(&self) -> Result<(), HydroError> {
        for collection in Collection::ALL {
            let dir = self.collection_dir(collection);
            match fs::remove_dir_all(dir.as_std_path()) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(HydroError::Storage(err.to_string())),
            }
        }
        self.open()
    }

    fn list(&self, collection: Collection) -> Result<Listing, HydroError> {
        let dir = self.collection_dir(collection);
        let entries = match fs::read_dir(dir.as_std_path()) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Listing::default()),
            Err(err) => return Err(HydroError::Storage(err.to_string())),
        };
        let mut listing = Listing::default();
        for entry in entries {
            let entry = entry.map_err(|err| HydroError::Storage(err.to_string()))?;
            let path = entry.path();
            if path.extension().map(|ext| ext != "json").unwrap_or(true) {
                continue;
            }
            match read_header(&path) {
                Ok(Some(header)) => listing.headers.push((header.timestamp, header.key)),
                Ok(None) => listing.corrupt.push(path),
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(HydroError::Storage(err.to_string())),
            }
        }
        Ok(listing)
    }
}

/// Reads only the header line of an entry file. `None` when it does not
/// decode.
fn read_header(path: &Path) -> io::Result<Option<EntryHeader>> {
    let file = File::open(path)?;
    let mut line = Vec::new();
    BufReader::new(file)
        .take(MAX_HEADER_BYTES)
        .read_until(b'\n', &mut line)?;
    if line.last() != Some(&b'\n') {
        return Ok(None);
    }
    Ok(serde_json::from_slice(&line[..line.len() - 1]).ok())
}

/// `false` when the file was already gone.
fn remove_entry_file(path: &Path) -> Result<bool, HydroError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        // a concurrent pruner got there first
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(HydroError::Storage(err.to_string())),
    }
}

/// Milliseconds since the epoch, strictly increasing within the process so
/// that write order and timestamp order agree.
fn next_timestamp() -> i64 {
    let now = Utc::now().timestamp_millis();
    let mut last = LAST_TIMESTAMP.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_TIMESTAMP.compare_exchange_weak(last, next, Ordering::SeqCst, Ordering::Relaxed)
        {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}
