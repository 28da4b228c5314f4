//! Feed storage and the collection view built on top of it
//!
//! The feed is the only source of truth. A [`Blackboard`] never keeps its own
//! copy of the collections; it folds the feed whenever it needs to know which
//! documents are live, so several processes can share one `feed.jsonl`.

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use fs2::FileExt;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ID_FIELD;
use crate::entry::{FeedEntry, Operation};
use crate::error::BlackboardError;

/// Adapter over whatever backs the change feed
pub trait FeedStore: Send + Sync {
    /// Append a mutation; the store assigns the next `seq`
    fn append(&self, collection: &str, operation: Operation, payload: Value) -> Result<FeedEntry, BlackboardError>;

    /// Entries with `seq > after`, oldest first, at most `limit` of them
    fn read_after(&self, after: u64, limit: usize) -> Result<Vec<FeedEntry>, BlackboardError>;

    /// Highest `seq` written so far (0 for an empty feed)
    fn last_seq(&self) -> Result<u64, BlackboardError>;
}

/// In-process feed, used by tests and single-process deployments
#[derive(Default)]
pub struct MemoryFeed {
    entries: Mutex<Vec<FeedEntry>>,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, Vec<FeedEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FeedStore for MemoryFeed {
    fn append(&self, collection: &str, operation: Operation, payload: Value) -> Result<FeedEntry, BlackboardError> {
        let mut entries = self.entries();
        let entry = FeedEntry::new(entries.len() as u64 + 1, operation, collection, payload);
        debug!(seq = entry.seq, %collection, %operation, "MemoryFeed::append");
        entries.push(entry.clone());
        Ok(entry)
    }

    fn read_after(&self, after: u64, limit: usize) -> Result<Vec<FeedEntry>, BlackboardError> {
        let entries = self.entries();
        // seq == index + 1, so entries after `after` start at index `after`
        let start = (after as usize).min(entries.len());
        Ok(entries[start..].iter().take(limit).cloned().collect())
    }

    fn last_seq(&self) -> Result<u64, BlackboardError> {
        Ok(self.entries().len() as u64)
    }
}

/// Feed persisted as one JSON entry per line
///
/// Appends take an exclusive advisory lock on the file so that separate
/// processes (the `bb` tool and the coordinator) never interleave a line or
/// reuse a `seq`; reads take a shared lock. The file is never rewritten.
///
/// Parsed entries are cached together with the byte offset they cover, so a
/// poll only parses lines appended since the previous one. A line without its
/// trailing newline is left for a later read; a line that does not parse is
/// logged and skipped.
pub struct JsonlFeed {
    path: PathBuf,
    index: Mutex<FeedIndex>,
}

#[derive(Default)]
struct FeedIndex {
    /// Bytes of the file already consumed; always just past a newline
    offset: u64,
    entries: Vec<FeedEntry>,
}

impl FeedIndex {
    fn last_seq(&self) -> u64 {
        self.entries.last().map(|e| e.seq).unwrap_or(0)
    }
}

impl JsonlFeed {
    /// Open (creating if needed) the feed file at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BlackboardError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&path)?;
        info!(?path, "Opened feed");
        Ok(Self {
            path,
            index: Mutex::new(FeedIndex::default()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn index(&self) -> std::sync::MutexGuard<'_, FeedIndex> {
        self.index.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_error(&self, e: std::io::Error) -> BlackboardError {
        BlackboardError::Lock(format!("{}: {}", self.path.display(), e))
    }

    /// Parse the complete lines past `index.offset`; returns the file length
    ///
    /// Caller holds a lock on `file`.
    fn refresh(&self, index: &mut FeedIndex, file: &mut fs::File) -> Result<u64, BlackboardError> {
        let len = file.metadata()?.len();
        if len < index.offset {
            warn!(path = ?self.path, len, offset = index.offset, "Feed file shrank, rebuilding index");
            *index = FeedIndex::default();
        }
        if len == index.offset {
            return Ok(len);
        }

        file.seek(SeekFrom::Start(index.offset))?;
        let mut buf = Vec::new();
        Read::by_ref(file).take(len - index.offset).read_to_end(&mut buf)?;

        for line in buf.split_inclusive(|b| *b == b'\n') {
            if line.last() != Some(&b'\n') {
                break;
            }
            let at = index.offset;
            index.offset += line.len() as u64;
            let text = String::from_utf8_lossy(line);
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            match serde_json::from_str::<FeedEntry>(text) {
                Ok(entry) if entry.seq <= index.last_seq() => {
                    warn!(path = ?self.path, offset = at, seq = entry.seq, last = index.last_seq(), "Skipping out-of-order feed line");
                }
                Ok(entry) => index.entries.push(entry),
                Err(e) => warn!(path = ?self.path, offset = at, error = %e, "Skipping malformed feed line"),
            }
        }
        Ok(len)
    }

    /// Run `f` over the index brought up to date under a shared lock
    fn read_index<T>(&self, f: impl FnOnce(&FeedIndex) -> T) -> Result<T, BlackboardError> {
        let mut index = self.index();
        let mut file = fs::File::open(&self.path)?;
        FileExt::lock_shared(&file).map_err(|e| self.lock_error(e))?;
        let refreshed = self.refresh(&mut index, &mut file);
        let _ = FileExt::unlock(&file);
        refreshed?;
        Ok(f(&index))
    }

    /// Caller holds the exclusive lock on `file`
    fn append_locked(
        &self,
        index: &mut FeedIndex,
        file: &mut fs::File,
        collection: &str,
        operation: Operation,
        payload: Value,
    ) -> Result<FeedEntry, BlackboardError> {
        let len = self.refresh(index, file)?;
        let mut line = String::new();
        if len > index.offset {
            warn!(path = ?self.path, offset = index.offset, "Terminating torn feed line");
            line.push('\n');
        }

        let entry = FeedEntry::new(index.last_seq() + 1, operation, collection, payload);
        line.push_str(&serde_json::to_string(&entry)?);
        line.push('\n');
        file.write_all(line.as_bytes())?;
        file.flush()?;

        index.offset = len + line.len() as u64;
        index.entries.push(entry.clone());
        Ok(entry)
    }
}

impl FeedStore for JsonlFeed {
    fn append(&self, collection: &str, operation: Operation, payload: Value) -> Result<FeedEntry, BlackboardError> {
        let mut index = self.index();
        let mut file = OpenOptions::new().create(true).read(true).append(true).open(&self.path)?;
        file.lock_exclusive().map_err(|e| self.lock_error(e))?;

        let result = self.append_locked(&mut index, &mut file, collection, operation, payload);

        let _ = FileExt::unlock(&file);
        if let Ok(entry) = &result {
            debug!(seq = entry.seq, %collection, %operation, "JsonlFeed::append");
        }
        result
    }

    fn read_after(&self, after: u64, limit: usize) -> Result<Vec<FeedEntry>, BlackboardError> {
        self.read_index(|index| {
            let start = index.entries.partition_point(|e| e.seq <= after);
            index.entries[start..].iter().take(limit).cloned().collect()
        })
    }

    fn last_seq(&self) -> Result<u64, BlackboardError> {
        self.read_index(FeedIndex::last_seq)
    }
}

/// Collection-level operations expressed as feed appends
#[derive(Clone)]
pub struct Blackboard {
    store: Arc<dyn FeedStore>,
}

impl Blackboard {
    pub fn new(store: Arc<dyn FeedStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<dyn FeedStore> {
        self.store.clone()
    }

    /// Insert a document, stamping it with a fresh `_id` unless it has one
    pub fn post(&self, collection: &str, mut document: Value) -> Result<FeedEntry, BlackboardError> {
        debug!(%collection, "Blackboard::post: called");
        if let Value::Object(map) = &mut document
            && !map.contains_key(ID_FIELD)
        {
            map.insert(ID_FIELD.to_string(), Value::String(Uuid::now_v7().to_string()));
        }
        self.store.append(collection, Operation::Insert, document)
    }

    /// Replace a live document
    pub fn update(&self, collection: &str, id: &str, mut document: Value) -> Result<FeedEntry, BlackboardError> {
        debug!(%collection, %id, "Blackboard::update: called");
        if !self.documents(collection)?.iter().any(|d| doc_id(d) == Some(id)) {
            return Err(not_found(collection, id));
        }
        if let Value::Object(map) = &mut document {
            map.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        }
        self.store.append(collection, Operation::Update, document)
    }

    /// Delete a live document
    pub fn remove(&self, collection: &str, id: &str) -> Result<FeedEntry, BlackboardError> {
        debug!(%collection, %id, "Blackboard::remove: called");
        if !self.documents(collection)?.iter().any(|d| doc_id(d) == Some(id)) {
            return Err(not_found(collection, id));
        }
        self.store
            .append(collection, Operation::Delete, delete_payload(id))
    }

    /// Live documents of a collection, in insertion order
    pub fn documents(&self, collection: &str) -> Result<Vec<Value>, BlackboardError> {
        let mut live: Vec<Value> = Vec::new();
        for entry in self.store.read_after(0, usize::MAX)? {
            if entry.collection != collection {
                continue;
            }
            let id = entry.document_id().map(str::to_string);
            match entry.operation {
                Operation::Insert => live.push(entry.payload),
                Operation::Update => {
                    if let Some(slot) = live.iter_mut().find(|d| doc_id(d) == id.as_deref()) {
                        *slot = entry.payload;
                    }
                }
                Operation::Delete => live.retain(|d| doc_id(d) != id.as_deref()),
            }
        }
        Ok(live)
    }

    /// Remove a processed document by `_id`; `None` if it is no longer live
    pub fn acknowledge(&self, collection: &str, id: &str) -> Result<Option<Value>, BlackboardError> {
        debug!(%collection, %id, "Blackboard::acknowledge: called");
        let Some(document) = self
            .documents(collection)?
            .into_iter()
            .find(|d| doc_id(d) == Some(id))
        else {
            debug!(%collection, %id, "Blackboard::acknowledge: document already gone");
            return Ok(None);
        };
        self.store
            .append(collection, Operation::Delete, delete_payload(id))?;
        Ok(Some(document))
    }

    /// Remove the oldest live document of a collection
    pub fn acknowledge_oldest(&self, collection: &str) -> Result<Option<Value>, BlackboardError> {
        debug!(%collection, "Blackboard::acknowledge_oldest: called");
        let Some(oldest) = self.documents(collection)?.into_iter().next() else {
            debug!(%collection, "Blackboard::acknowledge_oldest: collection is empty");
            return Ok(None);
        };
        let Some(id) = doc_id(&oldest).map(str::to_string) else {
            return Err(not_found(collection, "<missing _id>"));
        };
        self.store
            .append(collection, Operation::Delete, delete_payload(&id))?;
        Ok(Some(oldest))
    }
}

fn delete_payload(id: &str) -> Value {
    let mut map = serde_json::Map::new();
    map.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    Value::Object(map)
}

fn doc_id(document: &Value) -> Option<&str> {
    document.get(ID_FIELD).and_then(Value::as_str)
}

fn not_found(collection: &str, id: &str) -> BlackboardError {
    BlackboardError::NotFound {
        collection: collection.to_string(),
        id: id.to_string(),
    }
}
