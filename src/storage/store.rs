//! File-Backed Bibliography Store
//!
//! The store keeps every entry's canonical text plus a little metadata in a
//! JSON index, and attachments as plain files next to it:
//!
//! ```text
//! {root}/
//!   ├── entries.json            index of all entries
//!   └── attachments/
//!         └── {id}/{name}       one file per attachment
//! ```
//!
//! ## Concurrency Model
//!
//! One `BibStore` is shared by every session through an `Arc`. The index
//! sits behind a single `RwLock`: reads (`NUM`, `SHOW`, `LIST`) proceed in
//! parallel, inserts are exclusive. The index is rewritten with
//! [`atomic_write`], so a crash never leaves it half written.
//!
//! Every method does blocking file I/O. Async callers run mutations on
//! tokio's blocking pool.

use super::files::atomic_write;
use crate::bibtex::BibtexEntry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::{debug, info};

const INDEX_FILE: &str = "entries.json";
const ATTACHMENT_DIR: &str = "attachments";

/// Errors reported by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt index: {0}")]
    Index(#[from] serde_json::Error),

    /// The store was closed during shutdown
    #[error("store is closed")]
    Closed,

    /// No entry has this id
    #[error("no entry with id {0}")]
    NotFound(u64),

    /// Attachment names must be a single path component
    #[error("invalid attachment name '{0}'")]
    InvalidName(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// One stored bibliography entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub id: u64,
    pub key: String,
    pub kind: String,
    /// Directory hint given with `BIBTEX`
    pub path: String,
    /// Canonical record text, returned verbatim by `SHOW`
    pub text: String,
}

impl StoredEntry {
    /// Returns the one-line summary used by `LIST`.
    pub fn summary(&self) -> String {
        format!("{}\t{}\t@{}\t{}", self.id, self.key, self.kind, self.path)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Index {
    /// Last id handed out; ids start at 1
    last_id: u64,
    /// Sorted by id
    entries: Vec<StoredEntry>,
}

impl Index {
    fn find(&self, id: u64) -> Option<&StoredEntry> {
        self.entries
            .binary_search_by_key(&id, |e| e.id)
            .ok()
            .map(|pos| &self.entries[pos])
    }
}

#[derive(Debug)]
struct State {
    index: Index,
    closed: bool,
}

/// The persistent bibliography store.
///
/// # Example
///
/// ```
/// use btd::storage::BibStore;
///
/// let dir = tempfile::tempdir().unwrap();
/// let store = BibStore::open(dir.path()).unwrap();
/// assert_eq!(store.count().unwrap(), 0);
/// assert_eq!(store.get(1).unwrap(), None);
/// ```
#[derive(Debug)]
pub struct BibStore {
    root: PathBuf,
    state: RwLock<State>,
}

impl BibStore {
    /// Opens (or creates) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(ATTACHMENT_DIR))?;

        let index_path = root.join(INDEX_FILE);
        let index = match fs::read(&index_path) {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Index::default(),
            Err(e) => return Err(e.into()),
        };

        info!(
            path = %root.display(),
            entries = index.entries.len(),
            "Store opened"
        );

        Ok(Self {
            root,
            state: RwLock::new(State {
                index,
                closed: false,
            }),
        })
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return Err(StoreError::Closed);
        }
        Ok(state)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        let state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return Err(StoreError::Closed);
        }
        Ok(state)
    }

    /// Returns the number of stored entries.
    pub fn count(&self) -> StoreResult<usize> {
        Ok(self.read()?.index.entries.len())
    }

    /// Returns the text of entry `id`, or `None` when it does not exist.
    pub fn get(&self, id: u64) -> StoreResult<Option<String>> {
        Ok(self.read()?.index.find(id).map(|e| e.text.clone()))
    }

    /// Returns one summary line per entry, ordered by id.
    pub fn list_summary(&self) -> StoreResult<String> {
        let state = self.read()?;
        Ok(state
            .index
            .entries
            .iter()
            .map(StoredEntry::summary)
            .collect::<Vec<_>>()
            .join("\n"))
    }

    /// Inserts an entry under the directory hint `path` and returns its id.
    pub fn insert_entry(&self, entry: &BibtexEntry, path: &str) -> StoreResult<u64> {
        let mut state = self.write()?;
        let id = state.index.last_id + 1;
        state.index.entries.push(StoredEntry {
            id,
            key: entry.key.clone(),
            kind: entry.kind.clone(),
            path: path.to_string(),
            text: entry.to_string(),
        });
        state.index.last_id = id;

        if let Err(e) = self.persist(&state.index) {
            state.index.entries.pop();
            state.index.last_id = id - 1;
            return Err(e);
        }

        debug!(id, key = %entry.key, "Entry inserted");
        Ok(id)
    }

    /// Stores `data` as attachment `name` of entry `id`.
    ///
    /// Returns the path of the written file.
    pub fn write_attachment(&self, name: &str, id: u64, data: &[u8]) -> StoreResult<PathBuf> {
        if !is_valid_name(name) {
            return Err(StoreError::InvalidName(name.to_string()));
        }

        // Hold the read lock so close() cannot run underneath the write
        let state = self.read()?;
        if state.index.find(id).is_none() {
            return Err(StoreError::NotFound(id));
        }

        let dir = self.root.join(ATTACHMENT_DIR).join(id.to_string());
        fs::create_dir_all(&dir)?;
        let path = dir.join(name);
        fs::write(&path, data)?;

        debug!(id, name, bytes = data.len(), "Attachment written");
        Ok(path)
    }

    /// Closes the store. Later operations fail with [`StoreError::Closed`].
    ///
    /// Returns `false` if the store was already closed.
    pub fn close(&self) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return false;
        }
        state.closed = true;
        info!(path = %self.root.display(), "Store closed");
        true
    }

    pub fn is_closed(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
    }

    fn persist(&self, index: &Index) -> StoreResult<()> {
        let raw = serde_json::to_vec_pretty(index)?;
        atomic_write(&self.root.join(INDEX_FILE), &raw)?;
        Ok(())
    }
}

/// A valid attachment name is one normal path component.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}
