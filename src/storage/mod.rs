//! Storage Module
//!
//! Persistent storage for bibliography entries and their attachments.
//! A single [`BibStore`] is opened at startup, shared by all sessions behind
//! an `Arc`, and closed once during shutdown.
//!
//! ## Example
//!
//! ```
//! use btd::bibtex::{BibtexEntry, FieldValue};
//! use btd::storage::BibStore;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let store = BibStore::open(dir.path()).unwrap();
//!
//! let entry = BibtexEntry {
//!     kind: "misc".to_string(),
//!     key: "k1".to_string(),
//!     fields: vec![("note".to_string(), FieldValue::literal("hello"))],
//! };
//! let id = store.insert_entry(&entry, "/tmp").unwrap();
//! assert_eq!(store.get(id).unwrap().as_deref(), Some("@misc{k1, note = {hello}}"));
//! ```

pub mod files;
pub mod store;

// Re-export commonly used types
pub use files::atomic_write;
pub use store::{BibStore, StoreError, StoreResult, StoredEntry};
