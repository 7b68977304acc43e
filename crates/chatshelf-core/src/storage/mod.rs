//! Durable storage for user-organized metadata.
//!
//! - `KeyValueStorage`: string key/value backends (`FileStorage`, `MemoryStorage`)
//!   that broadcast change events to every store sharing them
//! - `OrganizationDocument`: folders, assignments, favorites and sort/filter
//!   preferences, persisted as one JSON document
//! - `OrganizationStore`: cached read-modify-write access with quota cleanup
//!   and cross-tab invalidation

pub mod backend;
pub mod document;
pub mod store;

pub use backend::{FileStorage, KeyValueStorage, MemoryStorage, Origin, StorageError, StorageEvent};
pub use document::{
    CharSortOption, CleanupReport, Folder, OrganizationDocument, SortOption, FAVORITES_FOLDER_ID,
    FILTER_ALL, UNCATEGORIZED_FOLDER_ID,
};
pub use store::{OrganizationStore, DOCUMENT_KEY};
