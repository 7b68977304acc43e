//! chatshelf-core: client-side data layer for a chat and character browser.
//!
//! - `cache`: TTL cache, in-flight request dedup, background preloading
//! - `storage`: durable organization document (folders, favorites, sort
//!   and filter preferences) with quota cleanup and cross-tab invalidation
//! - `pipeline`: raw chat listings → filtered, enriched, sorted chat lists
//! - `api`: the backend `DataSource` and its HTTP implementation
//! - `data`: `DataLayer`, the context object the UI holds

pub mod api;
pub mod cache;
pub mod config;
pub mod data;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod sched;
pub mod storage;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiError, DataSource, HttpSource};
pub use cache::{CacheStore, EntityKind, Preloader};
pub use config::Config;
pub use data::{DataLayer, ExternalEvent};
pub use notify::{LogNotifier, Notice, Notifier, Severity};
pub use storage::{FileStorage, KeyValueStorage, MemoryStorage, OrganizationStore};
