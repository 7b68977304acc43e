//! In-memory caching for backend data.
//!
//! - `CacheStore`: per-entity TTL cache with lazy expiry
//! - `Deduplicator`: one in-flight fetch per request key
//! - `Preloader`: warms the cache in the background after startup
//! - `Clock`: time source, swappable in tests

pub mod clock;
pub mod dedup;
pub mod entry;
pub mod preload;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dedup::{Deduplicator, FetchResult, SharedError};
pub use entry::CachedData;
pub use preload::Preloader;
pub use store::{
    chats_request_key, CacheStore, CharacterList, ChatList, EntityKind, PendingRequests,
    PersonaList, CHARACTERS_REQUEST_KEY, PERSONAS_REQUEST_KEY,
};
