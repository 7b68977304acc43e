use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::config::CacheConfig;
use crate::models::{Character, ChatRecord, Persona};

use super::clock::Clock;
use super::dedup::Deduplicator;
use super::entry::CachedData;

/// The fixed set of cached entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Chats,
    ChatCounts,
    MessageCounts,
    Personas,
    Characters,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Chats,
        EntityKind::ChatCounts,
        EntityKind::MessageCounts,
        EntityKind::Personas,
        EntityKind::Characters,
    ];

    /// Keyed kinds hold one entry per character.
    pub fn is_keyed(&self) -> bool {
        matches!(
            self,
            EntityKind::Chats | EntityKind::ChatCounts | EntityKind::MessageCounts
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Chats => "chats",
            EntityKind::ChatCounts => "chatCounts",
            EntityKind::MessageCounts => "messageCounts",
            EntityKind::Personas => "personas",
            EntityKind::Characters => "characters",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type ChatList = Arc<Vec<ChatRecord>>;
pub type PersonaList = Arc<Vec<Persona>>;
pub type CharacterList = Arc<Vec<Character>>;

type Keyed<T> = HashMap<String, CachedData<T>>;

#[derive(Default)]
struct Entries {
    chats: Keyed<ChatList>,
    chat_counts: Keyed<usize>,
    message_counts: Keyed<u64>,
    personas: Option<CachedData<PersonaList>>,
    characters: Option<CachedData<CharacterList>>,
}

/// Request keys used by the deduplicators.
pub fn chats_request_key(character_id: &str) -> String {
    format!("chats_{}", character_id)
}

pub const PERSONAS_REQUEST_KEY: &str = "personas";
pub const CHARACTERS_REQUEST_KEY: &str = "characters";

/// One deduplicator per fetchable entity. Counts are derived from chats, so
/// they share the chats deduplicator.
#[derive(Default)]
pub struct PendingRequests {
    pub chats: Deduplicator<ChatList>,
    pub personas: Deduplicator<PersonaList>,
    pub characters: Deduplicator<CharacterList>,
}

/// Memory-only TTL cache for the fixed entity types.
///
/// `get_*` returns whatever is stored, fresh or not, so callers can render
/// old data while a refresh runs; freshness is checked separately with
/// [`CacheStore::is_valid`]. Nothing expires in the background: staleness is
/// a pure function of the clock, the write stamp and the TTL.
pub struct CacheStore {
    entries: RwLock<Entries>,
    ttl: CacheConfig,
    clock: Arc<dyn Clock>,
    pending: PendingRequests,
}

fn keyed_valid<T>(
    map: &Keyed<T>,
    key: Option<&str>,
    ttl: chrono::Duration,
    now: chrono::DateTime<chrono::Utc>,
) -> bool {
    key.and_then(|k| map.get(k))
        .is_some_and(|entry| entry.is_fresh(ttl, now))
}

fn keyed_clear<T>(map: &mut Keyed<T>, key: Option<&str>) {
    match key {
        Some(k) => {
            map.remove(k);
        }
        None => map.clear(),
    }
}

impl CacheStore {
    pub fn new(ttl: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            ttl,
            clock,
            pending: PendingRequests::default(),
        }
    }

    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// True iff an entry exists for `(kind, key)` and is younger than the
    /// kind's TTL. Keyed kinds need a key; single-value kinds ignore it.
    pub fn is_valid(&self, kind: EntityKind, key: Option<&str>) -> bool {
        let ttl = self.ttl.ttl(kind);
        let now = self.clock.now();
        let entries = self.entries.read();
        match kind {
            EntityKind::Chats => keyed_valid(&entries.chats, key, ttl, now),
            EntityKind::ChatCounts => keyed_valid(&entries.chat_counts, key, ttl, now),
            EntityKind::MessageCounts => keyed_valid(&entries.message_counts, key, ttl, now),
            EntityKind::Personas => entries
                .personas
                .as_ref()
                .is_some_and(|e| e.is_fresh(ttl, now)),
            EntityKind::Characters => entries
                .characters
                .as_ref()
                .is_some_and(|e| e.is_fresh(ttl, now)),
        }
    }

    /// Clear one sub-key or the whole kind. With `clear_pending`, the
    /// matching in-flight request is dropped too so the next access fetches
    /// again instead of joining a request that started before the change.
    pub fn invalidate(&self, kind: EntityKind, key: Option<&str>, clear_pending: bool) {
        // Forget before clearing so a settling fetch cannot refill the entry
        if clear_pending {
            match kind {
                EntityKind::Chats | EntityKind::ChatCounts | EntityKind::MessageCounts => {
                    match key {
                        Some(k) => {
                            self.pending.chats.forget(&chats_request_key(k));
                        }
                        None => self.pending.chats.forget_all(),
                    }
                }
                EntityKind::Personas => {
                    self.pending.personas.forget(PERSONAS_REQUEST_KEY);
                }
                EntityKind::Characters => {
                    self.pending.characters.forget(CHARACTERS_REQUEST_KEY);
                }
            }
        }

        let mut entries = self.entries.write();
        match kind {
            EntityKind::Chats => keyed_clear(&mut entries.chats, key),
            EntityKind::ChatCounts => keyed_clear(&mut entries.chat_counts, key),
            EntityKind::MessageCounts => keyed_clear(&mut entries.message_counts, key),
            EntityKind::Personas => entries.personas = None,
            EntityKind::Characters => entries.characters = None,
        }
        drop(entries);
        debug!(kind = %kind, key = ?key, clear_pending, "Cache invalidated");
    }

    /// Clear one kind, or every kind when `kind` is `None`.
    pub fn invalidate_all(&self, kind: Option<EntityKind>) {
        match kind {
            Some(kind) => self.invalidate(kind, None, false),
            None => {
                *self.entries.write() = Entries::default();
                debug!("All caches invalidated");
            }
        }
    }

    /// Human-readable age of an entry, e.g. "42s ago".
    pub fn age_display(&self, kind: EntityKind, key: Option<&str>) -> Option<String> {
        let now = self.clock.now();
        let entries = self.entries.read();
        let cached_at = match kind {
            EntityKind::Chats => key.and_then(|k| entries.chats.get(k)).map(|e| e.cached_at),
            EntityKind::ChatCounts => key
                .and_then(|k| entries.chat_counts.get(k))
                .map(|e| e.cached_at),
            EntityKind::MessageCounts => key
                .and_then(|k| entries.message_counts.get(k))
                .map(|e| e.cached_at),
            EntityKind::Personas => entries.personas.as_ref().map(|e| e.cached_at),
            EntityKind::Characters => entries.characters.as_ref().map(|e| e.cached_at),
        }?;
        Some(CachedData::new((), cached_at).age_display(now))
    }

    // ===== Chats =====

    pub fn get_chats(&self, character_id: &str) -> Option<ChatList> {
        self.entries
            .read()
            .chats
            .get(character_id)
            .map(|e| Arc::clone(&e.data))
    }

    pub fn set_chats(&self, character_id: &str, chats: ChatList) {
        let stamped = CachedData::new(chats, self.clock.now());
        self.entries
            .write()
            .chats
            .insert(character_id.to_string(), stamped);
    }

    // ===== Chat counts =====

    pub fn get_chat_count(&self, character_id: &str) -> Option<usize> {
        self.entries
            .read()
            .chat_counts
            .get(character_id)
            .map(|e| e.data)
    }

    pub fn set_chat_count(&self, character_id: &str, count: usize) {
        let stamped = CachedData::new(count, self.clock.now());
        self.entries
            .write()
            .chat_counts
            .insert(character_id.to_string(), stamped);
    }

    // ===== Message counts =====

    pub fn get_message_count(&self, character_id: &str) -> Option<u64> {
        self.entries
            .read()
            .message_counts
            .get(character_id)
            .map(|e| e.data)
    }

    pub fn set_message_count(&self, character_id: &str, count: u64) {
        let stamped = CachedData::new(count, self.clock.now());
        self.entries
            .write()
            .message_counts
            .insert(character_id.to_string(), stamped);
    }

    // ===== Personas =====

    pub fn get_personas(&self) -> Option<PersonaList> {
        self.entries
            .read()
            .personas
            .as_ref()
            .map(|e| Arc::clone(&e.data))
    }

    pub fn set_personas(&self, personas: PersonaList) {
        self.entries.write().personas = Some(CachedData::new(personas, self.clock.now()));
    }

    // ===== Characters =====

    pub fn get_characters(&self) -> Option<CharacterList> {
        self.entries
            .read()
            .characters
            .as_ref()
            .map(|e| Arc::clone(&e.data))
    }

    pub fn set_characters(&self, characters: CharacterList) {
        self.entries.write().characters = Some(CachedData::new(characters, self.clock.now()));
    }
}
