//! The data layer the UI talks to.
//!
//! `DataLayer` owns the TTL cache, the request deduplicators, the
//! organization store and the backend handle. Reads go cache first, then
//! through the deduplicator to the backend; UI-facing reads degrade to empty
//! results instead of failing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::DataSource;
use crate::cache::{
    chats_request_key, CacheStore, CharacterList, ChatList, Clock, EntityKind, FetchResult,
    PersonaList, Preloader, SystemClock, CHARACTERS_REQUEST_KEY, PERSONAS_REQUEST_KEY,
};
use crate::config::Config;
use crate::models::{Character, CharacterEntry, ChatStats};
use crate::notify::Notifier;
use crate::pipeline::{self, chat_stats, is_valid_chat, normalize, Organized};
use crate::sched::{Debouncer, Generation, RenderTicket};
use crate::storage::{CharSortOption, KeyValueStorage, OrganizationStore};

/// Changes made outside the data layer that stale its caches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalEvent {
    CharacterDeleted(String),
    CharacterEdited(String),
    /// A chat of this character was created, renamed or written to.
    ChatChanged(String),
    ChatDeleted {
        character_id: String,
        file_name: String,
    },
    PersonasChanged,
}

/// What a debounced refresh re-fetches.
#[derive(Debug, Clone)]
enum RefreshTarget {
    Chats(String),
    Characters,
    Personas,
}

impl RefreshTarget {
    fn key(&self) -> String {
        match self {
            RefreshTarget::Chats(id) => chats_request_key(id),
            RefreshTarget::Characters => CHARACTERS_REQUEST_KEY.to_string(),
            RefreshTarget::Personas => PERSONAS_REQUEST_KEY.to_string(),
        }
    }
}

pub struct DataLayer {
    config: Config,
    cache: CacheStore,
    source: Arc<dyn DataSource>,
    organization: OrganizationStore,
    preloader: Preloader,
    generation: Generation,
    refresh: Debouncer,
}

impl DataLayer {
    pub fn new(
        config: Config,
        source: Arc<dyn DataSource>,
        storage: Arc<dyn KeyValueStorage>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self::with_clock(config, source, storage, notifier, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: Config,
        source: Arc<dyn DataSource>,
        storage: Arc<dyn KeyValueStorage>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cache: CacheStore::new(config.cache.clone(), clock),
            organization: OrganizationStore::new(storage, notifier),
            config,
            source,
            preloader: Preloader::new(),
            generation: Generation::new(),
            refresh: Debouncer::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn organization(&self) -> &OrganizationStore {
        &self.organization
    }

    pub fn preloader(&self) -> &Preloader {
        &self.preloader
    }

    // ===== Fetching =====

    pub async fn personas(&self) -> FetchResult<PersonaList> {
        if self.cache.is_valid(EntityKind::Personas, None) {
            if let Some(personas) = self.cache.get_personas() {
                return Ok(personas);
            }
        }

        debug!("Personas cache miss");
        let source = Arc::clone(&self.source);
        let personas = self
            .cache
            .pending()
            .personas
            .fetch_and_store(
                PERSONAS_REQUEST_KEY,
                move || async move { source.fetch_personas().await.map(Arc::new) },
                |personas| self.cache.set_personas(Arc::clone(personas)),
            )
            .await?;
        Ok(personas)
    }

    pub async fn characters(&self) -> FetchResult<CharacterList> {
        if self.cache.is_valid(EntityKind::Characters, None) {
            if let Some(characters) = self.cache.get_characters() {
                return Ok(characters);
            }
        }

        debug!("Characters cache miss");
        let source = Arc::clone(&self.source);
        let characters = self
            .cache
            .pending()
            .characters
            .fetch_and_store(
                CHARACTERS_REQUEST_KEY,
                move || async move { source.fetch_characters().await.map(Arc::new) },
                |characters| self.cache.set_characters(Arc::clone(characters)),
            )
            .await?;
        Ok(characters)
    }

    /// Normalized chat list for one character. `force_refresh` skips the
    /// cache and any request already in flight.
    pub async fn chats(&self, character_id: &str, force_refresh: bool) -> FetchResult<ChatList> {
        if !force_refresh && self.cache.is_valid(EntityKind::Chats, Some(character_id)) {
            if let Some(chats) = self.cache.get_chats(character_id) {
                return Ok(chats);
            }
        }

        let key = chats_request_key(character_id);
        if force_refresh {
            self.cache.pending().chats.forget(&key);
        }
        debug!(character = character_id, force_refresh, "Chats cache miss");

        let source = Arc::clone(&self.source);
        let id = character_id.to_string();
        let chats = self
            .cache
            .pending()
            .chats
            .fetch_and_store(
                &key,
                move || async move {
                    source
                        .fetch_chats(&id, force_refresh)
                        .await
                        .map(|raw| Arc::new(normalize(raw)))
                },
                |chats| self.cache.set_chats(character_id, Arc::clone(chats)),
            )
            .await?;
        Ok(chats)
    }

    /// Whatever chat list is cached, fresh or stale.
    pub fn cached_chats(&self, character_id: &str) -> Option<ChatList> {
        self.cache.get_chats(character_id)
    }

    fn record_stats(&self, character_id: &str, stats: ChatStats) {
        self.cache.set_chat_count(character_id, stats.chat_count);
        self.cache
            .set_message_count(character_id, stats.message_count);
    }

    /// Counts follow the cached chat list; a list dropped by invalidation
    /// leaves them unset.
    fn record_stats_if_cached(&self, character_id: &str, chats: &ChatList, stats: ChatStats) {
        if self
            .cache
            .get_chats(character_id)
            .is_some_and(|cached| Arc::ptr_eq(&cached, chats))
        {
            self.record_stats(character_id, stats);
        }
    }

    /// Number of valid chats for a character.
    pub async fn chat_count(&self, character_id: &str) -> FetchResult<usize> {
        if self.cache.is_valid(EntityKind::ChatCounts, Some(character_id)) {
            if let Some(count) = self.cache.get_chat_count(character_id) {
                return Ok(count);
            }
        }
        let chats = self.chats(character_id, false).await?;
        let stats = chat_stats(&chats);
        self.record_stats_if_cached(character_id, &chats, stats);
        Ok(stats.chat_count)
    }

    /// Total messages across a character's valid chats.
    pub async fn message_count(&self, character_id: &str) -> FetchResult<u64> {
        if self.cache.is_valid(EntityKind::MessageCounts, Some(character_id)) {
            if let Some(count) = self.cache.get_message_count(character_id) {
                return Ok(count);
            }
        }
        let chats = self.chats(character_id, false).await?;
        let stats = chat_stats(&chats);
        self.record_stats_if_cached(character_id, &chats, stats);
        Ok(stats.message_count)
    }

    /// Chat counts for many characters, fetched a batch at a time. Characters
    /// whose count could not be resolved are left out.
    pub async fn chat_counts(&self, character_ids: &[String]) -> HashMap<String, usize> {
        let mut counts = HashMap::with_capacity(character_ids.len());
        for batch in character_ids.chunks(self.config.count_batch_size()) {
            let results = join_all(
                batch
                    .iter()
                    .map(|id| async move { (id, self.chat_count(id).await) }),
            )
            .await;
            for (id, result) in results {
                match result {
                    Ok(count) => {
                        counts.insert(id.clone(), count);
                    }
                    Err(e) => debug!(character = %id, error = %e, "Chat count unavailable"),
                }
            }
        }
        counts
    }

    // ===== UI-facing views =====

    /// The chat list for one character as it should render. Backend failures
    /// yield an empty list.
    pub async fn organized_chats(&self, character_id: &str, search: &str) -> Organized {
        let chats = match self.chats(character_id, false).await {
            Ok(chats) => chats,
            Err(e) => {
                warn!(character = character_id, error = %e, "Could not load chats");
                return Organized::default();
            }
        };

        let doc = self.organization.load();
        let organized = pipeline::organize(character_id, &chats, &doc, search);
        self.record_stats_if_cached(character_id, &chats, organized.stats);
        organized
    }

    /// The character grid in display order. Backend failures yield an empty
    /// list. Chat counts are fetched only when sorting by them; otherwise
    /// whatever counts are cached are shown.
    pub async fn sorted_characters(&self, search: &str) -> Vec<CharacterEntry> {
        let characters = match self.characters().await {
            Ok(characters) => characters,
            Err(e) => {
                warn!(error = %e, "Could not load characters");
                return Vec::new();
            }
        };

        let counts = if self.organization.load().char_sort_option == CharSortOption::Chats {
            let ids: Vec<String> = characters.iter().map(|c| c.id().to_string()).collect();
            self.chat_counts(&ids).await
        } else {
            characters
                .iter()
                .filter_map(|c| {
                    self.cache
                        .get_chat_count(c.id())
                        .map(|n| (c.id().to_string(), n))
                })
                .collect()
        };

        let doc = self.organization.load();
        pipeline::organize_characters(&characters, &doc, &counts, search)
    }

    /// Chats per folder for one character, favorites included.
    pub async fn folder_counts(&self, character_id: &str) -> HashMap<String, usize> {
        let chats = match self.chats(character_id, false).await {
            Ok(chats) => chats,
            Err(e) => {
                warn!(character = character_id, error = %e, "Could not load chats");
                return HashMap::new();
            }
        };
        let names: Vec<&str> = chats
            .iter()
            .filter(|r| is_valid_chat(r))
            .map(|r| r.file_name.as_str())
            .collect();
        self.organization.folder_counts(character_id, &names)
    }

    /// Start a render. Results computed under an older ticket are stale.
    pub fn begin_render(&self) -> RenderTicket {
        self.generation.advance()
    }

    pub fn is_current(&self, ticket: RenderTicket) -> bool {
        self.generation.is_current(ticket)
    }

    // ===== Mutations =====

    /// Ids of the characters last listed, stale or not.
    fn known_character_ids(&self) -> Vec<String> {
        self.cache
            .get_characters()
            .map(|characters| characters.iter().map(|c| c.id().to_string()).collect())
            .unwrap_or_default()
    }

    fn invalidate_chats_of(&self, character_id: &str) {
        for kind in [EntityKind::Chats, EntityKind::ChatCounts, EntityKind::MessageCounts] {
            self.cache.invalidate(kind, Some(character_id), true);
        }
    }

    pub async fn delete_chat(&self, character_id: &str, file_name: &str) -> bool {
        if !self.source.delete_chat(file_name, character_id).await {
            return false;
        }
        self.invalidate_chats_of(character_id);
        self.organization.forget_chat(character_id, file_name);
        true
    }

    pub async fn delete_character(&self, character_id: &str) -> bool {
        if !self.source.delete_character(character_id).await {
            return false;
        }
        let known = self.known_character_ids();
        self.cache.invalidate(EntityKind::Characters, None, true);
        self.invalidate_chats_of(character_id);
        self.organization.forget_character(character_id, &known);
        true
    }

    pub async fn delete_persona(&self, key: &str) -> bool {
        if !self.source.delete_persona(key).await {
            return false;
        }
        self.cache.invalidate(EntityKind::Personas, None, true);
        true
    }

    // ===== Invalidation hooks =====

    pub fn invalidate(&self, kind: EntityKind, key: Option<&str>, clear_pending: bool) {
        self.cache.invalidate(kind, key, clear_pending);
    }

    pub fn invalidate_all(&self, kind: Option<EntityKind>) {
        self.cache.invalidate_all(kind);
    }

    /// React to a change made elsewhere: drop what it stales now, then
    /// refetch once things have been quiet for `refresh_cooldown_ms`.
    /// Must be called from within a Tokio runtime.
    pub fn handle_event(self: &Arc<Self>, event: ExternalEvent) {
        debug!(event = ?event, "External change");
        match event {
            ExternalEvent::CharacterDeleted(id) => {
                let known = self.known_character_ids();
                self.cache.invalidate(EntityKind::Characters, None, true);
                self.invalidate_chats_of(&id);
                self.organization.forget_character(&id, &known);
                self.schedule_refresh(RefreshTarget::Characters);
            }
            ExternalEvent::CharacterEdited(_) => {
                self.cache.invalidate(EntityKind::Characters, None, true);
                self.schedule_refresh(RefreshTarget::Characters);
            }
            ExternalEvent::ChatChanged(id) => {
                self.invalidate_chats_of(&id);
                self.schedule_refresh(RefreshTarget::Chats(id));
            }
            ExternalEvent::ChatDeleted {
                character_id,
                file_name,
            } => {
                self.invalidate_chats_of(&character_id);
                self.organization.forget_chat(&character_id, &file_name);
                self.schedule_refresh(RefreshTarget::Chats(character_id));
            }
            ExternalEvent::PersonasChanged => {
                self.cache.invalidate(EntityKind::Personas, None, true);
                self.schedule_refresh(RefreshTarget::Personas);
            }
        }
    }

    fn schedule_refresh(self: &Arc<Self>, target: RefreshTarget) {
        let layer = Arc::downgrade(self);
        let delay = Duration::from_millis(self.config.refresh_cooldown_ms);
        self.refresh.schedule(target.key(), delay, async move {
            let Some(layer) = layer.upgrade() else {
                return;
            };
            let result = match &target {
                RefreshTarget::Chats(id) => layer.chats(id, true).await.map(|_| ()),
                RefreshTarget::Characters => layer.characters().await.map(|_| ()),
                RefreshTarget::Personas => layer.personas().await.map(|_| ()),
            };
            if let Err(e) = result {
                warn!(refresh = ?target, error = %e, "Refresh failed");
            }
        });
    }

    // ===== Preloading =====

    pub async fn preload_all(&self) {
        self.preloader.preload_all(self).await;
    }

    pub async fn preload_recent_chats(&self, characters: &[Character]) {
        self.preloader
            .preload_recent_chats(self, characters, self.config.preload.recent_chat_limit)
            .await;
    }

    /// Warm the cache in the background once the startup delay has passed.
    pub fn spawn_preload(self: &Arc<Self>) -> JoinHandle<()> {
        let layer = Arc::clone(self);
        let delay = Duration::from_millis(self.config.preload.delay_ms);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            layer.preload_all().await;
            if let Some(characters) = layer.cache.get_characters() {
                layer.preload_recent_chats(&characters).await;
            }
        })
    }
}
