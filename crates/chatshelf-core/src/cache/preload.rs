//! Background cache warming.
//!
//! Personas and characters are fetched once shortly after startup, then the
//! chat lists of the most recently used characters, so the first clicks hit
//! a warm cache. Every failure here is logged and swallowed; a cold cache
//! only means the real request does the fetch.

use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::data::DataLayer;
use crate::models::Character;

use super::store::EntityKind;

#[derive(Debug, Default)]
pub struct Preloader {
    personas_loaded: AtomicBool,
    characters_loaded: AtomicBool,
}

impl Preloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn personas_loaded(&self) -> bool {
        self.personas_loaded.load(Ordering::SeqCst)
    }

    pub fn characters_loaded(&self) -> bool {
        self.characters_loaded.load(Ordering::SeqCst)
    }

    /// Warm personas and characters concurrently. A type is skipped when it
    /// was already preloaded or is still fresh in the cache; its flag is set
    /// only after a successful fetch so a failed attempt is retried next time.
    pub async fn preload_all(&self, layer: &DataLayer) {
        let personas = async {
            if self.personas_loaded() || layer.cache().is_valid(EntityKind::Personas, None) {
                return;
            }
            match layer.personas().await {
                Ok(personas) => {
                    self.personas_loaded.store(true, Ordering::SeqCst);
                    debug!(count = personas.len(), "Preloaded personas");
                }
                Err(e) => warn!(error = %e, "Persona preload failed"),
            }
        };

        let characters = async {
            if self.characters_loaded() || layer.cache().is_valid(EntityKind::Characters, None) {
                return;
            }
            match layer.characters().await {
                Ok(characters) => {
                    self.characters_loaded.store(true, Ordering::SeqCst);
                    debug!(count = characters.len(), "Preloaded characters");
                }
                Err(e) => warn!(error = %e, "Character preload failed"),
            }
        };

        futures::join!(personas, characters);
    }

    /// Warm chat lists for the `limit` characters with the latest chats.
    /// Characters that never chatted sort last.
    pub async fn preload_recent_chats(
        &self,
        layer: &DataLayer,
        characters: &[Character],
        limit: usize,
    ) {
        let mut recent: Vec<&Character> = characters.iter().collect();
        recent.sort_by_key(|c| Reverse(c.date_last_chat.unwrap_or(0)));
        recent.truncate(limit);

        let warmed = join_all(recent.into_iter().map(|character| async move {
            let id = character.id();
            if layer.cache().is_valid(EntityKind::Chats, Some(id)) {
                return false;
            }
            match layer.chats(id, false).await {
                Ok(_) => true,
                Err(e) => {
                    warn!(character = id, error = %e, "Chat preload failed");
                    false
                }
            }
        }))
        .await;

        let count = warmed.into_iter().filter(|w| *w).count();
        if count > 0 {
            info!(count = count, "Preloaded recent chats");
        }
    }
}
