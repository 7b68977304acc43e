use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, error, info, warn};

use crate::models::chat_key;
use crate::notify::{Notice, Notifier};

use super::backend::{KeyValueStorage, Origin, StorageError, StorageEvent};
use super::document::{
    CharSortOption, Folder, OrganizationDocument, SortOption, FAVORITES_FOLDER_ID, FILTER_ALL,
    UNCATEGORIZED_FOLDER_ID,
};

/// Durable storage key for the organization document.
pub const DOCUMENT_KEY: &str = "chatshelf_organization";

struct State {
    cached: Option<OrganizationDocument>,
    events: broadcast::Receiver<StorageEvent>,
}

/// Read-modify-write access to the organization document.
///
/// The document is loaded once and kept in memory until another writer
/// (another tab, another process sharing the storage) changes it. Every
/// mutation runs under one lock from load to save, so no other task can
/// observe a half-applied change.
pub struct OrganizationStore {
    storage: Arc<dyn KeyValueStorage>,
    notifier: Arc<dyn Notifier>,
    origin: Origin,
    state: Mutex<State>,
}

impl OrganizationStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>, notifier: Arc<dyn Notifier>) -> Self {
        let events = storage.subscribe();
        Self {
            storage,
            notifier,
            origin: Origin::random(),
            state: Mutex::new(State {
                cached: None,
                events,
            }),
        }
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// A snapshot of the current document.
    pub fn load(&self) -> OrganizationDocument {
        let mut state = self.state.lock();
        self.loaded(&mut state).clone()
    }

    /// Persist `doc` and make it the in-memory copy. Returns whether the
    /// durable write succeeded; the in-memory copy is updated either way.
    pub fn save(&self, mut doc: OrganizationDocument) -> bool {
        let mut state = self.state.lock();
        let persisted = self.persist(&mut doc);
        state.cached = Some(doc);
        persisted
    }

    /// Load, apply `updater`, save, and hand back whatever it returned.
    pub fn update<R>(&self, updater: impl FnOnce(&mut OrganizationDocument) -> R) -> R {
        let mut state = self.state.lock();
        let doc = self.loaded(&mut state);
        let result = updater(doc);
        self.persist(doc);
        result
    }

    /// Drop the in-memory copy so the next access re-reads storage.
    pub fn invalidate(&self) {
        self.state.lock().cached = None;
    }

    /// React to a storage change notification. Changes this store made
    /// itself are ignored.
    pub fn handle_storage_event(&self, event: &StorageEvent) -> bool {
        if event.key != DOCUMENT_KEY || event.origin == self.origin {
            return false;
        }
        debug!(key = %event.key, "Organization document changed elsewhere");
        self.invalidate();
        true
    }

    fn drain_events(&self, state: &mut State) {
        loop {
            match state.events.try_recv() {
                Ok(event) => {
                    if event.key == DOCUMENT_KEY && event.origin != self.origin {
                        debug!("Organization document changed elsewhere");
                        state.cached = None;
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    debug!(skipped, "Storage events lagged, reloading document");
                    state.cached = None;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }

    fn loaded<'a>(&self, state: &'a mut State) -> &'a mut OrganizationDocument {
        self.drain_events(state);
        state.cached.get_or_insert_with(|| {
            let mut doc = self.read_document();
            if doc.repair() {
                info!(filter = %doc.filter_folder, "Repaired organization document");
                self.persist(&mut doc);
            }
            doc
        })
    }

    fn read_document(&self) -> OrganizationDocument {
        match self.storage.get(DOCUMENT_KEY) {
            Ok(Some(contents)) => match serde_json::from_str(&contents) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(error = %e, "Failed to parse organization document, using defaults");
                    OrganizationDocument::default()
                }
            },
            Ok(None) => OrganizationDocument::default(),
            Err(e) => {
                warn!(error = %e, "Failed to read organization document, using defaults");
                OrganizationDocument::default()
            }
        }
    }

    fn write(&self, doc: &OrganizationDocument) -> Result<(), StorageError> {
        let contents = serde_json::to_string(doc)?;
        self.storage.set(DOCUMENT_KEY, &contents, self.origin)
    }

    /// Write with one trim-and-retry on quota failure. The caller keeps
    /// `doc` as the in-memory state whatever happens here.
    fn persist(&self, doc: &mut OrganizationDocument) -> bool {
        let err = match self.write(doc) {
            Ok(()) => return true,
            Err(e) => e,
        };

        if matches!(err, StorageError::QuotaExceeded { .. }) {
            let report = doc.cleanup();
            warn!(
                assignments = report.chat_assignments,
                favorites = report.favorites,
                character_favorites = report.character_favorites,
                "Storage quota exceeded, trimmed organization document"
            );
            match self.write(doc) {
                Ok(()) => return true,
                Err(e) => {
                    error!(error = %e, "Failed to save organization document after cleanup");
                }
            }
        } else {
            error!(error = %err, "Failed to save organization document");
        }

        self.notifier.notify(Notice::warning(
            "Could not save chat organization. Changes will be lost when the app closes.",
        ));
        false
    }

    // ===== Folders =====

    /// Create a user folder after the existing ones. Returns its id, or
    /// `None` for a blank name.
    pub fn add_folder(&self, name: &str) -> Option<String> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let id = format!(
            "folder_{}_{:04x}",
            Utc::now().timestamp_millis(),
            rand::random::<u16>()
        );
        let folder_id = id.clone();
        self.update(move |doc| {
            let order = doc.max_user_order() + 1;
            doc.folders.push(Folder {
                id,
                name: name.to_string(),
                is_system: false,
                order,
            });
        });
        debug!(id = %folder_id, "Folder added");
        Some(folder_id)
    }

    /// Rename a user folder. System folders and unknown ids are refused.
    pub fn rename_folder(&self, id: &str, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        self.update(|doc| match doc.folders.iter_mut().find(|f| f.id == id) {
            Some(folder) if !folder.is_system => {
                folder.name = name.to_string();
                true
            }
            _ => false,
        })
    }

    /// Delete a user folder, moving its chats to `uncategorized` first.
    /// System folders and unknown ids are refused.
    pub fn delete_folder(&self, id: &str) -> bool {
        let deleted = self.update(|doc| {
            let Some(index) = doc.folders.iter().position(|f| f.id == id && !f.is_system) else {
                return false;
            };
            // Absence means uncategorized, so reassigning is removal
            doc.chat_assignments.retain(|_, folder_id| folder_id.as_str() != id);
            doc.folders.remove(index);
            if doc.filter_folder == id {
                doc.filter_folder = FILTER_ALL.to_string();
            }
            true
        });
        if deleted {
            debug!(id = id, "Folder deleted");
        }
        deleted
    }

    pub fn folders(&self) -> Vec<Folder> {
        self.load().sorted_folders().into_iter().cloned().collect()
    }

    // ===== Assignments =====

    /// Put one chat in a folder. Targeting `favorites` marks the chat as a
    /// favorite instead, since favorites are a set rather than a location.
    pub fn assign_chat(&self, character_id: &str, file_name: &str, folder_id: &str) -> bool {
        self.move_chats(character_id, &[file_name], folder_id) == 1
    }

    /// Move a batch of chats in one update. Returns how many were moved,
    /// zero when the folder does not exist.
    pub fn move_chats<S: AsRef<str>>(
        &self,
        character_id: &str,
        file_names: &[S],
        folder_id: &str,
    ) -> usize {
        self.update(|doc| {
            if !doc.has_folder(folder_id) {
                return 0;
            }
            for file_name in file_names {
                let key = chat_key(character_id, file_name.as_ref());
                if folder_id == FAVORITES_FOLDER_ID {
                    doc.favorites.insert(key);
                } else {
                    doc.assign_key(key, folder_id);
                }
            }
            file_names.len()
        })
    }

    pub fn folder_of(&self, character_id: &str, file_name: &str) -> String {
        self.load().folder_of(character_id, file_name).to_string()
    }

    /// Chats per folder among `file_names` of one character.
    pub fn folder_counts<S: AsRef<str>>(
        &self,
        character_id: &str,
        file_names: &[S],
    ) -> HashMap<String, usize> {
        let keys: Vec<String> = file_names
            .iter()
            .map(|f| chat_key(character_id, f.as_ref()))
            .collect();
        self.load().folder_counts(keys.iter().map(String::as_str))
    }

    // ===== Favorites =====

    /// Flip a chat's favorite flag and return the new state.
    pub fn toggle_favorite(&self, character_id: &str, file_name: &str) -> bool {
        let key = chat_key(character_id, file_name);
        self.update(|doc| {
            if doc.favorites.shift_remove(&key) {
                false
            } else {
                doc.favorites.insert(key);
                true
            }
        })
    }

    pub fn is_favorite(&self, character_id: &str, file_name: &str) -> bool {
        self.load().is_favorite(character_id, file_name)
    }

    /// Flip a character's favorite flag and return the new state.
    pub fn toggle_character_favorite(&self, character_id: &str) -> bool {
        self.update(|doc| {
            if doc.character_favorites.shift_remove(character_id) {
                false
            } else {
                doc.character_favorites.insert(character_id.to_string());
                true
            }
        })
    }

    pub fn is_character_favorite(&self, character_id: &str) -> bool {
        self.load().is_character_favorite(character_id)
    }

    // ===== Preferences =====

    pub fn set_sort_option(&self, option: SortOption) {
        self.update(|doc| doc.sort_option = option);
    }

    pub fn set_char_sort_option(&self, option: CharSortOption) {
        self.update(|doc| doc.char_sort_option = option);
    }

    /// Select the folder filter. Unknown folder ids are refused.
    pub fn set_filter_folder(&self, filter: &str) -> bool {
        self.update(|doc| {
            let previous = std::mem::replace(&mut doc.filter_folder, filter.to_string());
            if doc.is_filter_valid() {
                true
            } else {
                doc.filter_folder = previous;
                false
            }
        })
    }

    // ===== Deletion cleanup =====

    /// Remove a deleted chat's assignment and favorite entries.
    pub fn forget_chat(&self, character_id: &str, file_name: &str) {
        let key = chat_key(character_id, file_name);
        self.update(|doc| {
            doc.chat_assignments.shift_remove(&key);
            doc.favorites.shift_remove(&key);
        });
    }

    /// Remove every entry that belongs to a deleted character.
    /// `other_characters` are the ids still known, see
    /// [`OrganizationDocument::forget_character`].
    pub fn forget_character<S: AsRef<str>>(
        &self,
        character_id: &str,
        other_characters: &[S],
    ) -> usize {
        self.update(|doc| doc.forget_character(character_id, other_characters))
    }
}
