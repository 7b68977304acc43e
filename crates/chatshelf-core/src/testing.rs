//! Test doubles shared by unit tests across the crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::api::{ApiError, DataSource};
use crate::models::{Character, Persona, RawChatList};

/// In-memory `DataSource` that counts calls. Each fetch yields to the
/// scheduler a few times before answering so concurrent callers overlap.
#[derive(Default)]
pub struct MockSource {
    characters: Mutex<Vec<Character>>,
    personas: Mutex<Vec<Persona>>,
    chats: Mutex<HashMap<String, RawChatList>>,
    failing: AtomicBool,
    pub persona_calls: AtomicUsize,
    pub character_calls: AtomicUsize,
    chat_calls: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub deleted: Mutex<Vec<String>>,
    chat_gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_characters(self, characters: Vec<Character>) -> Self {
        *self.characters.lock() = characters;
        self
    }

    pub fn with_personas(self, personas: Vec<Persona>) -> Self {
        *self.personas.lock() = personas;
        self
    }

    pub fn with_chats(self, character_id: &str, chats: serde_json::Value) -> Self {
        self.set_chats(character_id, chats);
        self
    }

    /// Replace a character's listing; fetches already past their snapshot
    /// keep the old one.
    pub fn set_chats(&self, character_id: &str, chats: serde_json::Value) {
        let list: RawChatList = serde_json::from_value(chats).expect("valid chat listing");
        self.chats.lock().insert(character_id.to_string(), list);
    }

    /// Hold the next chat fetch after it has read its listing, until the
    /// returned sender fires or is dropped.
    pub fn hold_next_chat_fetch(&self) -> oneshot::Sender<()> {
        let (release, gate) = oneshot::channel();
        *self.chat_gate.lock() = Some(gate);
        release
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn chat_calls(&self, character_id: &str) -> usize {
        self.chat_calls
            .lock()
            .get(character_id)
            .copied()
            .unwrap_or(0)
    }

    async fn settle(&self) -> Result<(), ApiError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(ApiError::ServerError("mock failure".to_string()))
        } else {
            Ok(())
        }
    }
}

pub fn character(avatar: &str, name: &str, date_last_chat: Option<i64>) -> Character {
    Character {
        avatar: avatar.to_string(),
        name: name.to_string(),
        date_last_chat,
        date_added: None,
    }
}

#[async_trait]
impl DataSource for MockSource {
    async fn fetch_personas(&self) -> Result<Vec<Persona>, ApiError> {
        self.persona_calls.fetch_add(1, Ordering::SeqCst);
        self.settle().await?;
        Ok(self.personas.lock().clone())
    }

    async fn fetch_characters(&self) -> Result<Vec<Character>, ApiError> {
        self.character_calls.fetch_add(1, Ordering::SeqCst);
        self.settle().await?;
        Ok(self.characters.lock().clone())
    }

    async fn fetch_chats(
        &self,
        character_id: &str,
        _force_refresh: bool,
    ) -> Result<RawChatList, ApiError> {
        *self
            .chat_calls
            .lock()
            .entry(character_id.to_string())
            .or_default() += 1;
        let chats = self.chats.lock().get(character_id).cloned();
        let gate = self.chat_gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.settle().await?;
        Ok(chats.unwrap_or_default())
    }

    async fn delete_chat(&self, file_name: &str, character_id: &str) -> bool {
        if self.failing.load(Ordering::SeqCst) {
            return false;
        }
        self.deleted
            .lock()
            .push(format!("{}/{}", character_id, file_name));
        true
    }

    async fn delete_persona(&self, key: &str) -> bool {
        if self.failing.load(Ordering::SeqCst) {
            return false;
        }
        self.deleted.lock().push(key.to_string());
        true
    }

    async fn delete_character(&self, character_id: &str) -> bool {
        if self.failing.load(Ordering::SeqCst) {
            return false;
        }
        self.deleted.lock().push(character_id.to_string());
        true
    }
}
