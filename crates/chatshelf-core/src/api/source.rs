use async_trait::async_trait;

use crate::models::{Character, Persona, RawChatList};

use super::ApiError;

/// The backend the data layer reads from. Fetches report failures; deletes
/// answer whether the backend accepted them.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch_personas(&self) -> Result<Vec<Persona>, ApiError>;

    async fn fetch_characters(&self) -> Result<Vec<Character>, ApiError>;

    /// `force_refresh` asks intermediaries to skip their own caches.
    async fn fetch_chats(
        &self,
        character_id: &str,
        force_refresh: bool,
    ) -> Result<RawChatList, ApiError>;

    async fn delete_chat(&self, file_name: &str, character_id: &str) -> bool;

    async fn delete_persona(&self, key: &str) -> bool;

    async fn delete_character(&self, character_id: &str) -> bool;
}
