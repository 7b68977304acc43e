//! Data models for the chat browser.
//!
//! - `Character`, `Persona`: entities listed by the backend
//! - `RawChat`, `RawChatList`: chat metadata exactly as the backend returns it
//! - `ChatRecord`: a normalized chat entry
//! - `OrganizedChat`, `CharacterEntry`: records enriched with local metadata

pub mod character;
pub mod chat;

pub use character::{Character, CharacterEntry, Persona};
pub use chat::{chat_key, ChatRecord, ChatStats, LastMes, OrganizedChat, RawChat, RawChatList};
