use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// `last_mes` arrives either as epoch milliseconds or as a human date string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[serde(untagged)]
pub enum LastMes {
    Epoch(f64),
    Text(String),
}

/// One chat file as the backend describes it. Every field is optional
/// because older backends omit most of them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawChat {
    #[serde(default)]
    pub file_name: Option<String>,
    /// Last message text.
    #[serde(default)]
    pub mes: Option<String>,
    #[serde(default, alias = "message_count")]
    pub chat_items: Option<u64>,
    #[serde(default)]
    pub last_mes: Option<LastMes>,
    #[serde(default)]
    pub file_date: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

/// The chat listing endpoint returns a JSON array on current backends and
/// an object keyed by file name (or index) on older ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawChatList {
    List(Vec<RawChat>),
    Map(IndexMap<String, RawChat>),
}

impl Default for RawChatList {
    fn default() -> Self {
        RawChatList::List(Vec::new())
    }
}

impl RawChatList {
    pub fn len(&self) -> usize {
        match self {
            RawChatList::List(items) => items.len(),
            RawChatList::Map(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A normalized chat entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct ChatRecord {
    pub file_name: String,
    pub preview: String,
    pub message_count: u64,
    pub last_mes: Option<LastMes>,
    pub file_date: Option<String>,
    pub date: Option<String>,
}

/// A chat enriched with the user's organization metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct OrganizedChat {
    /// Composite key, see [`chat_key`].
    pub key: String,
    pub record: ChatRecord,
    /// Resolved sort timestamp in epoch milliseconds (0 when unknown).
    pub timestamp: i64,
    pub is_favorite: bool,
    pub folder_id: String,
    pub folder_name: String,
}

/// Aggregates derived while organizing one character's chats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChatStats {
    pub chat_count: usize,
    pub message_count: u64,
}

/// Identity used for favorite and folder lookups.
pub fn chat_key(character_id: &str, file_name: &str) -> String {
    format!("{}_{}", character_id, file_name)
}
