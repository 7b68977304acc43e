//! Chat organization pipeline.
//!
//! Turns a backend chat listing into what the chat list renders:
//! normalize → validity filter → search filter → enrich with favorites and
//! folders → folder filter → sort. Every stage is a pure function of its
//! inputs, so running the pipeline twice over the same data yields the
//! same list.

pub mod filter;
pub mod normalize;
pub mod sort;
pub mod timestamp;

use std::collections::HashMap;

use crate::models::{chat_key, Character, CharacterEntry, ChatRecord, ChatStats, OrganizedChat};
use crate::storage::OrganizationDocument;
use crate::utils::contains_ignore_case;

pub use filter::{in_active_folder, is_valid_chat, matches_search};
pub use normalize::normalize;
pub use sort::{sort_characters, sort_chats};
pub use timestamp::{parse_loose_date, resolve_timestamp, timestamp_from_file_name};

/// Output of [`organize`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Organized {
    pub chats: Vec<OrganizedChat>,
    /// Totals over every valid chat, before search and folder filtering.
    pub stats: ChatStats,
}

fn enrich(character_id: &str, record: &ChatRecord, doc: &OrganizationDocument) -> OrganizedChat {
    let key = chat_key(character_id, &record.file_name);
    let folder_id = doc.folder_for_key(&key).to_string();
    OrganizedChat {
        is_favorite: doc.favorites.contains(&key),
        folder_name: doc.folder_name(&folder_id),
        folder_id,
        timestamp: resolve_timestamp(record),
        record: record.clone(),
        key,
    }
}

/// Chat and message totals over the valid chats in `records`.
pub fn chat_stats(records: &[ChatRecord]) -> ChatStats {
    records
        .iter()
        .filter(|r| is_valid_chat(r))
        .fold(ChatStats::default(), |mut stats, r| {
            stats.chat_count += 1;
            stats.message_count += r.message_count;
            stats
        })
}

/// Valid chats of one character, in display order.
pub fn organize(
    character_id: &str,
    records: &[ChatRecord],
    doc: &OrganizationDocument,
    search: &str,
) -> Organized {
    let stats = chat_stats(records);
    let mut chats: Vec<OrganizedChat> = records
        .iter()
        .filter(|r| is_valid_chat(r))
        .filter(|r| matches_search(r, search))
        .map(|r| enrich(character_id, r, doc))
        .filter(|c| in_active_folder(c, doc))
        .collect();
    sort_chats(&mut chats, doc.sort_option);

    Organized { chats, stats }
}

/// Character rows in display order. `chat_counts` holds whatever counts
/// are known; missing ones stay `None`.
pub fn organize_characters(
    characters: &[Character],
    doc: &OrganizationDocument,
    chat_counts: &HashMap<String, usize>,
    search: &str,
) -> Vec<CharacterEntry> {
    let search = search.trim();
    let mut entries: Vec<CharacterEntry> = characters
        .iter()
        .filter(|c| contains_ignore_case(c.display_name(), search))
        .map(|c| CharacterEntry {
            is_favorite: doc.is_character_favorite(c.id()),
            chat_count: chat_counts.get(c.id()).copied(),
            character: c.clone(),
        })
        .collect();
    sort_characters(&mut entries, doc.char_sort_option);
    entries
}
