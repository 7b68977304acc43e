use std::cmp::Ordering;

use crate::models::{CharacterEntry, OrganizedChat};
use crate::storage::{CharSortOption, SortOption};
use crate::utils::cmp_ignore_case;

fn favorites_first(a: bool, b: bool) -> Ordering {
    b.cmp(&a)
}

/// Favorites first, then by `option`. The sort is stable, so ties keep the
/// backend's order and sorting twice changes nothing.
pub fn sort_chats(chats: &mut [OrganizedChat], option: SortOption) {
    chats.sort_by(|a, b| {
        favorites_first(a.is_favorite, b.is_favorite).then_with(|| match option {
            SortOption::Name => cmp_ignore_case(&a.record.file_name, &b.record.file_name),
            SortOption::Messages => b.record.message_count.cmp(&a.record.message_count),
            SortOption::Recent => b.timestamp.cmp(&a.timestamp),
        })
    });
}

/// Favorite characters first, then by `option`. Unknown chat counts and
/// last-chat dates sort as zero.
pub fn sort_characters(entries: &mut [CharacterEntry], option: CharSortOption) {
    entries.sort_by(|a, b| {
        favorites_first(a.is_favorite, b.is_favorite).then_with(|| match option {
            CharSortOption::Name => {
                cmp_ignore_case(a.character.display_name(), b.character.display_name())
            }
            CharSortOption::Chats => b.chat_count.unwrap_or(0).cmp(&a.chat_count.unwrap_or(0)),
            CharSortOption::Recent => b
                .character
                .date_last_chat
                .unwrap_or(0)
                .cmp(&a.character.date_last_chat.unwrap_or(0)),
        })
    });
}
