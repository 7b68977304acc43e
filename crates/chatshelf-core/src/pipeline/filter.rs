use crate::models::{ChatRecord, OrganizedChat};
use crate::storage::{OrganizationDocument, FAVORITES_FOLDER_ID, FILTER_ALL};
use crate::utils::contains_ignore_case;

use super::timestamp::has_date;

pub const CHAT_FILE_EXTENSION: &str = ".jsonl";

/// Names starting with this are backend bookkeeping, not chats.
pub const RESERVED_PREFIX: &str = "_";

/// Placeholder name the backend returns instead of an error status.
pub const ERROR_SENTINEL: &str = "error";

pub fn is_valid_chat(record: &ChatRecord) -> bool {
    let name = record.file_name.as_str();
    if name.is_empty() || name.starts_with(RESERVED_PREFIX) || name == ERROR_SENTINEL {
        return false;
    }
    name.contains(CHAT_FILE_EXTENSION) || has_date(name)
}

/// Case-insensitive match on file name or last message preview.
pub fn matches_search(record: &ChatRecord, query: &str) -> bool {
    let query = query.trim();
    query.is_empty()
        || contains_ignore_case(&record.file_name, query)
        || contains_ignore_case(&record.preview, query)
}

/// Whether a chat is shown under the document's active folder filter.
pub fn in_active_folder(chat: &OrganizedChat, doc: &OrganizationDocument) -> bool {
    match doc.filter_folder.as_str() {
        FILTER_ALL => true,
        FAVORITES_FOLDER_ID => chat.is_favorite,
        folder => chat.folder_id == folder,
    }
}
