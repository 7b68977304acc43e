use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::models::chat_key;

pub const FAVORITES_FOLDER_ID: &str = "favorites";
pub const UNCATEGORIZED_FOLDER_ID: &str = "uncategorized";
/// Filter value that shows every chat.
pub const FILTER_ALL: &str = "all";

const FAVORITES_ORDER: i64 = 0;
const UNCATEGORIZED_ORDER: i64 = 999;

/// Cleanup bounds applied when durable storage runs out of room.
pub const MAX_CHAT_ASSIGNMENTS: usize = 2000;
pub const MAX_FAVORITES: usize = 500;
pub const MAX_CHARACTER_FAVORITES: usize = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub order: i64,
}

impl Folder {
    fn system(id: &str, name: &str, order: i64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            is_system: true,
            order,
        }
    }

    fn favorites() -> Self {
        Self::system(FAVORITES_FOLDER_ID, "Favorites", FAVORITES_ORDER)
    }

    fn uncategorized() -> Self {
        Self::system(UNCATEGORIZED_FOLDER_ID, "Uncategorized", UNCATEGORIZED_ORDER)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "lowercase")]
pub enum SortOption {
    #[default]
    Recent,
    Name,
    Messages,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "lowercase")]
pub enum CharSortOption {
    #[default]
    Recent,
    Name,
    Chats,
}

/// Everything the user organizes locally. Persisted as one JSON document;
/// fields missing from documents written by older versions take their
/// defaults on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(default, rename_all = "camelCase")]
pub struct OrganizationDocument {
    pub folders: Vec<Folder>,
    /// Chat key → folder id, oldest assignment first.
    pub chat_assignments: IndexMap<String, String>,
    /// Favorite chat keys, oldest first.
    pub favorites: IndexSet<String>,
    pub character_favorites: IndexSet<String>,
    pub sort_option: SortOption,
    pub char_sort_option: CharSortOption,
    pub filter_folder: String,
}

impl Default for OrganizationDocument {
    fn default() -> Self {
        Self {
            folders: vec![Folder::favorites(), Folder::uncategorized()],
            chat_assignments: IndexMap::new(),
            favorites: IndexSet::new(),
            character_favorites: IndexSet::new(),
            sort_option: SortOption::default(),
            char_sort_option: CharSortOption::default(),
            filter_folder: FILTER_ALL.to_string(),
        }
    }
}

/// Counts of entries dropped by [`OrganizationDocument::cleanup`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub chat_assignments: usize,
    pub favorites: usize,
    pub character_favorites: usize,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.chat_assignments + self.favorites + self.character_favorites
    }
}

fn trim_map_front(map: &mut IndexMap<String, String>, max: usize) -> usize {
    let excess = map.len().saturating_sub(max);
    if excess > 0 {
        map.drain(..excess);
    }
    excess
}

fn trim_set_front(set: &mut IndexSet<String>, max: usize) -> usize {
    let excess = set.len().saturating_sub(max);
    if excess > 0 {
        set.drain(..excess);
    }
    excess
}

impl OrganizationDocument {
    pub fn folder(&self, id: &str) -> Option<&Folder> {
        self.folders.iter().find(|f| f.id == id)
    }

    pub fn has_folder(&self, id: &str) -> bool {
        self.folder(id).is_some()
    }

    /// Folders by display order; equal orders keep insertion order.
    /// `uncategorized` always comes last, whatever the user orders reach.
    pub fn sorted_folders(&self) -> Vec<&Folder> {
        let mut folders: Vec<&Folder> = self.folders.iter().collect();
        folders.sort_by_key(|f| (f.id == UNCATEGORIZED_FOLDER_ID, f.order));
        folders
    }

    pub fn folder_name(&self, id: &str) -> String {
        self.folder(id)
            .map(|f| f.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Highest order among user folders, or 0 when there are none.
    pub fn max_user_order(&self) -> i64 {
        self.folders
            .iter()
            .filter(|f| !f.is_system)
            .map(|f| f.order)
            .max()
            .unwrap_or(FAVORITES_ORDER)
    }

    /// Folder holding `key`; unassigned chats live in `uncategorized`.
    pub fn folder_for_key(&self, key: &str) -> &str {
        self.chat_assignments
            .get(key)
            .map(String::as_str)
            .unwrap_or(UNCATEGORIZED_FOLDER_ID)
    }

    pub fn folder_of(&self, character_id: &str, file_name: &str) -> &str {
        self.folder_for_key(&chat_key(character_id, file_name))
    }

    pub fn is_favorite(&self, character_id: &str, file_name: &str) -> bool {
        self.favorites.contains(&chat_key(character_id, file_name))
    }

    pub fn is_character_favorite(&self, character_id: &str) -> bool {
        self.character_favorites.contains(character_id)
    }

    /// Whether `filter_folder` names something that exists.
    pub fn is_filter_valid(&self) -> bool {
        self.filter_folder == FILTER_ALL
            || self.filter_folder == FAVORITES_FOLDER_ID
            || self.has_folder(&self.filter_folder)
    }

    /// Restore invariants a hand-edited or older document may break:
    /// both system folders present, filter pointing at a real folder.
    /// Returns true when anything changed.
    pub fn repair(&mut self) -> bool {
        let mut changed = false;
        for system in [Folder::favorites(), Folder::uncategorized()] {
            match self.folders.iter_mut().find(|f| f.id == system.id) {
                Some(existing) if !existing.is_system => {
                    existing.is_system = true;
                    changed = true;
                }
                Some(_) => {}
                None => {
                    self.folders.push(system);
                    changed = true;
                }
            }
        }
        if !self.is_filter_valid() {
            self.filter_folder = FILTER_ALL.to_string();
            changed = true;
        }
        changed
    }

    /// Record `key` as most recently assigned to `folder_id`. Assigning to
    /// `uncategorized` removes the entry since absence means the same thing.
    pub fn assign_key(&mut self, key: String, folder_id: &str) {
        self.chat_assignments.shift_remove(&key);
        if folder_id != UNCATEGORIZED_FOLDER_ID {
            self.chat_assignments.insert(key, folder_id.to_string());
        }
    }

    /// Chats per folder for the given keys, including the favorites pseudo
    /// folder. Every folder appears, with zero when empty.
    pub fn folder_counts<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> HashMap<String, usize> {
        let mut counts: HashMap<String, usize> =
            self.folders.iter().map(|f| (f.id.clone(), 0)).collect();
        for key in keys {
            if self.favorites.contains(key) {
                *counts.entry(FAVORITES_FOLDER_ID.to_string()).or_default() += 1;
            }
            *counts.entry(self.folder_for_key(key).to_string()).or_default() += 1;
        }
        counts
    }

    /// Drop every entry that belongs to `character_id`.
    ///
    /// Chat keys only carry the character id as a prefix, so the keys of a
    /// character whose id extends this one (`a.png_2.png` for `a.png`) look
    /// alike. Ids in `other_characters` win such ties: a key is kept when it
    /// also starts with one of theirs.
    pub fn forget_character<S: AsRef<str>>(
        &mut self,
        character_id: &str,
        other_characters: &[S],
    ) -> usize {
        let prefix = format!("{}_", character_id);
        let longer: Vec<String> = other_characters
            .iter()
            .map(AsRef::<str>::as_ref)
            .filter(|other| other.len() > character_id.len() && other.starts_with(&prefix))
            .map(|other| format!("{}_", other))
            .collect();
        let owned = |key: &str| {
            key.starts_with(&prefix) && !longer.iter().any(|p| key.starts_with(p.as_str()))
        };

        let before = self.chat_assignments.len() + self.favorites.len();
        self.chat_assignments.retain(|key, _| !owned(key));
        self.favorites.retain(|key| !owned(key));
        let removed = before - (self.chat_assignments.len() + self.favorites.len());
        let was_favorite = self.character_favorites.shift_remove(character_id);
        removed + usize::from(was_favorite)
    }

    /// Bound the three unbounded collections, dropping the oldest entries.
    pub fn cleanup(&mut self) -> CleanupReport {
        CleanupReport {
            chat_assignments: trim_map_front(&mut self.chat_assignments, MAX_CHAT_ASSIGNMENTS),
            favorites: trim_set_front(&mut self.favorites, MAX_FAVORITES),
            character_favorites: trim_set_front(
                &mut self.character_favorites,
                MAX_CHARACTER_FAVORITES,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_system_folders() {
        let doc = OrganizationDocument::default();
        let favorites = doc.folder(FAVORITES_FOLDER_ID).expect("favorites");
        let uncategorized = doc.folder(UNCATEGORIZED_FOLDER_ID).expect("uncategorized");
        assert!(favorites.is_system && favorites.order == 0);
        assert!(uncategorized.is_system && uncategorized.order == 999);
        assert_eq!(doc.filter_folder, FILTER_ALL);
    }

    #[test]
    fn test_older_document_merges_onto_defaults() {
        // Written before sort options and character favorites existed
        let json = r#"{"folders":[{"id":"favorites","name":"Favorites","isSystem":true,"order":0},{"id":"uncategorized","name":"Uncategorized","isSystem":true,"order":999}],"favorites":["X_a.jsonl"]}"#;
        let doc: OrganizationDocument = serde_json::from_str(json).expect("parses");
        assert_eq!(doc.sort_option, SortOption::Recent);
        assert_eq!(doc.char_sort_option, CharSortOption::Recent);
        assert!(doc.character_favorites.is_empty());
        assert!(doc.is_favorite("X", "a.jsonl"));
    }

    #[test]
    fn test_serialized_field_names() {
        let value = serde_json::to_value(OrganizationDocument::default()).expect("serializes");
        assert!(value.get("chatAssignments").is_some());
        assert!(value.get("characterFavorites").is_some());
        assert_eq!(value["sortOption"], "recent");
        assert_eq!(value["filterFolder"], "all");
        assert_eq!(value["folders"][0]["isSystem"], true);
    }

    #[test]
    fn test_repair_restores_missing_system_folder_and_filter() {
        let mut doc = OrganizationDocument {
            folders: vec![],
            filter_folder: "folder_gone".to_string(),
            ..Default::default()
        };
        assert!(doc.repair());
        assert!(doc.has_folder(FAVORITES_FOLDER_ID));
        assert!(doc.has_folder(UNCATEGORIZED_FOLDER_ID));
        assert_eq!(doc.filter_folder, FILTER_ALL);
        // Second pass has nothing to do
        assert!(!doc.repair());
    }

    #[test]
    fn test_assign_key_moves_to_newest() {
        let mut doc = OrganizationDocument::default();
        doc.assign_key("X_a".into(), "f1");
        doc.assign_key("X_b".into(), "f1");
        doc.assign_key("X_a".into(), "f2");
        let keys: Vec<&String> = doc.chat_assignments.keys().collect();
        assert_eq!(keys, ["X_b", "X_a"]);

        doc.assign_key("X_b".into(), UNCATEGORIZED_FOLDER_ID);
        assert!(!doc.chat_assignments.contains_key("X_b"));
        assert_eq!(doc.folder_for_key("X_b"), UNCATEGORIZED_FOLDER_ID);
    }

    #[test]
    fn test_cleanup_keeps_newest_entries() {
        let mut doc = OrganizationDocument::default();
        for i in 0..2500 {
            doc.assign_key(format!("X_{i}.jsonl"), "f1");
        }
        for i in 0..600 {
            doc.favorites.insert(format!("X_{i}.jsonl"));
        }
        for i in 0..301 {
            doc.character_favorites.insert(format!("char{i}.png"));
        }

        let report = doc.cleanup();
        assert_eq!(report.chat_assignments, 500);
        assert_eq!(report.favorites, 100);
        assert_eq!(report.character_favorites, 1);
        assert_eq!(report.total(), 601);

        assert_eq!(doc.chat_assignments.len(), MAX_CHAT_ASSIGNMENTS);
        assert!(!doc.chat_assignments.contains_key("X_499.jsonl"));
        assert!(doc.chat_assignments.contains_key("X_500.jsonl"));
        assert!(doc.chat_assignments.contains_key("X_2499.jsonl"));
        assert!(!doc.favorites.contains("X_99.jsonl"));
        assert!(!doc.character_favorites.contains("char0.png"));
    }

    #[test]
    fn test_folder_counts() {
        let mut doc = OrganizationDocument::default();
        doc.folders.push(Folder {
            id: "f1".into(),
            name: "Adventures".into(),
            is_system: false,
            order: 1,
        });
        doc.assign_key("X_a".into(), "f1");
        doc.favorites.insert("X_b".into());

        let counts = doc.folder_counts(["X_a", "X_b", "X_c"]);
        assert_eq!(counts["f1"], 1);
        assert_eq!(counts[FAVORITES_FOLDER_ID], 1);
        assert_eq!(counts[UNCATEGORIZED_FOLDER_ID], 2);
    }

    #[test]
    fn test_forget_character() {
        let mut doc = OrganizationDocument::default();
        doc.assign_key("X.png_a".into(), "f1");
        doc.assign_key("Y.png_a".into(), "f1");
        doc.favorites.insert("X.png_b".into());
        doc.character_favorites.insert("X.png".into());

        assert_eq!(doc.forget_character::<&str>("X.png", &[]), 3);
        assert!(doc.chat_assignments.contains_key("Y.png_a"));
        assert!(doc.favorites.is_empty());
        assert!(!doc.is_character_favorite("X.png"));
    }

    #[test]
    fn test_forget_character_spares_longer_ids() {
        let mut doc = OrganizationDocument::default();
        doc.assign_key(chat_key("a.png", "one.jsonl"), "f1");
        doc.assign_key(chat_key("a.png_2.png", "two.jsonl"), "f1");
        doc.favorites.insert(chat_key("a.png_2.png", "three.jsonl"));
        doc.favorites.insert(chat_key("a.png", "four.jsonl"));

        let removed = doc.forget_character("a.png", &["a.png", "a.png_2.png", "b.png"]);
        assert_eq!(removed, 2);
        assert_eq!(doc.folder_of("a.png_2.png", "two.jsonl"), "f1");
        assert!(doc.is_favorite("a.png_2.png", "three.jsonl"));
        assert!(!doc.is_favorite("a.png", "four.jsonl"));
        assert_eq!(doc.folder_of("a.png", "one.jsonl"), UNCATEGORIZED_FOLDER_ID);
    }

    #[test]
    fn test_uncategorized_sorts_last_past_its_order() {
        let mut doc = OrganizationDocument::default();
        for (id, order) in [("late", 1500), ("tied", 999), ("early", 1)] {
            doc.folders.push(Folder {
                id: id.into(),
                name: id.into(),
                is_system: false,
                order,
            });
        }

        let ids: Vec<&str> = doc.sorted_folders().iter().map(|f| f.id.as_str()).collect();
        assert_eq!(
            ids,
            [FAVORITES_FOLDER_ID, "early", "tied", "late", UNCATEGORIZED_FOLDER_ID]
        );
    }
}
