use crate::models::{ChatRecord, RawChat, RawChatList};

fn from_raw(raw: RawChat, map_key: Option<String>) -> ChatRecord {
    ChatRecord {
        file_name: raw.file_name.or(map_key).unwrap_or_default(),
        preview: raw.mes.unwrap_or_default(),
        message_count: raw.chat_items.unwrap_or(0),
        last_mes: raw.last_mes,
        file_date: raw.file_date,
        date: raw.date,
    }
}

/// Flatten either listing shape into records. In the keyed shape the key
/// stands in for a missing file name.
pub fn normalize(raw: RawChatList) -> Vec<ChatRecord> {
    match raw {
        RawChatList::List(items) => items.into_iter().map(|c| from_raw(c, None)).collect(),
        RawChatList::Map(items) => items
            .into_iter()
            .map(|(key, c)| from_raw(c, Some(key)))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_array() {
        let raw: RawChatList = serde_json::from_str(
            r#"[{"file_name":"a.jsonl","mes":"hi","chat_items":3},{"mes":"orphan"}]"#,
        )
        .expect("parses");
        let records = normalize(raw);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].file_name, "a.jsonl");
        assert_eq!(records[0].preview, "hi");
        assert_eq!(records[0].message_count, 3);
        // No name and no key to fall back on
        assert_eq!(records[1].file_name, "");
        assert_eq!(records[1].message_count, 0);
    }

    #[test]
    fn test_normalize_map_injects_key() {
        let raw: RawChatList = serde_json::from_str(
            r#"{"b.jsonl":{"mes":"x"},"ignored":{"file_name":"c.jsonl"}}"#,
        )
        .expect("parses");
        let records = normalize(raw);
        let names: Vec<&str> = records.iter().map(|r| r.file_name.as_str()).collect();
        // An explicit file name wins over the key
        assert_eq!(names, vec!["b.jsonl", "c.jsonl"]);
    }
}
