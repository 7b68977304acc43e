use serde::{Deserialize, Deserializer, Serialize};

/// Epoch milliseconds that may arrive as an integer or a fractional file
/// timestamp. Fractions are truncated.
fn epoch_millis<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let number = Option::<serde_json::Number>::deserialize(deserializer)?;
    Ok(number.and_then(|n| n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))))
}

/// A character card as listed by the backend. The avatar file name is the
/// stable identifier used everywhere else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct Character {
    pub avatar: String,
    #[serde(default)]
    pub name: String,
    /// Epoch milliseconds of the most recent message in any of its chats.
    #[serde(default, deserialize_with = "epoch_millis")]
    pub date_last_chat: Option<i64>,
    #[serde(default, deserialize_with = "epoch_millis")]
    pub date_added: Option<i64>,
}

impl Character {
    pub fn id(&self) -> &str {
        &self.avatar
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.avatar
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct Persona {
    /// Avatar file name; unique per persona.
    pub key: String,
    pub name: String,
}

/// A character row ready for the character grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct CharacterEntry {
    pub character: Character,
    pub is_favorite: bool,
    /// Number of valid chats, when known.
    pub chat_count: Option<usize>,
}
