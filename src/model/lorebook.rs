//! Character book (lorebook) — an ordered set of keyed context-injection
//! entries attached to a card, or imported standalone.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Book-level container. `scan_depth` and `token_budget` apply to the whole
/// book; per-entry knobs live on [`BookEntry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CharacterBook {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_budget: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recursive_scanning: Option<bool>,
    pub entries: Vec<BookEntry>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BookEntry {
    /// Trigger keys. Order is significant and preserved across transforms.
    pub keys: Vec<String>,
    pub secondary_keys: Vec<String>,
    pub content: String,
    pub enabled: bool,
    pub insertion_order: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    /// Entry name. Mappers use it for traceability (original item id).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl CharacterBook {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries still active for scanning (enabled flag set).
    pub fn enabled_entries(&self) -> impl Iterator<Item = &BookEntry> {
        self.entries.iter().filter(|e| e.enabled)
    }
}

/// Detection helper: a standalone lorebook JSON has an `entries` array but
/// none of the character identity fields.
pub fn looks_like_standalone_book(value: &Value) -> bool {
    let Some(obj) = value.as_object() else { return false };
    if !obj.get("entries").map(Value::is_array).unwrap_or(false) {
        return false;
    }
    !["description", "personality", "first_mes", "spec"]
        .iter()
        .any(|k| obj.contains_key(*k))
}
