//! Voxta ↔ CCv3 field mapping.
//!
//! The field table is fixed and exhaustive (see each function).  Policy:
//! preserve everything representable in the target, log everything that is
//! not.  Voxta-only fields ride under `extensions.voxta` on the CCv3 side
//! so a Voxta → CHARX → Voxta chain loses nothing.
//!
//! `system_prompt` and `post_history_instructions` have no Voxta source and
//! are always empty after `voxta_to_ccv3` — a one-way information boundary,
//! not a bug.

use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::model::{BookEntry, CharacterBook, CharacterData};
use crate::voxta::schema::{VoxtaBook, VoxtaBookItem, VoxtaCharacter};
use crate::voxta::VOXTA_EXTENSION_KEY;

/// Entry weight used when a Voxta item has none.
const DEFAULT_INSERTION_ORDER: i32 = 100;
/// CCv3 entry priority — Voxta has no equivalent knob.
const DEFAULT_PRIORITY: i32 = 10;
/// Character version used when Voxta omits one.
const DEFAULT_VERSION: &str = "1.0.0";

// ── Voxta → CCv3 ─────────────────────────────────────────────────────────────

/// Maps one Voxta character (plus the books it references) onto CCv3.
///
/// Memory-book references are resolved against `referenced_books` and
/// flattened into a single `character_book`; a referenced id with no
/// matching book is skipped with a warning, never fatal.
pub fn voxta_to_ccv3(character: &VoxtaCharacter, referenced_books: &[VoxtaBook]) -> CharacterData {
    let mut resolved: Vec<&VoxtaBook> = Vec::new();
    for book_id in &character.memory_books {
        match referenced_books.iter().find(|b| &b.id == book_id) {
            Some(book) => resolved.push(book),
            None => warn!(book_id, character = %character.name, "referenced memory book not found, skipping"),
        }
    }

    let character_book = (!resolved.is_empty()).then(|| flatten_books(&resolved));

    let mut extensions = Map::new();
    extensions.insert(VOXTA_EXTENSION_KEY.into(), Value::Object(pack_voxta_extension(character)));

    CharacterData {
        name: character.name.clone(),
        description: character.profile.clone(),
        personality: character.personality.clone(),
        scenario: character.scenario.clone(),
        first_mes: character.first_message.clone(),
        mes_example: character.message_examples.clone(),
        creator: character.creator.clone(),
        creator_notes: character.creator_notes.clone(),
        character_version: character
            .version
            .clone()
            .unwrap_or_else(|| DEFAULT_VERSION.to_owned()),
        // One-way boundary: no Voxta source for either field.
        system_prompt: String::new(),
        post_history_instructions: String::new(),
        alternate_greetings: Vec::new(),
        tags: Vec::new(),
        character_book,
        assets: Vec::new(),
        nickname: None,
        extensions,
    }
}

fn flatten_books(books: &[&VoxtaBook]) -> CharacterBook {
    let entries = books
        .iter()
        .flat_map(|book| book.items.iter())
        .map(|item| BookEntry {
            keys: item.keywords.clone(),
            secondary_keys: Vec::new(),
            content: item.text.clone(),
            enabled: !item.deleted,
            insertion_order: item.weight.unwrap_or(DEFAULT_INSERTION_ORDER),
            priority: Some(DEFAULT_PRIORITY),
            // Original item id, kept for traceability and re-export.
            name: Some(item.id.clone()),
            extensions: Map::new(),
        })
        .collect();

    CharacterBook {
        name: Some(books[0].name.clone()),
        description: (!books[0].description.is_empty()).then(|| books[0].description.clone()),
        entries,
        ..Default::default()
    }
}

/// All Voxta-only material, packed so nothing is discarded.
fn pack_voxta_extension(character: &VoxtaCharacter) -> Map<String, Value> {
    let mut packed = character.extra.clone();
    packed.insert("Id".into(), Value::String(character.id.clone()));
    if !character.memory_books.is_empty() {
        packed.insert(
            "MemoryBooks".into(),
            Value::Array(character.memory_books.iter().cloned().map(Value::String).collect()),
        );
    }
    if let Some(created) = character.date_created {
        packed.insert("DateCreated".into(), Value::String(created.to_rfc3339()));
    }
    if let Some(modified) = character.date_modified {
        packed.insert("DateModified".into(), Value::String(modified.to_rfc3339()));
    }
    packed
}

// ── CCv3 → Voxta ─────────────────────────────────────────────────────────────

/// Inverse mapping.  Fields with no Voxta target (`system_prompt`,
/// `post_history_instructions`, the `assets` array) are dropped
/// deliberately and logged as mapping loss.
pub fn ccv3_to_voxta(data: &CharacterData) -> (VoxtaCharacter, Option<VoxtaBook>) {
    log_mapping_loss(data);

    let voxta_ext = data
        .extensions
        .get(VOXTA_EXTENSION_KEY)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let id = voxta_ext
        .get("Id")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let original_book_id = voxta_ext
        .get("MemoryBooks")
        .and_then(Value::as_array)
        .and_then(|a| a.first())
        .and_then(Value::as_str)
        .map(str::to_owned);
    let date_created = voxta_ext
        .get("DateCreated")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok());
    let date_modified = voxta_ext
        .get("DateModified")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok());

    // Restore vendor fields; the explicitly modelled keys go back to their
    // dedicated slots, not the extra map.
    let mut extra = voxta_ext;
    for key in ["Id", "MemoryBooks", "DateCreated", "DateModified"] {
        extra.remove(key);
    }

    let book = data.character_book.as_ref().filter(|b| !b.is_empty()).map(|b| {
        let mut vb = ccv3_lorebook_to_voxta_book(b);
        if let Some(book_id) = original_book_id {
            vb.id = book_id;
        }
        vb
    });

    let character = VoxtaCharacter {
        id,
        name: data.name.clone(),
        version: Some(if data.character_version.is_empty() {
            DEFAULT_VERSION.to_owned()
        } else {
            data.character_version.clone()
        }),
        profile: data.description.clone(),
        personality: data.personality.clone(),
        scenario: data.scenario.clone(),
        first_message: data.first_mes.clone(),
        message_examples: data.mes_example.clone(),
        creator: data.creator.clone(),
        creator_notes: data.creator_notes.clone(),
        memory_books: book.iter().map(|b| b.id.clone()).collect(),
        date_created,
        date_modified,
        extra,
    };
    (character, book)
}

/// Standalone lorebook conversion, also used for CCv3 `character_book`
/// export.  Entry names created by [`voxta_to_ccv3`] carry the original
/// Voxta item ids, so a chained conversion restores them.
pub fn ccv3_lorebook_to_voxta_book(book: &CharacterBook) -> VoxtaBook {
    let items = book
        .entries
        .iter()
        .map(|entry| VoxtaBookItem {
            id: entry.name.clone().unwrap_or_else(|| Uuid::new_v4().to_string()),
            keywords: entry.keys.clone(),
            text: entry.content.clone(),
            weight: Some(entry.insertion_order),
            deleted: !entry.enabled,
            extra: Map::new(),
        })
        .collect();

    VoxtaBook {
        id: Uuid::new_v4().to_string(),
        name: book.name.clone().unwrap_or_else(|| "Memory".to_owned()),
        description: book.description.clone().unwrap_or_default(),
        items,
        extra: Map::new(),
    }
}

fn log_mapping_loss(data: &CharacterData) {
    if !data.system_prompt.is_empty() {
        debug!(card = %data.name, "mapping loss: system_prompt has no Voxta target");
    }
    if !data.post_history_instructions.is_empty() {
        debug!(card = %data.name, "mapping loss: post_history_instructions has no Voxta target");
    }
    if !data.assets.is_empty() {
        debug!(card = %data.name, count = data.assets.len(), "mapping loss: CCv3 asset refs are not representable in a Voxta character");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn voxta_fixture() -> (VoxtaCharacter, Vec<VoxtaBook>) {
        let character = VoxtaCharacter {
            id: "char-9".into(),
            name: "Mira".into(),
            profile: "An android archivist.".into(),
            personality: "precise".into(),
            scenario: "the archive".into(),
            first_message: "Welcome back, {{user}}.".into(),
            message_examples: "<START>...".into(),
            creator: "nia".into(),
            creator_notes: "be gentle".into(),
            memory_books: vec!["b-1".into(), "b-missing".into()],
            extra: Map::from_iter([("ChatStyle".to_string(), json!("slow"))]),
            ..Default::default()
        };
        let book = VoxtaBook {
            id: "b-1".into(),
            name: "Archive lore".into(),
            items: vec![
                VoxtaBookItem {
                    id: "i-1".into(),
                    keywords: vec!["argo".into(), "ship".into()],
                    text: "The Argo sank twice.".into(),
                    weight: Some(7),
                    deleted: false,
                    ..Default::default()
                },
                VoxtaBookItem {
                    id: "i-2".into(),
                    keywords: vec!["vault".into()],
                    text: "The vault is sealed.".into(),
                    weight: None,
                    deleted: true,
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        (character, vec![book])
    }

    #[test]
    fn field_table_is_applied() {
        let (ch, books) = voxta_fixture();
        let data = voxta_to_ccv3(&ch, &books);
        assert_eq!(data.name, "Mira");
        assert_eq!(data.description, "An android archivist.");
        assert_eq!(data.first_mes, "Welcome back, {{user}}.");
        assert_eq!(data.character_version, "1.0.0"); // default when absent
        assert_eq!(data.system_prompt, "");
        assert_eq!(data.post_history_instructions, "");
    }

    #[test]
    fn books_flatten_and_missing_ids_are_skipped() {
        let (ch, books) = voxta_fixture();
        let data = voxta_to_ccv3(&ch, &books);
        let book = data.character_book.as_ref().unwrap();
        assert_eq!(book.entries.len(), 2);
        assert_eq!(book.entries[0].keys, ["argo", "ship"]);
        assert_eq!(book.entries[0].insertion_order, 7);
        assert_eq!(book.entries[0].priority, Some(10));
        assert_eq!(book.entries[0].name.as_deref(), Some("i-1"));
        assert!(book.entries[0].enabled);
        assert_eq!(book.entries[1].insertion_order, 100); // missing weight default
        assert!(!book.entries[1].enabled); // Deleted → disabled
    }

    #[test]
    fn voxta_only_fields_pack_into_extensions() {
        let (ch, books) = voxta_fixture();
        let data = voxta_to_ccv3(&ch, &books);
        let ext = data.extensions["voxta"].as_object().unwrap();
        assert_eq!(ext["Id"], "char-9");
        assert_eq!(ext["ChatStyle"], "slow");
        assert_eq!(ext["MemoryBooks"], json!(["b-1", "b-missing"]));
    }

    #[test]
    fn round_trip_preserves_entries_and_identity() {
        let (ch, books) = voxta_fixture();
        let data = voxta_to_ccv3(&ch, &books);
        let (back, book) = ccv3_to_voxta(&data);
        let book = book.unwrap();

        let resolved: usize = books.iter().map(|b| b.items.len()).sum();
        assert_eq!(book.items.len(), resolved);
        for (item, original) in book.items.iter().zip(&books[0].items) {
            assert_eq!(item.keywords, original.keywords);
            assert_eq!(item.text, original.text);
            assert_eq!(item.id, original.id);
            assert_eq!(item.deleted, original.deleted);
        }

        assert_eq!(back.id, ch.id);
        assert_eq!(back.name, ch.name);
        assert_eq!(back.profile, ch.profile);
        assert_eq!(back.extra["ChatStyle"], "slow");
        // book id restored from the packed MemoryBooks reference
        assert_eq!(book.id, "b-1");
        assert_eq!(back.memory_books, ["b-1"]);
    }

    #[test]
    fn character_without_books_maps_to_no_book() {
        let ch = VoxtaCharacter { name: "Solo".into(), ..Default::default() };
        let data = voxta_to_ccv3(&ch, &[]);
        assert!(data.character_book.is_none());
        let (_, book) = ccv3_to_voxta(&data);
        assert!(book.is_none());
    }
}
