//! Canonical card model — what every parser produces and every serializer
//! consumes.
//!
//! # Shape resolution
//! CCv2 JSON arrives either wrapped (`{"spec": …, "data": {…}}`) or as the
//! legacy flat object.  The ambiguity is resolved exactly once, here, at
//! parse time; everything downstream sees only [`CharacterData`], never
//! ad-hoc layout branching at call sites.
//!
//! # Invariants
//! - `name` is non-empty after any successful parse.
//! - Unknown vendor keys inside `extensions` survive byte-for-byte across
//!   every transform that does not explicitly target them
//!   (`serde_json/preserve_order` keeps key order stable too).

pub mod asset;
pub mod collection;
pub mod lorebook;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{EngineError, Result};
pub use asset::{
    looks_animated, mime_for_extension, Asset, AssetKind, AssetLocator, CardAssetLink,
    ExtractedAssetDescriptor, LinkRequest,
};
pub use collection::{CollectionData, CollectionMember, CollectionScenario};
pub use lorebook::{BookEntry, CharacterBook};

/// `spec` marker for CCv2 card JSON.
pub const SPEC_V2: &str = "chara_card_v2";
/// `spec` marker for CCv3 card JSON.
pub const SPEC_V3: &str = "chara_card_v3";

/// Which schema generation a card belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecKind {
    Ccv2,
    Ccv3,
    Collection,
}

/// Spec-specific payload, resolved once at parse time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CardPayload {
    V2(CharacterData),
    V3(CharacterData),
    Collection(CollectionData),
}

/// Root entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    /// Opaque stable identifier.
    pub id: String,
    pub payload: CardPayload,
}

/// Character fields shared by CCv2 and CCv3.  CCv3-only fields (`assets`,
/// `nickname`) stay empty on v2 cards and are dropped on v2 serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CharacterData {
    pub name: String,
    pub description: String,
    pub personality: String,
    pub scenario: String,
    pub first_mes: String,
    pub mes_example: String,
    pub creator: String,
    pub creator_notes: String,
    pub character_version: String,
    pub system_prompt: String,
    pub post_history_instructions: String,
    pub alternate_greetings: Vec<String>,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character_book: Option<CharacterBook>,
    /// CCv3 asset references (URI form, resolved by the archive codecs).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub assets: Vec<AssetRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    /// Free-form vendor extension map, preserved verbatim.
    pub extensions: Map<String, Value>,
}

/// CCv3 `data.assets[]` entry: a URI-addressed asset reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AssetRef {
    #[serde(rename = "type")]
    pub kind: String,
    pub uri: String,
    pub name: String,
    pub ext: String,
}

impl Card {
    pub fn new(payload: CardPayload) -> Result<Self> {
        let card = Self { id: Uuid::new_v4().to_string(), payload };
        card.check_name()?;
        Ok(card)
    }

    pub fn spec_kind(&self) -> SpecKind {
        match &self.payload {
            CardPayload::V2(_) => SpecKind::Ccv2,
            CardPayload::V3(_) => SpecKind::Ccv3,
            CardPayload::Collection(_) => SpecKind::Collection,
        }
    }

    pub fn name(&self) -> &str {
        match &self.payload {
            CardPayload::V2(d) | CardPayload::V3(d) => &d.name,
            CardPayload::Collection(c) => &c.name,
        }
    }

    /// Character payload, if this is not a collection card.
    pub fn character(&self) -> Option<&CharacterData> {
        match &self.payload {
            CardPayload::V2(d) | CardPayload::V3(d) => Some(d),
            CardPayload::Collection(_) => None,
        }
    }

    pub fn character_mut(&mut self) -> Option<&mut CharacterData> {
        match &mut self.payload {
            CardPayload::V2(d) | CardPayload::V3(d) => Some(d),
            CardPayload::Collection(_) => None,
        }
    }

    pub fn collection(&self) -> Option<&CollectionData> {
        match &self.payload {
            CardPayload::Collection(c) => Some(c),
            _ => None,
        }
    }

    fn check_name(&self) -> Result<()> {
        if self.name().trim().is_empty() {
            return Err(EngineError::InvariantViolation("card name is empty".into()));
        }
        if let CardPayload::Collection(c) = &self.payload {
            c.check()?;
        }
        Ok(())
    }
}

// ── JSON parsing ─────────────────────────────────────────────────────────────

/// Parses card JSON of either generation, resolving the wrapped/flat CCv2
/// ambiguity.  The `spec` field wins when present; a missing `spec` with the
/// legacy flat field set is treated as CCv2.
pub fn parse_card_value(value: &Value) -> Result<(SpecKind, CharacterData)> {
    let obj = value
        .as_object()
        .ok_or_else(|| EngineError::MalformedContainer("card JSON is not an object".into()))?;

    let spec = obj.get("spec").and_then(Value::as_str);
    let (kind, data_value) = match spec {
        Some(SPEC_V3) => (SpecKind::Ccv3, obj.get("data").unwrap_or(value)),
        Some(SPEC_V2) => (SpecKind::Ccv2, obj.get("data").unwrap_or(value)),
        Some(other) => {
            return Err(EngineError::MalformedContainer(format!(
                "unknown card spec marker {other:?}"
            )))
        }
        // Legacy flat TavernAI shape: no spec, character fields at top level.
        None => (SpecKind::Ccv2, value),
    };

    let data: CharacterData = serde_json::from_value(data_value.clone())?;
    if data.name.trim().is_empty() {
        return Err(EngineError::InvariantViolation("parsed card has an empty name".into()));
    }
    Ok((kind, data))
}

pub fn parse_card_bytes(bytes: &[u8]) -> Result<(SpecKind, CharacterData)> {
    let value: Value = serde_json::from_slice(bytes)?;
    parse_card_value(&value)
}

// ── JSON serialization ───────────────────────────────────────────────────────

/// Wrapped CCv3 card JSON (`{"spec": "chara_card_v3", …}`).
pub fn to_ccv3_value(data: &CharacterData) -> Result<Value> {
    Ok(serde_json::json!({
        "spec": SPEC_V3,
        "spec_version": "3.0",
        "data": serde_json::to_value(data)?,
    }))
}

/// Wrapped CCv2 card JSON. CCv3-only fields are dropped at this boundary.
pub fn to_ccv2_value(data: &CharacterData) -> Result<Value> {
    let mut inner = serde_json::to_value(data)?;
    if let Some(obj) = inner.as_object_mut() {
        obj.remove("assets");
        obj.remove("nickname");
    }
    Ok(serde_json::json!({
        "spec": SPEC_V2,
        "spec_version": "2.0",
        "data": inner,
    }))
}

pub fn serialize_card(data: &CharacterData, kind: SpecKind) -> Result<Vec<u8>> {
    let value = match kind {
        SpecKind::Ccv2 => to_ccv2_value(data)?,
        SpecKind::Ccv3 => to_ccv3_value(data)?,
        SpecKind::Collection => {
            return Err(EngineError::InvariantViolation(
                "collection cards have no single-card JSON form".into(),
            ))
        }
    };
    Ok(serde_json::to_vec(&value)?)
}
