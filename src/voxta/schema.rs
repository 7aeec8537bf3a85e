//! Voxta wire types.
//!
//! Voxta JSON is PascalCase.  Every struct carries a flattened `extra` map
//! so vendor fields this crate does not model (chat style, TTS config,
//! memory toggles, script bindings, …) survive a round trip untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct VoxtaCharacter {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub profile: String,
    pub personality: String,
    pub scenario: String,
    pub first_message: String,
    pub message_examples: String,
    pub creator: String,
    pub creator_notes: String,
    /// Ids of memory books this character references.
    pub memory_books: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_created: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_modified: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct VoxtaBook {
    pub id: String,
    pub name: String,
    pub description: String,
    pub items: Vec<VoxtaBookItem>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct VoxtaBookItem {
    pub id: String,
    pub keywords: Vec<String>,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<i32>,
    pub deleted: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Top-level `.voxpkg` descriptor; decides single- vs multi-character import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct VoxtaPackage {
    pub id: String,
    pub name: String,
    pub description: String,
    pub creator: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// External character ids, in package order.
    pub characters: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct VoxtaScenario {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Role → character links, in role order.
    pub roles: Vec<VoxtaScenarioRole>,
    pub order: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct VoxtaScenarioRole {
    pub name: String,
    pub character_id: String,
}
