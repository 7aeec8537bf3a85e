//! Format detection — magic bytes first, extension hint second, content
//! sniffing last.
//!
//! `detect` never panics on malformed input; anything it cannot classify
//! comes back as a typed [`DetectError`].

use std::io::Cursor;

use serde_json::Value;

use crate::error::DetectError;
use crate::model::lorebook::looks_like_standalone_book;
use crate::model::{SPEC_V2, SPEC_V3};

/// 8-byte PNG file signature.
pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
/// ZIP local-file-header signature (`PK\x03\x04`).
pub const ZIP_SIGNATURE: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

/// Everything the engine can recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatKind {
    Png,
    ZipCharx,
    ZipVoxta,
    JsonCcv2,
    JsonCcv3,
    JsonLorebook,
}

impl FormatKind {
    pub fn name(self) -> &'static str {
        match self {
            FormatKind::Png => "png",
            FormatKind::ZipCharx => "charx",
            FormatKind::ZipVoxta => "voxta",
            FormatKind::JsonCcv2 => "ccv2",
            FormatKind::JsonCcv3 => "ccv3",
            FormatKind::JsonLorebook => "lorebook",
        }
    }
}

/// Classify an input byte sequence.
///
/// Priority order: PNG signature, ZIP signature (extension hint, then entry
/// scan), UTF-8 JSON sniffing.  See the format table in the module docs.
pub fn detect(bytes: &[u8], file_name_hint: Option<&str>) -> Result<FormatKind, DetectError> {
    let fail = || DetectError { hint: file_name_hint.map(str::to_owned) };

    if bytes.len() >= PNG_SIGNATURE.len() && bytes[..8] == PNG_SIGNATURE {
        return Ok(FormatKind::Png);
    }

    if bytes.len() >= ZIP_SIGNATURE.len() && bytes[..4] == ZIP_SIGNATURE {
        if let Some(kind) = classify_zip_by_extension(file_name_hint) {
            return Ok(kind);
        }
        return classify_zip_by_entries(bytes).ok_or_else(fail);
    }

    let Ok(text) = std::str::from_utf8(bytes) else { return Err(fail()) };
    let Ok(value) = serde_json::from_str::<Value>(text) else { return Err(fail()) };
    classify_json(&value).ok_or_else(fail)
}

fn classify_zip_by_extension(hint: Option<&str>) -> Option<FormatKind> {
    let lower = hint?.to_ascii_lowercase();
    if lower.ends_with(".charx") {
        Some(FormatKind::ZipCharx)
    } else if lower.ends_with(".voxpkg") {
        Some(FormatKind::ZipVoxta)
    } else {
        None
    }
}

/// Fallback when the hint is absent or ambiguous: scan entry names for
/// format-specific manifests (`card.json` for CHARX; a package/character
/// descriptor for Voxta).
fn classify_zip_by_entries(bytes: &[u8]) -> Option<FormatKind> {
    let archive = zip::ZipArchive::new(Cursor::new(bytes)).ok()?;
    let mut saw_card_json = false;
    for name in archive.file_names() {
        if name == "package.json" || name.ends_with("/character.json") {
            return Some(FormatKind::ZipVoxta);
        }
        if name == "card.json" {
            saw_card_json = true;
        }
    }
    saw_card_json.then_some(FormatKind::ZipCharx)
}

fn classify_json(value: &Value) -> Option<FormatKind> {
    let obj = value.as_object()?;
    match obj.get("spec").and_then(Value::as_str) {
        Some(SPEC_V3) => return Some(FormatKind::JsonCcv3),
        Some(SPEC_V2) => return Some(FormatKind::JsonCcv2),
        Some(_) => return None,
        None => {}
    }
    if looks_like_standalone_book(value) {
        return Some(FormatKind::JsonLorebook);
    }
    // Legacy flat card: no spec marker, but the character field set is there.
    let has = |k: &str| obj.contains_key(k);
    if has("name") && (has("description") || has("personality") || has("first_mes")) {
        return Some(FormatKind::JsonCcv2);
    }
    None
}
