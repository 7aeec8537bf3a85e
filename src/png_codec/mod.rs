//! PNG text-chunk container codec.
//!
//! Card JSON rides inside PNG text metadata.  Producer tools disagree on
//! two axes and this codec tolerates both, non-destructively:
//!   - the chunk keyword (`ccv3`/`chara_card_v3` for v3; `chara`/`ccv2`/
//!     `character` for v2), and
//!   - whether the value is raw JSON or base64-encoded JSON.
//!
//! # Reading
//! Chunk CRCs are NOT verified on read — a card with a bit-rotted palette
//! is still a readable card.  Structural damage (bad signature, truncated
//! chunk) is `MalformedContainer`.  A structurally valid PNG with no card
//! chunk extracts to `Ok(None)`, so callers can tell "not a card" from
//! "corrupt card".
//!
//! # Writing
//! [`embed`] strips every card-keyed text chunk, then writes one tEXt chunk
//! (keyword + base64 of the minified card JSON — tEXt is Latin-1, base64
//! keeps arbitrary unicode card text legal) immediately before IEND.  All
//! other chunks, image data included, are carried through byte-for-byte.

use std::io::{Cursor, Read};

use base64::{engine::general_purpose, Engine as _};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde_json::Value;

use crate::detect::PNG_SIGNATURE;
use crate::error::{EngineError, Result};
use crate::model::{self, CharacterData, SpecKind};

/// Text keywords tried for a v3 card, in priority order.
pub const V3_TEXT_KEYS: [&str; 2] = ["ccv3", "chara_card_v3"];
/// Text keywords tried for a v2 card, in priority order.
pub const V2_TEXT_KEYS: [&str; 3] = ["chara", "ccv2", "character"];

/// A 1x1 transparent PNG used as the seed portrait when an import has no
/// image of its own.
pub const BLANK_PORTRAIT: [u8; 68] = [
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0B, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x60,
    0x00, 0x02, 0x00, 0x00, 0x05, 0x00, 0x01, 0x7A, 0x5E, 0xAB, 0x3F, 0x00, 0x00, 0x00, 0x00,
    0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

/// Successful extraction: the card plus any non-card text chunks found.
#[derive(Debug, Clone, PartialEq)]
pub struct PngCard {
    pub spec_kind: SpecKind,
    pub data: CharacterData,
    /// Text chunks that did not hold the card (keyword, value).
    pub extra_text: Vec<(String, String)>,
}

// ── Chunk model ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Chunk {
    kind: [u8; 4],
    data: Vec<u8>,
}

fn parse_chunks(bytes: &[u8]) -> Result<Vec<Chunk>> {
    if bytes.len() < PNG_SIGNATURE.len() || bytes[..8] != PNG_SIGNATURE {
        return Err(EngineError::MalformedContainer("missing PNG signature".into()));
    }
    let mut cursor = Cursor::new(&bytes[8..]);
    let mut chunks = Vec::new();
    loop {
        let len = cursor
            .read_u32::<BigEndian>()
            .map_err(|_| EngineError::MalformedContainer("truncated PNG chunk length".into()))?;
        let mut kind = [0u8; 4];
        cursor
            .read_exact(&mut kind)
            .map_err(|_| EngineError::MalformedContainer("truncated PNG chunk type".into()))?;
        let mut data = vec![0u8; len as usize];
        cursor
            .read_exact(&mut data)
            .map_err(|_| EngineError::MalformedContainer("truncated PNG chunk data".into()))?;
        // CRC bytes are read but deliberately not verified.
        let mut crc = [0u8; 4];
        cursor
            .read_exact(&mut crc)
            .map_err(|_| EngineError::MalformedContainer("truncated PNG chunk CRC".into()))?;

        let is_end = &kind == b"IEND";
        chunks.push(Chunk { kind, data });
        if is_end {
            return Ok(chunks);
        }
    }
}

fn write_chunks(chunks: &[Chunk]) -> Vec<u8> {
    let mut out = PNG_SIGNATURE.to_vec();
    for chunk in chunks {
        out.write_u32::<BigEndian>(chunk.data.len() as u32).expect("vec write");
        out.extend_from_slice(&chunk.kind);
        out.extend_from_slice(&chunk.data);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&chunk.kind);
        hasher.update(&chunk.data);
        out.write_u32::<BigEndian>(hasher.finalize()).expect("vec write");
    }
    out
}

/// Keyword and value of a text chunk, when the chunk is one we can read.
/// iTXt is accepted in its uncompressed form only.
fn text_payload(chunk: &Chunk) -> Option<(String, Vec<u8>)> {
    match &chunk.kind {
        b"tEXt" => {
            let sep = chunk.data.iter().position(|&b| b == 0)?;
            let keyword = String::from_utf8_lossy(&chunk.data[..sep]).into_owned();
            Some((keyword, chunk.data[sep + 1..].to_vec()))
        }
        b"iTXt" => {
            let sep = chunk.data.iter().position(|&b| b == 0)?;
            let keyword = String::from_utf8_lossy(&chunk.data[..sep]).into_owned();
            let rest = &chunk.data[sep + 1..];
            // compression flag + method, then two NUL-terminated strings
            let (&comp_flag, rest) = rest.split_first()?;
            let (_, rest) = rest.split_first()?;
            if comp_flag != 0 {
                return None;
            }
            let lang_end = rest.iter().position(|&b| b == 0)?;
            let rest = &rest[lang_end + 1..];
            let trans_end = rest.iter().position(|&b| b == 0)?;
            Some((keyword, rest[trans_end + 1..].to_vec()))
        }
        _ => None,
    }
}

fn is_card_keyword(keyword: &str) -> bool {
    V3_TEXT_KEYS.contains(&keyword) || V2_TEXT_KEYS.contains(&keyword)
}

// ── Extract ──────────────────────────────────────────────────────────────────

/// Pulls a card out of PNG text metadata, trying v3 keys before v2 keys and
/// raw JSON before base64 at each key.
pub fn extract(bytes: &[u8]) -> Result<Option<PngCard>> {
    let chunks = parse_chunks(bytes)?;
    let texts: Vec<(String, Vec<u8>)> = chunks.iter().filter_map(text_payload).collect();

    for (keys, kind) in [(&V3_TEXT_KEYS[..], SpecKind::Ccv3), (&V2_TEXT_KEYS[..], SpecKind::Ccv2)] {
        for key in keys {
            let Some((_, raw)) = texts.iter().find(|(k, _)| k == key) else { continue };
            let Some(data) = parse_card_text(raw) else {
                tracing::debug!(key, "card-keyed text chunk did not parse, trying next key");
                continue;
            };
            let extra_text = texts
                .iter()
                .filter(|(k, _)| !is_card_keyword(k))
                .map(|(k, v)| (k.clone(), String::from_utf8_lossy(v).into_owned()))
                .collect();
            return Ok(Some(PngCard { spec_kind: kind, data, extra_text }));
        }
    }
    Ok(None)
}

/// Value decoding: direct JSON first, then base64 → JSON.  Accepts values
/// that only partially match the generation's shape (producer deviations
/// are common); the only hard requirement is a non-empty name.
fn parse_card_text(raw: &[u8]) -> Option<CharacterData> {
    let value = std::str::from_utf8(raw)
        .ok()
        .and_then(|s| serde_json::from_str::<Value>(s.trim()).ok())
        .or_else(|| {
            let decoded = general_purpose::STANDARD
                .decode(raw.iter().filter(|b| !b.is_ascii_whitespace()).copied().collect::<Vec<_>>())
                .ok()?;
            serde_json::from_slice::<Value>(&decoded).ok()
        })?;

    let obj = value.as_object()?;
    let data_value = obj.get("data").filter(|d| d.is_object()).unwrap_or(&value);
    let data: CharacterData = serde_json::from_value(data_value.clone()).ok()?;
    (!data.name.trim().is_empty()).then_some(data)
}

// ── Embed ────────────────────────────────────────────────────────────────────

/// Writes the card into the image's text metadata, replacing any previous
/// card chunks of either generation.
pub fn embed(image_bytes: &[u8], data: &CharacterData, kind: SpecKind) -> Result<Vec<u8>> {
    let keyword = match kind {
        SpecKind::Ccv2 => V2_TEXT_KEYS[0],
        SpecKind::Ccv3 => V3_TEXT_KEYS[0],
        SpecKind::Collection => {
            return Err(EngineError::InvariantViolation(
                "collection cards cannot be embedded in a PNG".into(),
            ))
        }
    };
    let json = model::serialize_card(data, kind)?;
    let encoded = general_purpose::STANDARD.encode(json);

    let mut chunk_data = keyword.as_bytes().to_vec();
    chunk_data.push(0);
    chunk_data.extend_from_slice(encoded.as_bytes());
    let card_chunk = Chunk { kind: *b"tEXt", data: chunk_data };

    let mut out = Vec::new();
    for chunk in parse_chunks(image_bytes)? {
        if let Some((kw, _)) = text_payload(&chunk) {
            if is_card_keyword(&kw) {
                continue;
            }
        }
        if &chunk.kind == b"IEND" {
            out.push(card_chunk.clone());
        }
        out.push(chunk);
    }
    Ok(write_chunks(&out))
}
