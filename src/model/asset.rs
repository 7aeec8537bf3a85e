//! Assets and their card links.
//!
//! An [`Asset`] is the physical binary resource; a [`CardAssetLink`] carries
//! the *semantic* metadata binding it to one card (type, tags, ordering,
//! main flag).  The engine never sees filesystem paths: storage is addressed
//! through the opaque [`AssetLocator`] resolved by the storage capability.
//!
//! Extraction is an explicit two-step pipeline:
//! [`ExtractedAssetDescriptor`] (no persistence knowledge, produced by the
//! archive codecs) → [`LinkRequest`] (produced by the pure
//! [`ExtractedAssetDescriptor::to_link_request`] step, consumed by the
//! orchestrator).  Descriptors are never mutated in place.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque storage reference. The engine round-trips it through the storage
/// capability without interpreting its contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetLocator(pub String);

impl AssetLocator {
    /// Locator convention used for assets the engine itself creates.
    pub fn for_new_asset(asset_id: &str) -> Self {
        AssetLocator(format!("asset/{asset_id}"))
    }
}

/// Semantic role of an asset within a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetKind {
    Icon,
    Background,
    Emotion,
    Sound,
    Custom,
    /// The untouched source container (e.g. the original card PNG),
    /// archived so a lossless re-export stays possible.
    PackageOriginal,
}

impl AssetKind {
    /// Wire/directory name, also used inside archive layouts.
    pub fn as_str(self) -> &'static str {
        match self {
            AssetKind::Icon => "icon",
            AssetKind::Background => "background",
            AssetKind::Emotion => "emotion",
            AssetKind::Sound => "sound",
            AssetKind::Custom => "custom",
            AssetKind::PackageOriginal => "package-original",
        }
    }

    pub fn from_str_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "icon" | "icons" | "portrait" | "portraits" => AssetKind::Icon,
            "background" | "backgrounds" => AssetKind::Background,
            "emotion" | "emotions" | "expression" | "expressions" => AssetKind::Emotion,
            "sound" | "sounds" | "audio" => AssetKind::Sound,
            "package-original" => AssetKind::PackageOriginal,
            _ => AssetKind::Custom,
        }
    }

    /// Kinds that count as user-visible assets (package-original does not).
    pub fn is_visible(self) -> bool {
        !matches!(self, AssetKind::PackageOriginal)
    }
}

/// A physical binary resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub mime_type: String,
    pub byte_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    pub locator: AssetLocator,
}

impl Asset {
    pub fn new(mime_type: impl Into<String>, byte_size: u64) -> Self {
        let id = Uuid::new_v4().to_string();
        let locator = AssetLocator::for_new_asset(&id);
        Self { id, mime_type: mime_type.into(), byte_size, width: None, height: None, locator }
    }
}

/// Semantic association between one asset and one card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardAssetLink {
    pub asset_id: String,
    pub kind: AssetKind,
    pub name: String,
    pub extension: String,
    /// Stable presentation order.
    pub order: u32,
    pub is_main: bool,
    /// Semantic tags (`portrait-override`, `main-background`, `actor-N`, …).
    pub tags: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_index: Option<u32>,
    /// Set only when the asset was archived from a remote URL; enables a
    /// reversible "restore original link" operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
}

/// Raw asset produced by a container codec. Knows nothing about persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedAssetDescriptor {
    pub kind: AssetKind,
    pub name: String,
    pub extension: String,
    pub is_main: bool,
    pub tags: BTreeSet<String>,
    pub actor_index: Option<u32>,
    /// Present for embedded entries; `None` for remote/sentinel URIs that
    /// were not (or could not be) fetched.
    pub bytes: Option<Vec<u8>>,
    /// Remote source URL, when the entry pointed outside the archive.
    pub original_url: Option<String>,
}

impl ExtractedAssetDescriptor {
    pub fn embedded(kind: AssetKind, name: &str, extension: &str, bytes: Vec<u8>) -> Self {
        Self {
            kind,
            name: name.to_owned(),
            extension: extension.to_owned(),
            is_main: false,
            tags: BTreeSet::new(),
            actor_index: None,
            bytes: Some(bytes),
            original_url: None,
        }
    }

    pub fn mime_type(&self) -> String {
        mime_for_extension(&self.extension)
    }

    /// Pure mapping step: descriptor → link request for a known asset id.
    pub fn to_link_request(&self, asset_id: &str, order: u32) -> LinkRequest {
        LinkRequest {
            link: CardAssetLink {
                asset_id: asset_id.to_owned(),
                kind: self.kind,
                name: self.name.clone(),
                extension: self.extension.clone(),
                order,
                is_main: self.is_main,
                tags: self.tags.clone(),
                actor_index: self.actor_index,
                original_url: self.original_url.clone(),
            },
        }
    }
}

/// What the orchestrator hands to the persistence collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkRequest {
    pub link: CardAssetLink,
}

/// Minimal extension → MIME table for the formats card packages carry.
pub fn mime_for_extension(ext: &str) -> String {
    match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "webm" => "video/webm",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
    .to_owned()
}

/// `true` when the bytes look like an animated container (GIF, or an APNG
/// with an `acTL` chunk before the first frame).  Used by the graph layer to
/// flag animated portraits.
pub fn looks_animated(extension: &str, bytes: &[u8]) -> bool {
    let ext = extension.trim_start_matches('.').to_ascii_lowercase();
    if ext == "gif" || ext == "webm" {
        return true;
    }
    if ext == "png" || ext == "apng" {
        // APNG: animation control chunk appears in the first few chunks.
        return bytes
            .windows(4)
            .take(256)
            .any(|w| w == b"acTL");
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_round_trip() {
        for kind in [
            AssetKind::Icon,
            AssetKind::Background,
            AssetKind::Emotion,
            AssetKind::Sound,
            AssetKind::Custom,
            AssetKind::PackageOriginal,
        ] {
            assert_eq!(AssetKind::from_str_lenient(kind.as_str()), kind);
        }
        assert_eq!(AssetKind::from_str_lenient("Portraits"), AssetKind::Icon);
        assert_eq!(AssetKind::from_str_lenient("whatever"), AssetKind::Custom);
    }

    #[test]
    fn descriptor_to_link_request_is_pure() {
        let desc = ExtractedAssetDescriptor::embedded(AssetKind::Emotion, "joy", "png", vec![1, 2]);
        let before = desc.clone();
        let req = desc.to_link_request("a-1", 7);
        assert_eq!(desc, before);
        assert_eq!(req.link.asset_id, "a-1");
        assert_eq!(req.link.order, 7);
        assert_eq!(req.link.kind, AssetKind::Emotion);
    }

    #[test]
    fn animation_detection() {
        assert!(looks_animated("gif", &[]));
        let apng = [b"xxxxxxxx".as_slice(), b"acTL", b"rest"].concat();
        assert!(looks_animated("png", &apng));
        assert!(!looks_animated("png", b"plain png data"));
        assert!(!looks_animated("jpg", &[]));
    }
}
