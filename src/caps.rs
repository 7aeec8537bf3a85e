//! Capability boundaries — everything the engine consumes but does not own.
//!
//! The engine never issues raw storage paths, SQL, or HTTP on its own:
//! persistence, byte storage, remote fetch, and media optimization are all
//! injected through these traits.  In-memory implementations back the CLI
//! and the test suite.

use std::collections::HashMap;

use crate::error::{EngineError, Result};
use crate::model::{Asset, AssetLocator, Card, CardAssetLink, CardPayload};

/// Persistence collaborator for cards, assets, and their links.
pub trait CardStore {
    fn create_card(&mut self, card: Card) -> Result<String>;
    fn update_card(&mut self, id: &str, patch: CardPatch) -> Result<()>;
    fn get_card(&self, id: &str) -> Result<Card>;
    fn create_asset(&mut self, meta: Asset) -> Result<String>;
    fn link_asset_to_card(&mut self, card_id: &str, link: CardAssetLink) -> Result<()>;
    /// Links joined with their asset metadata, in link order.
    fn list_assets_for_card(&self, card_id: &str) -> Result<Vec<(CardAssetLink, Asset)>>;
}

/// Partial card update. Only set fields are written.
#[derive(Debug, Clone, Default)]
pub struct CardPatch {
    pub payload: Option<CardPayload>,
}

/// Moves asset bytes without the engine knowing the physical layout.
pub trait AssetStorage {
    fn read_asset_bytes(&self, locator: &AssetLocator) -> Result<Vec<u8>>;
    fn write_asset_bytes(&mut self, locator: &AssetLocator, bytes: &[u8]) -> Result<()>;
}

/// Optional network capability; only invoked when remote-asset resolution
/// is explicitly enabled.
pub trait RemoteFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Pluggable byte-transform for media optimization.  The engine invokes it
/// but never implements transcoding itself.  Must be callable from worker
/// threads when the `parallel` feature fans the batch out.
pub trait AssetOptimizer: Send + Sync {
    fn optimize(&self, bytes: &[u8], hint_extension: &str, settings: &OptimizeSettings)
        -> Result<OptimizedAsset>;
}

#[derive(Debug, Clone)]
pub struct OptimizeSettings {
    pub quality: u8,
    pub max_dimension: Option<u32>,
    /// Target extension (e.g. "webp"); `None` keeps the source format.
    pub target_format: Option<String>,
}

impl Default for OptimizeSettings {
    fn default() -> Self {
        Self { quality: 85, max_dimension: None, target_format: None }
    }
}

/// Optimizer output; both sizes must be reported for the caller's summary.
#[derive(Debug, Clone)]
pub struct OptimizedAsset {
    pub bytes: Vec<u8>,
    pub extension: String,
    pub original_size: u64,
    pub optimized_size: u64,
}

// ── In-memory implementations ────────────────────────────────────────────────

/// HashMap-backed store for the CLI and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    cards: HashMap<String, Card>,
    assets: HashMap<String, Asset>,
    links: HashMap<String, Vec<CardAssetLink>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn card_count(&self) -> usize {
        self.cards.len()
    }
}

impl CardStore for MemoryStore {
    fn create_card(&mut self, card: Card) -> Result<String> {
        let id = card.id.clone();
        self.cards.insert(id.clone(), card);
        Ok(id)
    }

    fn update_card(&mut self, id: &str, patch: CardPatch) -> Result<()> {
        let card = self
            .cards
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(format!("card {id}")))?;
        if let Some(payload) = patch.payload {
            card.payload = payload;
        }
        Ok(())
    }

    fn get_card(&self, id: &str) -> Result<Card> {
        self.cards
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("card {id}")))
    }

    fn create_asset(&mut self, meta: Asset) -> Result<String> {
        let id = meta.id.clone();
        self.assets.insert(id.clone(), meta);
        Ok(id)
    }

    fn link_asset_to_card(&mut self, card_id: &str, link: CardAssetLink) -> Result<()> {
        if !self.cards.contains_key(card_id) {
            return Err(EngineError::NotFound(format!("card {card_id}")));
        }
        if !self.assets.contains_key(&link.asset_id) {
            return Err(EngineError::NotFound(format!("asset {}", link.asset_id)));
        }
        self.links.entry(card_id.to_owned()).or_default().push(link);
        Ok(())
    }

    fn list_assets_for_card(&self, card_id: &str) -> Result<Vec<(CardAssetLink, Asset)>> {
        let links = self.links.get(card_id).cloned().unwrap_or_default();
        links
            .into_iter()
            .map(|link| {
                let asset = self
                    .assets
                    .get(&link.asset_id)
                    .cloned()
                    .ok_or_else(|| EngineError::NotFound(format!("asset {}", link.asset_id)))?;
                Ok((link, asset))
            })
            .collect()
    }
}

/// HashMap-backed byte storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    blobs: HashMap<AssetLocator, Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AssetStorage for MemoryStorage {
    fn read_asset_bytes(&self, locator: &AssetLocator) -> Result<Vec<u8>> {
        self.blobs
            .get(locator)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("asset bytes at {}", locator.0)))
    }

    fn write_asset_bytes(&mut self, locator: &AssetLocator, bytes: &[u8]) -> Result<()> {
        self.blobs.insert(locator.clone(), bytes.to_vec());
        Ok(())
    }
}
