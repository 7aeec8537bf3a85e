//! Import/export orchestration — the one layer that touches detection, the
//! codecs, the mappers, and the capability boundaries together.
//!
//! # Flow
//! `import_package` detects the format, parses into the canonical model,
//! persists the card through [`CardStore`], then walks the extracted asset
//! descriptors through the two-step pipeline (descriptor → link request).
//! Per-asset failures downgrade to [`Warning`]s; the import as a whole only
//! fails on malformed containers or invariant violations.
//!
//! # Portrait guarantee
//! Every imported character card ends up with a main icon link: the source
//! PNG itself for PNG imports, the embedded/fetched icon for archives, and
//! the built-in blank portrait when the source carries none.

use std::collections::BTreeSet;

use tracing::{debug, info};
use uuid::Uuid;

use crate::archive::voxta as voxpkg;
use crate::archive::{charx, BuildOptions, BuildOutcome, ExtractOptions};
use crate::caps::{AssetOptimizer, AssetStorage, CardStore, RemoteFetcher};
use crate::detect::{detect, FormatKind};
use crate::error::{EngineError, Result, Warning};
use crate::graph::AssetGraph;
use crate::macros;
use crate::model::{
    self, Asset, AssetKind, Card, CardAssetLink, CardPayload, CharacterBook, CharacterData,
    CollectionData, CollectionMember, CollectionScenario, ExtractedAssetDescriptor, SpecKind,
    mime_for_extension,
};
use crate::png_codec::{self, BLANK_PORTRAIT};
use crate::voxta::mapper;
use crate::voxta::schema::{VoxtaPackage, VoxtaScenario, VoxtaScenarioRole};

/// Import knobs.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Original file name, used as a detection hint for ambiguous ZIPs.
    pub file_name_hint: Option<String>,
    pub extract: ExtractOptions,
    /// Rewrite `{{ macro }}` spacing variants to canonical form on import.
    pub canonicalize_macros: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self { file_name_hint: None, extract: ExtractOptions::default(), canonicalize_macros: true }
    }
}

/// What an import produced.  `card_ids` lists every created card; for a
/// multi-character package the collection card comes first, members after
/// it in package order.
#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub format: FormatKind,
    pub card_ids: Vec<String>,
    pub warnings: Vec<Warning>,
}

impl ImportOutcome {
    /// The primary created card (the collection card for packages).
    pub fn card_id(&self) -> &str {
        &self.card_ids[0]
    }
}

// ── Import ───────────────────────────────────────────────────────────────────

pub fn import_package(
    bytes: &[u8],
    opts: &ImportOptions,
    store: &mut dyn CardStore,
    storage: &mut dyn AssetStorage,
    fetcher: Option<&dyn RemoteFetcher>,
) -> Result<ImportOutcome> {
    let format = detect(bytes, opts.file_name_hint.as_deref())?;
    debug!(format = format.name(), size = bytes.len(), "import starting");

    let outcome = match format {
        FormatKind::Png => import_png(bytes, opts, store, storage),
        FormatKind::JsonCcv2 | FormatKind::JsonCcv3 => import_card_json(bytes, opts, store, storage),
        FormatKind::JsonLorebook => import_lorebook(bytes, store, storage),
        FormatKind::ZipCharx => import_charx(bytes, opts, store, storage, fetcher),
        FormatKind::ZipVoxta => import_voxpkg(bytes, opts, store, storage, fetcher),
    }?;

    info!(
        format = format.name(),
        cards = outcome.card_ids.len(),
        warnings = outcome.warnings.len(),
        "import finished"
    );
    Ok(outcome)
}

fn import_png(
    bytes: &[u8],
    opts: &ImportOptions,
    store: &mut dyn CardStore,
    storage: &mut dyn AssetStorage,
) -> Result<ImportOutcome> {
    let png = png_codec::extract(bytes)?.ok_or_else(|| {
        EngineError::MalformedContainer("PNG carries no embedded character card".into())
    })?;
    let mut data = png.data;
    if opts.canonicalize_macros {
        macros::canonicalize_card(&mut data);
    }
    let payload = match png.spec_kind {
        SpecKind::Ccv2 => CardPayload::V2(data),
        _ => CardPayload::V3(data),
    };
    let card_id = store.create_card(Card::new(payload)?)?;

    // The card PNG doubles as the portrait; the untouched bytes are archived
    // alongside it so a lossless re-export stays possible.
    add_asset(store, storage, &card_id, AssetKind::Icon, "main", "png", bytes, true, 0)?;
    add_asset(store, storage, &card_id, AssetKind::PackageOriginal, "original", "png", bytes, false, 1)?;

    Ok(ImportOutcome { format: FormatKind::Png, card_ids: vec![card_id], warnings: Vec::new() })
}

fn import_card_json(
    bytes: &[u8],
    opts: &ImportOptions,
    store: &mut dyn CardStore,
    storage: &mut dyn AssetStorage,
) -> Result<ImportOutcome> {
    let (spec_kind, mut data) = model::parse_card_bytes(bytes)?;
    if opts.canonicalize_macros {
        macros::canonicalize_card(&mut data);
    }
    let (format, payload) = match spec_kind {
        SpecKind::Ccv2 => (FormatKind::JsonCcv2, CardPayload::V2(data)),
        _ => (FormatKind::JsonCcv3, CardPayload::V3(data)),
    };
    let card_id = store.create_card(Card::new(payload)?)?;
    seed_portrait(store, storage, &card_id)?;
    Ok(ImportOutcome { format, card_ids: vec![card_id], warnings: Vec::new() })
}

fn import_lorebook(
    bytes: &[u8],
    store: &mut dyn CardStore,
    storage: &mut dyn AssetStorage,
) -> Result<ImportOutcome> {
    let book: CharacterBook = serde_json::from_slice(bytes)?;
    let name = book
        .name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| "Imported lorebook".to_owned());
    let data = CharacterData {
        name,
        character_book: Some(book),
        ..Default::default()
    };
    let card_id = store.create_card(Card::new(CardPayload::V3(data))?)?;
    seed_portrait(store, storage, &card_id)?;
    Ok(ImportOutcome {
        format: FormatKind::JsonLorebook,
        card_ids: vec![card_id],
        warnings: Vec::new(),
    })
}

fn import_charx(
    bytes: &[u8],
    opts: &ImportOptions,
    store: &mut dyn CardStore,
    storage: &mut dyn AssetStorage,
    fetcher: Option<&dyn RemoteFetcher>,
) -> Result<ImportOutcome> {
    let contents = charx::extract(bytes, &opts.extract, fetcher)?;
    let mut warnings = contents.warnings;

    let mut data = contents.data;
    if opts.canonicalize_macros {
        macros::canonicalize_card(&mut data);
    }
    // The URI asset table is replaced by store-backed links from here on.
    data.assets.clear();

    let payload = match contents.spec_kind {
        SpecKind::Ccv2 => CardPayload::V2(data),
        _ => CardPayload::V3(data),
    };
    let card_id = store.create_card(Card::new(payload)?)?;

    let has_icon = persist_descriptors(&contents.assets, &card_id, store, storage, &mut warnings)?;
    if !has_icon {
        seed_portrait(store, storage, &card_id)?;
    }
    Ok(ImportOutcome { format: FormatKind::ZipCharx, card_ids: vec![card_id], warnings })
}

fn import_voxpkg(
    bytes: &[u8],
    opts: &ImportOptions,
    store: &mut dyn CardStore,
    storage: &mut dyn AssetStorage,
    fetcher: Option<&dyn RemoteFetcher>,
) -> Result<ImportOutcome> {
    let contents = voxpkg::extract(bytes, &opts.extract, fetcher)?;
    let mut warnings = contents.warnings.clone();

    let mut members = Vec::new();
    let mut member_ids = Vec::new();
    for (order, member) in contents.characters.iter().enumerate() {
        let books = contents.books_for(&member.character);
        let mut data = mapper::voxta_to_ccv3(&member.character, &books);
        if opts.canonicalize_macros {
            macros::canonicalize_card(&mut data);
        }
        let card_id = store.create_card(Card::new(CardPayload::V3(data))?)?;

        let has_icon = persist_descriptors(&member.assets, &card_id, store, storage, &mut warnings)?;
        if !has_icon {
            seed_portrait(store, storage, &card_id)?;
        }

        members.push(CollectionMember {
            card_id:      card_id.clone(),
            external_id:  member.character.id.clone(),
            display_name: member.character.name.clone(),
            order:        order as u32,
            scenario_ids: contents
                .scenarios
                .iter()
                .filter(|s| s.roles.iter().any(|r| r.character_id == member.character.id))
                .map(|s| s.id.clone())
                .collect(),
        });
        member_ids.push(card_id);
    }

    let mut card_ids = Vec::new();
    if contents.is_multi_character() {
        let pkg = contents.package.clone().unwrap_or_default();
        let name = if pkg.name.trim().is_empty() {
            format!("{} collection", contents.characters[0].character.name)
        } else {
            pkg.name
        };
        let scenarios = contents
            .scenarios
            .iter()
            .map(|s| CollectionScenario {
                external_id:   s.id.clone(),
                name:          s.name.clone(),
                description:   s.description.clone(),
                character_ids: s.roles.iter().map(|r| r.character_id.clone()).collect(),
                order:         s.order,
            })
            .collect();
        let collection = CollectionData::new(name, pkg.description, pkg.creator, members, scenarios);
        card_ids.push(store.create_card(Card::new(CardPayload::Collection(collection))?)?);
    }
    card_ids.extend(member_ids);

    Ok(ImportOutcome { format: FormatKind::ZipVoxta, card_ids, warnings })
}

// ── Asset persistence ────────────────────────────────────────────────────────

/// Walk extracted descriptors through the descriptor → link-request pipeline.
/// Returns whether any icon link was created.
fn persist_descriptors(
    descriptors: &[ExtractedAssetDescriptor],
    card_id: &str,
    store: &mut dyn CardStore,
    storage: &mut dyn AssetStorage,
    warnings: &mut Vec<Warning>,
) -> Result<bool> {
    let mut has_icon = false;
    for (order, desc) in descriptors.iter().enumerate() {
        let bytes = match (&desc.bytes, &desc.original_url) {
            (Some(bytes), _) => bytes.clone(),
            // `ccdefault:` sentinel icon: the engine supplies the default.
            (None, None) if desc.kind == AssetKind::Icon => BLANK_PORTRAIT.to_vec(),
            (None, url) => {
                let message = match url {
                    Some(u) => format!("asset not archived; remote source {u} was not fetched"),
                    None => "asset not archived; no bytes available".to_owned(),
                };
                warnings.push(Warning::new(&desc.name, message));
                continue;
            }
        };
        let asset = Asset::new(desc.mime_type(), bytes.len() as u64);
        storage.write_asset_bytes(&asset.locator, &bytes)?;
        let asset_id = store.create_asset(asset)?;
        let request = desc.to_link_request(&asset_id, order as u32);
        has_icon |= request.link.kind == AssetKind::Icon;
        store.link_asset_to_card(card_id, request.link)?;
    }
    Ok(has_icon)
}

/// Attach the built-in blank portrait as the main icon.
fn seed_portrait(
    store: &mut dyn CardStore,
    storage: &mut dyn AssetStorage,
    card_id: &str,
) -> Result<()> {
    debug!(card_id, "seeding blank portrait");
    add_asset(store, storage, card_id, AssetKind::Icon, "main", "png", &BLANK_PORTRAIT, true, 0)?;
    Ok(())
}

fn add_asset(
    store: &mut dyn CardStore,
    storage: &mut dyn AssetStorage,
    card_id: &str,
    kind: AssetKind,
    name: &str,
    extension: &str,
    bytes: &[u8],
    is_main: bool,
    order: u32,
) -> Result<String> {
    let asset = Asset::new(mime_for_extension(extension), bytes.len() as u64);
    storage.write_asset_bytes(&asset.locator, bytes)?;
    let asset_id = store.create_asset(asset)?;
    store.link_asset_to_card(
        card_id,
        CardAssetLink {
            asset_id: asset_id.clone(),
            kind,
            name: name.to_owned(),
            extension: extension.to_owned(),
            order,
            is_main,
            tags: BTreeSet::new(),
            actor_index: None,
            original_url: None,
        },
    )?;
    Ok(asset_id)
}

// ── Export ───────────────────────────────────────────────────────────────────

/// Target representation for [`export_card`].
#[derive(Debug, Clone)]
pub enum ExportFormat {
    Ccv2Json,
    Ccv3Json,
    /// Card embedded into a PNG. `base_image` overrides the portrait as the
    /// carrier image.
    Png { base_image: Option<Vec<u8>> },
    Charx,
    Voxta,
}

pub fn export_card(
    card_id: &str,
    format: &ExportFormat,
    opts: &BuildOptions,
    store: &dyn CardStore,
    storage: &dyn AssetStorage,
    optimizer: Option<&dyn AssetOptimizer>,
) -> Result<BuildOutcome> {
    let card = store.get_card(card_id)?;
    match format {
        ExportFormat::Ccv2Json => {
            json_outcome(model::serialize_card(character_of(&card)?, SpecKind::Ccv2)?)
        }
        ExportFormat::Ccv3Json => {
            json_outcome(model::serialize_card(character_of(&card)?, SpecKind::Ccv3)?)
        }
        ExportFormat::Png { base_image } => {
            export_png(&card, base_image.as_deref(), store, storage)
        }
        ExportFormat::Charx => {
            let assets = store.list_assets_for_card(&card.id)?;
            charx::build(character_of(&card)?, &assets, opts, storage, optimizer)
        }
        ExportFormat::Voxta => export_voxta(&card, opts, store, storage, optimizer),
    }
}

fn character_of(card: &Card) -> Result<&CharacterData> {
    card.character().ok_or_else(|| {
        EngineError::InvariantViolation(format!(
            "collection card {:?} has no single-character form; export it as a Voxta package",
            card.name()
        ))
    })
}

fn json_outcome(bytes: Vec<u8>) -> Result<BuildOutcome> {
    Ok(BuildOutcome { bytes, asset_count: 0, total_size: 0, warnings: Vec::new() })
}

fn export_png(
    card: &Card,
    base_image: Option<&[u8]>,
    store: &dyn CardStore,
    storage: &dyn AssetStorage,
) -> Result<BuildOutcome> {
    let data = character_of(card)?;
    let mut warnings = Vec::new();

    let carrier: Vec<u8> = match base_image {
        Some(bytes) => bytes.to_vec(),
        None => {
            let assets = store.list_assets_for_card(&card.id)?;
            let graph = AssetGraph::new(assets.iter().map(|(l, _)| l.clone()).collect());
            match graph.main_portrait() {
                Some(portrait) if portrait.extension.eq_ignore_ascii_case("png") => {
                    let locator = assets
                        .iter()
                        .find(|(l, _)| l.asset_id == portrait.asset_id)
                        .map(|(_, a)| a.locator.clone());
                    match locator.map(|loc| storage.read_asset_bytes(&loc)).transpose()? {
                        Some(bytes) => bytes,
                        None => BLANK_PORTRAIT.to_vec(),
                    }
                }
                Some(portrait) => {
                    warnings.push(Warning::new(
                        &portrait.name,
                        "portrait is not a PNG; card embedded into the blank carrier instead",
                    ));
                    BLANK_PORTRAIT.to_vec()
                }
                None => BLANK_PORTRAIT.to_vec(),
            }
        }
    };

    let kind = match card.spec_kind() {
        SpecKind::Ccv2 => SpecKind::Ccv2,
        _ => SpecKind::Ccv3,
    };
    let bytes = png_codec::embed(&carrier, data, kind)?;
    Ok(BuildOutcome { bytes, asset_count: 0, total_size: 0, warnings })
}

fn export_voxta(
    card: &Card,
    opts: &BuildOptions,
    store: &dyn CardStore,
    storage: &dyn AssetStorage,
    optimizer: Option<&dyn AssetOptimizer>,
) -> Result<BuildOutcome> {
    let mut input = voxpkg::VoxpkgBuild::default();

    match &card.payload {
        CardPayload::V2(data) | CardPayload::V3(data) => {
            let (character, book) = mapper::ccv3_to_voxta(data);
            input.books.extend(book);
            input.package = VoxtaPackage {
                id:   Uuid::new_v4().to_string(),
                name: data.name.clone(),
                creator: data.creator.clone(),
                ..Default::default()
            };
            let assets = store.list_assets_for_card(&card.id)?;
            input.characters.push((character, assets));
        }
        CardPayload::Collection(collection) => {
            collection.check()?;
            for member in &collection.members {
                let member_card = store.get_card(&member.card_id)?;
                let data = character_of(&member_card)?;
                let (mut character, book) = mapper::ccv3_to_voxta(data);
                // collection membership is keyed by the external id
                if !member.external_id.is_empty() {
                    character.id = member.external_id.clone();
                }
                input.books.extend(book);
                let assets = store.list_assets_for_card(&member_card.id)?;
                input.characters.push((character, assets));
            }
            input.scenarios = collection
                .scenarios
                .iter()
                .map(|s| VoxtaScenario {
                    id:          s.external_id.clone(),
                    name:        s.name.clone(),
                    description: s.description.clone(),
                    order:       s.order,
                    roles:       s
                        .character_ids
                        .iter()
                        .map(|cid| VoxtaScenarioRole {
                            name: collection
                                .member_by_external_id(cid)
                                .map(|m| m.display_name.clone())
                                .unwrap_or_default(),
                            character_id: cid.clone(),
                        })
                        .collect(),
                    ..Default::default()
                })
                .collect();
            input.package = VoxtaPackage {
                id:          Uuid::new_v4().to_string(),
                name:        collection.name.clone(),
                description: collection.description.clone(),
                creator:     collection.creator.clone(),
                ..Default::default()
            };
        }
    }

    voxpkg::build(&input, opts, storage, optimizer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::{MemoryStorage, MemoryStore};
    use serde_json::json;

    fn import(bytes: &[u8], store: &mut MemoryStore, storage: &mut MemoryStorage) -> ImportOutcome {
        import_package(bytes, &ImportOptions::default(), store, storage, None).unwrap()
    }

    #[test]
    fn json_card_import_seeds_a_portrait() {
        let mut store = MemoryStore::new();
        let mut storage = MemoryStorage::new();
        let bytes = json!({ "spec": "chara_card_v3", "data": { "name": "Aria" } }).to_string();

        let outcome = import(bytes.as_bytes(), &mut store, &mut storage);
        assert_eq!(outcome.format, FormatKind::JsonCcv3);
        let assets = store.list_assets_for_card(outcome.card_id()).unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].0.kind, AssetKind::Icon);
        assert!(assets[0].0.is_main);
        assert_eq!(
            storage.read_asset_bytes(&assets[0].1.locator).unwrap(),
            BLANK_PORTRAIT.to_vec()
        );
    }

    #[test]
    fn macro_spacing_is_canonicalized_on_import() {
        let mut store = MemoryStore::new();
        let mut storage = MemoryStorage::new();
        let bytes = json!({
            "spec": "chara_card_v3",
            "data": { "name": "Aria", "first_mes": "Hi {{ user }}!" }
        })
        .to_string();

        let outcome = import(bytes.as_bytes(), &mut store, &mut storage);
        let card = store.get_card(outcome.card_id()).unwrap();
        assert_eq!(card.character().unwrap().first_mes, "Hi {{user}}!");
    }

    #[test]
    fn png_import_keeps_the_original_bytes() {
        let mut store = MemoryStore::new();
        let mut storage = MemoryStorage::new();
        let data = CharacterData { name: "Aria".into(), ..Default::default() };
        let png = png_codec::embed(&BLANK_PORTRAIT, &data, SpecKind::Ccv3).unwrap();

        let outcome = import(&png, &mut store, &mut storage);
        assert_eq!(outcome.format, FormatKind::Png);

        let assets = store.list_assets_for_card(outcome.card_id()).unwrap();
        let original = assets
            .iter()
            .find(|(l, _)| l.kind == AssetKind::PackageOriginal)
            .unwrap();
        assert_eq!(storage.read_asset_bytes(&original.1.locator).unwrap(), png);
        assert!(assets.iter().any(|(l, _)| l.kind == AssetKind::Icon && l.is_main));
    }

    #[test]
    fn plain_photo_png_is_rejected() {
        let mut store = MemoryStore::new();
        let mut storage = MemoryStorage::new();
        let err = import_package(&BLANK_PORTRAIT, &ImportOptions::default(), &mut store, &mut storage, None)
            .unwrap_err();
        assert!(matches!(err, EngineError::MalformedContainer(_)));
    }

    #[test]
    fn lorebook_import_creates_a_named_card() {
        let mut store = MemoryStore::new();
        let mut storage = MemoryStorage::new();
        let bytes = json!({
            "name": "World Atlas",
            "entries": [{ "keys": ["argo"], "content": "The Argo sank twice.", "enabled": true }]
        })
        .to_string();

        let outcome = import(bytes.as_bytes(), &mut store, &mut storage);
        assert_eq!(outcome.format, FormatKind::JsonLorebook);
        let card = store.get_card(outcome.card_id()).unwrap();
        assert_eq!(card.name(), "World Atlas");
        let book = card.character().unwrap().character_book.as_ref().unwrap();
        assert_eq!(book.entries.len(), 1);
    }

    #[test]
    fn collection_card_cannot_export_to_json() {
        let mut store = MemoryStore::new();
        let storage = MemoryStorage::new();
        let collection = CollectionData::new("Pack".into(), String::new(), String::new(), vec![], vec![]);
        let id = store
            .create_card(Card::new(CardPayload::Collection(collection)).unwrap())
            .unwrap();
        let err = export_card(&id, &ExportFormat::Ccv3Json, &BuildOptions::default(), &store, &storage, None)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvariantViolation(_)));
    }

    #[test]
    fn png_export_embeds_into_the_stored_portrait() {
        let mut store = MemoryStore::new();
        let mut storage = MemoryStorage::new();
        let data = CharacterData { name: "Aria".into(), ..Default::default() };
        let png = png_codec::embed(&BLANK_PORTRAIT, &data, SpecKind::Ccv3).unwrap();
        let outcome = import(&png, &mut store, &mut storage);

        let format = ExportFormat::Png { base_image: None };
        let out = export_card(outcome.card_id(), &format, &BuildOptions::default(), &store, &storage, None)
            .unwrap();
        let round = png_codec::extract(&out.bytes).unwrap().unwrap();
        assert_eq!(round.data.name, "Aria");
    }
}
