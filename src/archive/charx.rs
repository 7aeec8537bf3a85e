//! CHARX codec — a ZIP bundling one CCv3 card (`card.json` at the archive
//! root) with its binary assets under `assets/<kind>/<file>`.
//!
//! Extraction tolerates the legacy layouts in the wild: asset URIs are
//! resolved against the documented candidate list (URI path, then
//! kind-directory, then flat name — see [`super::entry_candidates`]), and
//! an archive whose card declares no assets gets its `assets/` directory
//! enumerated directly.
//!
//! Building enforces the main-icon guarantee: the main icon is written even
//! when the caller's kind filter excludes icons.  An archive without its
//! main icon is a data-loss bug, not a valid filtering outcome.

use std::collections::BTreeSet;

use tracing::debug;

use crate::caps::{AssetOptimizer, AssetStorage, RemoteFetcher};
use crate::error::{EngineError, Result, Warning};
use crate::model::{
    self, Asset, AssetKind, AssetRef, CardAssetLink, CharacterData, ExtractedAssetDescriptor,
    SpecKind,
};

use super::{
    entry_candidates, entry_names, mark_main_icon, open_zip, optimize_batch, read_entry,
    resolve_remote, sanitize_name, AssetUri, BuildOptions, BuildOutcome, ExtractOptions,
    OptimizeItem, ZipBuilder,
};

/// Entry names tried for the card manifest, in order.
const CARD_CANDIDATES: [&str; 2] = ["card.json", "Card.json"];

/// Result of [`extract`].
#[derive(Debug, Clone)]
pub struct CharxContents {
    pub spec_kind: SpecKind,
    pub data: CharacterData,
    pub assets: Vec<ExtractedAssetDescriptor>,
    pub warnings: Vec<Warning>,
}

// ── Extract ──────────────────────────────────────────────────────────────────

pub fn extract(
    bytes: &[u8],
    opts: &ExtractOptions,
    fetcher: Option<&dyn RemoteFetcher>,
) -> Result<CharxContents> {
    let mut archive = open_zip(bytes)?;
    let names = entry_names(&archive);

    let card_bytes = CARD_CANDIDATES
        .iter()
        .find_map(|name| read_entry(&mut archive, name))
        .ok_or_else(|| EngineError::MalformedContainer("CHARX archive has no card.json".into()))?;
    let (spec_kind, data) = model::parse_card_bytes(&card_bytes)?;

    let mut warnings = Vec::new();
    let mut assets = Vec::new();

    if data.assets.is_empty() {
        // No declared assets: enumerate the assets/ directory directly.
        for name in &names {
            let Some(rest) = name.strip_prefix("assets/") else { continue };
            if rest.is_empty() || rest.ends_with('/') {
                continue;
            }
            let Some(entry_bytes) = read_entry(&mut archive, name) else { continue };
            let (kind, stem, ext) = split_asset_path(rest);
            assets.push(ExtractedAssetDescriptor::embedded(kind, &stem, &ext, entry_bytes));
        }
    } else {
        for asset_ref in &data.assets {
            assets.push(resolve_asset_ref(
                asset_ref,
                &mut archive,
                &names,
                opts,
                fetcher,
                &mut warnings,
            ));
        }
    }
    mark_main_icon(&mut assets);

    debug!(card = %data.name, assets = assets.len(), warnings = warnings.len(), "CHARX extracted");
    Ok(CharxContents { spec_kind, data, assets, warnings })
}

fn resolve_asset_ref(
    asset_ref: &AssetRef,
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    names: &[String],
    opts: &ExtractOptions,
    fetcher: Option<&dyn RemoteFetcher>,
    warnings: &mut Vec<Warning>,
) -> ExtractedAssetDescriptor {
    let kind = AssetKind::from_str_lenient(&asset_ref.kind);
    // main-icon designation happens once over the whole set, not here
    let mut desc = ExtractedAssetDescriptor {
        kind,
        name: asset_ref.name.clone(),
        extension: asset_ref.ext.clone(),
        is_main: false,
        tags: BTreeSet::new(),
        actor_index: None,
        bytes: None,
        original_url: None,
    };

    match AssetUri::parse(&asset_ref.uri) {
        AssetUri::Embedded(path) => {
            let candidates = entry_candidates(&path, kind, &asset_ref.name, &asset_ref.ext);
            let found = candidates
                .iter()
                .find(|c| names.iter().any(|n| n == *c))
                .and_then(|c| read_entry(archive, c));
            match found {
                Some(bytes) => desc.bytes = Some(bytes),
                None => warnings.push(Warning::new(
                    &asset_ref.name,
                    format!("no archive entry matched any of {candidates:?}"),
                )),
            }
        }
        AssetUri::Remote(url) => {
            desc.bytes = resolve_remote(&url, &asset_ref.name, opts, fetcher, warnings);
            desc.original_url = Some(url);
        }
        // Sentinel default: descriptor only, the importer supplies bytes.
        AssetUri::Default => {}
    }
    desc
}

fn split_asset_path(rest: &str) -> (AssetKind, String, String) {
    let (kind, file) = match rest.split_once('/') {
        Some((dir, file)) => (AssetKind::from_str_lenient(dir), file),
        None => (AssetKind::Custom, rest),
    };
    let (stem, ext) = match file.rsplit_once('.') {
        Some((stem, ext)) => (stem.to_owned(), ext.to_owned()),
        None => (file.to_owned(), String::new()),
    };
    (kind, stem, ext)
}

// ── Build ────────────────────────────────────────────────────────────────────

pub fn build(
    data: &CharacterData,
    assets: &[(CardAssetLink, Asset)],
    opts: &BuildOptions,
    storage: &dyn AssetStorage,
    optimizer: Option<&dyn AssetOptimizer>,
) -> Result<BuildOutcome> {
    let main_icon_id = main_icon_id(assets)?;

    // Kind filter, with the main icon forced back in.
    let selected: Vec<&(CardAssetLink, Asset)> = assets
        .iter()
        .filter(|(link, _)| opts.includes(link.kind) || link.asset_id == main_icon_id)
        .collect();

    let mut warnings = Vec::new();

    // Pass 1: pull bytes through the storage resolver.
    let mut resolved: Vec<(&CardAssetLink, OptimizeItem)> = Vec::new();
    for (link, asset) in &selected {
        match storage.read_asset_bytes(&asset.locator) {
            Ok(bytes) => resolved.push((
                link,
                OptimizeItem {
                    subject: link.name.clone(),
                    extension: link.extension.clone(),
                    bytes,
                },
            )),
            Err(e) if link.asset_id == main_icon_id => {
                return Err(EngineError::InvariantViolation(format!(
                    "main icon bytes unavailable, refusing to build archive: {e}"
                )));
            }
            Err(e) => {
                warnings.push(Warning::new(&link.name, format!("asset bytes unavailable: {e}")));
            }
        }
    }

    // Pass 2: optimize (concurrently with the `parallel` feature).
    let links: Vec<&CardAssetLink> = resolved.iter().map(|(l, _)| *l).collect();
    let items = resolved.into_iter().map(|(_, item)| item).collect();
    let optimized = optimize_batch(items, opts.optimize.as_ref(), optimizer, &mut warnings);

    // Pass 3: assemble entry names and the rewritten asset table.
    let mut payloads: Vec<(AssetRef, String, Vec<u8>)> = Vec::new();
    let mut used_names: BTreeSet<String> = BTreeSet::new();
    let mut total_size: u64 = 0;
    for (link, item) in links.into_iter().zip(optimized) {
        let ext = item.extension;
        let mut file_name = format!("{}.{ext}", sanitize_name(&link.name));
        let mut n = 1;
        while !used_names.insert(file_name.clone()) {
            file_name = format!("{}_{n}.{ext}", sanitize_name(&link.name));
            n += 1;
        }

        let path = format!("assets/{}/{file_name}", link.kind.as_str());
        total_size += item.bytes.len() as u64;
        payloads.push((
            AssetRef {
                kind: link.kind.as_str().to_owned(),
                uri: format!("embeded://{path}"),
                name: link.name.clone(),
                ext,
            },
            path,
            item.bytes,
        ));
    }

    // The whole point of the invariant: a built archive must carry the main
    // icon whatever the filter said.
    if !payloads
        .iter()
        .any(|(r, _, _)| r.kind == AssetKind::Icon.as_str())
    {
        return Err(EngineError::InvariantViolation(
            "built CHARX archive contains no icon asset".into(),
        ));
    }

    let mut card = data.clone();
    card.assets = payloads.iter().map(|(r, _, _)| r.clone()).collect();

    let mut zip = ZipBuilder::new();
    zip.add("card.json", &model::serialize_card(&card, SpecKind::Ccv3)?)?;
    for (_, path, bytes) in &payloads {
        zip.add(path, bytes)?;
    }

    let asset_count = payloads.len();
    Ok(BuildOutcome { bytes: zip.finish()?, asset_count, total_size, warnings })
}

/// The asset id that must end up in the archive: the `is_main` icon, else
/// the first icon.  A card with no icon at all cannot be built.
fn main_icon_id(assets: &[(CardAssetLink, Asset)]) -> Result<String> {
    assets
        .iter()
        .find(|(l, _)| l.kind == AssetKind::Icon && l.is_main)
        .or_else(|| assets.iter().find(|(l, _)| l.kind == AssetKind::Icon))
        .map(|(l, _)| l.asset_id.clone())
        .ok_or_else(|| {
            EngineError::InvariantViolation("card has no icon asset to use as main".into())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::{MemoryStorage, AssetStorage};
    use crate::model::AssetLocator;

    fn stored_asset(
        storage: &mut MemoryStorage,
        kind: AssetKind,
        name: &str,
        is_main: bool,
        bytes: &[u8],
    ) -> (CardAssetLink, Asset) {
        let asset = Asset::new("image/png", bytes.len() as u64);
        storage.write_asset_bytes(&asset.locator, bytes).unwrap();
        let link = CardAssetLink {
            asset_id: asset.id.clone(),
            kind,
            name: name.into(),
            extension: "png".into(),
            order: 0,
            is_main,
            tags: BTreeSet::new(),
            actor_index: None,
            original_url: None,
        };
        (link, asset)
    }

    fn card() -> CharacterData {
        CharacterData { name: "Aria".into(), ..Default::default() }
    }

    #[test]
    fn build_extract_round_trip() {
        let mut storage = MemoryStorage::new();
        let assets = vec![
            stored_asset(&mut storage, AssetKind::Icon, "main", true, b"icon-bytes"),
            stored_asset(&mut storage, AssetKind::Background, "tavern", false, b"bg-bytes"),
        ];

        let out = build(&card(), &assets, &BuildOptions::default(), &storage, None).unwrap();
        assert_eq!(out.asset_count, 2);
        assert!(out.warnings.is_empty());

        let contents = extract(&out.bytes, &ExtractOptions::default(), None).unwrap();
        assert_eq!(contents.spec_kind, SpecKind::Ccv3);
        assert_eq!(contents.data.name, "Aria");
        assert_eq!(contents.assets.len(), 2);
        let icon = contents.assets.iter().find(|a| a.kind == AssetKind::Icon).unwrap();
        assert!(icon.is_main);
        assert_eq!(icon.bytes.as_deref(), Some(b"icon-bytes".as_slice()));
    }

    #[test]
    fn main_icon_survives_kind_filter() {
        let mut storage = MemoryStorage::new();
        let assets = vec![
            stored_asset(&mut storage, AssetKind::Icon, "main", true, b"icon"),
            stored_asset(&mut storage, AssetKind::Sound, "hello", false, b"wav"),
        ];
        let opts = BuildOptions {
            included_asset_kinds: Some(vec![AssetKind::Sound]),
            ..Default::default()
        };
        let out = build(&card(), &assets, &opts, &storage, None).unwrap();
        let contents = extract(&out.bytes, &ExtractOptions::default(), None).unwrap();
        assert!(contents.assets.iter().any(|a| a.kind == AssetKind::Icon));
    }

    #[test]
    fn no_icon_is_an_invariant_violation() {
        let mut storage = MemoryStorage::new();
        let assets = vec![stored_asset(&mut storage, AssetKind::Sound, "hello", false, b"wav")];
        let err = build(&card(), &assets, &BuildOptions::default(), &storage, None).unwrap_err();
        assert!(matches!(err, EngineError::InvariantViolation(_)));
    }

    #[test]
    fn unreadable_non_icon_asset_is_a_warning() {
        let mut storage = MemoryStorage::new();
        let mut assets = vec![stored_asset(&mut storage, AssetKind::Icon, "main", true, b"icon")];
        // asset metadata exists but its bytes were never written
        let phantom = Asset::new("image/png", 10);
        assets.push((
            CardAssetLink {
                asset_id: phantom.id.clone(),
                kind: AssetKind::Emotion,
                name: "ghost".into(),
                extension: "png".into(),
                order: 1,
                is_main: false,
                tags: BTreeSet::new(),
                actor_index: None,
                original_url: None,
            },
            phantom,
        ));
        let out = build(&card(), &assets, &BuildOptions::default(), &storage, None).unwrap();
        assert_eq!(out.asset_count, 1);
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].subject.as_deref(), Some("ghost"));
    }

    #[test]
    fn remote_uri_without_fetcher_yields_descriptor_without_bytes() {
        let mut data = card();
        data.assets.push(AssetRef {
            kind: "icon".into(),
            uri: "https://example.com/portrait.png".into(),
            name: "main".into(),
            ext: "png".into(),
        });
        let mut zip = ZipBuilder::new();
        zip.add("card.json", &model::serialize_card(&data, SpecKind::Ccv3).unwrap()).unwrap();
        let bytes = zip.finish().unwrap();

        let contents = extract(&bytes, &ExtractOptions::default(), None).unwrap();
        assert_eq!(contents.assets.len(), 1);
        assert!(contents.assets[0].bytes.is_none());
        assert_eq!(
            contents.assets[0].original_url.as_deref(),
            Some("https://example.com/portrait.png")
        );
    }

    #[test]
    fn icon_listed_before_main_does_not_steal_the_main_flag() {
        let mut data = card();
        for name in ["alt", "main"] {
            data.assets.push(AssetRef {
                kind: "icon".into(),
                uri:  format!("embeded://assets/icon/{name}.png"),
                name: name.into(),
                ext:  "png".into(),
            });
        }
        let mut zip = ZipBuilder::new();
        zip.add("card.json", &model::serialize_card(&data, SpecKind::Ccv3).unwrap()).unwrap();
        zip.add("assets/icon/alt.png", b"alt").unwrap();
        zip.add("assets/icon/main.png", b"main").unwrap();
        let bytes = zip.finish().unwrap();

        let contents = extract(&bytes, &ExtractOptions::default(), None).unwrap();
        let mains: Vec<&str> = contents
            .assets
            .iter()
            .filter(|a| a.is_main)
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(mains, ["main"]);
    }

    #[test]
    fn legacy_flat_asset_path_is_found_via_candidates() {
        let mut data = card();
        data.assets.push(AssetRef {
            kind: "icon".into(),
            uri: "embeded://assets/icon/main.png".into(),
            name: "main".into(),
            ext: "png".into(),
        });
        let mut zip = ZipBuilder::new();
        zip.add("card.json", &model::serialize_card(&data, SpecKind::Ccv3).unwrap()).unwrap();
        // stored flat, not under the kind directory the URI declares
        zip.add("assets/main.png", b"legacy-bytes").unwrap();
        let bytes = zip.finish().unwrap();

        let contents = extract(&bytes, &ExtractOptions::default(), None).unwrap();
        assert_eq!(contents.assets[0].bytes.as_deref(), Some(b"legacy-bytes".as_slice()));
        assert!(contents.warnings.is_empty());
    }
}
