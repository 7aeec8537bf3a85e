//! Voxta `.voxpkg` codec.
//!
//! Layout inside the ZIP:
//!
//! | Entry                                   | Contents                     |
//! |-----------------------------------------|------------------------------|
//! | `package.json`                          | [`VoxtaPackage`] descriptor  |
//! | `characters/<id>/character.json`        | one [`VoxtaCharacter`]       |
//! | `characters/<id>/assets/<kind>/<file>`  | embedded binary asset        |
//! | `books/<id>.json`                       | [`VoxtaBook`]                |
//! | `scenarios/<id>.json`                   | [`VoxtaScenario`]            |
//!
//! `package.json` is optional on read (single-character exports in the wild
//! omit it) and always written on build.  Unlike CHARX, a character here may
//! legitimately carry no assets at all; the main-icon guarantee applies per
//! character whenever that character has at least one icon link.
//!
//! A character whose `AvatarUrl` vendor field points at a remote image gets
//! an icon descriptor carrying `original_url`; the bytes are fetched only
//! when `fetch_remote_assets` is enabled.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::debug;

use crate::caps::{AssetOptimizer, AssetStorage, RemoteFetcher};
use crate::error::{EngineError, Result, Warning};
use crate::model::{Asset, AssetKind, CardAssetLink, ExtractedAssetDescriptor};
use crate::voxta::schema::{VoxtaBook, VoxtaCharacter, VoxtaPackage, VoxtaScenario};

use super::{
    entry_names, mark_main_icon, open_zip, optimize_batch, read_entry, resolve_remote,
    BuildOptions, BuildOutcome, ExtractOptions, OptimizeItem, ZipBuilder,
};

/// One character plus the assets found under its directory.
#[derive(Debug, Clone)]
pub struct VoxpkgCharacter {
    pub character: VoxtaCharacter,
    pub assets: Vec<ExtractedAssetDescriptor>,
}

/// Result of [`extract`].
#[derive(Debug, Clone)]
pub struct VoxpkgContents {
    pub package: Option<VoxtaPackage>,
    pub characters: Vec<VoxpkgCharacter>,
    pub books: Vec<VoxtaBook>,
    pub scenarios: Vec<VoxtaScenario>,
    pub warnings: Vec<Warning>,
}

impl VoxpkgContents {
    /// A package imports as a collection when it bundles several characters
    /// or carries scenario definitions.
    pub fn is_multi_character(&self) -> bool {
        self.characters.len() > 1 || !self.scenarios.is_empty()
    }

    /// Books referenced by any character in the package.
    pub fn books_for(&self, character: &VoxtaCharacter) -> Vec<VoxtaBook> {
        self.books
            .iter()
            .filter(|b| character.memory_books.contains(&b.id))
            .cloned()
            .collect()
    }
}

// ── Extract ──────────────────────────────────────────────────────────────────

pub fn extract(
    bytes: &[u8],
    opts: &ExtractOptions,
    fetcher: Option<&dyn RemoteFetcher>,
) -> Result<VoxpkgContents> {
    let mut archive = open_zip(bytes)?;
    let names = entry_names(&archive);
    let mut warnings = Vec::new();

    let package: Option<VoxtaPackage> = read_entry(&mut archive, "package.json")
        .and_then(|b| match serde_json::from_slice(&b) {
            Ok(p) => Some(p),
            Err(e) => {
                warnings.push(Warning::new("package.json", format!("unreadable descriptor: {e}")));
                None
            }
        });

    let mut characters = Vec::new();
    for name in &names {
        let Some(id) = character_id_of(name) else { continue };
        let Some(raw) = read_entry(&mut archive, name) else { continue };
        let character: VoxtaCharacter = match serde_json::from_slice(&raw) {
            Ok(c) => c,
            Err(e) => {
                warnings.push(Warning::new(name.as_str(), format!("skipping character: {e}")));
                continue;
            }
        };
        let assets = collect_character_assets(
            &mut archive,
            &names,
            id,
            &character,
            opts,
            fetcher,
            &mut warnings,
        );
        characters.push(VoxpkgCharacter { character, assets });
    }
    if characters.is_empty() {
        return Err(EngineError::MalformedContainer(
            "Voxta package contains no readable character descriptor".into(),
        ));
    }

    // Package order is authoritative when the descriptor lists it.
    if let Some(pkg) = &package {
        characters.sort_by_key(|c| {
            pkg.characters
                .iter()
                .position(|id| *id == c.character.id)
                .unwrap_or(usize::MAX)
        });
    }

    let books = parse_json_dir(&mut archive, &names, "books/", &mut warnings);
    let scenarios = parse_json_dir(&mut archive, &names, "scenarios/", &mut warnings);

    debug!(
        characters = characters.len(),
        books = books.len(),
        scenarios = scenarios.len(),
        "voxpkg extracted"
    );
    Ok(VoxpkgContents { package, characters, books, scenarios, warnings })
}

fn character_id_of(entry: &str) -> Option<&str> {
    let rest = entry.strip_prefix("characters/")?;
    let (id, file) = rest.split_once('/')?;
    (file == "character.json").then_some(id)
}

fn collect_character_assets(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    names: &[String],
    id: &str,
    character: &VoxtaCharacter,
    opts: &ExtractOptions,
    fetcher: Option<&dyn RemoteFetcher>,
    warnings: &mut Vec<Warning>,
) -> Vec<ExtractedAssetDescriptor> {
    let prefix = format!("characters/{id}/assets/");
    let mut assets = Vec::new();

    for name in names {
        let Some(rest) = name.strip_prefix(prefix.as_str()) else { continue };
        if rest.is_empty() || rest.ends_with('/') {
            continue;
        }
        let Some(bytes) = read_entry(archive, name) else {
            warnings.push(Warning::new(name.as_str(), "unreadable archive entry"));
            continue;
        };
        let (kind, file) = match rest.split_once('/') {
            Some((dir, file)) => (AssetKind::from_str_lenient(dir), file),
            None => (AssetKind::Custom, rest),
        };
        let (stem, ext) = file.rsplit_once('.').unwrap_or((file, ""));
        assets.push(ExtractedAssetDescriptor::embedded(kind, stem, ext, bytes));
    }

    // Remote avatar reference, resolved only on request.  Embedded icons
    // outrank it for the main-icon pick below.
    if let Some(url) = character.extra.get("AvatarUrl").and_then(Value::as_str) {
        let fetched = resolve_remote(url, &character.name, opts, fetcher, warnings);
        assets.push(ExtractedAssetDescriptor {
            kind: AssetKind::Icon,
            name: "avatar".into(),
            extension: extension_of(url).unwrap_or("png").into(),
            is_main: false,
            tags: BTreeSet::new(),
            actor_index: None,
            bytes: fetched,
            original_url: Some(url.to_owned()),
        });
    }
    mark_main_icon(&mut assets);
    assets
}

fn extension_of(url: &str) -> Option<&str> {
    let tail = url.rsplit('/').next()?;
    let (_, ext) = tail.rsplit_once('.')?;
    (!ext.is_empty() && ext.len() <= 4).then_some(ext)
}

fn parse_json_dir<T: serde::de::DeserializeOwned>(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    names: &[String],
    prefix: &str,
    warnings: &mut Vec<Warning>,
) -> Vec<T> {
    let mut out = Vec::new();
    for name in names {
        if !name.starts_with(prefix) || !name.ends_with(".json") {
            continue;
        }
        let Some(raw) = read_entry(archive, name) else { continue };
        match serde_json::from_slice(&raw) {
            Ok(value) => out.push(value),
            Err(e) => warnings.push(Warning::new(name.as_str(), format!("skipping entry: {e}"))),
        }
    }
    out
}

// ── Build ────────────────────────────────────────────────────────────────────

/// Everything that goes into a built package.
#[derive(Debug, Clone, Default)]
pub struct VoxpkgBuild {
    pub package: VoxtaPackage,
    pub characters: Vec<(VoxtaCharacter, Vec<(CardAssetLink, Asset)>)>,
    pub books: Vec<VoxtaBook>,
    pub scenarios: Vec<VoxtaScenario>,
}

pub fn build(
    input: &VoxpkgBuild,
    opts: &BuildOptions,
    storage: &dyn AssetStorage,
    optimizer: Option<&dyn AssetOptimizer>,
) -> Result<BuildOutcome> {
    let mut zip = ZipBuilder::new();
    let mut warnings = Vec::new();
    let mut asset_count = 0usize;
    let mut total_size = 0u64;

    let mut package = input.package.clone();
    package.characters = input.characters.iter().map(|(c, _)| c.id.clone()).collect();
    zip.add("package.json", &serde_json::to_vec(&package)?)?;

    for (character, assets) in &input.characters {
        if character.id.is_empty() {
            return Err(EngineError::InvariantViolation(format!(
                "character {:?} has no id, cannot be placed in a package",
                character.name
            )));
        }
        let dir = format!("characters/{}", character.id);
        zip.add(&format!("{dir}/character.json"), &serde_json::to_vec(character)?)?;

        let main_icon_id = assets
            .iter()
            .find(|(l, _)| l.kind == AssetKind::Icon && l.is_main)
            .or_else(|| assets.iter().find(|(l, _)| l.kind == AssetKind::Icon))
            .map(|(l, _)| l.asset_id.clone());

        let mut resolved: Vec<(&CardAssetLink, OptimizeItem)> = Vec::new();
        for (link, asset) in assets {
            let forced = Some(&link.asset_id) == main_icon_id.as_ref();
            if !opts.includes(link.kind) && !forced {
                continue;
            }
            match storage.read_asset_bytes(&asset.locator) {
                Ok(bytes) => resolved.push((
                    link,
                    OptimizeItem {
                        subject: link.name.clone(),
                        extension: link.extension.clone(),
                        bytes,
                    },
                )),
                Err(e) if forced => {
                    return Err(EngineError::InvariantViolation(format!(
                        "main icon bytes unavailable for {:?}: {e}",
                        character.name
                    )));
                }
                Err(e) => {
                    warnings.push(Warning::new(&link.name, format!("asset bytes unavailable: {e}")));
                }
            }
        }

        let links: Vec<&CardAssetLink> = resolved.iter().map(|(l, _)| *l).collect();
        let items = resolved.into_iter().map(|(_, i)| i).collect();
        let optimized = optimize_batch(items, opts.optimize.as_ref(), optimizer, &mut warnings);

        let mut used: BTreeSet<String> = BTreeSet::new();
        for (link, item) in links.into_iter().zip(optimized) {
            let mut file = format!("{}.{}", link.name, item.extension);
            let mut n = 1;
            while !used.insert(file.clone()) {
                file = format!("{}_{n}.{}", link.name, item.extension);
                n += 1;
            }
            total_size += item.bytes.len() as u64;
            asset_count += 1;
            zip.add(&format!("{dir}/assets/{}/{file}", link.kind.as_str()), &item.bytes)?;
        }
    }

    for book in &input.books {
        zip.add(&format!("books/{}.json", book.id), &serde_json::to_vec(book)?)?;
    }
    for scenario in &input.scenarios {
        zip.add(&format!("scenarios/{}.json", scenario.id), &serde_json::to_vec(scenario)?)?;
    }

    Ok(BuildOutcome { bytes: zip.finish()?, asset_count, total_size, warnings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::{AssetStorage, MemoryStorage};
    use crate::voxta::schema::{VoxtaBookItem, VoxtaScenarioRole};
    use serde_json::json;

    fn character(id: &str, name: &str) -> VoxtaCharacter {
        VoxtaCharacter { id: id.into(), name: name.into(), ..Default::default() }
    }

    fn icon_asset(storage: &mut MemoryStorage, name: &str, bytes: &[u8]) -> (CardAssetLink, Asset) {
        let asset = Asset::new("image/png", bytes.len() as u64);
        storage.write_asset_bytes(&asset.locator, bytes).unwrap();
        let link = CardAssetLink {
            asset_id: asset.id.clone(),
            kind: AssetKind::Icon,
            name: name.into(),
            extension: "png".into(),
            order: 0,
            is_main: true,
            tags: BTreeSet::new(),
            actor_index: None,
            original_url: None,
        };
        (link, asset)
    }

    fn sample_build(storage: &mut MemoryStorage) -> VoxpkgBuild {
        let mut mira = character("c-1", "Mira");
        mira.memory_books = vec!["b-1".into()];
        VoxpkgBuild {
            package: VoxtaPackage {
                id: "p-1".into(),
                name: "Archive Pack".into(),
                ..Default::default()
            },
            characters: vec![
                (mira, vec![icon_asset(storage, "main", b"mira-icon")]),
                (character("c-2", "Juno"), vec![]),
            ],
            books: vec![VoxtaBook {
                id: "b-1".into(),
                name: "Lore".into(),
                items: vec![VoxtaBookItem {
                    id: "i-1".into(),
                    keywords: vec!["argo".into()],
                    text: "The Argo sank twice.".into(),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            scenarios: vec![VoxtaScenario {
                id: "s-1".into(),
                name: "Reunion".into(),
                roles: vec![
                    VoxtaScenarioRole { name: "Archivist".into(), character_id: "c-1".into() },
                    VoxtaScenarioRole { name: "Visitor".into(), character_id: "c-2".into() },
                ],
                ..Default::default()
            }],
        }
    }

    #[test]
    fn build_extract_round_trip() {
        let mut storage = MemoryStorage::new();
        let input = sample_build(&mut storage);
        let out = build(&input, &BuildOptions::default(), &storage, None).unwrap();
        assert_eq!(out.asset_count, 1);

        let contents = extract(&out.bytes, &ExtractOptions::default(), None).unwrap();
        assert!(contents.is_multi_character());
        assert_eq!(contents.characters.len(), 2);
        // package order preserved
        assert_eq!(contents.characters[0].character.name, "Mira");
        assert_eq!(contents.characters[1].character.name, "Juno");
        assert_eq!(contents.books.len(), 1);
        assert_eq!(contents.scenarios[0].roles.len(), 2);

        let mira = &contents.characters[0];
        assert_eq!(mira.assets.len(), 1);
        assert!(mira.assets[0].is_main);
        assert_eq!(mira.assets[0].bytes.as_deref(), Some(b"mira-icon".as_slice()));
        assert_eq!(contents.books_for(&mira.character).len(), 1);
    }

    #[test]
    fn single_character_without_package_json() {
        let mut zip = ZipBuilder::new();
        zip.add(
            "characters/solo/character.json",
            &serde_json::to_vec(&character("solo", "Solo")).unwrap(),
        )
        .unwrap();
        let bytes = zip.finish().unwrap();

        let contents = extract(&bytes, &ExtractOptions::default(), None).unwrap();
        assert!(contents.package.is_none());
        assert!(!contents.is_multi_character());
        assert_eq!(contents.characters[0].character.name, "Solo");
    }

    #[test]
    fn no_characters_is_malformed() {
        let mut zip = ZipBuilder::new();
        zip.add("package.json", b"{}").unwrap();
        let bytes = zip.finish().unwrap();
        assert!(matches!(
            extract(&bytes, &ExtractOptions::default(), None),
            Err(EngineError::MalformedContainer(_))
        ));
    }

    #[test]
    fn remote_avatar_is_descriptor_only_without_fetching() {
        let mut ch = character("c-1", "Mira");
        ch.extra.insert("AvatarUrl".into(), json!("https://example.com/mira.webp"));
        let mut zip = ZipBuilder::new();
        zip.add("characters/c-1/character.json", &serde_json::to_vec(&ch).unwrap()).unwrap();
        let bytes = zip.finish().unwrap();

        let contents = extract(&bytes, &ExtractOptions::default(), None).unwrap();
        let avatar = &contents.characters[0].assets[0];
        assert_eq!(avatar.kind, AssetKind::Icon);
        assert!(avatar.bytes.is_none());
        assert_eq!(avatar.original_url.as_deref(), Some("https://example.com/mira.webp"));
        assert_eq!(avatar.extension, "webp");
        assert!(avatar.is_main);
    }

    #[test]
    fn icon_stored_before_main_does_not_steal_the_main_flag() {
        let mut zip = ZipBuilder::new();
        zip.add(
            "characters/c-1/character.json",
            &serde_json::to_vec(&character("c-1", "Mira")).unwrap(),
        )
        .unwrap();
        zip.add("characters/c-1/assets/icon/alt.png", b"alt-bytes").unwrap();
        zip.add("characters/c-1/assets/icon/main.png", b"main-bytes").unwrap();
        let bytes = zip.finish().unwrap();

        let contents = extract(&bytes, &ExtractOptions::default(), None).unwrap();
        let mains: Vec<&str> = contents.characters[0]
            .assets
            .iter()
            .filter(|a| a.is_main)
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(mains, ["main"]);
    }

    #[test]
    fn fetch_failure_is_a_warning_not_an_error() {
        struct FailingFetcher;
        impl crate::caps::RemoteFetcher for FailingFetcher {
            fn fetch(&self, url: &str) -> crate::error::Result<Vec<u8>> {
                Err(EngineError::NotFound(url.to_owned()))
            }
        }

        let mut ch = character("c-1", "Mira");
        ch.extra.insert("AvatarUrl".into(), json!("https://example.com/gone.png"));
        let mut zip = ZipBuilder::new();
        zip.add("characters/c-1/character.json", &serde_json::to_vec(&ch).unwrap()).unwrap();
        let bytes = zip.finish().unwrap();

        let opts = ExtractOptions { fetch_remote_assets: true };
        let contents = extract(&bytes, &opts, Some(&FailingFetcher)).unwrap();
        assert_eq!(contents.warnings.len(), 1);
        assert!(contents.characters[0].assets[0].bytes.is_none());
    }

    #[test]
    fn corrupt_book_is_skipped_with_warning() {
        let mut storage = MemoryStorage::new();
        let input = sample_build(&mut storage);
        let out = build(&input, &BuildOptions::default(), &storage, None).unwrap();

        // rebuild the archive with one bad book entry appended
        let mut archive = open_zip(&out.bytes).unwrap();
        let names = entry_names(&archive);
        let mut zip = ZipBuilder::new();
        for name in &names {
            let data = read_entry(&mut archive, name).unwrap();
            zip.add(name, &data).unwrap();
        }
        zip.add("books/broken.json", b"{ not json").unwrap();
        let bytes = zip.finish().unwrap();

        let contents = extract(&bytes, &ExtractOptions::default(), None).unwrap();
        assert_eq!(contents.books.len(), 1);
        assert!(contents.warnings.iter().any(|w| w.subject.as_deref() == Some("books/broken.json")));
    }
}
