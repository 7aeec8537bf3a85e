//! Shared ZIP plumbing for the CHARX and Voxta archive codecs.
//!
//! Both codecs share the same contract shape — `extract(bytes, options)`
//! returning descriptors plus warnings, `build(…)` returning bytes plus a
//! summary — but have different internal layouts, so each lives in its own
//! module.  Partial success is the norm: a single unresolvable asset
//! produces a [`Warning`], never a failure of the whole operation.

pub mod charx;
pub mod voxta;

use std::io::{Cursor, Read, Write};

use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::caps::{AssetOptimizer, OptimizeSettings, RemoteFetcher};
use crate::error::{EngineError, Result, Warning};
use crate::model::{AssetKind, ExtractedAssetDescriptor};

/// Extraction knobs.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// When set, remote (`http`/`https`) asset URIs are resolved through the
    /// injected fetcher.  Fetch failure is a per-asset warning.
    pub fetch_remote_assets: bool,
}

/// Build knobs.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Asset kinds to include; `None` means every visible kind.  The main
    /// icon is included regardless — see the archive invariant.
    pub included_asset_kinds: Option<Vec<AssetKind>>,
    pub optimize: Option<OptimizeSettings>,
}

impl BuildOptions {
    pub fn includes(&self, kind: AssetKind) -> bool {
        match &self.included_asset_kinds {
            Some(kinds) => kinds.contains(&kind),
            None => kind.is_visible(),
        }
    }
}

/// Build summary: the archive plus what went into it.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub bytes: Vec<u8>,
    pub asset_count: usize,
    /// Total uncompressed asset bytes written.
    pub total_size: u64,
    pub warnings: Vec<Warning>,
}

// ── URI classification ───────────────────────────────────────────────────────

/// Where an asset reference points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetUri {
    /// Path inside the archive.  Both the canonical `embeded://` scheme
    /// (sic — the CHARX spec spells it that way) and the corrected
    /// `embedded://` are accepted.
    Embedded(String),
    /// Remote URL; resolved only when `fetch_remote_assets` is enabled.
    Remote(String),
    /// `ccdefault:` sentinel — the consumer supplies its own default.
    Default,
}

impl AssetUri {
    pub fn parse(uri: &str) -> Self {
        let trimmed = uri.trim();
        if let Some(path) = trimmed
            .strip_prefix("embeded://")
            .or_else(|| trimmed.strip_prefix("embedded://"))
        {
            return AssetUri::Embedded(path.to_owned());
        }
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return AssetUri::Remote(trimmed.to_owned());
        }
        if trimmed == "ccdefault:" || trimmed.is_empty() {
            return AssetUri::Default;
        }
        // Bare paths occur in the wild; treat them as embedded.
        AssetUri::Embedded(trimmed.to_owned())
    }
}

/// Fallback candidate list for locating an asset entry in legacy archives.
/// Consulted in order; some producers store assets by original filename,
/// others by a flat name or an asset-id-derived name.
pub fn entry_candidates(uri_path: &str, kind: AssetKind, name: &str, ext: &str) -> Vec<String> {
    let mut out = vec![uri_path.to_owned()];
    let file = format!("{name}.{ext}");
    out.push(format!("assets/{}/{file}", kind.as_str()));
    out.push(format!("assets/{file}"));
    out.push(file);
    out.dedup();
    out
}

// ── ZIP helpers ──────────────────────────────────────────────────────────────

pub(crate) fn open_zip(bytes: &[u8]) -> Result<ZipArchive<Cursor<&[u8]>>> {
    ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| EngineError::MalformedContainer(format!("unreadable ZIP: {e}")))
}

pub(crate) fn read_entry(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Option<Vec<u8>> {
    let mut file = archive.by_name(name).ok()?;
    let mut buf = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut buf).ok()?;
    Some(buf)
}

pub(crate) fn entry_names(archive: &ZipArchive<Cursor<&[u8]>>) -> Vec<String> {
    archive.file_names().map(str::to_owned).collect()
}

pub(crate) struct ZipBuilder {
    writer: ZipWriter<Cursor<Vec<u8>>>,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self { writer: ZipWriter::new(Cursor::new(Vec::new())) }
    }

    pub fn add(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        // Media payloads are already compressed; Stored avoids double work.
        let method = if bytes.len() > 512 && name.ends_with(".json") {
            CompressionMethod::Deflated
        } else {
            CompressionMethod::Stored
        };
        self.writer.start_file(name, FileOptions::default().compression_method(method))?;
        self.writer.write_all(bytes)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<Vec<u8>> {
        Ok(self.writer.finish()?.into_inner())
    }
}

/// Designate exactly one main icon across a set of extracted descriptors:
/// the icon named `main` when present, else the first icon.  The flag is
/// cleared everywhere else, so the designation is unique by construction.
pub(crate) fn mark_main_icon(assets: &mut [ExtractedAssetDescriptor]) {
    let main = assets
        .iter()
        .position(|a| a.kind == AssetKind::Icon && a.name == "main")
        .or_else(|| assets.iter().position(|a| a.kind == AssetKind::Icon));
    for (i, asset) in assets.iter_mut().enumerate() {
        asset.is_main = Some(i) == main;
    }
}

/// File-name sanitizer for names that came from archive or card JSON.
/// Path separators and other non-filename characters collapse to `_`.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() { "asset".to_owned() } else { cleaned }
}

// ── Shared asset resolution ──────────────────────────────────────────────────

/// Resolve a remote asset through the injected fetcher.  Returns the bytes
/// on success; pushes a warning and returns `None` on any failure or when
/// fetching is disabled.
pub(crate) fn resolve_remote(
    url: &str,
    subject: &str,
    opts: &ExtractOptions,
    fetcher: Option<&dyn RemoteFetcher>,
    warnings: &mut Vec<Warning>,
) -> Option<Vec<u8>> {
    if !opts.fetch_remote_assets {
        return None;
    }
    let Some(fetcher) = fetcher else {
        warnings.push(Warning::new(subject, "remote fetch enabled but no fetcher supplied"));
        return None;
    };
    match fetcher.fetch(url) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            tracing::warn!(subject, url, error = %e, "remote asset fetch failed");
            warnings.push(Warning::new(subject, format!("failed to fetch {url}: {e}")));
            None
        }
    }
}

/// One asset going through the optimization pass.
pub(crate) struct OptimizeItem {
    pub subject: String,
    pub extension: String,
    pub bytes: Vec<u8>,
}

/// Run the optional optimizer over a batch of assets.  Each asset's
/// transform is independent and side-effect-free, so with the `parallel`
/// feature the batch fans out across rayon; the caller's archive assembly
/// is the only join point.  A failed optimization keeps the original bytes
/// and reports a warning — never a fatal error.
pub(crate) fn optimize_batch(
    items: Vec<OptimizeItem>,
    settings: Option<&OptimizeSettings>,
    optimizer: Option<&dyn AssetOptimizer>,
    warnings: &mut Vec<Warning>,
) -> Vec<OptimizeItem> {
    let (Some(settings), Some(optimizer)) = (settings, optimizer) else {
        return items;
    };

    let run = |item: OptimizeItem| -> (OptimizeItem, Option<Warning>) {
        match optimizer.optimize(&item.bytes, &item.extension, settings) {
            Ok(out) => {
                tracing::debug!(
                    subject = %item.subject,
                    original = out.original_size,
                    optimized = out.optimized_size,
                    "asset optimized"
                );
                (
                    OptimizeItem { subject: item.subject, extension: out.extension, bytes: out.bytes },
                    None,
                )
            }
            Err(e) => {
                let warning =
                    Warning::new(&item.subject, format!("optimization failed, keeping original: {e}"));
                (item, Some(warning))
            }
        }
    };

    #[cfg(feature = "parallel")]
    let results: Vec<(OptimizeItem, Option<Warning>)> = {
        use rayon::prelude::*;
        items.into_par_iter().map(run).collect()
    };
    #[cfg(not(feature = "parallel"))]
    let results: Vec<(OptimizeItem, Option<Warning>)> = items.into_iter().map(run).collect();

    results
        .into_iter()
        .map(|(item, warning)| {
            warnings.extend(warning);
            item
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_classification() {
        assert_eq!(AssetUri::parse("embeded://assets/icon/main.png"), AssetUri::Embedded("assets/icon/main.png".into()));
        assert_eq!(AssetUri::parse("embedded://assets/x.png"), AssetUri::Embedded("assets/x.png".into()));
        assert_eq!(AssetUri::parse("https://example.com/a.png"), AssetUri::Remote("https://example.com/a.png".into()));
        assert_eq!(AssetUri::parse("ccdefault:"), AssetUri::Default);
        assert_eq!(AssetUri::parse("assets/other/b.png"), AssetUri::Embedded("assets/other/b.png".into()));
    }

    #[test]
    fn candidate_list_is_ordered_and_deduped() {
        let c = entry_candidates("assets/icon/main.png", AssetKind::Icon, "main", "png");
        assert_eq!(c, ["assets/icon/main.png", "assets/main.png", "main.png"]);
    }

    #[test]
    fn main_icon_designation_is_unique() {
        let mut assets = vec![
            ExtractedAssetDescriptor::embedded(AssetKind::Icon, "alt", "png", vec![1]),
            ExtractedAssetDescriptor::embedded(AssetKind::Icon, "main", "png", vec![2]),
        ];
        mark_main_icon(&mut assets);
        let mains: Vec<&str> = assets.iter().filter(|a| a.is_main).map(|a| a.name.as_str()).collect();
        assert_eq!(mains, ["main"]);

        // no "main"-named icon: the first icon wins
        let mut assets = vec![
            ExtractedAssetDescriptor::embedded(AssetKind::Background, "bg", "png", vec![0]),
            ExtractedAssetDescriptor::embedded(AssetKind::Icon, "a", "png", vec![1]),
            ExtractedAssetDescriptor::embedded(AssetKind::Icon, "b", "png", vec![2]),
        ];
        mark_main_icon(&mut assets);
        let mains: Vec<&str> = assets.iter().filter(|a| a.is_main).map(|a| a.name.as_str()).collect();
        assert_eq!(mains, ["a"]);
    }

    #[test]
    fn sanitizer_neutralizes_path_traversal() {
        assert_eq!(sanitize_name("../../etc/passwd"), "______etc_passwd");
        assert_eq!(sanitize_name("..\\boot.ini"), "___boot_ini");
        assert_eq!(sanitize_name("plain-name_7"), "plain-name_7");
        assert_eq!(sanitize_name(""), "asset");
    }

    #[test]
    fn build_options_filtering() {
        let all = BuildOptions::default();
        assert!(all.includes(AssetKind::Icon));
        assert!(!all.includes(AssetKind::PackageOriginal));

        let only_sound = BuildOptions {
            included_asset_kinds: Some(vec![AssetKind::Sound]),
            ..Default::default()
        };
        assert!(only_sound.includes(AssetKind::Sound));
        assert!(!only_sound.includes(AssetKind::Icon));
    }
}
