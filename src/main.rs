use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use cardpak::caps::{AssetStorage, CardStore, MemoryStorage, MemoryStore};
use cardpak::graph::AssetGraph;
use cardpak::import::{export_card, import_package, ExportFormat, ImportOptions};
use cardpak::archive::{sanitize_name, BuildOptions};

#[derive(Parser)]
#[command(name = "cardpak", about = "Character card package interchange CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect the card format of a file
    Detect {
        input: PathBuf,
    },
    /// Show card contents, assets, and validation issues
    Inspect {
        input: PathBuf,
    },
    /// Convert a card package to another format
    Convert {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Target format: ccv2, ccv3, png, charx, voxta
        #[arg(short, long)]
        to: String,
        /// Carrier image for PNG output (defaults to the stored portrait)
        #[arg(long)]
        base_image: Option<PathBuf>,
        /// Skip `{{macro}}` spacing normalization
        #[arg(long)]
        keep_macros: bool,
    },
    /// Extract all assets of a package into a directory
    Extract {
        input: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    match Cli::parse().command {

        // ── Detect ───────────────────────────────────────────────────────────
        Commands::Detect { input } => {
            let bytes = std::fs::read(&input)?;
            let format = cardpak::detect(&bytes, file_name(&input))?;
            println!("{}", format.name());
        }

        // ── Inspect ──────────────────────────────────────────────────────────
        Commands::Inspect { input } => {
            let (store, _storage, outcome) = import_file(&input, false)?;
            println!("── {} ──────────────────────────────────────────", input.display());
            println!("  Format   {}", outcome.format.name());
            println!("  Cards    {}", outcome.card_ids.len());
            for card_id in &outcome.card_ids {
                let card = store.get_card(card_id)?;
                println!();
                println!("  [{:?}] {}", card.spec_kind(), card.name());
                if let Some(data) = card.character() {
                    if !data.creator.is_empty() {
                        println!("    creator     {}", data.creator);
                    }
                    if !data.tags.is_empty() {
                        println!("    tags        {}", data.tags.join(", "));
                    }
                    if let Some(book) = &data.character_book {
                        println!("    book        {} entries", book.entries.len());
                    }
                }
                if let Some(collection) = card.collection() {
                    println!("    members     {}", collection.member_count);
                    println!("    scenarios   {}", collection.scenarios.len());
                }
                let links: Vec<_> = store
                    .list_assets_for_card(card_id)?
                    .into_iter()
                    .map(|(link, _)| link)
                    .collect();
                let graph = AssetGraph::new(links);
                println!("    assets      {}", graph.len());
                for issue in graph.validate() {
                    println!("    {:?}: {}", issue.severity, issue.message);
                }
            }
            for warning in &outcome.warnings {
                println!("  warning: {warning}");
            }
        }

        // ── Convert ──────────────────────────────────────────────────────────
        Commands::Convert { input, output, to, base_image, keep_macros } => {
            let (store, storage, outcome) = import_file(&input, keep_macros)?;
            let format = parse_format(&to, base_image)?;
            let built = export_card(
                outcome.card_id(),
                &format,
                &BuildOptions::default(),
                &store,
                &storage,
                None,
            )?;
            for warning in outcome.warnings.iter().chain(&built.warnings) {
                eprintln!("warning: {warning}");
            }
            std::fs::write(&output, &built.bytes)?;
            println!("Wrote {} ({} bytes, {} assets)", output.display(), built.bytes.len(), built.asset_count);
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { input, output_dir } => {
            let (store, storage, outcome) = import_file(&input, true)?;
            let mut written = 0usize;
            for card_id in &outcome.card_ids {
                let card = store.get_card(card_id)?;
                for (link, asset) in store.list_assets_for_card(card_id)? {
                    let bytes = match storage.read_asset_bytes(&asset.locator) {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            eprintln!("warning: {}: {e}", link.name);
                            continue;
                        }
                    };
                    // Names come from the imported file; sanitize before joining.
                    let dir = output_dir.join(sanitize_name(card.name())).join(link.kind.as_str());
                    std::fs::create_dir_all(&dir)?;
                    let path = dir.join(format!(
                        "{}.{}",
                        sanitize_name(&link.name),
                        sanitize_name(&link.extension)
                    ));
                    std::fs::write(&path, &bytes)?;
                    println!("  extracted  {}", path.display());
                    written += 1;
                }
            }
            println!("Extracted {written} asset(s) to {}", output_dir.display());
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn import_file(
    path: &Path,
    keep_macros: bool,
) -> Result<(MemoryStore, MemoryStorage, cardpak::ImportOutcome), Box<dyn std::error::Error>> {
    let bytes = std::fs::read(path)?;
    let mut store = MemoryStore::new();
    let mut storage = MemoryStorage::new();
    let opts = ImportOptions {
        file_name_hint: file_name(path).map(str::to_owned),
        canonicalize_macros: !keep_macros,
        ..Default::default()
    };
    let outcome = import_package(&bytes, &opts, &mut store, &mut storage, None)?;
    Ok((store, storage, outcome))
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

fn parse_format(
    name: &str,
    base_image: Option<PathBuf>,
) -> Result<ExportFormat, Box<dyn std::error::Error>> {
    Ok(match name.to_ascii_lowercase().as_str() {
        "ccv2" | "v2" | "json2" => ExportFormat::Ccv2Json,
        "ccv3" | "v3" | "json" => ExportFormat::Ccv3Json,
        "png" | "card" => ExportFormat::Png {
            base_image: base_image.map(std::fs::read).transpose()?,
        },
        "charx" => ExportFormat::Charx,
        "voxta" | "voxpkg" => ExportFormat::Voxta,
        other => return Err(format!("unknown target format '{other}'").into()),
    })
}
