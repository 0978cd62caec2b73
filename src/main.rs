use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use cardpacks::config::{AppConfig, StorageBackend};
use cardpacks::core::catalog::{
    describe_variant_type, BlobStore, BlobTable, CardManager, CardType, FileBlobStore,
    FileKeyValueStore, ImportResult, KeyValueStore, MemoryBlobStore, MemoryKeyValueStore,
    ObjectUrlRegistry,
};
use cardpacks::core::logging::{
    self, print_error, print_info, print_panel, print_success, print_warning,
};

/// cardpacks - manage Daggerheart custom card packs
#[derive(Parser)]
#[command(name = "cardpacks")]
#[command(author, version = cardpacks::VERSION, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Config file (defaults to ~/.config/cardpacks/config.toml)
    #[arg(long, global = true, env = "CARDPACKS_CONFIG")]
    config: Option<PathBuf>,

    /// Override the data directory
    #[arg(long, global = true, env = "CARDPACKS_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import one or more card pack files
    Import {
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,
    },
    /// List installed batches
    List,
    /// List visible cards
    Cards {
        /// Only cards of this type
        #[arg(long = "type", value_name = "TYPE")]
        card_type: Option<CardType>,
    },
    /// Remove a batch and its cards
    Remove {
        #[arg(value_name = "BATCH_ID")]
        batch_id: String,
    },
    /// Enable or disable a batch
    Toggle {
        #[arg(value_name = "BATCH_ID")]
        batch_id: String,
    },
    /// Show the merged custom field names
    Fields,
    /// Show the merged variant type definitions
    Variants,
    /// Attach an image to a card
    SetImage {
        #[arg(value_name = "CARD_ID")]
        card_id: String,
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Check storage integrity and usage
    Doctor,
    /// Remove orphaned records and repair the index
    Cleanup,
    /// Remove every custom batch
    Clear {
        /// Skip the safety check
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir = Some(dir.clone());
    }

    let _log_guard = logging::init(&config.data_dir().join("logs"));
    log::debug!("cardpacks v{} starting", cardpacks::VERSION);

    if let Err(e) = run(cli, config).await {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn open_manager(config: &AppConfig) -> anyhow::Result<CardManager> {
    let (kv, blobs): (Arc<dyn KeyValueStore>, Arc<dyn BlobStore>) = match config.storage.backend {
        StorageBackend::Memory => (
            Arc::new(MemoryKeyValueStore::new()),
            Arc::new(MemoryBlobStore::new(BlobTable::Real)),
        ),
        StorageBackend::File => (
            Arc::new(FileKeyValueStore::open(config.store_dir())?),
            Arc::new(FileBlobStore::open(config.blob_dir(), BlobTable::Real).await?),
        ),
    };

    let manager = CardManager::new(
        kv,
        blobs,
        Arc::new(ObjectUrlRegistry::new()),
        config.catalog_config(),
        config.image_cache_config(),
    );
    let report = manager.initialize().await.context("failed to load the catalog")?;
    for id in &report.skipped_batches {
        print_warning(&format!("Batch {} could not be loaded; run `cardpacks doctor`", id));
    }
    Ok(manager)
}

async fn run(cli: Cli, config: AppConfig) -> anyhow::Result<()> {
    let manager = open_manager(&config).await?;

    match cli.command {
        Commands::Import { files } => {
            let mut failures = 0;
            for file in &files {
                let text = std::fs::read_to_string(file)
                    .with_context(|| format!("cannot read {}", file.display()))?;
                let file_name = file
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default();
                let result = manager.import_json_str(&text, file_name).await;
                if !result.success {
                    failures += 1;
                }
                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                } else {
                    report_import(file_name, &result);
                }
            }
            if failures > 0 {
                bail!("{} of {} import(s) failed", failures, files.len());
            }
        }
        Commands::List => {
            let batches = manager.list_batches().await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&batches)?);
                return Ok(());
            }
            for batch in batches {
                let state = if batch.disabled { "disabled" } else { "enabled" };
                let system = if batch.is_system_batch { " [system]" } else { "" };
                println!(
                    "{:<40} {:<24} {:>5} cards  {:<8} {}{}",
                    batch.id,
                    batch.name,
                    batch.card_count,
                    state,
                    batch.import_time.format("%Y-%m-%d %H:%M"),
                    system
                );
            }
        }
        Commands::Cards { card_type } => {
            let cards = match card_type {
                Some(t) => manager.load_cards_by_type(t).await,
                None => manager.load_all_cards().await,
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&cards)?);
                return Ok(());
            }
            for card in &cards {
                println!(
                    "{:<36} {:<10} {:<16} {}",
                    card.id,
                    card.card_type,
                    card.name,
                    card.batch_name.as_deref().unwrap_or("-")
                );
            }
            print_info(&format!("{} card(s)", cards.len()));
        }
        Commands::Remove { batch_id } => {
            let result = manager.remove_batch(&batch_id).await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
            if !result.success {
                bail!(result.errors.join("; "));
            }
            print_success(&format!(
                "Removed batch {} ({} card(s))",
                batch_id,
                result.removed_card_ids.len()
            ));
        }
        Commands::Toggle { batch_id } => {
            let disabled = manager.toggle_batch_disabled(&batch_id).await?;
            print_success(&format!(
                "Batch {} is now {}",
                batch_id,
                if disabled { "disabled" } else { "enabled" }
            ));
        }
        Commands::Fields => {
            let fields = manager.get_aggregated_custom_fields().await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&fields)?);
                return Ok(());
            }
            for (category, names) in fields {
                println!("{}: {}", category, names.join(", "));
            }
        }
        Commands::Variants => {
            let types = manager.get_aggregated_variant_types().await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&types)?);
                return Ok(());
            }
            for (type_id, def) in &types {
                println!("{}  {}", type_id, describe_variant_type(def));
            }
            for diag in manager.aggregation_diagnostics().await {
                print_warning(&format!(
                    "Variant type '{}' from {} is overridden by {}",
                    diag.type_id, diag.overridden_batch, diag.winning_batch
                ));
            }
        }
        Commands::SetImage { card_id, file } => {
            if manager.get_card_by_id(&card_id).await.is_none() {
                bail!("no visible card with id '{}'", card_id);
            }
            let data = std::fs::read(&file)
                .with_context(|| format!("cannot read {}", file.display()))?;
            manager
                .store_card_image(&card_id, data, mime_type_for(&file))
                .await?;
            print_success(&format!("Stored image for {}", card_id));
        }
        Commands::Doctor => {
            let report = manager.validate_integrity().await?;
            let stats = manager.stats().await?;
            if cli.json {
                let out = serde_json::json!({ "integrity": report, "stats": stats });
                println!("{}", serde_json::to_string_pretty(&out)?);
                return Ok(());
            }
            let mut lines = vec![
                format!(
                    "Batches: {} ({} disabled)",
                    stats.batch_count, stats.disabled_batches
                ),
                format!("Cards: {} visible of {}", stats.visible_cards, stats.total_cards),
                format!(
                    "Storage: {} / {} bytes ({:.1}%)",
                    stats.storage.used_bytes,
                    stats.storage.quota_bytes,
                    stats.storage.usage_ratio() * 100.0
                ),
            ];
            for (card_type, count) in &stats.cards_by_type {
                lines.push(format!("  {:<10} {}", card_type, count));
            }
            print_panel("Catalog", &lines.join("\n"));

            if report.is_healthy() {
                print_success("Storage is consistent");
            } else {
                for key in &report.orphaned_keys {
                    print_warning(&format!("Orphaned record: {}", key));
                }
                for id in &report.missing_batches {
                    print_warning(&format!("Indexed batch without record: {}", id));
                }
                for id in &report.corrupted_batches {
                    print_warning(&format!("Corrupted batch record: {}", id));
                }
                if report.index_mismatch {
                    print_warning("Index totals disagree with its entries");
                }
                print_info("Run `cardpacks cleanup` to repair");
            }
        }
        Commands::Cleanup => {
            let report = manager.cleanup_orphaned_data().await?;
            print_success(&format!(
                "Removed {} orphaned record(s), repaired {} index entr(ies), freed {} bytes",
                report.removed_keys.len(),
                report.repaired_batches.len(),
                report.freed_bytes
            ));
        }
        Commands::Clear { yes } => {
            if !yes {
                bail!("this removes every custom batch; pass --yes to confirm");
            }
            let removed = manager.clear_all_custom_data().await?;
            print_success(&format!("Removed {} custom batch(es)", removed));
        }
    }

    Ok(())
}

fn report_import(file_name: &str, result: &ImportResult) {
    for warning in &result.warnings {
        print_warning(warning);
    }
    if result.success {
        print_success(&format!(
            "{}: imported {} card(s) as {}",
            file_name,
            result.imported_count,
            result.batch_id.as_deref().unwrap_or("-")
        ));
        return;
    }

    let stage = result
        .failed_stage
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    print_error(&format!("{}: import failed at stage {}", file_name, stage));
    for line in &result.errors {
        eprintln!("  {}", line);
    }
}

fn mime_type_for(path: &std::path::Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("webp") => "image/webp",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}
