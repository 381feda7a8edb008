use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::analysis::{ExcursionDistribution, RiskKind, TIR_TARGET, days_below_target};
use crate::config::{Config, ProfileKind};
use crate::database::sqlite::Database;
use crate::embeddings::ollama::OllamaClient;
use crate::embeddings::{EmbeddingModel, build_embedder};
use crate::indexer::{BuildOutcome, ReferenceIndexer};
use crate::ingest::parse_csv_file;
use crate::pipeline::{AnalysisPipeline, AnalysisReport, PipelineError};
use crate::retrieval::SharedIndex;

/// Options of the `analyze` subcommand
#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    pub file: PathBuf,
    pub profile: Option<ProfileKind>,
    pub top_k: Option<usize>,
    pub no_narrative: bool,
    pub json: bool,
}

/// Build or incrementally rebuild the reference index
#[inline]
pub async fn build_index(corpus: Option<PathBuf>, force: bool) -> Result<()> {
    let config = Config::load_default().context("Failed to load configuration")?;
    let corpus_dir = corpus.unwrap_or_else(|| config.corpus_dir());

    println!("📚 Indexing reference corpus: {}", corpus_dir.display());

    let database = Database::initialize_from_config_dir(config.get_base_dir())
        .await
        .context("Failed to initialize database")?;
    let embedder = build_embedder(&config)?;
    println!("🧮 Embedding model: {}", embedder.model_id());

    let indexer = ReferenceIndexer::new(database.clone(), embedder, config.chunking.clone());
    match indexer.build(&corpus_dir, force).await? {
        BuildOutcome::Unchanged { generation } => {
            println!("✅ Index is up to date (generation {})", generation);
        }
        BuildOutcome::Built(stats) => {
            println!("✅ Activated index generation {}", stats.generation);
            println!("   Documents: {}", stats.documents);
            println!("   Passages: {}", stats.passages);
            println!("   Re-embedded documents: {}", stats.embedded_documents);
            println!("   Reused documents: {}", stats.reused_documents);
            if stats.removed_documents > 0 {
                println!("   Removed documents: {}", stats.removed_documents);
            }
            if stats.documents == 0 {
                println!(
                    "⚠️  No .md or .txt documents found; analyses will use generic explanations"
                );
            }
        }
    }

    database
        .optimize()
        .await
        .context("Failed to optimize database")?;
    Ok(())
}

/// Print the state of the reference index and the model server
#[inline]
pub async fn show_status() -> Result<()> {
    let config = Config::load_default().unwrap_or_default();

    println!("📊 CGM Insight Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🗄️  Reference Index:");
    let db_path = config.index_database_path();
    match Database::open_existing(&db_path).await {
        Ok(Some(database)) => match database.active_generation().await {
            Ok(Some(generation)) => {
                println!("   ✅ Active generation: {}", generation.generation);
                println!("   🧮 Embedding model: {}", generation.embedding_model);
                println!("   🔢 Dimension: {}", generation.dimension);
                println!("   📄 Documents: {}", generation.document_count);
                println!("   🧩 Passages: {}", generation.passage_count);
                println!(
                    "   🕒 Built: {}",
                    generation.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            Ok(None) => println!("   ⚠️  No index built yet. Run 'cgm-insight index'."),
            Err(e) => println!("   ❌ Failed to read index state - {}", e),
        },
        Ok(None) => {
            println!("   ⚠️  No index database at {}", db_path.display());
            println!("   Run 'cgm-insight index' to build one.");
        }
        Err(e) => println!("   ❌ Failed to open index database - {}", e),
    }
    println!("   📁 Corpus: {}", config.corpus_dir().display());

    println!();
    println!("🤖 Ollama Status:");
    let uses_ollama = config.retrieval.embedding_model == EmbeddingModel::Ollama;
    if !uses_ollama && !config.synthesis.enabled {
        println!("   💤 Not used (hashing embeddings, narrative synthesis disabled)");
        return Ok(());
    }
    match OllamaClient::new(&config.ollama) {
        Ok(client) => match tokio::task::spawn_blocking(move || client.ping()).await? {
            Ok(()) => {
                println!(
                    "   ✅ Ollama: Connected ({}:{})",
                    config.ollama.host, config.ollama.port
                );
                if uses_ollama {
                    println!("   📋 Embedding model: {}", config.ollama.model);
                }
            }
            Err(e) => println!("   ⚠️  Ollama: Unreachable - {}", e),
        },
        Err(e) => println!("   ❌ Ollama: Invalid configuration - {}", e),
    }
    if config.synthesis.enabled {
        println!(
            "   🗣️  Narrative models: {}",
            config.synthesis.model_chain().join(" → ")
        );
    }

    Ok(())
}

/// Print the built-in patient profiles
#[inline]
pub fn list_profiles() {
    println!("Patient profiles ({} total):", ProfileKind::ALL.len());
    println!();
    for kind in ProfileKind::ALL {
        let profile = kind.profile();
        println!("🩺 {} ({})", kind, profile.display_name);
        println!(
            "   Target range: {:.0}-{:.0} mg/dL",
            profile.target_range.0, profile.target_range.1
        );
        println!("   Consensus targets: {}", profile.targets_summary);
        for band in &profile.bands {
            println!("   • {}", band.label);
        }
        println!();
    }
}

/// Run one analysis over a CSV export; Ctrl-C cancels the run
#[inline]
pub async fn analyze_file(options: AnalyzeOptions) -> Result<()> {
    let mut config = Config::load_default().context("Failed to load configuration")?;
    if let Some(kind) = options.profile {
        config.analysis.apply_profile(kind);
    }
    if let Some(top_k) = options.top_k {
        config.retrieval.top_k = top_k;
    }
    if options.no_narrative {
        config.synthesis.enabled = false;
    }
    config.validate().context("Invalid analysis options")?;

    let ingested = parse_csv_file(&options.file)
        .with_context(|| format!("Failed to read {}", options.file.display()))?;
    info!(
        "Read {} readings from {} rows ({} without glucose)",
        ingested.readings.len(),
        ingested.rows_read,
        ingested.blank_glucose_rows
    );

    let index = load_shared_index(&config.index_database_path()).await?;
    let pipeline = AnalysisPipeline::from_config(&config, Arc::new(index))?;

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };
    let result = pipeline.analyze(ingested.readings, &cancel).await;
    watcher.abort();

    let report = match result {
        Ok(report) => report,
        Err(PipelineError::Cancelled) => {
            println!("\n📴 Analysis cancelled; no results were kept");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if options.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
    } else {
        print_report(&report);
    }
    Ok(())
}

async fn load_shared_index(db_path: &Path) -> Result<SharedIndex> {
    match Database::open_existing(db_path).await? {
        Some(database) => SharedIndex::load(&database).await,
        None => {
            warn!("No reference index at {}", db_path.display());
            Ok(SharedIndex::default())
        }
    }
}

fn print_report(report: &AnalysisReport) {
    let alignment = &report.alignment;
    let features = &report.features;

    println!("📈 Glucose Analysis ({})", report.profile);
    println!("{}", "=".repeat(50));
    if let (Some(first), Some(last)) = (alignment.first_day, alignment.last_day) {
        println!("   Period: {} to {}", first, last);
    }
    println!(
        "   Valid days: {} ({} rejected), coverage {:.1}%",
        alignment.valid_days,
        alignment.rejected_days.len(),
        alignment.coverage_ratio * 100.0
    );
    println!("   Readings: {}", features.reading_count);
    println!();

    println!("🔢 Metrics:");
    println!(
        "   Mean {:.1} mg/dL, SD {:.1} mg/dL, CV {:.1}%",
        features.mean, features.sd, features.cv
    );
    println!(
        "   GMI {:.2}%, MAGE {:.1} mg/dL, GRI {:.1}",
        features.gmi, features.mage, features.gri.score
    );
    println!(
        "   TIR {:.1}%, TBR {:.1}%, TAR {:.1}%",
        features.tir * 100.0,
        features.tbr * 100.0,
        features.tar * 100.0
    );
    for band in &features.bands {
        println!("   • {}: {:.1}%", band.label, band.fraction * 100.0);
    }
    if let Some(envelope) = &features.envelope {
        println!(
            "   IQR {:.1} mg/dL ({}), IDR {:.1} mg/dL ({})",
            envelope.mean_iqr, envelope.iqr_status, envelope.mean_idr, envelope.idr_status
        );
    }
    println!();

    let excursions: Vec<String> = features
        .excursions
        .iter()
        .filter_map(ExcursionDistribution::describe)
        .collect();
    if !excursions.is_empty() {
        println!("🩸 Excursions:");
        for line in &excursions {
            println!("   • {}", line);
        }
        println!();
    }

    let worst_days = days_below_target(&features.daily, TIR_TARGET, 5);
    if !worst_days.is_empty() {
        println!("📅 Days below the time-in-range target:");
        for day in worst_days {
            println!("   • {}", day.describe());
        }
        println!();
    }

    if !features.risk_windows.is_empty() {
        println!("🚨 Risk Windows:");
        for window in &features.risk_windows {
            if window.kind == RiskKind::HighVariability {
                println!("   • {} (severity {:.2})", window.kind, window.severity);
            } else {
                println!(
                    "   • {} {}-{} (severity {:.2})",
                    window.kind, window.start_time, window.end_time, window.severity
                );
            }
        }
        println!();
    }

    let quadrants = features.quadrant_counts();
    if !quadrants.is_empty() {
        println!("🧭 Quadrants:");
        for (quadrant, count) in quadrants {
            println!("   • {}: {} window(s)", quadrant, count);
        }
        println!();
    }

    if !report.retrieval.is_empty() {
        println!("📚 References:");
        for (i, found) in report.retrieval.matches.iter().enumerate() {
            println!(
                "   [{}] {} ({}) score {:.3}",
                i + 1,
                found.passage.document_title,
                found.passage.document_id,
                found.score
            );
        }
        println!();
    }

    println!("🗣️  Narrative ({}):", report.narrative.model_used);
    for line in report.narrative.text.lines() {
        println!("   {}", line);
    }

    if !report.notices.is_empty() {
        println!();
        println!("⚠️  Notices:");
        for notice in &report.notices {
            println!("   • {}", notice.message);
        }
    }
    println!();
    println!("Run ID: {}", report.run_id);
}
