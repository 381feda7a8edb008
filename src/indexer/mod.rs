// Indexer module
// Builds the reference passage index from a directory of text documents


use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::database::sqlite::models::{NewDocument, NewPassage};
use crate::database::sqlite::queries::{DocumentQueries, GenerationQueries, PassageQueries};
use crate::database::sqlite::{Database, StoredIndex};
use crate::embeddings::Embedder;
use crate::embeddings::chunking::{ChunkingConfig, chunk_document};

const CORPUS_EXTENSIONS: [&str; 2] = ["md", "txt"];

/// A reference document read from the corpus directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusDocument {
    /// Path relative to the corpus root, `/`-separated
    pub document_id: String,
    pub title: String,
    pub content: String,
    pub content_hash: String,
    pub document_order: i64,
}

impl CorpusDocument {
    fn byte_len(&self) -> i64 {
        i64::try_from(self.content.len()).unwrap_or(i64::MAX)
    }

    fn record(&self) -> NewDocument {
        NewDocument {
            document_id: self.document_id.clone(),
            title: self.title.clone(),
            content_hash: self.content_hash.clone(),
            byte_len: self.byte_len(),
            document_order: self.document_order,
        }
    }
}

/// Statistics about a completed build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStats {
    pub generation: i64,
    pub documents: usize,
    pub passages: usize,
    pub embedded_documents: usize,
    pub reused_documents: usize,
    pub removed_documents: usize,
    pub replaced_generations: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// A new generation was written and activated
    Built(BuildStats),
    /// Corpus and embedding model match the active generation
    Unchanged { generation: i64 },
}

pub struct ReferenceIndexer {
    database: Database,
    embedder: Arc<dyn Embedder>,
    chunking_config: ChunkingConfig,
    batch_size: usize,
}

impl ReferenceIndexer {
    #[inline]
    pub fn new(
        database: Database,
        embedder: Arc<dyn Embedder>,
        chunking_config: ChunkingConfig,
    ) -> Self {
        Self {
            database,
            embedder,
            chunking_config,
            batch_size: 32,
        }
    }

    #[inline]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[inline]
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Build (or incrementally rebuild) the index for `corpus_dir`.
    ///
    /// The new generation is written completely before it is activated, so
    /// readers see either the previous index or the new one.
    #[inline]
    pub async fn build(&self, corpus_dir: &Path, force: bool) -> Result<BuildOutcome> {
        self.database.remove_orphaned_generations().await?;

        let root = corpus_dir.to_path_buf();
        let documents = tokio::task::spawn_blocking(move || scan_corpus(&root))
            .await
            .context("Corpus scan task failed")??;

        let model_id = self.embedder.model_id();
        let previous = self.database.load_active_index().await?;

        if let Some(active) = previous
            .as_ref()
            .filter(|active| !force && is_unchanged(active, &documents, &model_id))
        {
            info!("Reference index is up to date ({})", active.generation);
            return Ok(BuildOutcome::Unchanged {
                generation: active.generation.generation,
            });
        }

        let reusable = reusable_documents(previous.as_ref(), &model_id, force);
        let to_embed: Vec<&CorpusDocument> = documents
            .iter()
            .filter(|d| reusable.get(d.document_id.as_str()) != Some(&d.content_hash.as_str()))
            .collect();

        info!(
            "Indexing {} documents ({} to embed) with {}",
            documents.len(),
            to_embed.len(),
            model_id
        );

        let embedded = self.embed_documents(&to_embed).await?;

        let previous_generation = previous.as_ref().map(|p| p.generation.generation);
        let dimension = i64::try_from(self.embedder.dimension()).unwrap_or(i64::MAX);

        let mut tx = self
            .database
            .pool()
            .begin()
            .await
            .context("Failed to begin index build transaction")?;

        let generation = GenerationQueries::create(&mut *tx, &model_id, dimension).await?;
        let mut passage_count = 0usize;
        let mut reused_documents = 0usize;

        for document in &documents {
            DocumentQueries::insert(&mut *tx, generation, &document.record()).await?;

            if let Some(passages) = embedded.get(document.document_id.as_str()) {
                for passage in passages {
                    PassageQueries::insert(&mut *tx, generation, passage).await?;
                }
                passage_count += passages.len();
            } else if let Some(from) = previous_generation {
                let copied = PassageQueries::copy_document(
                    &mut *tx,
                    from,
                    generation,
                    &document.document_id,
                    document.document_order,
                )
                .await?;
                passage_count += usize::try_from(copied).unwrap_or(usize::MAX);
                reused_documents += 1;
            }
        }

        GenerationQueries::set_counts(
            &mut *tx,
            generation,
            i64::try_from(documents.len()).unwrap_or(i64::MAX),
            i64::try_from(passage_count).unwrap_or(i64::MAX),
        )
        .await?;

        tx.commit()
            .await
            .context("Failed to commit index generation")?;

        let replaced_generations = self.database.activate_generation(generation).await?;

        let removed_documents = previous.as_ref().map_or(0, |p| {
            p.documents
                .iter()
                .filter(|old| !documents.iter().any(|d| d.document_id == old.document_id))
                .count()
        });

        let stats = BuildStats {
            generation,
            documents: documents.len(),
            passages: passage_count,
            embedded_documents: to_embed.len(),
            reused_documents,
            removed_documents,
            replaced_generations,
        };

        info!(
            "Built index generation {}: {} documents, {} passages ({} embedded, {} reused, {} removed)",
            stats.generation,
            stats.documents,
            stats.passages,
            stats.embedded_documents,
            stats.reused_documents,
            stats.removed_documents
        );

        Ok(BuildOutcome::Built(stats))
    }

    /// Chunk and embed documents, keyed by document id
    async fn embed_documents(
        &self,
        documents: &[&CorpusDocument],
    ) -> Result<HashMap<String, Vec<NewPassage>>> {
        let bar = if console::user_attended_stderr() && !documents.is_empty() {
            ProgressBar::new(documents.len() as u64).with_style(
                ProgressStyle::with_template("{spinner} [{pos}/{len}] Embedding {msg}")
                    .context("Invalid progress bar template")?,
            )
        } else {
            ProgressBar::hidden()
        };

        let mut embedded = HashMap::with_capacity(documents.len());

        for document in documents {
            bar.set_message(document.document_id.clone());

            let chunks = chunk_document(&document.content, &document.title, &self.chunking_config);
            if chunks.is_empty() {
                warn!("No passages produced for {}", document.document_id);
                embedded.insert(document.document_id.clone(), Vec::new());
                bar.inc(1);
                continue;
            }

            let texts: Vec<String> = chunks
                .iter()
                .map(|chunk| format!("{}\n{}", chunk.heading_path, chunk.content))
                .collect();

            let mut vectors = Vec::with_capacity(texts.len());
            for batch in texts.chunks(self.batch_size) {
                let embedder = Arc::clone(&self.embedder);
                let batch = batch.to_vec();
                let batch_vectors = tokio::task::spawn_blocking(move || embedder.embed(&batch))
                    .await
                    .context("Embedding task failed")?
                    .with_context(|| {
                        format!("Failed to embed passages of {}", document.document_id)
                    })?;
                vectors.extend(batch_vectors);
            }

            let passages = chunks
                .into_iter()
                .zip(vectors)
                .map(|(chunk, embedding)| NewPassage {
                    document_id: document.document_id.clone(),
                    document_order: document.document_order,
                    passage_index: i64::try_from(chunk.chunk_index).unwrap_or(i64::MAX),
                    start_offset: i64::try_from(chunk.start_offset).unwrap_or(i64::MAX),
                    end_offset: i64::try_from(chunk.end_offset).unwrap_or(i64::MAX),
                    heading: chunk.heading_path,
                    raw_text: chunk.content,
                    embedding,
                })
                .collect::<Vec<_>>();

            debug!(
                "Embedded {} passages for {}",
                passages.len(),
                document.document_id
            );
            embedded.insert(document.document_id.clone(), passages);
            bar.inc(1);
        }

        bar.finish_and_clear();
        Ok(embedded)
    }
}

/// Documents of the active generation whose passages may be copied as-is
fn reusable_documents<'a>(
    previous: Option<&'a StoredIndex>,
    model_id: &str,
    force: bool,
) -> HashMap<&'a str, &'a str> {
    match previous {
        Some(active) if !force && active.generation.embedding_model == model_id => active
            .documents
            .iter()
            .map(|d| (d.document_id.as_str(), d.content_hash.as_str()))
            .collect(),
        _ => HashMap::new(),
    }
}

fn is_unchanged(active: &StoredIndex, documents: &[CorpusDocument], model_id: &str) -> bool {
    active.generation.embedding_model == model_id
        && active.documents.len() == documents.len()
        && active
            .documents
            .iter()
            .zip(documents)
            .all(|(old, new)| {
                old.document_id == new.document_id
                    && old.content_hash == new.content_hash
                    && old.document_order == new.document_order
            })
}

/// Read every `.md`/`.txt` file under `root`, sorted by relative path
#[inline]
pub fn scan_corpus(root: &Path) -> Result<Vec<CorpusDocument>> {
    if !root.is_dir() {
        return Err(anyhow::anyhow!(
            "Reference corpus directory not found: {}",
            root.display()
        ));
    }

    let mut entries = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry
            .with_context(|| format!("Failed to walk reference corpus: {}", root.display()))?;
        if !entry.file_type().is_file() || !has_corpus_extension(entry.path()) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let id = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        entries.push((id, entry.into_path()));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut documents = Vec::with_capacity(entries.len());
    for (document_id, path) in entries {
        let bytes = std::fs::read(&path)
            .with_context(|| format!("Failed to read reference document: {}", path.display()))?;
        let hash = content_hash(&bytes);
        // Passage offsets index the source text, so lossy decoding is not an option
        let content = match String::from_utf8(bytes) {
            Ok(content) => content,
            Err(e) => {
                warn!(
                    "Skipping reference document {}: not valid UTF-8 ({})",
                    path.display(),
                    e.utf8_error()
                );
                continue;
            }
        };
        let title = document_title(&content, &path);

        documents.push(CorpusDocument {
            document_id,
            title,
            content_hash: hash,
            content,
            document_order: i64::try_from(documents.len()).unwrap_or(i64::MAX),
        });
    }

    debug!(
        "Found {} reference documents under {}",
        documents.len(),
        root.display()
    );
    Ok(documents)
}

fn has_corpus_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| CORPUS_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

/// First markdown heading, or the file stem
fn document_title(content: &str, path: &Path) -> String {
    content
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("# "))
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .map_or_else(
            || {
                path.file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default()
            },
            ToString::to_string,
        )
}

/// Hex SHA-256 of the raw document bytes
#[inline]
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
