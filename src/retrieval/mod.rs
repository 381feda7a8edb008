//! Retrieval of reference passages for a feature set
//!
//! The feature set is encoded into a fixed textual query, embedded with the
//! same backend that built the index, and scored against every passage of the
//! active index generation by cosine similarity.


use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::analysis::{
    AnalysisConfig, RiskFeatureSet, RiskKind, RiskWindow, TIR_TARGET, WidthStatus,
    days_below_target,
};
use crate::database::sqlite::{Database, StoredIndex};
use crate::embeddings::{Embedder, EmbeddingModel, cosine_similarity};

/// Consensus targets used to phrase the query
const TBR_TARGET: f64 = 0.04;
const TAR_TARGET: f64 = 0.25;
/// Days below the time-in-range target named in the query
const DAILY_QUERY_LIMIT: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub embedding_model: EmbeddingModel,
    pub top_k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corpus_dir: Option<PathBuf>,
    /// Output dimension of the hashing embedder
    pub hashing_dimension: usize,
}

impl Default for RetrievalConfig {
    #[inline]
    fn default() -> Self {
        Self {
            embedding_model: EmbeddingModel::Hashing,
            top_k: 5,
            corpus_dir: None,
            hashing_dimension: 384,
        }
    }
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("No reference data available; the explanation is generic and cites no sources")]
    NoReferenceData,
    #[error(
        "Reference index was built with '{index_model}' but queries use '{query_model}'; rebuild the index"
    )]
    ModelMismatch {
        index_model: String,
        query_model: String,
    },
    #[error("Failed to embed retrieval query: {0}")]
    Embedding(#[source] anyhow::Error),
}

/// An indexed passage of a reference document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferencePassage {
    pub document_id: String,
    pub document_title: String,
    pub document_order: i64,
    pub passage_index: i64,
    pub start_offset: usize,
    pub end_offset: usize,
    pub heading: String,
    pub raw_text: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
}

impl ReferencePassage {
    /// Byte range of the passage in its source document
    #[inline]
    pub fn offset_range(&self) -> std::ops::Range<usize> {
        self.start_offset..self.end_offset
    }
}

/// Immutable in-memory view of one index generation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexSnapshot {
    pub generation: Option<i64>,
    pub embedding_model: String,
    pub dimension: usize,
    pub passages: Vec<ReferencePassage>,
}

impl IndexSnapshot {
    #[inline]
    pub fn empty() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    #[inline]
    pub fn from_stored(stored: StoredIndex) -> Self {
        let StoredIndex {
            generation,
            documents,
            passages,
        } = stored;
        let titles: HashMap<&str, &str> = documents
            .iter()
            .map(|d| (d.document_id.as_str(), d.title.as_str()))
            .collect();

        let passages = passages
            .into_iter()
            .map(|p| ReferencePassage {
                document_title: titles
                    .get(p.document_id.as_str())
                    .map_or_else(|| p.document_id.clone(), |t| (*t).to_string()),
                embedding: p.vector(),
                document_order: p.document_order,
                passage_index: p.passage_index,
                start_offset: usize::try_from(p.start_offset).unwrap_or_default(),
                end_offset: usize::try_from(p.end_offset).unwrap_or_default(),
                document_id: p.document_id,
                heading: p.heading,
                raw_text: p.raw_text,
            })
            .collect();

        Self {
            generation: Some(generation.generation),
            dimension: usize::try_from(generation.dimension).unwrap_or_default(),
            embedding_model: generation.embedding_model,
            passages,
        }
    }
}

/// Process-wide handle to the active index, swapped whole on rebuild
#[derive(Debug, Default)]
pub struct SharedIndex {
    current: RwLock<Arc<IndexSnapshot>>,
}

impl SharedIndex {
    #[inline]
    pub fn new(snapshot: IndexSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Load the active generation; an absent index yields an empty snapshot
    #[inline]
    pub async fn load(database: &Database) -> Result<Self> {
        let snapshot = database
            .load_active_index()
            .await?
            .map_or_else(IndexSnapshot::empty, IndexSnapshot::from_stored);
        Ok(Self::new(snapshot))
    }

    #[inline]
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*guard)
    }

    /// Install a new snapshot, returning the one it replaced
    #[inline]
    pub fn replace(&self, snapshot: IndexSnapshot) -> Arc<IndexSnapshot> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, Arc::new(snapshot))
    }

    /// Reload from storage after a rebuild
    #[inline]
    pub async fn refresh(&self, database: &Database) -> Result<()> {
        let snapshot = database
            .load_active_index()
            .await?
            .map_or_else(IndexSnapshot::empty, IndexSnapshot::from_stored);
        debug!(
            "Refreshed shared index: generation {:?}, {} passages",
            snapshot.generation,
            snapshot.passages.len()
        );
        self.replace(snapshot);
        Ok(())
    }
}

/// Embedded query for one analysis run
#[derive(Debug, Clone, PartialEq)]
pub struct QueryVector {
    pub text: String,
    pub model_id: String,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedPassage {
    pub passage: ReferencePassage,
    pub score: f32,
}

/// Passages ordered most relevant first
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub query_text: String,
    pub generation: Option<i64>,
    pub matches: Vec<RetrievedPassage>,
}

impl RetrievalResult {
    #[inline]
    pub fn empty() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

/// Deterministic textual encoding of a feature set
///
/// Numbers use fixed precision and sections appear in a fixed order, so equal
/// feature sets always produce the same text and therefore the same vector.
#[inline]
pub fn encode_query(features: &RiskFeatureSet, analysis: &AnalysisConfig) -> String {
    let (low, high) = analysis.target_range();
    let mut lines = vec![
        format!("Ambulatory glucose profile for {}", analysis.profile),
        format!(
            "mean glucose {:.1} mg/dL, standard deviation {:.1} mg/dL, coefficient of variation {:.1}%",
            features.mean, features.sd, features.cv
        ),
        format!(
            "time in range {:.0}-{:.0} mg/dL {:.1}%, time below range {:.1}%, time above range {:.1}%",
            low,
            high,
            features.tir * 100.0,
            features.tbr * 100.0,
            features.tar * 100.0
        ),
        format!(
            "glucose management indicator {:.2}%, MAGE {:.1} mg/dL, glycemia risk index {:.1}",
            features.gmi, features.mage, features.gri.score
        ),
    ];

    if features.cv > analysis.cv_threshold {
        lines.push(format!(
            "high glucose variability: coefficient of variation above {:.0}% indicates unstable glucose",
            analysis.cv_threshold
        ));
    } else {
        lines.push("stable glucose variability within the coefficient of variation target".to_string());
    }

    if features.tir >= TIR_TARGET {
        lines.push("time in range meets the 70% target".to_string());
    } else {
        lines.push("time in range below the 70% target".to_string());
    }
    if features.tbr >= TBR_TARGET {
        lines.push("hypoglycemia risk: time below range exceeds 4% of readings".to_string());
    }
    if features.tar > TAR_TARGET {
        lines.push("hyperglycemia: time above range exceeds 25% of readings".to_string());
    }

    for excursion in &features.excursions {
        if let Some(summary) = excursion.describe() {
            let label = if excursion.kind.is_hypo() {
                "hypoglycemia"
            } else {
                "hyperglycemia"
            };
            lines.push(format!("{label}: {summary}"));
        }
    }
    for day in days_below_target(&features.daily, TIR_TARGET, DAILY_QUERY_LIMIT) {
        lines.push(format!("day below time in range target {}", day.describe()));
    }

    if let Some(envelope) = &features.envelope {
        lines.push(format!(
            "interquartile range {} ({:.0} mg/dL), interdecile range {} ({:.0} mg/dL)",
            envelope.iqr_status, envelope.mean_iqr, envelope.idr_status, envelope.mean_idr
        ));
        if envelope.iqr_status == WidthStatus::Wide {
            lines.push("wide interquartile range suggests inconsistent daily routines".to_string());
        }
    }

    for (category, count) in features.quadrant_counts() {
        if count > 0 {
            lines.push(format!("quadrant {category}: {count} windows"));
        }
    }

    lines.extend(features.risk_windows.iter().map(describe_window));

    if features.low_confidence {
        lines.push("limited sensor coverage; profile is indicative only".to_string());
    }

    let mut text = lines.join("\n");
    text.push('\n');
    text
}

fn describe_window(window: &RiskWindow) -> String {
    match window.kind {
        RiskKind::SustainedHigh => format!(
            "sustained high glucose {}-{} {} peaking at {:.0} mg/dL",
            window.start_time,
            window.end_time,
            period_of_day(window.start_bucket),
            window.extreme_value
        ),
        RiskKind::SustainedLow => {
            let nocturnal = if period_of_day(window.start_bucket) == "overnight" {
                " nocturnal hypoglycemia"
            } else {
                ""
            };
            format!(
                "sustained low glucose {}-{} {} reaching {:.0} mg/dL{}",
                window.start_time,
                window.end_time,
                period_of_day(window.start_bucket),
                window.extreme_value,
                nocturnal
            )
        }
        RiskKind::HighVariability => format!(
            "high variability across the whole day, coefficient of variation {:.1}%",
            window.extreme_value
        ),
    }
}

fn period_of_day(bucket: usize) -> &'static str {
    match bucket / 72 {
        0 => "overnight",
        1 => "morning",
        2 => "afternoon",
        _ => "evening",
    }
}

/// Rank passages by similarity to `query`
///
/// Equal scores are ordered by document order, then by earliest offset.
#[inline]
pub fn search(
    snapshot: &IndexSnapshot,
    query: &QueryVector,
    top_k: usize,
) -> Result<RetrievalResult, RetrievalError> {
    if snapshot.is_empty() {
        return Err(RetrievalError::NoReferenceData);
    }
    if snapshot.embedding_model != query.model_id {
        return Err(RetrievalError::ModelMismatch {
            index_model: snapshot.embedding_model.clone(),
            query_model: query.model_id.clone(),
        });
    }

    let mut scored: Vec<(f32, &ReferencePassage)> = snapshot
        .passages
        .iter()
        .map(|passage| (cosine_similarity(&query.vector, &passage.embedding), passage))
        .collect();

    scored.sort_by(|(score_a, a), (score_b, b)| {
        score_b
            .total_cmp(score_a)
            .then_with(|| a.document_order.cmp(&b.document_order))
            .then_with(|| a.start_offset.cmp(&b.start_offset))
            .then_with(|| a.passage_index.cmp(&b.passage_index))
    });

    let matches = scored
        .into_iter()
        .take(top_k)
        .map(|(score, passage)| RetrievedPassage {
            passage: passage.clone(),
            score,
        })
        .collect();

    Ok(RetrievalResult {
        query_text: query.text.clone(),
        generation: snapshot.generation,
        matches,
    })
}

/// Feature-to-passage retrieval over the shared index
pub struct RetrievalEngine {
    index: Arc<SharedIndex>,
    embedder: Arc<dyn Embedder>,
    top_k: usize,
}

impl RetrievalEngine {
    #[inline]
    pub fn new(index: Arc<SharedIndex>, embedder: Arc<dyn Embedder>, top_k: usize) -> Self {
        Self {
            index,
            embedder,
            top_k: top_k.max(1),
        }
    }

    #[inline]
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    #[inline]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Encode and embed the query for a feature set
    #[inline]
    pub fn query_for(
        &self,
        features: &RiskFeatureSet,
        analysis: &AnalysisConfig,
    ) -> Result<QueryVector, RetrievalError> {
        let text = encode_query(features, analysis);
        let vector = self
            .embedder
            .embed_one(&text)
            .map_err(RetrievalError::Embedding)?;
        Ok(QueryVector {
            text,
            model_id: self.embedder.model_id(),
            vector,
        })
    }

    /// Retrieve the top passages for a feature set. Blocks on the embedder.
    #[inline]
    pub fn retrieve(
        &self,
        features: &RiskFeatureSet,
        analysis: &AnalysisConfig,
    ) -> Result<RetrievalResult, RetrievalError> {
        let snapshot = self.index.snapshot();
        if snapshot.is_empty() {
            warn!("Reference index is empty; skipping retrieval");
            return Err(RetrievalError::NoReferenceData);
        }

        let query = self.query_for(features, analysis)?;
        let result = search(&snapshot, &query, self.top_k)?;

        info!(
            "Retrieved {} passages from generation {:?}",
            result.matches.len(),
            result.generation
        );
        Ok(result)
    }
}
