// Analysis pipeline
// Numeric core, retrieval and narrative synthesis for one dataset per run


use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::analysis::{
    AlignmentSummary, AnalysisConfig, InsufficientDataError, PercentileProfile, QuadrantConfig,
    Reading, RiskFeatureSet, analyze_numeric,
};
use crate::config::{Config, ProfileKind};
use crate::embeddings::build_embedder;
use crate::retrieval::{RetrievalEngine, RetrievalError, RetrievalResult, SharedIndex};
use crate::synthesis::{FallbackChain, Narrative, NarrativeRequest, SynthesisError, TemplateNarrator};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Analysis run was cancelled")]
    Cancelled,
    #[error("Analysis worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    InsufficientDays,
    LowCoverage,
    RejectedDays,
    LowConfidence,
    NoReferenceData,
    ModelMismatch,
    RetrievalFailed,
    FallbackModelUsed,
    SynthesisUnavailable,
    TemplateNarrative,
}

/// A guarantee the report could not meet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    #[inline]
    pub fn new(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub run_id: Uuid,
    pub profile: ProfileKind,
    pub alignment: AlignmentSummary,
    pub percentiles: PercentileProfile,
    pub features: RiskFeatureSet,
    pub retrieval: RetrievalResult,
    pub narrative: Narrative,
    pub notices: Vec<Notice>,
}

impl AnalysisReport {
    #[inline]
    pub fn has_notice(&self, kind: NoticeKind) -> bool {
        self.notices.iter().any(|n| n.kind == kind)
    }
}

/// Runs the full analysis for one reading set at a time
///
/// Only the retrieval engine (and the shared index behind it) and the
/// narrative chain are shared between runs; every run owns its readings.
pub struct AnalysisPipeline {
    analysis: AnalysisConfig,
    quadrant: QuadrantConfig,
    retrieval: Arc<RetrievalEngine>,
    synthesis: Option<Arc<FallbackChain>>,
    max_tokens: u32,
}

impl AnalysisPipeline {
    #[inline]
    pub fn new(
        analysis: AnalysisConfig,
        quadrant: QuadrantConfig,
        retrieval: Arc<RetrievalEngine>,
    ) -> Self {
        Self {
            analysis,
            quadrant,
            retrieval,
            synthesis: None,
            max_tokens: 1000,
        }
    }

    #[inline]
    pub fn with_synthesis(mut self, chain: Arc<FallbackChain>, max_tokens: u32) -> Self {
        self.synthesis = Some(chain);
        self.max_tokens = max_tokens;
        self
    }

    #[inline]
    pub fn without_synthesis(mut self) -> Self {
        self.synthesis = None;
        self
    }

    /// Wire a pipeline from configuration over an already loaded index
    #[inline]
    pub fn from_config(config: &Config, index: Arc<SharedIndex>) -> Result<Self> {
        let embedder = build_embedder(config).context("Failed to create query embedder")?;
        let engine = RetrievalEngine::new(index, embedder, config.retrieval.top_k);
        let pipeline = Self::new(
            config.analysis.clone(),
            config.quadrant.clone(),
            Arc::new(engine),
        );

        if !config.synthesis.enabled {
            return Ok(pipeline);
        }
        let chain = FallbackChain::from_config(&config.synthesis, &config.ollama)
            .context("Failed to create narrative backends")?;
        Ok(pipeline.with_synthesis(Arc::new(chain), config.synthesis.max_tokens))
    }

    #[inline]
    pub fn analysis_config(&self) -> &AnalysisConfig {
        &self.analysis
    }

    /// Analyse one reading set
    ///
    /// Numeric shortfalls, missing reference data and synthesis failures only
    /// add notices. The run fails only when cancelled or when a worker dies.
    #[inline]
    pub async fn analyze(
        &self,
        readings: Vec<Reading>,
        cancel: &CancellationToken,
    ) -> Result<AnalysisReport, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("analysis_run", %run_id);
        self.run(run_id, readings, cancel).instrument(span).await
    }

    async fn run(
        &self,
        run_id: Uuid,
        readings: Vec<Reading>,
        cancel: &CancellationToken,
    ) -> Result<AnalysisReport, PipelineError> {
        info!("Analysing {} readings", readings.len());
        let mut notices = Vec::new();

        let analysis = self.analysis.clone();
        let quadrant = self.quadrant.clone();
        let numeric = run_blocking(cancel, move || {
            analyze_numeric(&readings, &analysis, &quadrant)
        })
        .await?;

        for shortfall in &numeric.alignment.sufficiency.shortfalls {
            let kind = match shortfall {
                InsufficientDataError::TooFewDays { .. } => NoticeKind::InsufficientDays,
                InsufficientDataError::LowCoverage { .. } => NoticeKind::LowCoverage,
            };
            warn!("{}", shortfall);
            notices.push(Notice::new(kind, upper_first(&shortfall.to_string())));
        }
        if !numeric.alignment.rejected_days.is_empty() {
            let dates: Vec<String> = numeric
                .alignment
                .rejected_days
                .iter()
                .map(|d| d.date.to_string())
                .collect();
            notices.push(Notice::new(
                NoticeKind::RejectedDays,
                format!(
                    "{} day(s) with less than {:.0}% sensor fill were excluded: {}",
                    dates.len(),
                    self.analysis.min_day_fill_ratio * 100.0,
                    dates.join(", ")
                ),
            ));
        }
        if numeric.features.low_confidence {
            notices.push(Notice::new(
                NoticeKind::LowConfidence,
                format!(
                    "{:.0}% of time-of-day buckets have no data; risk features are low confidence",
                    numeric.features.missing_bucket_ratio * 100.0
                ),
            ));
        }

        let retrieval = self.retrieve(&numeric.features, cancel, &mut notices).await?;
        let narrative = self
            .narrate(&numeric.features, &retrieval, cancel, &mut notices)
            .await?;

        info!(
            "Analysis complete: narrative by {}, {} notices",
            narrative.model_used,
            notices.len()
        );

        Ok(AnalysisReport {
            run_id,
            profile: self.analysis.profile,
            alignment: numeric.alignment.summary(),
            percentiles: numeric.profile,
            features: numeric.features,
            retrieval,
            narrative,
            notices,
        })
    }

    async fn retrieve(
        &self,
        features: &RiskFeatureSet,
        cancel: &CancellationToken,
        notices: &mut Vec<Notice>,
    ) -> Result<RetrievalResult, PipelineError> {
        let engine = Arc::clone(&self.retrieval);
        let owned_features = features.clone();
        let analysis = self.analysis.clone();
        let outcome = run_blocking(cancel, move || {
            engine.retrieve(&owned_features, &analysis)
        })
        .await?;

        Ok(outcome.unwrap_or_else(|error| {
            let kind = match error {
                RetrievalError::NoReferenceData => NoticeKind::NoReferenceData,
                RetrievalError::ModelMismatch { .. } => NoticeKind::ModelMismatch,
                RetrievalError::Embedding(_) => NoticeKind::RetrievalFailed,
            };
            warn!("Retrieval degraded: {:#}", error);
            notices.push(Notice::new(kind, error.to_string()));
            RetrievalResult::empty()
        }))
    }

    async fn narrate(
        &self,
        features: &RiskFeatureSet,
        retrieval: &RetrievalResult,
        cancel: &CancellationToken,
        notices: &mut Vec<Notice>,
    ) -> Result<Narrative, PipelineError> {
        let Some(chain) = self.synthesis.as_ref().map(Arc::clone) else {
            debug!("Narrative synthesis disabled");
            notices.push(Notice::new(
                NoticeKind::TemplateNarrative,
                "Narrative synthesis is disabled; the explanation is a fixed template",
            ));
            return Ok(TemplateNarrator::narrate(features, retrieval, &self.analysis));
        };

        let request = NarrativeRequest::build(features, retrieval, &self.analysis, self.max_tokens);
        let primary = chain.primary_model().unwrap_or_default().to_string();
        let outcome = run_blocking(cancel, move || chain.run(&request)).await?;

        match outcome {
            Ok(narrative) => {
                if narrative.used_fallback(&primary) {
                    let reason = narrative
                        .failures
                        .first()
                        .map(|f| f.reason.as_str())
                        .unwrap_or_default();
                    notices.push(Notice::new(
                        NoticeKind::FallbackModelUsed,
                        format!(
                            "Primary model {} failed ({}); narrative written by fallback model {}",
                            primary, reason, narrative.model_used
                        ),
                    ));
                }
                Ok(narrative)
            }
            Err(error) => {
                let message = match &error {
                    SynthesisError::ChainExhausted { failures } if failures.is_empty() => {
                        "No narrative models are configured".to_string()
                    }
                    other => other.to_string(),
                };
                warn!("Narrative synthesis unavailable: {}", message);
                notices.push(Notice::new(
                    NoticeKind::SynthesisUnavailable,
                    format!("{message}; the explanation is a fixed template"),
                ));
                Ok(TemplateNarrator::narrate(features, retrieval, &self.analysis))
            }
        }
    }
}

/// Run blocking work off the async runtime, abandoning it on cancellation
async fn run_blocking<T, F>(cancel: &CancellationToken, work: F) -> Result<T, PipelineError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }

    let task = tokio::task::spawn_blocking(work);
    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            warn!("Run cancelled; abandoning in-flight work");
            Err(PipelineError::Cancelled)
        }
        joined = task => Ok(joined?),
    }
}

fn upper_first(text: &str) -> String {
    let mut chars = text.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}
