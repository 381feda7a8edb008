// Narrative synthesis
// Ordered LLM fallback chain plus a deterministic template narrator


use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::analysis::{
    AnalysisConfig, ExcursionDistribution, ExcursionKind, RiskFeatureSet, RiskKind,
    TIR_TARGET, days_below_target,
};
use crate::config::OllamaConfig;
use crate::embeddings::ollama::build_agent;
use crate::retrieval::RetrievalResult;

/// `model_used` of narratives produced without an LLM
pub const TEMPLATE_MODEL: &str = "template";

const DAILY_PROMPT_LIMIT: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SynthesisConfig {
    pub enabled: bool,
    pub primary_model: String,
    /// Tried in order after the primary model fails transiently
    pub fallback_models: Vec<String>,
    pub timeout_secs: u64,
    pub attempts_per_model: u32,
    pub max_tokens: u32,
}

impl Default for SynthesisConfig {
    #[inline]
    fn default() -> Self {
        Self {
            enabled: true,
            primary_model: "llama3.2:3b".to_string(),
            fallback_models: vec!["llama3.2:1b".to_string()],
            timeout_secs: 60,
            attempts_per_model: 1,
            max_tokens: 1000,
        }
    }
}

impl SynthesisConfig {
    /// Primary then fallback models, without blanks or case-insensitive repeats
    #[inline]
    pub fn model_chain(&self) -> Vec<String> {
        let mut chain: Vec<String> = Vec::with_capacity(1 + self.fallback_models.len());
        for model in std::iter::once(&self.primary_model).chain(&self.fallback_models) {
            let model = model.trim();
            if model.is_empty() || chain.iter().any(|m| m.eq_ignore_ascii_case(model)) {
                continue;
            }
            chain.push(model.to_string());
        }
        chain
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelFailure {
    pub model: String,
    pub reason: String,
    pub transient: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisError {
    #[error("Model {model} is temporarily unavailable: {reason}")]
    Transient { model: String, reason: String },
    #[error("Model {model} failed: {reason}")]
    Permanent { model: String, reason: String },
    #[error("Every narrative model failed: {}", describe_failures(.failures))]
    ChainExhausted { failures: Vec<ModelFailure> },
}

impl SynthesisError {
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    fn into_failure(self) -> ModelFailure {
        match self {
            Self::Transient { model, reason } => ModelFailure {
                model,
                reason,
                transient: true,
            },
            Self::Permanent { model, reason } => ModelFailure {
                model,
                reason,
                transient: false,
            },
            Self::ChainExhausted { failures } => ModelFailure {
                model: String::new(),
                reason: describe_failures(&failures),
                transient: false,
            },
        }
    }
}

fn describe_failures(failures: &[ModelFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.model, f.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Prompt pair handed to a backend, built from the features and passages
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NarrativeRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: u32,
    /// Whether reference passages were available to cite
    pub grounded: bool,
}

impl NarrativeRequest {
    #[inline]
    pub fn build(
        features: &RiskFeatureSet,
        retrieval: &RetrievalResult,
        analysis: &AnalysisConfig,
        max_tokens: u32,
    ) -> Self {
        let (low, high) = analysis.target_range();
        let mut lines = vec![
            format!(
                "Patient profile: {}. Target range {:.0}-{:.0} mg/dL.",
                analysis.profile, low, high
            ),
            format!(
                "Readings: {}. Mean {:.1} mg/dL, SD {:.1} mg/dL, CV {:.1}%, GMI {:.2}%, MAGE {:.1} mg/dL, GRI {:.1}.",
                features.reading_count,
                features.mean,
                features.sd,
                features.cv,
                features.gmi,
                features.mage,
                features.gri.score
            ),
            format!(
                "TIR {:.1}%, TBR {:.1}%, TAR {:.1}%.",
                features.tir * 100.0,
                features.tbr * 100.0,
                features.tar * 100.0
            ),
        ];
        lines.extend(
            features
                .excursions
                .iter()
                .filter_map(ExcursionDistribution::describe)
                .map(|summary| format!("Excursions: {summary}.")),
        );
        lines.extend(
            days_below_target(&features.daily, TIR_TARGET, DAILY_PROMPT_LIMIT)
                .into_iter()
                .map(|day| format!("Day below target: {}.", day.describe())),
        );
        lines.extend(features.risk_windows.iter().map(|window| {
            format!(
                "Flagged {} {}-{} (severity {:.2}).",
                window.kind, window.start_time, window.end_time, window.severity
            )
        }));
        if features.low_confidence {
            lines.push(
                "Sensor coverage is limited; treat the profile as indicative only.".to_string(),
            );
        }

        if !retrieval.is_empty() {
            lines.push(String::new());
            lines.push("Reference passages:".to_string());
            lines.extend(retrieval.matches.iter().enumerate().map(|(i, found)| {
                format!(
                    "[{}] {} ({}): {}",
                    i + 1,
                    found.passage.document_title,
                    found.passage.heading,
                    found.passage.raw_text
                )
            }));
        }
        lines.push(String::new());
        lines.push(
            "Explain these results and cite passages by number where relevant.".to_string(),
        );
        let user_prompt = lines.join("\n");

        Self {
            system_prompt:
                "You are a diabetes management expert interpreting ambulatory glucose profiles."
                    .to_string(),
            user_prompt,
            max_tokens,
            grounded: !retrieval.is_empty(),
        }
    }
}

/// A language model able to write a narrative
///
/// Implementations block; async callers run them on the blocking pool.
pub trait NarrativeBackend: Send + Sync {
    fn model_id(&self) -> &str;

    fn synthesize(&self, request: &NarrativeRequest) -> Result<String, SynthesisError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct Narrative {
    pub text: String,
    pub model_used: String,
    pub grounded: bool,
    /// Models that failed before `model_used` answered
    pub failures: Vec<ModelFailure>,
}

impl Narrative {
    #[inline]
    pub fn is_template(&self) -> bool {
        self.model_used == TEMPLATE_MODEL
    }

    /// Whether a model other than `primary` produced the text after failures
    #[inline]
    pub fn used_fallback(&self, primary: &str) -> bool {
        !self.is_template()
            && !self.failures.is_empty()
            && !self.model_used.eq_ignore_ascii_case(primary)
    }
}

/// Ordered candidates tried until one answers
pub struct FallbackChain {
    backends: Vec<Arc<dyn NarrativeBackend>>,
    attempts_per_model: u32,
}

impl FallbackChain {
    #[inline]
    pub fn new(backends: Vec<Arc<dyn NarrativeBackend>>, attempts_per_model: u32) -> Self {
        Self {
            backends,
            attempts_per_model: attempts_per_model.max(1),
        }
    }

    /// One Ollama chat backend per model of the configured chain
    #[inline]
    pub fn from_config(synthesis: &SynthesisConfig, ollama: &OllamaConfig) -> Result<Self> {
        let timeout = Duration::from_secs(synthesis.timeout_secs);
        let backends = synthesis
            .model_chain()
            .into_iter()
            .map(|model| {
                OllamaChatBackend::new(ollama, &model, timeout)
                    .map(|backend| Arc::new(backend) as Arc<dyn NarrativeBackend>)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(backends, synthesis.attempts_per_model))
    }

    #[inline]
    pub fn models(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.model_id()).collect()
    }

    #[inline]
    pub fn primary_model(&self) -> Option<&str> {
        self.backends.first().map(|b| b.model_id())
    }

    /// Try each backend in order; a permanent failure ends the chain early
    #[inline]
    pub fn run(&self, request: &NarrativeRequest) -> Result<Narrative, SynthesisError> {
        let mut failures = Vec::new();

        for backend in &self.backends {
            for attempt in 1..=self.attempts_per_model {
                debug!(
                    "Narrative attempt {}/{} with {}",
                    attempt,
                    self.attempts_per_model,
                    backend.model_id()
                );

                match backend.synthesize(request) {
                    Ok(text) => {
                        info!("Narrative produced by {}", backend.model_id());
                        return Ok(Narrative {
                            text,
                            model_used: backend.model_id().to_string(),
                            grounded: request.grounded,
                            failures,
                        });
                    }
                    Err(error) if error.is_transient() => {
                        warn!("{}", error);
                        failures.push(error.into_failure());
                    }
                    Err(error) => {
                        warn!("{}; not trying further models", error);
                        return Err(error);
                    }
                }
            }
        }

        Err(SynthesisError::ChainExhausted { failures })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    num_predict: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ChatResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Non-streaming `/api/chat` client for one model
#[derive(Debug, Clone)]
pub struct OllamaChatBackend {
    base_url: Url,
    model: String,
    agent: ureq::Agent,
}

impl OllamaChatBackend {
    #[inline]
    pub fn new(ollama: &OllamaConfig, model: &str, timeout: Duration) -> Result<Self> {
        let base_url = ollama
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        Ok(Self {
            base_url,
            model: model.to_string(),
            agent: build_agent(timeout),
        })
    }

    fn transient(&self, reason: impl Into<String>) -> SynthesisError {
        SynthesisError::Transient {
            model: self.model.clone(),
            reason: reason.into(),
        }
    }

    fn permanent(&self, reason: impl Into<String>) -> SynthesisError {
        SynthesisError::Permanent {
            model: self.model.clone(),
            reason: reason.into(),
        }
    }

    fn classify(&self, error: &ureq::Error) -> SynthesisError {
        match error {
            ureq::Error::StatusCode(404) => self.transient("model not found (HTTP 404)"),
            ureq::Error::StatusCode(429) => self.transient("rate limited (HTTP 429)"),
            ureq::Error::StatusCode(status) if *status >= 500 => {
                self.transient(format!("server error (HTTP {status})"))
            }
            ureq::Error::StatusCode(status) => self.permanent(format!("HTTP {status}")),
            ureq::Error::ConnectionFailed
            | ureq::Error::HostNotFound
            | ureq::Error::Timeout(_)
            | ureq::Error::Io(_) => self.transient(error.to_string()),
            _ => self.permanent(error.to_string()),
        }
    }
}

impl NarrativeBackend for OllamaChatBackend {
    #[inline]
    fn model_id(&self) -> &str {
        &self.model
    }

    #[inline]
    fn synthesize(&self, request: &NarrativeRequest) -> Result<String, SynthesisError> {
        let url = self
            .base_url
            .join("/api/chat")
            .map_err(|e| self.permanent(format!("invalid chat URL: {e}")))?;

        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
            stream: false,
            options: ChatOptions {
                num_predict: request.max_tokens,
                temperature: 0.2,
            },
        };
        let body = serde_json::to_string(&body)
            .map_err(|e| self.permanent(format!("failed to serialize request: {e}")))?;

        debug!("Requesting narrative from {} at {}", self.model, url);

        let response_text = self
            .agent
            .post(url.as_str())
            .header("Content-Type", "application/json")
            .send(&body)
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(|e| self.classify(&e))?;

        let response: ChatResponse = serde_json::from_str(&response_text)
            .map_err(|e| self.permanent(format!("unreadable response: {e}")))?;

        let text = response
            .message
            .map(|m| m.content.trim().to_string())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(self.transient("empty response"));
        }
        Ok(text)
    }
}

/// Deterministic narrative used when no model is available
pub struct TemplateNarrator;

impl TemplateNarrator {
    #[inline]
    pub fn narrate(
        features: &RiskFeatureSet,
        retrieval: &RetrievalResult,
        analysis: &AnalysisConfig,
    ) -> Narrative {
        let (low, high) = analysis.target_range();
        let mut lines = Vec::new();

        if features.reading_count == 0 {
            lines.push(
                "No valid glucose readings were available for analysis.".to_string(),
            );
        } else {
            lines.push(format!(
                "Across {} readings the mean glucose was {:.0} mg/dL (GMI {:.1}%) with a coefficient of variation of {:.1}%.",
                features.reading_count, features.mean, features.gmi, features.cv
            ));
            lines.push(format!(
                "Time in range ({:.0}-{:.0} mg/dL) was {:.0}%, below range {:.0}% and above range {:.0}%.",
                low,
                high,
                features.tir * 100.0,
                features.tbr * 100.0,
                features.tar * 100.0
            ));

            if features.cv > analysis.cv_threshold {
                lines.push(format!(
                    "Glucose variability is above the {:.0}% target.",
                    analysis.cv_threshold
                ));
            } else {
                lines.push("Glucose variability is within target.".to_string());
            }

            let highs = features.windows_of(RiskKind::SustainedHigh).count();
            let lows = features.windows_of(RiskKind::SustainedLow).count();
            if highs + lows == 0 {
                lines.push("No sustained high or low periods were detected.".to_string());
            } else {
                lines.push(format!(
                    "Detected {highs} sustained high and {lows} sustained low periods."
                ));
            }

            for kind in [ExcursionKind::Low, ExcursionKind::High] {
                let summary = features
                    .excursion(kind)
                    .and_then(ExcursionDistribution::describe);
                if let Some(summary) = summary {
                    lines.push(format!("There were {summary}."));
                }
            }
            let worst = days_below_target(&features.daily, TIR_TARGET, 1);
            if let Some(day) = worst.first() {
                lines.push(format!(
                    "The day furthest from target was {}.",
                    day.describe()
                ));
            }
        }

        if features.low_confidence {
            lines.push(
                "Data coverage is limited, so these findings are indicative only.".to_string(),
            );
        }

        if !retrieval.is_empty() {
            lines.push(String::new());
            lines.push("Relevant references:".to_string());
            lines.extend(retrieval.matches.iter().enumerate().map(|(i, found)| {
                format!(
                    "[{}] {} ({})",
                    i + 1,
                    found.passage.document_title,
                    found.passage.heading
                )
            }));
        }
        let text = lines.join("\n");

        Narrative {
            text: text.trim_end().to_string(),
            model_used: TEMPLATE_MODEL.to_string(),
            grounded: !retrieval.is_empty(),
            failures: Vec::new(),
        }
    }
}
