#[cfg(test)]
mod tests;

use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};
use itertools::Itertools;

use super::{Config, ConfigError, OllamaConfig, ProfileKind};
use crate::embeddings::EmbeddingModel;
use crate::retrieval::RetrievalConfig;
use crate::synthesis::SynthesisConfig;

#[inline]
pub fn run_interactive_config() -> Result<()> {
    eprintln!("{}", style("🔧 CGM Insight Configuration Setup").bold().cyan());
    eprintln!();

    let config_dir = Config::config_dir().context("Failed to resolve configuration directory")?;
    let mut config = load_existing_config(&config_dir)?;

    eprintln!("{}", style("Analysis").bold().yellow());
    configure_profile(&mut config)?;

    eprintln!();
    eprintln!("{}", style("Retrieval").bold().yellow());
    configure_retrieval(&mut config.retrieval)?;

    eprintln!();
    eprintln!("{}", style("Ollama Configuration").bold().yellow());
    eprintln!("Used for Ollama embeddings and narrative synthesis.");
    eprintln!();
    configure_ollama(&mut config.ollama)?;

    eprintln!();
    eprintln!("{}", style("Narrative Synthesis").bold().yellow());
    configure_synthesis(&mut config.synthesis)?;

    eprintln!();
    eprintln!("{}", style("Testing configuration...").yellow());

    if test_ollama_connection(&config.ollama) {
        eprintln!("{}", style("✓ Ollama connection successful!").green());
    } else {
        eprintln!(
            "{}",
            style("⚠ Warning: Could not connect to Ollama").yellow()
        );
        eprintln!("Narratives will fall back to template text until Ollama is reachable.");
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config() -> Result<()> {
    let config = Config::load_default().context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    let analysis = &config.analysis;
    eprintln!("{}", style("Analysis:").bold().yellow());
    eprintln!("  Profile: {}", style(analysis.profile).cyan());
    let (low, high) = analysis.target_range();
    eprintln!(
        "  Target Range: {}-{} mg/dL{}",
        style(low).cyan(),
        style(high).cyan(),
        if analysis.target_range.is_some() {
            " (override)"
        } else {
            ""
        }
    );
    eprintln!("  Minimum Days: {}", style(analysis.min_days).cyan());
    eprintln!(
        "  Minimum Coverage: {:.0}%",
        style(analysis.min_coverage_ratio * 100.0).cyan()
    );
    eprintln!("  CV Threshold: {}%", style(analysis.cv_threshold).cyan());

    let quadrant = &config.quadrant;
    eprintln!();
    eprintln!("{}", style("Quadrant Thresholds:").bold().yellow());
    eprintln!(
        "  IQR narrow/wide: {}/{} mg/dL",
        style(quadrant.iqr_narrow).cyan(),
        style(quadrant.iqr_wide).cyan()
    );
    eprintln!(
        "  IDR narrow/wide: {}/{} mg/dL",
        style(quadrant.idr_narrow).cyan(),
        style(quadrant.idr_wide).cyan()
    );
    eprintln!(
        "  Slope threshold: {} mg/dL per bucket",
        style(quadrant.slope_threshold).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Retrieval:").bold().yellow());
    eprintln!(
        "  Embedding Model: {}",
        style(config.retrieval.embedding_model).cyan()
    );
    eprintln!("  Top K: {}", style(config.retrieval.top_k).cyan());
    eprintln!(
        "  Corpus Directory: {}",
        style(config.corpus_dir().display()).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Ollama Settings:").bold().yellow());
    eprintln!("  Host: {}", style(&config.ollama.host).cyan());
    eprintln!("  Port: {}", style(config.ollama.port).cyan());
    eprintln!("  Embedding Model: {}", style(&config.ollama.model).cyan());
    match config.ollama_url() {
        Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }

    eprintln!();
    eprintln!("{}", style("Narrative Synthesis:").bold().yellow());
    eprintln!("  Enabled: {}", style(config.synthesis.enabled).cyan());
    eprintln!(
        "  Model Chain: {}",
        style(config.synthesis.model_chain().iter().join(" → ")).cyan()
    );
    eprintln!("  Timeout: {}s", style(config.synthesis.timeout_secs).cyan());

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn load_existing_config(config_dir: &Path) -> Result<Config> {
    Config::load(config_dir).map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("No valid configuration found. Using defaults.").yellow()
            );
            Ok(Config {
                base_dir: config_dir.to_path_buf(),
                ..Config::default()
            })
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            Ok(config)
        },
    )
}

fn configure_profile(config: &mut Config) -> Result<()> {
    let keys: Vec<&str> = ProfileKind::ALL.iter().map(|k| k.key()).collect();
    let default_index = ProfileKind::ALL
        .iter()
        .position(|&k| k == config.analysis.profile)
        .unwrap_or(0);

    let index = Select::new()
        .with_prompt("Patient profile")
        .default(default_index)
        .items(&keys)
        .interact()?;

    config.analysis.apply_profile(ProfileKind::ALL[index]);
    Ok(())
}

fn configure_retrieval(retrieval: &mut RetrievalConfig) -> Result<()> {
    let models = [EmbeddingModel::Hashing, EmbeddingModel::Ollama];
    let labels: Vec<String> = models.iter().map(ToString::to_string).collect();
    let default_index = models
        .iter()
        .position(|&m| m == retrieval.embedding_model)
        .unwrap_or(0);

    let index = Select::new()
        .with_prompt("Embedding backend")
        .default(default_index)
        .items(&labels)
        .interact()?;
    retrieval.embedding_model = models[index];

    retrieval.top_k = Input::new()
        .with_prompt("Passages retrieved per analysis (top_k)")
        .default(retrieval.top_k)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if (1..=50).contains(input) {
                Ok(())
            } else {
                Err("top_k must be between 1 and 50")
            }
        })
        .interact_text()?;

    Ok(())
}

fn configure_ollama(ollama: &mut OllamaConfig) -> Result<()> {
    let protocols = &["http", "https"];
    let default_index = protocols
        .iter()
        .position(|&p| p == ollama.protocol)
        .unwrap_or(0);

    let protocol_index = Select::new()
        .with_prompt("Ollama protocol")
        .default(default_index)
        .items(protocols)
        .interact()?;

    let protocol = protocols[protocol_index].to_string();

    let host: String = Input::new()
        .with_prompt("Ollama host")
        .default(ollama.host.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let temp_config = OllamaConfig {
                protocol: protocol.clone(),
                host: input.clone(),
                ..OllamaConfig::default()
            };
            temp_config.validate()?;
            Ok(())
        })
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Ollama port")
        .default(ollama.port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Embedding model")
        .default(ollama.model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    ollama.set_protocol(protocol)?;
    ollama.set_host(host)?;
    ollama.set_port(port)?;
    ollama.set_model(model)?;

    Ok(())
}

fn configure_synthesis(synthesis: &mut SynthesisConfig) -> Result<()> {
    synthesis.enabled = Confirm::new()
        .with_prompt("Generate LLM narratives?")
        .default(synthesis.enabled)
        .interact()?;

    if !synthesis.enabled {
        return Ok(());
    }

    synthesis.primary_model = Input::new()
        .with_prompt("Primary narrative model")
        .default(synthesis.primary_model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let fallbacks: String = Input::new()
        .with_prompt("Fallback models (comma separated, tried in order)")
        .default(synthesis.fallback_models.join(","))
        .allow_empty(true)
        .interact_text()?;

    synthesis.fallback_models = parse_model_list(&fallbacks);
    Ok(())
}

fn parse_model_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect()
}

fn test_ollama_connection(ollama: &OllamaConfig) -> bool {
    let url = format!(
        "{}://{}:{}/api/version",
        ollama.protocol, ollama.host, ollama.port
    );

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into();

    match agent.get(&url).call() {
        Ok(_) => true,
        Err(ureq::Error::StatusCode(code)) if (400..500).contains(&code) => true,
        Err(_) => false,
    }
}
