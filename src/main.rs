use cgm_insight::Result;
use cgm_insight::commands::{AnalyzeOptions, analyze_file, build_index, list_profiles, show_status};
use cgm_insight::config::{ProfileKind, run_interactive_config, show_config};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cgm-insight")]
#[command(about = "Ambulatory glucose profile analysis with reference-grounded explanations")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure analysis thresholds, Ollama connection and narrative models
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Build or incrementally update the reference passage index
    Index {
        /// Reference corpus directory (defaults to the configured one)
        #[arg(long)]
        corpus: Option<PathBuf>,
        /// Re-embed every document even if unchanged
        #[arg(long)]
        force: bool,
    },
    /// Show the reference index and model server status
    Status,
    /// List built-in patient profiles
    Profiles,
    /// Analyze a CGM CSV export
    Analyze {
        /// CSV file with Date, Time and Sensor Glucose (mg/dL) columns
        file: PathBuf,
        /// Patient profile, e.g. T1DM, T2DM, GDM, Pregnancy_T1D
        #[arg(long)]
        profile: Option<ProfileKind>,
        /// Number of reference passages to retrieve
        #[arg(long)]
        top_k: Option<usize>,
        /// Use the template explanation instead of a language model
        #[arg(long)]
        no_narrative: bool,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config()?;
            } else {
                run_interactive_config()?;
            }
        }
        Commands::Index { corpus, force } => {
            build_index(corpus, force).await?;
        }
        Commands::Status => {
            show_status().await?;
        }
        Commands::Profiles => {
            list_profiles();
        }
        Commands::Analyze {
            file,
            profile,
            top_k,
            no_narrative,
            json,
        } => {
            analyze_file(AnalyzeOptions {
                file,
                profile,
                top_k,
                no_narrative,
                json,
            })
            .await?;
        }
    }

    Ok(())
}
