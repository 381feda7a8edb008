// Configuration management module
// TOML settings, patient profiles and the interactive editor

pub mod interactive;
pub mod profiles;
pub mod settings;

pub use interactive::{run_interactive_config, show_config};
pub use profiles::{BandKind, GlucoseBand, PatientProfile, ProfileKind, UnknownProfile};
pub use settings::{Config, ConfigError, HOME_ENV_VAR, OllamaConfig};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}
