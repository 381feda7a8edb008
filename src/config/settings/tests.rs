use super::*;
use crate::config::ProfileKind;
use crate::embeddings::EmbeddingModel;
use serial_test::serial;
use tempfile::TempDir;

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.ollama.protocol, "http");
    assert_eq!(config.ollama.host, "localhost");
    assert_eq!(config.ollama.port, 11434);
    assert_eq!(config.ollama.model, "nomic-embed-text:latest");
    assert_eq!(config.analysis.min_days, 14);
    assert!((config.analysis.min_coverage_ratio - 0.70).abs() < f64::EPSILON);
    assert!((config.analysis.cv_threshold - 36.0).abs() < f64::EPSILON);
    assert_eq!(config.analysis.target_range, None);
    assert_eq!(config.analysis.target_range(), (70.0, 180.0));
    assert_eq!(config.analysis.profile, ProfileKind::T1dm);
    assert_eq!(config.retrieval.top_k, 5);
    assert_eq!(config.retrieval.embedding_model, EmbeddingModel::Hashing);
    assert!(config.validate().is_ok());
}

#[test]
fn ollama_validation() {
    let config = Config::default();

    let mut invalid_config = config.clone();
    invalid_config.ollama.protocol = "ftp".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.port = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.model = String::new();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config;
    invalid_config.ollama.batch_size = 1001;
    assert!(invalid_config.validate().is_err());
}

#[test]
fn analysis_validation() {
    let config = Config::default();

    let mut invalid_config = config.clone();
    invalid_config.analysis.min_coverage_ratio = 0.0;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidRatio {
            name: "min_coverage_ratio",
            ..
        })
    ));

    let mut invalid_config = config.clone();
    invalid_config.analysis.min_day_fill_ratio = 1.5;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.analysis.target_range = Some((180.0, 70.0));
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidTargetRange(_, _))
    ));

    let mut invalid_config = config.clone();
    invalid_config.analysis.min_days = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config;
    invalid_config.analysis.cv_threshold = f64::NAN;
    assert!(invalid_config.validate().is_err());
}

#[test]
fn quadrant_validation() {
    let config = Config::default();

    let mut invalid_config = config.clone();
    invalid_config.quadrant.iqr_narrow = 50.0;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidBandWidths { name: "IQR", .. })
    ));

    let mut invalid_config = config.clone();
    invalid_config.quadrant.window_buckets = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config;
    invalid_config.quadrant.slope_threshold = -1.0;
    assert!(invalid_config.validate().is_err());
}

#[test]
fn retrieval_and_synthesis_validation() {
    let config = Config::default();

    let mut invalid_config = config.clone();
    invalid_config.retrieval.top_k = 0;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidTopK(0))
    ));

    let mut invalid_config = config.clone();
    invalid_config.synthesis.fallback_models = vec!["  ".to_string()];
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config;
    invalid_config.synthesis.timeout_secs = 0;
    assert!(invalid_config.validate().is_err());
}

#[test]
fn chunking_validation() {
    let mut config = Config::default();
    config.chunking.max_chunk_size = config.chunking.target_chunk_size;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::MaxChunkSizeTooSmall(_, _))
    ));
}

#[test]
fn ollama_url_generation() {
    let config = Config::default();
    let url = config
        .ollama_url()
        .expect("should generate ollama_url successfully");
    assert_eq!(url.as_str(), "http://localhost:11434/");
}

#[test]
fn toml_serialization() {
    let config = Config::default();
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    assert_eq!(config, parsed_config);
}

#[test]
fn partial_toml_uses_defaults() {
    let toml_str = r#"
        [analysis]
        min_days = 10
        target_range = [63.0, 140.0]

        [retrieval]
        top_k = 3
    "#;
    let config: Config = toml::from_str(toml_str).expect("should parse partial toml");
    assert_eq!(config.analysis.min_days, 10);
    assert_eq!(config.analysis.target_range(), (63.0, 140.0));
    assert!((config.analysis.min_coverage_ratio - 0.70).abs() < f64::EPSILON);
    assert_eq!(config.retrieval.top_k, 3);
    assert_eq!(config.ollama, OllamaConfig::default());
}

#[test]
fn save_and_load_round_trip() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    };
    config.retrieval.top_k = 7;
    config.synthesis.fallback_models = vec!["llama3.2:1b".to_string()];
    config.save().expect("should save config");

    let loaded = Config::load(temp_dir.path()).expect("should load config");
    assert_eq!(loaded, config);
    assert_eq!(loaded.get_base_dir(), temp_dir.path());
}

#[test]
fn load_missing_file_returns_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let loaded = Config::load(temp_dir.path()).expect("should load defaults");
    assert_eq!(loaded.analysis, Config::default().analysis);
    assert_eq!(loaded.corpus_dir(), temp_dir.path().join("references"));
    assert_eq!(
        loaded.index_database_path(),
        temp_dir.path().join("reference_index.db")
    );
}

#[test]
fn profile_in_file_sets_target_range() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(
        temp_dir.path().join("config.toml"),
        "[analysis]\nprofile = \"GDM\"\n",
    )
    .expect("should write config");

    let loaded = Config::load(temp_dir.path()).expect("should load config");
    assert_eq!(loaded.analysis.profile, ProfileKind::Gdm);
    assert_eq!(loaded.analysis.target_range(), (63.0, 140.0));
}

#[test]
fn explicit_target_range_overrides_profile() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(
        temp_dir.path().join("config.toml"),
        "[analysis]\nprofile = \"GDM\"\ntarget_range = [65.0, 150.0]\n",
    )
    .expect("should write config");

    let mut loaded = Config::load(temp_dir.path()).expect("should load config");
    assert_eq!(loaded.analysis.target_range(), (65.0, 150.0));

    loaded.analysis.apply_profile(ProfileKind::T2dm);
    assert_eq!(loaded.analysis.target_range(), (70.0, 180.0));
}

#[test]
fn load_rejects_invalid_file() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(
        temp_dir.path().join("config.toml"),
        "[retrieval]\ntop_k = 500\n",
    )
    .expect("should write config");
    assert!(Config::load(temp_dir.path()).is_err());
}

#[test]
#[serial]
fn config_dir_honours_environment() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    // SAFETY: serialised with other environment-touching tests
    unsafe {
        std::env::set_var(HOME_ENV_VAR, temp_dir.path());
    }
    let dir = Config::config_dir().expect("should resolve config dir");
    unsafe {
        std::env::remove_var(HOME_ENV_VAR);
    }
    assert_eq!(dir, temp_dir.path());
}

#[test]
fn setter_validation() {
    let mut config = OllamaConfig::default();

    assert!(config.set_protocol("https".to_string()).is_ok());
    assert!(config.set_host("example.com".to_string()).is_ok());
    assert!(config.set_port(8080).is_ok());
    assert!(config.set_model("new-model".to_string()).is_ok());
    assert!(config.set_batch_size(128).is_ok());

    assert!(config.set_protocol("ftp".to_string()).is_err());
    assert!(config.set_port(0).is_err());
    assert!(config.set_model(String::new()).is_err());
    assert!(config.set_batch_size(0).is_err());
    assert!(config.set_batch_size(1001).is_err());
}

#[test]
fn config_errors_convert_into_crate_error() {
    let mut config = Config::default();
    config.retrieval.top_k = 0;

    let err: crate::InsightError = config
        .validate()
        .expect_err("top_k of zero is invalid")
        .into();
    assert!(matches!(
        err,
        crate::InsightError::Config(ConfigError::InvalidTopK(0))
    ));
    assert_eq!(
        err.to_string(),
        "Configuration error: Invalid top_k: 0 (must be between 1 and 50)"
    );
}
