use super::load_existing_config as load_existing_config_impl;
use super::parse_model_list;
use tempfile::TempDir;

#[test]
fn load_existing_config() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = load_existing_config_impl(temp_dir.path()).expect("config loaded successfully");
    assert!(!config.ollama.host.is_empty());
    assert!(config.ollama.port > 0);
    assert!(!config.synthesis.primary_model.is_empty());
    assert_eq!(config.get_base_dir(), temp_dir.path());
}

#[test]
fn invalid_file_falls_back_to_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    std::fs::write(temp_dir.path().join("config.toml"), "not = [valid").expect("can write");
    let config = load_existing_config_impl(temp_dir.path()).expect("falls back to defaults");
    assert_eq!(config.retrieval.top_k, 5);
}

#[test]
fn model_list_parsing() {
    assert_eq!(
        parse_model_list(" llama3.2:3b, ,qwen2.5:1.5b "),
        vec!["llama3.2:3b".to_string(), "qwen2.5:1.5b".to_string()]
    );
    assert!(parse_model_list("").is_empty());
}
