use super::*;

#[test]
fn cosine_of_identical_vectors_is_one() {
    let v = [0.3, -0.2, 0.9];
    assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
}

#[test]
fn cosine_of_orthogonal_and_opposite_vectors() {
    assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    assert!((cosine_similarity(&[1.0, 0.0], &[-2.0, 0.0]) + 1.0).abs() < 1e-6);
}

#[test]
fn cosine_handles_degenerate_input() {
    assert_eq!(cosine_similarity(&[], &[]), 0.0);
    assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
}

#[test]
fn normalize_produces_unit_vectors() {
    let mut v = vec![3.0, 4.0];
    normalize(&mut v);
    assert!((v[0] - 0.6).abs() < 1e-6);
    assert!((v[1] - 0.8).abs() < 1e-6);

    let mut zero = vec![0.0, 0.0];
    normalize(&mut zero);
    assert_eq!(zero, vec![0.0, 0.0]);
}

#[test]
fn embedding_model_display_and_serde() {
    assert_eq!(EmbeddingModel::Hashing.to_string(), "hashing");
    assert_eq!(EmbeddingModel::Ollama.to_string(), "ollama");
    let parsed: EmbeddingModel = serde_json::from_str("\"ollama\"").expect("should deserialize");
    assert_eq!(parsed, EmbeddingModel::Ollama);
}

#[test]
fn build_default_embedder_is_hashing() {
    let config = Config::default();
    let embedder = build_embedder(&config).expect("hashing embedder builds");
    assert_eq!(embedder.dimension(), config.retrieval.hashing_dimension);
    assert!(embedder.model_id().starts_with("hashing"));

    let vector = embedder.embed_one("time in range").expect("embeds");
    assert_eq!(vector.len(), embedder.dimension());
}

#[test]
fn build_ollama_embedder_uses_configured_model() {
    let mut config = Config::default();
    config.retrieval.embedding_model = EmbeddingModel::Ollama;
    let embedder = build_embedder(&config).expect("ollama client builds without network");
    assert_eq!(embedder.model_id(), "ollama:nomic-embed-text:latest");
}
