use super::*;
use crate::config::OllamaConfig;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer, dimension: u32) -> OllamaConfig {
    let uri = Url::parse(&server.uri()).expect("mock server uri should parse");
    OllamaConfig {
        host: uri.host_str().expect("mock server has a host").to_string(),
        port: uri.port().expect("mock server has a port"),
        model: "test-embed".to_string(),
        batch_size: 2,
        embedding_dimension: dimension,
        retry_attempts: 2,
        ..OllamaConfig::default()
    }
}

fn mock_client(server: &MockServer, dimension: u32) -> OllamaClient {
    OllamaClient::new(&config_for(server, dimension))
        .expect("Failed to create client")
        .with_backoff_base(Duration::from_millis(10))
}

#[test]
fn client_configuration() {
    let config = OllamaConfig {
        protocol: "http".to_string(),
        host: "test-host".to_string(),
        port: 1234,
        model: "test-model".to_string(),
        batch_size: 128,
        ..OllamaConfig::default()
    };
    let client = OllamaClient::new(&config).expect("Failed to create client");

    assert_eq!(client.model, "test-model");
    assert_eq!(client.batch_size, 128);
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
    assert_eq!(client.retry_attempts, config.retry_attempts);
    assert_eq!(client.dimension(), DEFAULT_EMBEDDING_DIMENSION as usize);
    assert_eq!(client.model_id(), "ollama:test-model");
}

#[test]
fn client_builder_methods() {
    let client = OllamaClient::new(&OllamaConfig::default())
        .expect("Failed to create client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(5)
        .with_backoff_base(Duration::from_millis(250));

    assert_eq!(client.retry_attempts, 5);
    assert_eq!(client.backoff_base_ms, 250);
}

#[tokio::test(flavor = "multi_thread")]
async fn embeds_in_batches() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({"model": "test-embed", "input": ["a", "b"]})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"embeddings": [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({"input": ["c"]})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[0.0, 0.0, 1.0]]})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = mock_client(&server, 3);
    let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    let vectors = tokio::task::spawn_blocking(move || client.embed(&texts))
        .await
        .expect("blocking task should join")
        .expect("embedding should succeed");

    assert_eq!(
        vectors,
        vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0]
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn rejects_wrong_dimension() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[1.0, 2.0]]})))
        .mount(&server)
        .await;

    let client = mock_client(&server, 3);
    let result = tokio::task::spawn_blocking(move || client.embed_one("text"))
        .await
        .expect("blocking task should join");

    let message = format!("{:#}", result.expect_err("dimension mismatch should fail"));
    assert!(message.contains("returned 2 dimensions"), "{message}");
}

#[tokio::test(flavor = "multi_thread")]
async fn retries_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[0.5, 0.5]]})))
        .with_priority(2)
        .mount(&server)
        .await;

    let client = mock_client(&server, 2);
    let vector = tokio::task::spawn_blocking(move || client.embed_one("retry me"))
        .await
        .expect("blocking task should join")
        .expect("second attempt should succeed");
    assert_eq!(vector, vec![0.5, 0.5]);
}

#[tokio::test(flavor = "multi_thread")]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;

    let client = mock_client(&server, 2);
    let result = tokio::task::spawn_blocking(move || client.embed_one("bad"))
        .await
        .expect("blocking task should join");

    let message = format!("{:#}", result.expect_err("400 should fail"));
    assert!(message.contains("400"), "{message}");
}

#[tokio::test(flavor = "multi_thread")]
async fn health_check_validates_model() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "test-embed"}, {"name": "llama3.2:3b"}]
        })))
        .mount(&server)
        .await;

    let client = mock_client(&server, 2);
    let other = OllamaClient::new(&OllamaConfig {
        model: "missing-model".to_string(),
        ..config_for(&server, 2)
    })
    .expect("Failed to create client");

    let (ok, missing) = tokio::task::spawn_blocking(move || {
        (client.health_check(), other.validate_model())
    })
    .await
    .expect("blocking task should join");

    assert!(ok.is_ok(), "{ok:?}");
    let message = missing.expect_err("missing model should fail").to_string();
    assert!(message.contains("missing-model"));
}

#[test]
fn empty_batch_makes_no_request() {
    let client = OllamaClient::new(&OllamaConfig::default()).expect("Failed to create client");
    let vectors = client
        .generate_embeddings_batch(&[])
        .expect("empty batch should succeed");
    assert!(vectors.is_empty());
}
