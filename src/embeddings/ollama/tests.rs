use super::*;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(endpoint: &str) -> EmbeddingConfig {
    EmbeddingConfig {
        endpoint: endpoint.to_string(),
        model: "test-model".to_string(),
        batch_size: 2,
        ..EmbeddingConfig::default()
    }
}

fn fast_retry(attempts: u32) -> RetryPolicy {
    RetryPolicy::new(attempts).with_base_delay(Duration::from_millis(5))
}

#[test]
fn client_configuration() {
    let config = EmbeddingConfig {
        endpoint: "http://test-host:1234".to_string(),
        model: "test-model".to_string(),
        batch_size: 128,
        ..EmbeddingConfig::default()
    };
    let client = OllamaClient::new(&config).expect("Failed to create client");

    assert_eq!(client.model, "test-model");
    assert_eq!(client.model_id(), "ollama/test-model");
    assert_eq!(client.batch_size, 128);
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
    assert_eq!(client.retry.attempts, 3);
}

#[test]
fn client_builder_methods() {
    let client = OllamaClient::new(&EmbeddingConfig::default())
        .expect("Failed to create client")
        .with_retry_policy(RetryPolicy::new(5));

    assert_eq!(client.retry.attempts, 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn embeds_in_batches() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({ "model": "test-model" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [[1.0, 0.0], [0.0, 1.0]]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&test_config(&server.uri())).expect("client");
    let texts: Vec<String> = (0..4).map(|i| format!("text {i}")).collect();

    let vectors = client
        .embed_documents(&texts)
        .await
        .expect("embedding should succeed");

    assert_eq!(vectors.len(), 4);
    assert_eq!(vectors[0], vec![1.0, 0.0]);
    assert_eq!(vectors[3], vec![0.0, 1.0]);
}

#[tokio::test(flavor = "multi_thread")]
async fn count_mismatch_is_invalid_response() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [[1.0, 0.0]]
        })))
        .mount(&server)
        .await;

    let client = OllamaClient::new(&test_config(&server.uri())).expect("client");
    let texts = vec!["a".to_string(), "b".to_string()];

    let result = client.embed_documents(&texts).await;
    assert!(matches!(result, Err(ServiceError::InvalidResponse(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&test_config(&server.uri()))
        .expect("client")
        .with_retry_policy(fast_retry(3));

    let result = client.embed_query("hello").await;
    assert_eq!(result, Err(ServiceError::Status(503)));
}

#[tokio::test(flavor = "multi_thread")]
async fn health_check_requires_model() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{ "name": "other-model", "size": 1, "digest": "abc" }]
        })))
        .mount(&server)
        .await;

    let client = OllamaClient::new(&test_config(&server.uri())).expect("client");
    let result = tokio::task::spawn_blocking(move || client.health_check())
        .await
        .expect("task should join");

    assert!(matches!(result, Err(ServiceError::InvalidResponse(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn health_check_finds_model() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [
                { "name": "other-model" },
                { "name": "test-model", "size": 274_302_450, "digest": "0a109f422b47" }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&test_config(&server.uri())).expect("client");
    service::run_blocking(move || client.health_check())
        .await
        .expect("should find the configured model");
}

#[tokio::test(flavor = "multi_thread")]
async fn refused_connection_is_connectivity_failure() {
    let client = OllamaClient::new(&test_config("http://127.0.0.1:9"))
        .expect("client")
        .with_retry_policy(fast_retry(1));

    let result = client.embed_query("hello").await;
    assert!(matches!(result, Err(ServiceError::Connection(_))));
}
