use super::*;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(endpoint: String) -> EmbeddingConfig {
    EmbeddingConfig {
        endpoint,
        model: "text-embedding-3-small".to_string(),
        ..EmbeddingConfig::default()
    }
}

#[test]
fn endpoint_keeps_version_path() {
    let config = test_config("https://api.openai.com/v1".to_string());
    let embedder = OpenAiEmbedder::new(&config).expect("embedder");

    assert_eq!(
        embedder.embeddings_url.as_str(),
        "https://api.openai.com/v1/embeddings"
    );
    assert_eq!(embedder.model_id(), "openai/text-embedding-3-small");
}

#[tokio::test(flavor = "multi_thread")]
async fn sends_bearer_key_and_orders_by_index() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        })))
        .mount(&server)
        .await;

    let embedder = OpenAiEmbedder::new(&test_config(format!("{}/v1", server.uri())))
        .expect("embedder")
        .with_api_key("sk-test");

    let vectors = embedder
        .embed_documents(&["first".to_string(), "second".to_string()])
        .await
        .expect("embedding should succeed");

    assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
}

#[tokio::test(flavor = "multi_thread")]
async fn unauthorized_is_authentication_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let embedder = OpenAiEmbedder::new(&test_config(format!("{}/v1", server.uri())))
        .expect("embedder")
        .with_api_key("sk-wrong");

    let result = embedder.embed_query("hello").await;
    assert_eq!(result, Err(ServiceError::Authentication { status: 401 }));
}

#[tokio::test(flavor = "multi_thread")]
async fn rate_limit_is_quota_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(429))
        .expect(2)
        .mount(&server)
        .await;

    let embedder = OpenAiEmbedder::new(&test_config(format!("{}/v1", server.uri())))
        .expect("embedder")
        .with_retry_policy(RetryPolicy::new(2).with_base_delay(Duration::from_millis(5)));

    let result = embedder.embed_query("hello").await;
    assert_eq!(result, Err(ServiceError::Quota));
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_input_makes_no_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let embedder =
        OpenAiEmbedder::new(&test_config(format!("{}/v1", server.uri()))).expect("embedder");

    let vectors = embedder.embed_documents(&[]).await.expect("no-op succeeds");
    assert!(vectors.is_empty());
}
