use super::*;
use crate::llm::Role;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> OllamaChat {
    let config = LlmConfig {
        endpoint: server.uri(),
        model: "llama3.2:latest".to_string(),
        ..LlmConfig::default()
    };
    OllamaChat::new(&config)
        .expect("should build client")
        .with_retry_policy(RetryPolicy::new(2).with_base_delay(Duration::from_millis(5)))
}

fn question() -> ChatRequest {
    ChatRequest::new(vec![Message::user("Why is the sky blue?")])
}

#[test]
fn parses_stream_lines() {
    assert_eq!(
        parse_stream_line(r#"{"message":{"role":"assistant","content":"Hi"},"done":false}"#),
        Ok(LineEvent::Chunk("Hi".to_string()))
    );
    assert_eq!(
        parse_stream_line(r#"{"message":{"role":"assistant","content":""},"done":true}"#),
        Ok(LineEvent::Done)
    );
    assert!(matches!(
        parse_stream_line(r#"{"error":"model not found"}"#),
        Err(ServiceError::InvalidResponse(_))
    ));
    assert!(parse_stream_line("not json").is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn completes_with_sampling_options() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "model": "llama3.2:latest",
            "stream": false,
            "options": { "temperature": 0.1, "top_p": 0.95 },
            "messages": [{ "role": "user", "content": "Why is the sky blue?" }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": { "role": "assistant", "content": "Rayleigh scattering." },
            "done": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert_eq!(client.model_id(), "ollama/llama3.2:latest");

    let answer = client.complete(question()).await.expect("should complete");
    assert_eq!(answer, "Rayleigh scattering.");
}

#[tokio::test(flavor = "multi_thread")]
async fn streams_ndjson_chunks() {
    let server = MockServer::start().await;

    let body = [
        json!({"message": {"role": "assistant", "content": "Rayleigh"}, "done": false}),
        json!({"message": {"role": "assistant", "content": " scattering."}, "done": false}),
        json!({"message": {"role": "assistant", "content": ""}, "done": true}),
    ]
    .iter()
    .map(|line| format!("{line}\n"))
    .collect::<String>();

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({ "stream": true })))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let text = client_for(&server)
        .stream(question())
        .collect_text()
        .await
        .expect("should stream");
    assert_eq!(text, "Rayleigh scattering.");
}

#[tokio::test(flavor = "multi_thread")]
async fn truncated_stream_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Half an\"},\"done\":false}\n",
        ))
        .mount(&server)
        .await;

    let result = client_for(&server).stream(question()).collect_text().await;
    assert!(matches!(result, Err(ServiceError::InvalidResponse(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn credential_check_reports_unreachable() {
    let config = LlmConfig {
        endpoint: "http://127.0.0.1:9".to_string(),
        ..LlmConfig::default()
    };
    let client = OllamaChat::new(&config).expect("should build client");

    let status = client.check_credentials(None).await;
    assert!(matches!(status, CredentialStatus::Unreachable(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn credential_check_valid_when_tags_listed() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "models": [] })))
        .mount(&server)
        .await;

    assert_eq!(
        client_for(&server).check_credentials(None).await,
        CredentialStatus::Valid
    );
}

#[test]
fn messages_serialize_with_lowercase_roles() {
    let message = Message::new(Role::Assistant, "hello");
    assert_eq!(
        serde_json::to_value(&message).expect("should serialize"),
        json!({ "role": "assistant", "content": "hello" })
    );
}
