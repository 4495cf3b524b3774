//! Integration tests for the Ollama reasoner
//!
//! A mock HTTP server stands in for Ollama, so no running instance is needed.

use async_trait::async_trait;
use axon_engine::conductor::{Engine, EngineSettings, MemoryBulkStore};
use axon_engine::llm::{LLMError, OllamaReasoner, Reasoner, ReasonerClient};
use axon_engine::tools::ToolCatalog;
use sdk::errors::EngineError;
use sdk::{Tool, ToolError, ToolInput, ToolSpec};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::{
    matchers::{body_partial_json, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn chat_reply(content: &str) -> Value {
    json!({
        "model": "llama3.1:8b",
        "created_at": "2024-08-04T19:22:45.499127Z",
        "message": {
            "role": "assistant",
            "content": content
        },
        "done": true
    })
}

fn reasoner(server: &MockServer) -> OllamaReasoner {
    OllamaReasoner::new(server.uri(), "llama3.1:8b", Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_generate_returns_message_content() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "model": "llama3.1:8b",
            "stream": false,
            "messages": [
                { "role": "system", "content": "You plan." },
                { "role": "user", "content": "Break the goal into steps" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("1. Fetch activities")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let text = reasoner(&mock_server)
        .generate("Break the goal into steps", "You plan.", 0.2)
        .await
        .unwrap();

    assert_eq!(text, "1. Fetch activities");
}

#[tokio::test]
async fn test_rate_limit_is_reported() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&mock_server)
        .await;

    let err = reasoner(&mock_server).generate("hi", "", 0.0).await.unwrap_err();
    assert!(matches!(err, LLMError::RateLimitExceeded), "got {:?}", err);
}

#[tokio::test]
async fn test_server_error_is_provider_unavailable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
        .mount(&mock_server)
        .await;

    match reasoner(&mock_server).generate("hi", "", 0.0).await.unwrap_err() {
        LLMError::ProviderUnavailable(msg) => assert!(msg.contains("model not loaded")),
        other => panic!("Expected ProviderUnavailable, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_body_is_parse_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "done": true })))
        .mount(&mock_server)
        .await;

    let err = reasoner(&mock_server).generate("hi", "", 0.0).await.unwrap_err();
    assert!(matches!(err, LLMError::ParseError(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_client_deadline_becomes_timeout() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(chat_reply("late"))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&mock_server)
        .await;

    let client = ReasonerClient::new(
        Arc::new(reasoner(&mock_server)),
        Duration::from_millis(200),
        0.0,
    );
    let err = client
        .ask("hi", "", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(
        matches!(err, EngineError::Timeout(d) if d == Duration::from_millis(200)),
        "got {:?}",
        err
    );
    assert_eq!(client.call_count(), 1);
}

struct ActivitiesTool(ToolSpec);

#[async_trait]
impl Tool for ActivitiesTool {
    fn spec(&self) -> &ToolSpec {
        &self.0
    }

    async fn execute(&self, _input: ToolInput) -> Result<Value, ToolError> {
        Ok(json!([{ "id": 1, "name": "Morning Run" }]))
    }
}

#[tokio::test]
async fn test_engine_runs_against_ollama_endpoint() {
    let mock_server = MockServer::start().await;

    // Every prompt gets the same plan; replies that are not yes/no or JSON
    // are read leniently by the engine
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("1. Get my recent activities")))
        .mount(&mock_server)
        .await;

    let catalog = ToolCatalog::empty().with_tool(Arc::new(ActivitiesTool(ToolSpec::new(
        "get_activities",
        "List the athlete's recent activities",
    ))));
    let client = ReasonerClient::new(
        Arc::new(reasoner(&mock_server)),
        Duration::from_secs(5),
        0.0,
    );
    let engine = Engine::new(
        client,
        catalog,
        Arc::new(MemoryBulkStore::new()),
        EngineSettings::default(),
    );

    let outcome = engine.run_goal("list my activities").await;

    assert!(outcome.success, "run failed: {:?}", outcome.error);
    assert_eq!(outcome.answer(), json!([{ "id": 1, "name": "Morning Run" }]));
    assert_eq!(outcome.stats.neurons_executed, 1);
    assert!(engine.reasoner().call_count() >= 2);
}
