//! Route-level tests driving the router with `tower::ServiceExt::oneshot`

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use foresight_core::config::EngineConfig;
use foresight_core::corpus::InMemoryCorpus;
use foresight_core::dispatch::{LiveDispatcher, PushEvent};
use foresight_core::rate_budget::TokenBucket;
use foresight_core::storage::InMemorySuggestionStore;
use foresight_core::types::Fact;
use foresight_core::Result;
use foresight_engine::llm::{CompletionRequest, GenerationService};
use foresight_engine::pipeline::{Collaborators, SuggestionPipeline};
use foresight_gateway::{BroadcastHub, Gateway, GatewayConfig};
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Answers the query, candidate and scoring prompts with fixed replies,
/// after `delay`
#[derive(Default)]
struct CannedGeneration {
    delay: Duration,
}

#[async_trait]
impl GenerationService for CannedGeneration {
    fn name(&self) -> &str {
        "canned"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        tokio::time::sleep(self.delay).await;
        let prompt: String = request.messages.iter().map(|m| m.content.as_str()).collect();
        let reply = if prompt.contains("scored_suggestions") {
            let scores: Vec<Value> = (0..3)
                .map(|i| {
                    serde_json::json!({
                        "index": i,
                        "benefit": 8.0 - i as f64,
                        "false_positive_cost": 2.0,
                        "false_negative_cost": 4.0,
                        "decay": 7.0,
                        "probability_useful": 0.8,
                        "probability_false_positive": 0.1,
                        "probability_false_negative": 0.2,
                    })
                })
                .collect();
            serde_json::json!({ "scored_suggestions": scores }).to_string()
        } else if prompt.contains("\"suggestions\"") {
            let items: Vec<Value> = (0..3)
                .map(|i| {
                    serde_json::json!({
                        "title": format!("Suggestion {i}"),
                        "description": format!("Step {i}"),
                        "category": "coding",
                        "rationale": "Recent parser edits",
                        "priority": "medium",
                    })
                })
                .collect();
            serde_json::json!({ "suggestions": items }).to_string()
        } else {
            "parser tests".to_string()
        };
        Ok(reply)
    }
}

struct TestGateway {
    router: Router,
    hub: Arc<BroadcastHub>,
    pipeline: Arc<SuggestionPipeline>,
    store: Arc<InMemorySuggestionStore>,
}

fn gateway_with_budget(budget: TokenBucket) -> TestGateway {
    gateway_with(budget, CannedGeneration::default())
}

fn gateway_with(budget: TokenBucket, generation: CannedGeneration) -> TestGateway {
    let corpus = InMemoryCorpus::new();
    corpus.insert_fact(Fact {
        id: 42,
        text: "Works on a Rust parser".into(),
        reasoning: "Edited parser.rs all morning".into(),
        confidence: 9.0,
        created_at: Utc::now(),
    });
    let corpus = Arc::new(corpus);
    let store = Arc::new(InMemorySuggestionStore::new());
    let hub = Arc::new(BroadcastHub::new(16));

    let mut config = EngineConfig::default();
    config.generation.retry_delay_secs = 0.01;
    let collaborators = Collaborators {
        corpus: corpus.clone(),
        search: corpus,
        generation: Arc::new(generation),
        store: store.clone(),
        dispatcher: hub.clone(),
        budget: Arc::new(budget),
    };
    let pipeline = Arc::new(SuggestionPipeline::new(collaborators, config));
    pipeline.start().unwrap();

    let gateway_config = GatewayConfig::default();
    let router = Gateway::new(gateway_config, pipeline.clone(), hub.clone(), store.clone())
        .build_router();

    TestGateway {
        router,
        hub,
        pipeline,
        store,
    }
}

fn test_gateway() -> TestGateway {
    gateway_with_budget(TokenBucket::new(3, Duration::from_secs(45)))
}

async fn send(router: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_health_reports_running_engine() {
    let gw = test_gateway();
    let (status, body) = send(&gw.router, "GET", "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], foresight_gateway::VERSION);
    assert_eq!(body["health"]["status"], "healthy");
    assert_eq!(body["health"]["rate_budget"]["tokens_capacity"], 3);
}

#[tokio::test]
async fn test_trigger_returns_ranked_batch_and_pushes_it() {
    let gw = test_gateway();
    let mut sub = gw.hub.subscribe().unwrap();

    let (status, body) = send(&gw.router, "POST", "/triggers/42").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "done");
    assert_eq!(body["delivered"], true);

    let suggestions = body["batch"]["suggestions"].as_array().unwrap();
    assert_eq!(suggestions.len(), 3);
    assert_eq!(suggestions[0]["title"], "Suggestion 0");
    assert_eq!(body["batch"]["trigger_id"], 42);

    match sub.next().await.unwrap() {
        PushEvent::SuggestionBatch(payload) => assert_eq!(payload.suggestions.len(), 3),
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(gw.store.len(), 3);
}

#[tokio::test]
async fn test_unknown_trigger_is_404() {
    let gw = test_gateway();
    let (status, body) = send(&gw.router, "POST", "/triggers/7").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_type"], "trigger_not_found");
    assert_eq!(body["trigger_id"], 7);
}

#[tokio::test]
async fn test_exhausted_budget_is_429() {
    let gw = gateway_with_budget(TokenBucket::with_tokens(3, Duration::from_secs(45), 0.0));
    let mut sub = gw.hub.subscribe().unwrap();

    let (status, body) = send(&gw.router, "POST", "/triggers/42").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error_type"], "rate_limited");
    assert_eq!(sub.next().await.unwrap().event_type(), "rate_limited");
    assert!(gw.store.is_empty());
}

#[tokio::test]
async fn test_stopped_engine_is_503() {
    let gw = test_gateway();
    gw.pipeline.stop().unwrap();

    let (status, body) = send(&gw.router, "POST", "/triggers/42").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error_type"], "engine_not_running");

    let (_, health) = send(&gw.router, "GET", "/health").await;
    assert_eq!(health["health"]["status"], "stopped");
}

#[tokio::test]
async fn test_recent_suggestions_after_trigger() {
    let gw = test_gateway();
    send(&gw.router, "POST", "/triggers/42").await;

    let (status, body) = send(&gw.router, "GET", "/suggestions/recent?limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);

    let (_, body) = send(&gw.router, "GET", "/suggestions/recent").await;
    assert_eq!(body["count"], 3);
}

#[tokio::test]
async fn test_status_reflects_metrics() {
    let gw = test_gateway();
    send(&gw.router, "POST", "/triggers/42").await;

    let (status, body) = send(&gw.router, "GET", "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["running"], true);
    assert_eq!(body["metrics"]["total_batches"], 1);
    assert_eq!(body["metrics"]["total_suggestions"], 3);
    assert_eq!(body["rate_budget"]["tokens_capacity"], 3);
}

#[tokio::test]
async fn test_event_stream_delivers_sse_frames() {
    let gw = test_gateway();
    let response = gw
        .router
        .clone()
        .oneshot(Request::builder().uri("/events").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));
    assert_eq!(gw.hub.active_connections(), 1);

    gw.hub.broadcast(PushEvent::heartbeat(1)).await.unwrap();
    let mut frames = response.into_body().into_data_stream();
    let frame = frames.next().await.unwrap().unwrap();
    let text = String::from_utf8(frame.to_vec()).unwrap();
    assert!(text.contains("event: heartbeat"));
    assert!(text.contains("\"active_connections\":1"));

    drop(frames);
    assert_eq!(gw.hub.active_connections(), 0);
}

#[tokio::test]
async fn test_event_stream_refused_after_close() {
    let gw = test_gateway();
    gw.hub.close();

    let (status, body) = send(&gw.router, "GET", "/events").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error_type"], "hub_closed");
}

#[tokio::test(start_paused = true)]
async fn test_client_disconnect_does_not_cancel_trigger() {
    let gw = gateway_with(
        TokenBucket::new(3, Duration::from_secs(45)),
        CannedGeneration {
            delay: Duration::from_secs(1),
        },
    );
    let mut sub = gw.hub.subscribe().unwrap();

    let request = gw
        .router
        .clone()
        .oneshot(Request::builder().method("POST").uri("/triggers/42").body(Body::empty()).unwrap());
    // The client gives up long before generation answers.
    assert!(tokio::time::timeout(Duration::from_millis(10), request).await.is_err());

    match sub.next().await.unwrap() {
        PushEvent::SuggestionBatch(payload) => assert_eq!(payload.suggestions.len(), 3),
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(gw.store.len(), 3);
}
