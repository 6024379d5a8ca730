//! HTTP surface
//!
//! | Route                              | Purpose                               |
//! |------------------------------------|---------------------------------------|
//! | `GET  /events`                     | SSE stream of push events             |
//! | `GET  /ws`                         | One-way WebSocket push of the same    |
//! | `POST /triggers/:id`               | Run the pipeline for a fact           |
//! | `GET  /health`                     | Engine health                         |
//! | `GET  /status`                     | Hub, budget and metrics snapshot      |
//! | `GET  /suggestions/recent`         | Most recently stored suggestions      |

use async_stream::stream;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use foresight_core::dispatch::{BatchPayload, LiveDispatcher, PushEvent};
use foresight_core::storage::SuggestionStore;
use foresight_core::types::FactId;
use foresight_engine::pipeline::SuggestionPipeline;
use futures::{SinkExt, Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::GatewayConfig;
use crate::error::status_for;
use crate::hub::{BroadcastHub, Subscription};
use crate::{GatewayError, Result};

/// Gateway state shared across handlers
#[derive(Clone)]
pub struct GatewayState {
    pub config: GatewayConfig,
    pub pipeline: Arc<SuggestionPipeline>,
    pub hub: Arc<BroadcastHub>,
    pub store: Arc<dyn SuggestionStore>,
}

/// Main Gateway
pub struct Gateway {
    state: Arc<GatewayState>,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        pipeline: Arc<SuggestionPipeline>,
        hub: Arc<BroadcastHub>,
        store: Arc<dyn SuggestionStore>,
    ) -> Self {
        Self {
            state: Arc::new(GatewayState {
                config,
                pipeline,
                hub,
                store,
            }),
        }
    }

    pub fn state(&self) -> Arc<GatewayState> {
        self.state.clone()
    }

    /// Build the Axum router
    pub fn build_router(&self) -> Router {
        Router::new()
            .route("/events", get(handle_events))
            .route("/ws", get(handle_ws_upgrade))
            .route("/triggers/:id", post(handle_trigger))
            .route("/health", get(handle_health))
            .route("/status", get(handle_status))
            .route("/suggestions/recent", get(handle_recent))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve until `shutdown` resolves
    pub async fn serve<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.state.config.socket_addr()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(%addr, "Foresight gateway listening");

        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?;

        tracing::info!("Foresight gateway stopped");
        Ok(())
    }
}

fn sse_event(event: &PushEvent) -> Event {
    let data = event.payload_json().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Could not encode event payload");
        "{}".to_string()
    });
    Event::default().event(event.event_type()).data(data)
}

/// SSE stream over one hub subscription
pub fn event_stream(mut subscription: Subscription) -> impl Stream<Item = std::result::Result<Event, Infallible>> {
    stream! {
        while let Some(event) = subscription.next().await {
            yield Ok(sse_event(&event));
        }
    }
}

async fn handle_events(
    State(state): State<Arc<GatewayState>>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let subscription = state.hub.subscribe().ok_or(GatewayError::HubClosed)?;
    tracing::info!(connections = state.hub.active_connections(), "SSE client connected");

    Ok(Sse::new(event_stream(subscription)).keep_alive(
        KeepAlive::new()
            .interval(state.config.sse_keep_alive())
            .text("keepalive"),
    ))
}

async fn handle_ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> Result<Response> {
    let subscription = state.hub.subscribe().ok_or(GatewayError::HubClosed)?;
    Ok(ws.on_upgrade(move |socket| handle_ws_connection(socket, subscription)))
}

/// Push-only: inbound frames are read only to notice the close
async fn handle_ws_connection(socket: WebSocket, mut subscription: Subscription) {
    let (mut tx, mut rx) = socket.split();
    tracing::info!("WebSocket client connected");

    loop {
        tokio::select! {
            event = subscription.next() => {
                let Some(event) = event else {
                    let _ = tx.send(Message::Close(None)).await;
                    break;
                };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "Could not encode event");
                        continue;
                    }
                };
                if tx.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = rx.next() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
    tracing::info!("WebSocket client disconnected");
}

#[derive(Debug, Default, Deserialize)]
struct TriggerParams {
    #[serde(default)]
    reasoning_chain: bool,
}

async fn handle_trigger(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<FactId>,
    Query(params): Query<TriggerParams>,
) -> Response {
    // Runs detached: a client disconnect must not cancel the invocation.
    let pipeline = state.pipeline.clone();
    let invocation =
        tokio::spawn(async move { pipeline.run_trigger(id, params.reasoning_chain).await });
    let report = match invocation.await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(trigger_id = id, error = %e, "Trigger task failed");
            return GatewayError::Internal(format!("trigger task failed: {e}")).into_response();
        }
    };

    let chain = report.chain_session.as_ref().map(|s| {
        serde_json::json!({
            "session_id": s.id,
            "fell_back": s.fell_back,
            "completed_stages": s.completed_stages,
            "errors": s.errors,
            "processing_time_seconds": s.processing_time.as_secs_f64(),
        })
    });

    match report.batch {
        Some(batch) => {
            let body = serde_json::json!({
                "state": report.state,
                "batch": BatchPayload::from(&batch),
                "delivered": batch.suggestions().iter().all(|s| s.delivered),
                "error": report.error,
                "reasoning_chain": chain,
            });
            (StatusCode::OK, Json(body)).into_response()
        }
        None => {
            let error_type = report.error_type.unwrap_or("suggestion_generation_failed");
            let body = serde_json::json!({
                "state": report.state,
                "error_type": error_type,
                "message": report.error,
                "trigger_id": id,
                "reasoning_chain": chain,
            });
            (status_for(error_type), Json(body)).into_response()
        }
    }
}

async fn handle_health(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let health = state.pipeline.health();
    Json(serde_json::json!({
        "version": crate::VERSION,
        "health": health,
    }))
}

async fn handle_status(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let pipeline = &state.pipeline;
    Json(serde_json::json!({
        "version": crate::VERSION,
        "running": pipeline.is_running(),
        "connections": state.hub.active_connections(),
        "hub_closed": state.hub.is_closed(),
        "rate_budget": pipeline.collaborators().budget.status(),
        "metrics": pipeline.metrics(),
        "heartbeat_interval_seconds": state.config.heartbeat_interval_secs,
    }))
}

#[derive(Debug, Deserialize)]
struct RecentParams {
    limit: Option<usize>,
}

async fn handle_recent(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<RecentParams>,
) -> Result<impl IntoResponse> {
    let limit = params.limit.unwrap_or(20).min(state.config.max_recent);
    let suggestions = state.store.recent(limit).await?;
    Ok(Json(serde_json::json!({
        "count": suggestions.len(),
        "suggestions": suggestions,
    })))
}
