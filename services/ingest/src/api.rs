//! HTTP API for starting, listing and stopping stream sessions.

use crate::config::ApiConfig;
use crate::sessions::{SessionInfo, SessionRegistry, StartOutcome};
use crate::stream_consumer::StreamRequest;
use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared API state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
}

/// Plain message response
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/tweets/sessions", get(list_sessions))
        .route(
            "/tweets/consume/:criteria",
            get(start_consuming).delete(stop_consuming),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "UP" }))
}

/// Start consuming a criteria in the background. Returns immediately.
async fn start_consuming(
    State(state): State<AppState>,
    Path(criteria): Path<String>,
    Query(request): Query<StreamRequest>,
) -> Result<Json<MessageResponse>, (StatusCode, Json<ErrorResponse>)> {
    if criteria.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Criteria must not be empty".to_string(),
                code: "INVALID_CRITERIA".to_string(),
            }),
        ));
    }

    let message = match state.registry.start(&criteria, request) {
        StartOutcome::Started => "Started consuming tweets.",
        StartOutcome::AlreadyRunning => "Already consuming tweets.",
    };

    Ok(Json(MessageResponse {
        message: message.to_string(),
    }))
}

/// Stop the session for a criteria
async fn stop_consuming(
    State(state): State<AppState>,
    Path(criteria): Path<String>,
) -> Result<Json<MessageResponse>, (StatusCode, Json<ErrorResponse>)> {
    if !state.registry.stop(&criteria) {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("No active session for {criteria}"),
                code: "NOT_FOUND".to_string(),
            }),
        ));
    }

    Ok(Json(MessageResponse {
        message: "Stopped consuming tweets.".to_string(),
    }))
}

/// List running sessions with their counters
async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.registry.list())
}

/// Serve the API until `shutdown` resolves
pub async fn start_api_server<F>(state: AppState, config: &ApiConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting ingestion API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::TwitterAdapter;
    use crate::stream_consumer::{
        BackoffPolicy, ChunkStream, ConnectionError, ConsumerSettings, StreamConsumer, StreamSource,
    };
    use crate::telemetry::NoopMetricsSink;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use futures::StreamExt;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;
    use tweet_storage::{BatchWriter, MemoryKeyValueStore, MonotonicIdGenerator, WriterConfig};

    struct SilentSource;

    #[async_trait]
    impl StreamSource for SilentSource {
        async fn open(&self, _criteria: &str, _request: &StreamRequest) -> Result<ChunkStream, ConnectionError> {
            Ok(futures::stream::pending().boxed())
        }
    }

    fn test_state() -> AppState {
        let writer = BatchWriter::new(
            Arc::new(MemoryKeyValueStore::new()),
            Arc::new(MonotonicIdGenerator::new()),
            &WriterConfig::default(),
        );
        let consumer = StreamConsumer::new(
            Arc::new(SilentSource),
            Arc::new(TwitterAdapter),
            Arc::new(writer),
            Arc::new(NoopMetricsSink),
            ConsumerSettings {
                batch_size: 25,
                max_pending_items: 100,
                max_buffer_bytes: 1024,
                idle_timeout: Duration::from_secs(60),
                backoff: BackoffPolicy {
                    base_delay: Duration::ZERO,
                    max_jitter: Duration::ZERO,
                    max_attempts: 0,
                },
            },
        );
        AppState {
            registry: Arc::new(SessionRegistry::new(Arc::new(consumer))),
        }
    }

    async fn send(router: Router, method: Method, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(create_router(test_state()), Method::GET, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"status": "UP"}));
    }

    #[tokio::test]
    async fn test_start_consuming_forwards_parameters() {
        let state = test_state();
        let router = create_router(state.clone());

        let (status, body) = send(
            router.clone(),
            Method::GET,
            "/tweets/consume/rustlang?limit=10&frequency=2&maxTweets=100",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Started consuming tweets.");

        let sessions = state.registry.list();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].criteria, "rustlang");
        assert_eq!(sessions[0].request.max_tweets, Some(100));
        assert_eq!(sessions[0].request.frequency, Some(2));

        let (_, body) = send(router, Method::GET, "/tweets/consume/rustlang").await;
        assert_eq!(body["message"], "Already consuming tweets.");

        state.registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_query_is_rejected() {
        let (status, _) = send(
            create_router(test_state()),
            Method::GET,
            "/tweets/consume/rustlang?limit=lots",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_and_stop_sessions() {
        let state = test_state();
        let router = create_router(state.clone());
        send(router.clone(), Method::GET, "/tweets/consume/rustlang").await;

        let (status, body) = send(router.clone(), Method::GET, "/tweets/sessions").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["criteria"], "rustlang");
        assert_eq!(body[0]["partition"], "twitter#rustlang");

        let (status, body) = send(router.clone(), Method::DELETE, "/tweets/consume/rustlang").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Stopped consuming tweets.");

        let (status, body) = send(router, Method::DELETE, "/tweets/consume/rustlang").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");

        state.registry.shutdown().await;
    }
}
