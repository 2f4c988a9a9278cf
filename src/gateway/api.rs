//! REST API handlers for the intake gateway

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::metrics;
use crate::models::Posting;

/// Marker value stored for ids that were seen but not submitted
const CHECKED_MARKER: &str = "checked";

// ============================================================================
// API Types
// ============================================================================

/// Message body returned by every endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct CheckQuery {
    pub key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CheckedRequest {
    pub id: String,
}

type ApiResult = (StatusCode, Json<MessageResponse>);

fn reply(endpoint: &str, status: StatusCode, message: impl Into<String>) -> ApiResult {
    metrics::record_api_request(endpoint, status.as_u16());
    (status, Json(MessageResponse::new(message)))
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/check", get(check))
        .route("/checked", post(checked))
        .route("/submit", post(submit))
        .route("/healthcheck", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .with_state(state)
}

/// 200 when the key is unseen, 409 when it exists
async fn check(State(state): State<AppState>, Query(query): Query<CheckQuery>) -> ApiResult {
    let Some(key) = query.key.filter(|k| !k.is_empty()) else {
        return reply("check", StatusCode::BAD_REQUEST, "Key is required");
    };

    match state.keys.exists(&key).await {
        Ok(true) => reply("check", StatusCode::CONFLICT, "Key already exists"),
        Ok(false) => reply("check", StatusCode::OK, "Key does not exist"),
        Err(e) => {
            tracing::error!(key = %key, error = %e, "Seen-key lookup failed");
            reply("check", StatusCode::INTERNAL_SERVER_ERROR, "Redis error")
        }
    }
}

/// Mark an id seen without submitting it
async fn checked(State(state): State<AppState>, Json(request): Json<CheckedRequest>) -> ApiResult {
    if request.id.trim().is_empty() {
        return reply("checked", StatusCode::BAD_REQUEST, "Id is required");
    }

    match state.keys.insert(&request.id, CHECKED_MARKER).await {
        Ok(()) => reply("checked", StatusCode::OK, "Success"),
        Err(e) => {
            tracing::error!(id = %request.id, error = %e, "Seen-key write failed");
            reply("checked", StatusCode::INTERNAL_SERVER_ERROR, "Redis error")
        }
    }
}

/// Enqueue a posting for processing, then mark it seen
///
/// The key is written only after the publish succeeded, so a failed
/// submission leaves the id unseen for the next crawl.
async fn submit(State(state): State<AppState>, Json(posting): Json<Posting>) -> ApiResult {
    if let Err(e) = posting.validate() {
        return reply("submit", StatusCode::BAD_REQUEST, e.to_string());
    }

    let payload = match serde_json::to_string(&posting) {
        Ok(payload) => payload,
        Err(e) => return reply("submit", StatusCode::BAD_REQUEST, e.to_string()),
    };

    if let Err(e) = state.transport.publish(payload.as_bytes()).await {
        tracing::error!(posting_id = %posting.id, error = %e, "Transport publish failed");
        return reply("submit", StatusCode::INTERNAL_SERVER_ERROR, "Transport error");
    }

    if let Err(e) = state.keys.insert(&posting.id, &payload).await {
        tracing::error!(posting_id = %posting.id, error = %e, "Seen-key write failed after publish");
        return reply("submit", StatusCode::INTERNAL_SERVER_ERROR, "Redis error");
    }

    tracing::info!(posting_id = %posting.id, company = %posting.company, "Posting submitted");
    reply("submit", StatusCode::OK, "Success")
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.keys.ping().await {
        Ok(()) => {
            metrics::record_api_request("healthcheck", 200);
            (
                StatusCode::OK,
                Json(HealthResponse {
                    status: "healthy".to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    uptime_secs: state.start_time.elapsed().as_secs(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Redis health check failed");
            reply(
                "healthcheck",
                StatusCode::INTERNAL_SERVER_ERROR,
                "Redis connection failed",
            )
            .into_response()
        }
    }
}

/// Prometheus text exposition
async fn metrics_endpoint() -> impl IntoResponse {
    match metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayServer, MemorySeenKeys};
    use crate::config::GatewayConfig;
    use crate::transport::{MemoryTransport, Transport};
    use std::sync::Arc;

    async fn spawn_gateway() -> (String, Arc<MemorySeenKeys>, Arc<MemoryTransport>) {
        let keys = Arc::new(MemorySeenKeys::new());
        let transport = Arc::new(MemoryTransport::new("jobs"));
        let server = GatewayServer::new(GatewayConfig::default(), keys.clone(), transport.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            server
                .serve(listener, std::future::pending::<()>())
                .await
                .unwrap();
        });
        (format!("http://{addr}"), keys, transport)
    }

    #[tokio::test]
    async fn test_check_then_checked() {
        let (base, _, _) = spawn_gateway().await;
        let client = reqwest::Client::new();

        let status = client
            .get(format!("{base}/check?key=1_a"))
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status, 200);

        let status = client
            .post(format!("{base}/checked"))
            .json(&serde_json::json!({ "id": "1_a" }))
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status, 200);

        let status = client
            .get(format!("{base}/check?key=1_a"))
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status, 409);
    }

    #[tokio::test]
    async fn test_check_requires_key() {
        let (base, _, _) = spawn_gateway().await;
        let status = reqwest::get(format!("{base}/check")).await.unwrap().status();
        assert_eq!(status, 400);
    }

    #[tokio::test]
    async fn test_submit_stores_and_publishes() {
        let (base, keys, transport) = spawn_gateway().await;
        let posting = Posting::new("42_apple", "Engineer", "Apple", "https://jobs/42", "d");

        let response = reqwest::Client::new()
            .post(format!("{base}/submit"))
            .json(&posting)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        assert!(keys.get("42_apple").is_some());
        assert_eq!(transport.pending(), 1);
    }

    #[tokio::test]
    async fn test_failed_publish_leaves_id_unseen() {
        let (base, keys, transport) = spawn_gateway().await;
        transport.close().await;
        let client = reqwest::Client::new();
        let posting = Posting::new("43_apple", "Engineer", "Apple", "https://jobs/43", "d");

        let status = client
            .post(format!("{base}/submit"))
            .json(&posting)
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status, 500);
        assert!(keys.get("43_apple").is_none());

        let status = client
            .get(format!("{base}/check?key=43_apple"))
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status, 200);
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_posting() {
        let (base, _, transport) = spawn_gateway().await;
        let response = reqwest::Client::new()
            .post(format!("{base}/submit"))
            .json(&serde_json::json!({ "id": "", "title": "t", "company": "c", "link": "l" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        assert_eq!(transport.pending(), 0);
    }

    #[tokio::test]
    async fn test_healthcheck() {
        let (base, _, _) = spawn_gateway().await;
        let health: HealthResponse = reqwest::get(format!("{base}/healthcheck"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health.status, "healthy");
    }
}
