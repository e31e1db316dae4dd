//! HTTP surface of the hub.
//!
//! These endpoints are used by the face service (match push) and by
//! monitoring (client gauges). Both get the hub through router state.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::HubError;
use crate::hub::ConnectionHub;
use crate::protocol::{PushRequest, MATCH_EVENT};
use crate::registry::ClientStats;
use crate::ws;

#[derive(Debug, Clone, Serialize)]
pub struct ClientsResponse {
    pub count: usize,
    pub stats: ClientStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct PushResponse {
    pub success: bool,
    pub delivered: usize,
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

/// Accept an event from the face service.
///
/// POST /api/push
///
/// `match` events are broadcast to every connected client. Other events are
/// accepted but not fanned out.
pub async fn push_event(
    State(hub): State<Arc<ConnectionHub>>,
    Json(req): Json<PushRequest>,
) -> Response {
    let (event, name) = match (req.event, req.name) {
        (Some(event), Some(name)) if !event.is_empty() && !name.is_empty() => (event, name),
        _ => return bad_request("Missing required fields: event and name"),
    };

    if event != MATCH_EVENT {
        tracing::info!(event = %event, "Ignoring push event with no broadcast mapping");
        return Json(PushResponse {
            success: true,
            delivered: 0,
        })
        .into_response();
    }

    if let Some(reported_at) = &req.timestamp {
        tracing::debug!(name = %name, %reported_at, "Push carried its own timestamp");
    }

    // Broadcast stamps the server time
    let mut payload = Map::new();
    payload.insert("event".to_string(), Value::String(event));
    payload.insert("name".to_string(), Value::String(name.clone()));

    let delivered = hub.broadcast(payload, None).await;
    tracing::info!(name = %name, delivered, "Match event broadcast");

    Json(PushResponse {
        success: true,
        delivered,
    })
    .into_response()
}

/// Current client gauges.
///
/// GET /api/clients
pub async fn client_stats(State(hub): State<Arc<ConnectionHub>>) -> Json<ClientsResponse> {
    let stats = hub.get_client_stats().await;
    Json(ClientsResponse {
        count: stats.total,
        stats,
    })
}

/// GET /health
pub async fn health(State(hub): State<Arc<ConnectionHub>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "clients": hub.get_client_count(None).await,
    }))
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "Connection hub is running" }))
}

pub fn router(hub: Arc<ConnectionHub>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/ws", get(ws::ws_handler))
        .route("/api/push", post(push_event))
        .route("/api/clients", get(client_stats))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(hub)
}

/// Start the sweep loops and serve until the hub is shut down
pub async fn serve(
    listener: tokio::net::TcpListener,
    hub: Arc<ConnectionHub>,
) -> Result<(), HubError> {
    hub.start();
    let app = router(hub.clone());

    let stop = hub.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { stop.stopped().await })
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Outbound;
    use crate::types::ConnectionInfo;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn push(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/push")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_push_match_broadcasts() {
        let hub = Arc::new(ConnectionHub::default());
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        hub.register(ConnectionInfo::new(None, None), tx1).await;
        hub.register(ConnectionInfo::new(None, None), tx2).await;
        // Skip the connection greeting
        rx1.recv().await.unwrap();

        let response = router(hub.clone())
            .oneshot(push(json!({"event": "match", "name": "Alice"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["delivered"], 2);

        let Outbound::Text(text) = rx1.recv().await.unwrap() else {
            panic!("Expected text frame");
        };
        let event: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(event["event"], "match");
        assert_eq!(event["name"], "Alice");
        assert!(event["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_push_timestamp_is_restamped() {
        let hub = Arc::new(ConnectionHub::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register(ConnectionInfo::new(None, None), tx).await;
        rx.recv().await.unwrap();

        router(hub.clone())
            .oneshot(push(json!({
                "event": "match",
                "name": "Bob",
                "timestamp": "1999-01-01T00:00:00.000Z"
            })))
            .await
            .unwrap();

        let Outbound::Text(text) = rx.recv().await.unwrap() else {
            panic!("Expected text frame");
        };
        let event: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(event["name"], "Bob");
        assert!(event["timestamp"].is_string());
        assert_ne!(event["timestamp"], "1999-01-01T00:00:00.000Z");
    }

    #[tokio::test]
    async fn test_push_requires_event_and_name() {
        let hub = Arc::new(ConnectionHub::default());

        let response = router(hub.clone())
            .oneshot(push(json!({"event": "match"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("Missing required fields"));

        let response = router(hub)
            .oneshot(push(json!({"name": "Alice"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_push_other_event_not_broadcast() {
        let hub = Arc::new(ConnectionHub::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register(ConnectionInfo::new(None, None), tx).await;
        rx.recv().await.unwrap();

        let response = router(hub.clone())
            .oneshot(push(json!({"event": "registered", "name": "Carol"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["delivered"], 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_clients_and_health() {
        let hub = Arc::new(ConnectionHub::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let info = ConnectionInfo::new(None, Some("kiosk".to_string()));
        hub.register(info, tx).await;

        let response = router(hub.clone())
            .oneshot(Request::get("/api/clients").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["stats"]["byUserAgent"]["kiosk"], 1);
        assert_eq!(body["stats"]["openedTotal"], 1);

        let response = router(hub)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["clients"], 1);
    }
}
