//! HTTP surface: read mirrored topics, post inbound commands.
//!
//! ```text
//! GET  /data          registered names
//! GET  /data/:name    latest value (or backlog) for one name, 404 if unknown
//! POST /inbound       {"topic": "...", "value": ...} onto the inbound lane
//! ```

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use mm_bus::{Envelope, HttpMirror};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Clone)]
pub struct HttpState {
    pub mirror: HttpMirror,
    pub inbound: mpsc::Sender<Envelope>,
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/data", get(list_names))
        .route("/data/:name", get(read_name))
        .route("/inbound", post(post_inbound))
        .with_state(state)
}

async fn list_names(State(state): State<HttpState>) -> Json<Vec<String>> {
    Json(state.mirror.names())
}

async fn read_name(State(state): State<HttpState>, Path(name): Path<String>) -> Response {
    match state.mirror.get(&name) {
        Some(value) => Json(value).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": format!("unknown name {name}") }))).into_response(),
    }
}

async fn post_inbound(State(state): State<HttpState>, Json(envelope): Json<Envelope>) -> (StatusCode, Json<Value>) {
    let topic = envelope.topic.clone();
    match state.inbound.try_send(envelope) {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({ "topic": topic }))),
        Err(e) => {
            warn!("[http] inbound command on {topic} dropped: {e}");
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": e.to_string() })))
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    use super::*;

    fn app() -> (Router, HttpMirror, mpsc::Receiver<Envelope>) {
        let mirror = HttpMirror::new();
        let (tx, rx) = mpsc::channel(4);
        let app = router(HttpState {
            mirror: mirror.clone(),
            inbound: tx,
        });
        (app, mirror, rx)
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(payload) => builder
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn serves_mirrored_values() {
        let (app, mirror, _rx) = app();
        mirror.register("FairValue", || json!(101.5));
        mirror.register("trades", || json!([]));

        let (status, body) = call(&app, Method::GET, "/data/FairValue", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!(101.5));

        let (_, names) = call(&app, Method::GET, "/data", None).await;
        assert_eq!(names, json!(["FairValue", "trades"]));
    }

    #[tokio::test]
    async fn unknown_name_is_404() {
        let (app, _mirror, _rx) = app();
        let (status, _) = call(&app, Method::GET, "/data/nothing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn inbound_commands_are_queued() {
        let (app, _mirror, mut rx) = app();
        let (status, _) = call(
            &app,
            Method::POST,
            "/inbound",
            Some(json!({ "topic": "g.CancelOrder", "value": { "order_id": "null-1" } })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.topic.as_str(), "g.CancelOrder");
        assert_eq!(envelope.value["order_id"], json!("null-1"));
    }
}
