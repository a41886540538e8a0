//! Local HTTP transport for the RPC surface: `POST /rpc` carries a
//! single JSON-RPC 2.0 request, `GET /health` is unauthenticated. Auth
//! accepts either `Authorization: Bearer <key>` or `X-Api-Key: <key>`,
//! gating on a shared secret before trusting the request to reach the
//! dispatcher.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use super::dispatch::{dispatch, RpcContext};
use super::protocol::{JsonRpcRequest, JsonRpcResponse};

#[derive(Clone)]
pub struct HttpState {
    pub rpc: Arc<RpcContext>,
    pub api_key: Option<Arc<str>>,
}

pub fn router(state: HttpState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let mut router = Router::new().route("/rpc", post(handle_rpc)).with_state(state.clone());

    if state.api_key.is_some() {
        router = router.layer(middleware::from_fn_with_state(state.clone(), require_api_key));
    }

    Router::new()
        .route("/health", get(health))
        .merge(router)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "service": "codecoder" }))
}

async fn require_api_key(
    State(state): State<HttpState>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let Some(expected) = &state.api_key else {
        return next.run(request).await;
    };

    let presented = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(axum::http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        });

    match presented {
        Some(key) if key == expected.as_ref() => next.run(request).await,
        _ => {
            warn!("rejected rpc request with missing or invalid api key");
            (StatusCode::UNAUTHORIZED, Json(serde_json::json!({ "error": "unauthorized" })))
                .into_response()
        }
    }
}

async fn handle_rpc(State(state): State<HttpState>, Json(req): Json<JsonRpcRequest>) -> impl IntoResponse {
    let JsonRpcRequest { id, method, params, .. } = req;

    let response = match dispatch(&state.rpc, &method, params).await {
        Ok(result) => JsonRpcResponse::ok(id, result),
        Err(err) => JsonRpcResponse::err(id, err),
    };

    Json(response)
}
