//! Geolookup Server - JSON-RPC over HTTP
//!
//! A thin shell over [`LookupService`]: one key in, one reply out.
//!
//! # Protocol
//!
//! JSON-RPC 2.0 over `POST /`:
//!
//! | Method           | Params                        | Result                     |
//! |------------------|-------------------------------|----------------------------|
//! | `geoip/resolve`  | `{"ip": "75.2.70.75"}` or `"75.2.70.75"` | geo payload     |
//! | `geoip/stats`    | none                          | dataset and cache stats    |
//!
//! Lookup failures are JSON-RPC errors whose `code` is the stable negative
//! status of [`LookupError`]. The same lookup is also available as
//! `GET /resolve/{ip}`, and `GET /health` serves readiness probes.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::LookupError;
use crate::geo::CityProvider;
use crate::service::LookupService;

// ─── JSON-RPC 2.0 types ────────────────────────────────────────────────────

/// JSON-RPC 2.0 request envelope.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// JSON-RPC 2.0 response envelope.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
        }
    }

    fn lookup_error(id: Option<Value>, err: &LookupError) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code: err.status_code(),
                message: err.to_string(),
                data: Some(serde_json::json!({ "kind": err.kind() })),
            }),
        }
    }
}

/// Body of a failed `GET /resolve/{ip}`.
#[derive(Debug, Serialize)]
struct FailureBody {
    code: i32,
    kind: &'static str,
    message: String,
}

// ─── Shared state ───────────────────────────────────────────────────────────

pub type SharedService = Arc<LookupService<CityProvider>>;

// ─── Server bootstrap ──────────────────────────────────────────────────────

/// Build the HTTP router around `service`.
pub fn router(service: SharedService) -> Router {
    Router::new()
        .route("/", post(handle_jsonrpc))
        .route("/resolve/{ip}", get(handle_resolve))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(service)
}

/// Serve lookups on `listen` until `shutdown` resolves.
pub async fn serve<F>(service: SharedService, listen: &str, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(listen).await?;
    info!("Lookup server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

/// Health-check endpoint (useful for readiness probes).
async fn health_check(State(service): State<SharedService>) -> impl IntoResponse {
    let stats = service.stats();
    let status = if stats.dataset_loaded {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(serde_json::json!({
            "status": if stats.dataset_loaded { "ok" } else { "loading" },
            "dataset_loaded": stats.dataset_loaded,
        })),
    )
}

async fn handle_resolve(
    State(service): State<SharedService>,
    Path(ip): Path<String>,
) -> impl IntoResponse {
    match service.resolve(&ip) {
        Ok(geo) => (StatusCode::OK, Json(geo)).into_response(),
        Err(err) => {
            let status = match err {
                LookupError::NotFound(_) => StatusCode::NOT_FOUND,
                LookupError::DatasetUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                LookupError::Provider { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            };
            let body = FailureBody {
                code: err.status_code(),
                kind: err.kind(),
                message: err.to_string(),
            };
            (status, Json(body)).into_response()
        }
    }
}

// ─── JSON-RPC dispatcher ───────────────────────────────────────────────────

async fn handle_jsonrpc(
    State(service): State<SharedService>,
    Json(req): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    if req.jsonrpc != "2.0" {
        return Json(JsonRpcResponse::error(
            req.id,
            -32600,
            format!("Unsupported JSON-RPC version: {}", req.jsonrpc),
        ));
    }

    let response = match req.method.as_str() {
        "geoip/resolve" => handle_geoip_resolve(req.id, &req.params, &service),
        "geoip/stats" => handle_geoip_stats(req.id, &service),
        _ => JsonRpcResponse::error(
            req.id,
            -32601,
            format!("Method not found: {}", req.method),
        ),
    };

    Json(response)
}

// ─── Method handlers ────────────────────────────────────────────────────────

fn handle_geoip_resolve(
    id: Option<Value>,
    params: &Value,
    service: &SharedService,
) -> JsonRpcResponse {
    let ip = match params {
        Value::String(ip) => Some(ip.as_str()),
        other => other.get("ip").and_then(|v| v.as_str()),
    };
    let Some(ip) = ip else {
        return JsonRpcResponse::error(id, -32602, "Missing required parameter: ip".into());
    };

    match service.resolve(ip) {
        Ok(geo) => JsonRpcResponse::success(id, geo),
        Err(err) => JsonRpcResponse::lookup_error(id, &err),
    }
}

fn handle_geoip_stats(id: Option<Value>, service: &SharedService) -> JsonRpcResponse {
    match serde_json::to_value(service.stats()) {
        Ok(stats) => JsonRpcResponse::success(id, stats),
        Err(e) => JsonRpcResponse::error(id, -32603, format!("Failed to encode stats: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResultCache;
    use crate::geo::{CityDatabase, CITY_DATASET, EMBEDDED_CITY_DATASET};
    use crate::provider::{DatasetSource, LookupProvider};
    use crate::registry::{DatasetHandle, DatasetRegistry};
    use axum::body::Body;
    use axum::http::Request;
    use std::num::NonZeroUsize;
    use std::time::Duration;
    use tower::ServiceExt;

    fn lookup_service(loaded: bool) -> SharedService {
        let provider = Arc::new(CityProvider);
        let registry: Arc<DatasetRegistry<CityDatabase>> = Arc::new(DatasetRegistry::new());
        if loaded {
            let db = provider
                .open(&DatasetSource::Embedded(EMBEDDED_CITY_DATASET))
                .unwrap();
            registry.put(DatasetHandle::new(CITY_DATASET, db, "<embedded>"));
        }
        let cache = Arc::new(ResultCache::new(
            NonZeroUsize::new(5).unwrap(),
            Duration::from_secs(60),
        ));
        Arc::new(LookupService::new(CITY_DATASET, provider, registry, cache))
    }

    async fn rpc(service: SharedService, body: Value) -> Value {
        let request = Request::post("/")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router(service).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_jsonrpc_response_error() {
        let resp = JsonRpcResponse::lookup_error(
            Some(serde_json::json!(1)),
            &LookupError::NotFound("127.0.0.1".into()),
        );
        assert!(resp.result.is_none());
        let error = resp.error.unwrap();
        assert_eq!(error.code, -1);
        assert_eq!(error.message, "The address 127.0.0.1 is not in the database.");
    }

    #[tokio::test]
    async fn test_rpc_resolve_success_then_cached() {
        let service = lookup_service(true);
        let body = serde_json::json!({
            "jsonrpc": "2.0", "id": 7, "method": "geoip/resolve", "params": {"ip": "75.2.70.75"}
        });

        let reply = rpc(Arc::clone(&service), body.clone()).await;
        assert_eq!(reply["id"], 7);
        assert_eq!(reply["result"]["country_iso_code"], "US");
        assert_eq!(reply["result"]["timezone"], "America/Chicago");
        assert_eq!(service.cache().size(), 1);

        let again = rpc(Arc::clone(&service), body).await;
        assert_eq!(again["result"], reply["result"]);
    }

    #[tokio::test]
    async fn test_rpc_failures() {
        let service = lookup_service(true);

        let not_found = rpc(
            Arc::clone(&service),
            serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "geoip/resolve", "params": "127.0.0.1"}),
        )
        .await;
        assert_eq!(not_found["error"]["code"], -1);
        assert_eq!(not_found["error"]["data"]["kind"], "not_found");

        let malformed = rpc(
            Arc::clone(&service),
            serde_json::json!({"jsonrpc": "2.0", "id": 2, "method": "geoip/resolve", "params": {"ip": "gravitee.io"}}),
        )
        .await;
        assert_eq!(malformed["error"]["code"], -3);
        assert_eq!(
            malformed["error"]["message"],
            "Unexpected error while resolving IP gravitee.io"
        );

        let missing = rpc(
            Arc::clone(&service),
            serde_json::json!({"jsonrpc": "2.0", "id": 3, "method": "geoip/resolve"}),
        )
        .await;
        assert_eq!(missing["error"]["code"], -32602);

        let unknown = rpc(
            Arc::clone(&service),
            serde_json::json!({"jsonrpc": "2.0", "id": 4, "method": "geoip/nope"}),
        )
        .await;
        assert_eq!(unknown["error"]["code"], -32601);

        assert_eq!(service.cache().size(), 0);
    }

    #[tokio::test]
    async fn test_rpc_unavailable_and_stats() {
        let service = lookup_service(false);
        let reply = rpc(
            Arc::clone(&service),
            serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "geoip/resolve", "params": "8.8.8.8"}),
        )
        .await;
        assert_eq!(reply["error"]["code"], -2);

        let stats = rpc(
            service,
            serde_json::json!({"jsonrpc": "2.0", "id": 2, "method": "geoip/stats"}),
        )
        .await;
        assert_eq!(stats["result"]["dataset_loaded"], false);
        assert_eq!(stats["result"]["cache_capacity"], 5);
    }

    #[tokio::test]
    async fn test_rest_resolve_status_codes() {
        let service = lookup_service(true);
        let get = |uri: &str| Request::get(uri).body(Body::empty()).unwrap();

        let ok = router(Arc::clone(&service))
            .oneshot(get("/resolve/8.8.8.8"))
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        let missing = router(Arc::clone(&service))
            .oneshot(get("/resolve/127.0.0.1"))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let health = router(lookup_service(false))
            .oneshot(get("/health"))
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
