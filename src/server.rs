//! HTTP surface for catalog builds.
//!
//! Every request rebuilds the catalog from the configured sources; the
//! header cache keeps repeated builds cheap.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/config` | Primary catalog document |
//! | `GET`  | `/tbox` | Compact catalog document |
//! | `GET`  | `/index` | Whichever document `/config` or `/tbox` wrote last |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! `/config` and `/tbox` accept `sub` (subscription code) and `pwd`, and
//! both write their document to `paths.index_file` when one is set.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "subscription_disabled", "message": "subscription code [vip] is disabled" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `subscription_disabled` (500), `build_failed` (500), `extraction_failed` (500).

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::aggregate::{BuildRequest, CatalogBuilder};
use crate::config::Config;
use crate::error::CatalogError;
use crate::header_cache::SqliteHeaderStore;
use crate::interpreter::LuaInterpreter;
use crate::projection::{compact_document, primary_document, write_json};

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    builder: CatalogBuilder,
}

/// Open the header cache and serve until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let config = Arc::new(config.clone());
    let store = SqliteHeaderStore::open(&config).await?;
    let builder = CatalogBuilder::new(config.clone(), Arc::new(LuaInterpreter::new()), Arc::new(store));
    let bind_addr = config.server.bind.clone();

    let app = router(AppState { config, builder });

    info!("Catalog server listening on http://{}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/config", get(handle_config))
        .route("/tbox", get(handle_tbox))
        .route("/index", get(handle_index))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        let status = match err {
            CatalogError::InvalidPattern { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: format!("{:#}", anyhow::Error::from(err)),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        CatalogError::Build(err).into()
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

// ============ Request helpers ============

#[derive(Debug, Deserialize, Default)]
struct CatalogQuery {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    pwd: Option<String>,
}

/// Host for generated URLs: the configured public host, else what the
/// client addressed, else the bind address.
fn request_host(config: &Config, headers: &HeaderMap) -> String {
    if config.server.public_host.is_some() {
        return config.default_host();
    }
    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    match headers.get("host").and_then(|v| v.to_str().ok()) {
        Some(host) if !host.is_empty() => format!("{}://{}", proto, host),
        _ => config.default_host(),
    }
}

async fn build_request(state: &AppState, headers: &HeaderMap, query: CatalogQuery) -> Result<BuildRequest, AppError> {
    let request = BuildRequest::new(request_host(&state.config, headers))
        .with_pwd(query.pwd)
        .with_subscription(&state.config, query.sub.as_deref())
        .await?;
    Ok(request)
}

/// Write `document` to the configured index file. Failures are logged.
async fn persist_index<T: Serialize>(config: &Config, document: &T) {
    if let Some(index_file) = &config.paths.index_file {
        if let Err(e) = write_json(index_file, document).await {
            warn!("Could not write index file: {:#}", e);
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

// ============ GET /config ============

async fn handle_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CatalogQuery>,
) -> Result<Json<Value>, AppError> {
    let started = Instant::now();
    let request = build_request(&state, &headers, query).await?;
    let build = state.builder.build(&request).await?;

    let mut doc = primary_document(&build).map_err(anyhow::Error::from)?;
    if let Value::Object(map) = &mut doc {
        map.insert("cost".to_string(), Value::from(elapsed_ms(started)));
    }
    persist_index(&state.config, &doc).await;
    Ok(Json(doc))
}

// ============ GET /tbox ============

async fn handle_tbox(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CatalogQuery>,
) -> Result<Json<Value>, AppError> {
    let started = Instant::now();
    let request = build_request(&state, &headers, query).await?;
    let build = state.builder.build(&request).await?;
    let compact = compact_document(&build);
    persist_index(&state.config, &compact).await;

    let doc = serde_json::to_value(&compact).map_err(anyhow::Error::from)?;
    info!("Compact catalog built in {} ms", elapsed_ms(started));
    Ok(Json(doc))
}

// ============ GET /index ============

async fn handle_index(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let Some(index_file) = &state.config.paths.index_file else {
        return Err(not_found("no index file is configured"));
    };
    let content = match tokio::fs::read_to_string(index_file).await {
        Ok(content) => content,
        Err(_) => return Err(not_found("index.json not found")),
    };
    let doc: Value = serde_json::from_str(&content).map_err(anyhow::Error::from)?;
    Ok(Json(doc))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn config(public_host: Option<&str>) -> Config {
        let mut body = String::from(
            r#"
[paths]
native_dir = "n"
legacy_dir = "l"
secondary_dir = "s"
parse_dir = "p"
config_dir = "c"
subscription_file = "c/sub.json"
link_snapshot = "link.json"

[cache]
path = "h.sqlite"

[server]
bind = "0.0.0.0:5757"
"#,
        );
        if let Some(host) = public_host {
            body.push_str(&format!("public_host = \"{}\"\n", host));
        }
        toml::from_str(&body).unwrap()
    }

    #[test]
    fn host_comes_from_forwarded_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("tv.example:8443"));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        assert_eq!(request_host(&config(None), &headers), "https://tv.example:8443");
    }

    #[test]
    fn public_host_overrides_request_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("internal:5757"));
        assert_eq!(
            request_host(&config(Some("https://cdn.example/")), &headers),
            "https://cdn.example"
        );
    }

    #[test]
    fn missing_host_falls_back_to_bind_address() {
        assert_eq!(request_host(&config(None), &HeaderMap::new()), "http://0.0.0.0:5757");
    }

    #[tokio::test]
    async fn index_file_holds_the_last_written_document() {
        let tmp = tempfile::TempDir::new().unwrap();
        let index = tmp.path().join("out/index.json");
        let mut config = config(None);
        persist_index(&config, &serde_json::json!({"sites": []})).await;
        assert!(!index.exists());

        config.paths.index_file = Some(index.clone());
        persist_index(&config, &serde_json::json!({"sites": [], "cost": 3})).await;
        persist_index(&config, &serde_json::json!({"sites": [], "flags": []})).await;

        let written: Value = serde_json::from_str(&std::fs::read_to_string(&index).unwrap()).unwrap();
        assert_eq!(written, serde_json::json!({"sites": [], "flags": []}));
    }

    #[test]
    fn disabled_subscription_maps_to_its_own_code() {
        let err: AppError = CatalogError::SubscriptionDisabled { code: "vip".into() }.into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code, "subscription_disabled");
        assert!(err.message.contains("[vip]"));
    }
}
