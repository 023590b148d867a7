//! Trigger Service - HTTP entry point for storage events
//!
//! Endpoints:
//! - POST / - Storage event (binary or structured CloudEvent); runs the pipeline
//! - GET /health - Health check
//!
//! The event endpoint always answers 200: processing errors are logged and
//! reported in the body, never surfaced as a failed delivery.

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use pipeline::{Outcome, PgWarehouse, Pipeline, PipelineConfig, StorageEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

// ============================================================================
// State
// ============================================================================

struct AppState {
    pipeline: Pipeline<PgWarehouse>,
}

// ============================================================================
// Request / response types
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Storage notifications arrive either as the bare object resource (binary
/// mode, attributes in headers) or wrapped in a structured CloudEvent.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EventBody {
    Structured { data: StorageEvent },
    Binary(StorageEvent),
}

impl EventBody {
    fn into_event(self) -> StorageEvent {
        match self {
            EventBody::Structured { data } => data,
            EventBody::Binary(event) => event,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn event_handler(
    State(state): State<Arc<AppState>>,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    let event = match serde_json::from_slice::<EventBody>(&body) {
        Ok(body) => body.into_event(),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring malformed storage event");
            return (
                StatusCode::OK,
                Json(ErrorResponse {
                    error: format!("Malformed storage event: {}", e),
                }),
            )
                .into_response();
        }
    };

    let outcome: Outcome = state.pipeline.handle(&event).await;
    (StatusCode::OK, Json(outcome)).into_response()
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", post(event_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    pipeline::init_tracing();

    let db_url = std::env::var("DB_URL").context("DB_URL env var missing")?;
    let bind = std::env::var("TRIGGER_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let config = PipelineConfig::from_env()?;

    tracing::info!("connecting to database");
    let warehouse = PgWarehouse::connect(&db_url)
        .await
        .context("Failed to connect to database")?;

    let state = Arc::new(AppState {
        pipeline: Pipeline::new(config, warehouse),
    });

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(%bind, "trigger listening (POST /, GET /health)");
    axum::serve(listener, router(state)).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state(dir: &std::path::Path) -> Arc<AppState> {
        let config = PipelineConfig {
            raw_fs_dir: dir.join("buckets"),
            tmp_dir: dir.join("tmp"),
            ..PipelineConfig::default()
        };
        let pool = sqlx_lazy_pool();
        Arc::new(AppState {
            pipeline: Pipeline::new(config, PgWarehouse::new(pool)),
        })
    }

    // Never connects: the requests below don't reach the warehouse.
    fn sqlx_lazy_pool() -> pipeline::warehouse::PgPool {
        pipeline::warehouse::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap()
    }

    #[test]
    fn test_parse_binary_event() {
        let body: EventBody =
            serde_json::from_str(r#"{"bucket":"raw","name":"export.xlsx","size":"120"}"#).unwrap();
        assert_eq!(
            body.into_event(),
            StorageEvent {
                bucket: "raw".into(),
                name: "export.xlsx".into()
            }
        );
    }

    #[test]
    fn test_parse_structured_event() {
        let body: EventBody = serde_json::from_str(
            r#"{"specversion":"1.0","type":"google.cloud.storage.object.v1.finalized",
                "source":"//storage.googleapis.com/projects/_/buckets/raw",
                "data":{"bucket":"raw","name":"presupuesto.csv"}}"#,
        )
        .unwrap();
        assert_eq!(body.into_event().name, "presupuesto.csv");
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile_dir();
        let app = router(test_state(dir.path()));
        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unsupported_upload_answers_ok() {
        let dir = tempfile_dir();
        let app = router(test_state(dir.path()));
        let resp = app
            .oneshot(
                Request::post("/")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"bucket":"raw","name":"foto.png"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_malformed_event_answers_ok() {
        let dir = tempfile_dir();
        let app = router(test_state(dir.path()));
        let resp = app
            .oneshot(Request::post("/").body(Body::from("not json")).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    fn tempfile_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }
}
