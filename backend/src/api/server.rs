//! HTTP server for the upload handoff.
//!
//! # API Endpoints
//!
//! | Method | Path                | Description                              |
//! |--------|---------------------|------------------------------------------|
//! | GET    | `/health`           | Health check                             |
//! | POST   | `/api/imports`      | Register an uploaded object for import   |
//! | GET    | `/api/imports`      | List imports                             |
//! | GET    | `/api/imports/{id}` | Import status, entity count, line errors |

use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::Json,
    routing::get,
    Router,
};
use serde_json::{json, Value};
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::CorsLayer;

use super::types::{AppState, ImportDetail};
use crate::config::Settings;
use crate::error::ServerError;
use crate::models::{FileFormat, Import, ImportId, NewImport};
use crate::pipeline::{DispatchMessage, LocalQueue, Orchestrator, WorkerPool};
use crate::source::HttpObjectSource;
use crate::store::{ImportStore, MemoryStore};

/// Build the API router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/imports", get(list_imports).post(create_import))
        .route("/api/imports/{id}", get(get_import))
        .layer(cors)
        .with_state(state)
}

/// Start queue, workers and the HTTP server; returns on Ctrl-C.
pub async fn start_server(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(MemoryStore::new());
    let (queue, receiver) = LocalQueue::new();
    let queue = Arc::new(queue);

    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        Arc::new(HttpObjectSource::new()),
        queue.clone(),
        settings.clone(),
    ));
    let workers = WorkerPool::new(orchestrator.clone(), settings.workers).spawn(receiver);

    let app = router(AppState { store, queue });
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, workers = settings.workers, "clinicload server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    orchestrator.shutdown();
    workers.await?;
    Ok(())
}

/// Health check endpoint
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "clinicload",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Create an import and publish its first dispatch.
pub async fn create_import(
    State(state): State<AppState>,
    Json(request): Json<NewImport>,
) -> Result<(StatusCode, Json<Import>), ServerError> {
    if request.file_name.trim().is_empty() {
        return Err(ServerError::BadRequest("fileName is required".into()));
    }
    if request.source_location.trim().is_empty() {
        return Err(ServerError::BadRequest("sourceLocation is required".into()));
    }
    if let Some(guessed) = FileFormat::from_file_name(&request.file_name) {
        if guessed != request.file_format {
            tracing::warn!(
                file_name = %request.file_name,
                declared = %request.file_format,
                %guessed,
                "file extension does not match declared format"
            );
        }
    }

    let import = state.store.create_import(request).await?;
    state.queue.publish(DispatchMessage::initial(&import)).await?;
    tracing::info!(import_id = import.id, data_type = %import.data_type, "import registered");

    Ok((StatusCode::ACCEPTED, Json(import)))
}

pub async fn list_imports(State(state): State<AppState>) -> Result<Json<Vec<Import>>, ServerError> {
    Ok(Json(state.store.list_imports().await?))
}

pub async fn get_import(
    State(state): State<AppState>,
    Path(id): Path<ImportId>,
) -> Result<Json<ImportDetail>, ServerError> {
    let import = state
        .store
        .get_import(id)
        .await
        .map_err(|_| ServerError::NotFound(id))?;
    Ok(Json(ImportDetail {
        entity_count: state.store.count_entities(id).await?,
        line_errors: state.store.line_errors(id).await?,
        import,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DataType, ImportStatus};

    fn state() -> (AppState, tokio::sync::mpsc::UnboundedReceiver<DispatchMessage>) {
        let (queue, rx) = LocalQueue::new();
        (
            AppState {
                store: Arc::new(MemoryStore::new()),
                queue: Arc::new(queue),
            },
            rx,
        )
    }

    fn request(file_name: &str) -> NewImport {
        NewImport {
            data_type: DataType::Location,
            file_format: FileFormat::Xls,
            file_name: file_name.into(),
            source_location: "https://storage/locations.xls?sig=1".into(),
        }
    }

    #[tokio::test]
    async fn test_create_import_publishes_dispatch() {
        let (state, mut rx) = state();
        let (status, Json(import)) = create_import(State(state.clone()), Json(request("locations.xls")))
            .await
            .unwrap();

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(import.status, ImportStatus::Pending);
        let message = rx.recv().await.unwrap();
        assert_eq!(message.import_id, import.id);
        assert_eq!(message.attempt, 0);
        assert_eq!(message.file_format, FileFormat::Xls);
    }

    #[tokio::test]
    async fn test_create_import_requires_file_name() {
        let (state, _rx) = state();
        let err = create_import(State(state), Json(request("  "))).await.unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_get_import_detail_and_not_found() {
        let (state, _rx) = state();
        let (_, Json(import)) = create_import(State(state.clone()), Json(request("locations.xls")))
            .await
            .unwrap();

        let Json(detail) = get_import(State(state.clone()), Path(import.id)).await.unwrap();
        assert_eq!(detail.import.id, import.id);
        assert_eq!(detail.entity_count, 0);
        assert!(detail.line_errors.is_empty());

        let err = get_import(State(state.clone()), Path(999)).await.unwrap_err();
        assert!(matches!(err, ServerError::NotFound(999)));

        let Json(all) = list_imports(State(state)).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_health() {
        let Json(body) = health().await;
        assert_eq!(body["status"], "ok");
    }
}
