use crate::blob_store::UploadTarget;
use crate::config::ApiConfig;
use crate::error::TriageError;
use crate::orchestrator::{BatchOrchestrator, PhotoView};
use crate::photo::{BlobRef, NewPhoto, Photo, PhotoId};
use crate::report::{BatchKind, BatchReport, ItemOutcome};
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<BatchOrchestrator>,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// A `TriageError` rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(TriageError);

impl From<TriageError> for ApiError {
    fn from(error: TriageError) -> Self {
        Self(error)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(TriageError::InvalidInput(rejection.body_text()))
    }
}

fn status_for(error: &TriageError) -> StatusCode {
    match error {
        TriageError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        TriageError::ResourceNotFound { .. } => StatusCode::NOT_FOUND,
        TriageError::PolicyViolation(_) | TriageError::Busy(_) => StatusCode::CONFLICT,
        TriageError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
        TriageError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        TriageError::TransientProvider(_) | TriageError::MalformedProviderResponse(_) => {
            StatusCode::BAD_GATEWAY
        }
        TriageError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "Request failed");
            "Internal storage error".to_string()
        } else {
            warn!(error = %self.0, status = status.as_u16(), "Request rejected");
            self.0.to_string()
        };

        let body = ErrorResponse {
            error: message,
            code: self.0.code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Photo list response
#[derive(Debug, Serialize)]
pub struct PhotoListResponse {
    pub photos: Vec<PhotoView>,
    pub total_count: usize,
}

/// Upload metadata posted once the client has written the blob
#[derive(Debug, Deserialize)]
pub struct RegisterPhotoRequest {
    pub blob_ref: String,
    pub filename: String,
    /// Derived from the filename extension when omitted
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub size_bytes: u64,
}

impl From<RegisterPhotoRequest> for NewPhoto {
    fn from(request: RegisterPhotoRequest) -> Self {
        Self {
            blob_ref: BlobRef::new(request.blob_ref),
            filename: request.filename,
            content_type: request.content_type,
            size_bytes: request.size_bytes,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QualityScoreRequest {
    pub score: f64,
}

/// Outcome of one batch item
#[derive(Debug, Serialize)]
pub struct ItemResponse {
    pub photo_id: PhotoId,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
}

/// Batch report response
#[derive(Debug, Serialize)]
pub struct BatchReportResponse {
    pub kind: BatchKind,
    pub catalog_size: usize,
    /// Photos rejected by a cull, or enhanced by an enhance
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub items: Vec<ItemResponse>,
}

impl From<BatchReport> for BatchReportResponse {
    fn from(report: BatchReport) -> Self {
        let (succeeded, skipped, failed) = (report.succeeded(), report.skipped(), report.failed());
        let items = report
            .items
            .into_iter()
            .map(|item| match item.outcome {
                ItemOutcome::Success => ItemResponse {
                    photo_id: item.photo_id,
                    outcome: "success",
                    reason: None,
                    error: None,
                },
                ItemOutcome::Skipped(reason) => ItemResponse {
                    photo_id: item.photo_id,
                    outcome: "skipped",
                    reason: Some(reason.to_string()),
                    error: None,
                },
                ItemOutcome::Failed(error) => ItemResponse {
                    photo_id: item.photo_id,
                    outcome: "failed",
                    reason: None,
                    error: Some(ErrorResponse {
                        error: error.to_string(),
                        code: error.code().to_string(),
                    }),
                },
            })
            .collect();

        Self {
            kind: report.kind,
            catalog_size: report.catalog_size,
            succeeded,
            skipped,
            failed,
            items,
        }
    }
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/photos", get(list_photos).post(register_photo))
        .route("/api/v1/photos/upload-target", post(upload_target))
        .route("/api/v1/photos/:photo_id", get(get_photo).delete(delete_photo))
        .route("/api/v1/photos/:photo_id/quality-score", put(set_quality_score))
        .route("/api/v1/photos/:photo_id/enhance", post(enhance_photo))
        .route("/api/v1/batch/cull", post(run_cull))
        .route("/api/v1/batch/enhance", post(run_enhance))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn parse_photo_id(raw: &str) -> Result<PhotoId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError(TriageError::InvalidInput(format!("invalid photo id: {raw}"))))
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "triage-service"
    }))
}

#[instrument(skip(state))]
async fn list_photos(State(state): State<AppState>) -> Result<Json<PhotoListResponse>, ApiError> {
    let photos = state.orchestrator.list_photos().await?;
    Ok(Json(PhotoListResponse {
        total_count: photos.len(),
        photos,
    }))
}

#[instrument(skip(state))]
async fn upload_target(State(state): State<AppState>) -> Result<Json<UploadTarget>, ApiError> {
    Ok(Json(state.orchestrator.generate_upload_target().await?))
}

#[instrument(skip(state, payload))]
async fn register_photo(
    State(state): State<AppState>,
    payload: Result<Json<RegisterPhotoRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Photo>), ApiError> {
    let Json(request) = payload?;
    let photo = state.orchestrator.register_upload(request.into()).await?;
    Ok((StatusCode::CREATED, Json(photo)))
}

#[instrument(skip(state))]
async fn get_photo(
    State(state): State<AppState>,
    Path(photo_id): Path<String>,
) -> Result<Json<Photo>, ApiError> {
    let id = parse_photo_id(&photo_id)?;
    Ok(Json(state.orchestrator.get_photo(id).await?))
}

#[instrument(skip(state))]
async fn delete_photo(
    State(state): State<AppState>,
    Path(photo_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_photo_id(&photo_id)?;
    state.orchestrator.delete_photo(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, payload))]
async fn set_quality_score(
    State(state): State<AppState>,
    Path(photo_id): Path<String>,
    payload: Result<Json<QualityScoreRequest>, JsonRejection>,
) -> Result<Json<Photo>, ApiError> {
    let id = parse_photo_id(&photo_id)?;
    let Json(request) = payload?;
    Ok(Json(
        state.orchestrator.set_quality_score(id, request.score).await?,
    ))
}

/// Strict single-photo enhancement
#[instrument(skip(state))]
async fn enhance_photo(
    State(state): State<AppState>,
    Path(photo_id): Path<String>,
) -> Result<Json<Photo>, ApiError> {
    let id = parse_photo_id(&photo_id)?;
    Ok(Json(state.orchestrator.enhance_one(id).await?))
}

#[instrument(skip(state))]
async fn run_cull(State(state): State<AppState>) -> Result<Json<BatchReportResponse>, ApiError> {
    let report = state.orchestrator.cull().await?;
    Ok(Json(report.into()))
}

#[instrument(skip(state))]
async fn run_enhance(
    State(state): State<AppState>,
) -> Result<Json<BatchReportResponse>, ApiError> {
    let report = state.orchestrator.enhance_all().await?;
    Ok(Json(report.into()))
}

/// Start the API server; returns once `shutdown` is cancelled and in-flight
/// requests have drained
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting triage API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("API server error")?;

    info!("Triage API server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::MemoryBlobStore;
    use crate::catalog::{CatalogStore, MemoryCatalog};
    use crate::enhancement::{EnhancedImage, MockEnhancementProvider};
    use crate::error::EnhancementError;
    use crate::orchestrator::OrchestratorSettings;
    use crate::photo::PhotoStatus;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use chrono::Utc;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::Value;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        catalog: Arc<MemoryCatalog>,
        blobs: Arc<MemoryBlobStore>,
    }

    impl TestApp {
        fn new(provider: MockEnhancementProvider) -> Self {
            let catalog = Arc::new(MemoryCatalog::new());
            let blobs = Arc::new(MemoryBlobStore::new("http://blobs.test"));
            let orchestrator = BatchOrchestrator::new(
                catalog.clone(),
                blobs.clone(),
                Arc::new(provider),
                OrchestratorSettings::default(),
            )
            .unwrap()
            .with_rng(StdRng::seed_from_u64(11));

            let state = AppState {
                orchestrator: Arc::new(orchestrator),
            };
            Self {
                router: create_router(state, &ApiConfig::default()),
                catalog,
                blobs,
            }
        }

        async fn seed(&self, count: usize, status: PhotoStatus) -> Vec<Photo> {
            let mut photos = Vec::new();
            for i in 0..count {
                let blob_ref = BlobRef::new(format!("uploads/{}", PhotoId::new()));
                self.blobs.put(&blob_ref, vec![7; 4], "image/jpeg");
                let mut photo = Photo::from_upload(
                    NewPhoto {
                        blob_ref,
                        filename: format!("seed-{i}.jpg"),
                        content_type: "image/jpeg".to_string(),
                        size_bytes: 4,
                    },
                    Utc::now(),
                );
                photo.status = status;
                self.catalog.insert(&photo).await.unwrap();
                photos.push(photo);
            }
            photos
        }

        async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
            let request = Request::builder().method(method).uri(uri);
            let request = match body {
                Some(json) => request
                    .header("content-type", "application/json")
                    .body(Body::from(json.to_string())),
                None => request.body(Body::empty()),
            }
            .unwrap();

            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let json = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, json)
        }
    }

    fn idle_provider() -> MockEnhancementProvider {
        let mut provider = MockEnhancementProvider::new();
        provider.expect_name().return_const("mock");
        provider.expect_check_credentials().returning(|| Ok(()));
        provider.expect_enhance().never();
        provider
    }

    fn working_provider() -> MockEnhancementProvider {
        let mut provider = MockEnhancementProvider::new();
        provider.expect_name().return_const("mock");
        provider.expect_check_credentials().returning(|| Ok(()));
        provider.expect_enhance().returning(|_| {
            Ok(EnhancedImage {
                bytes: b"sharper".to_vec(),
                content_type: "image/png".to_string(),
                reported_score: Some(8.8),
            })
        });
        provider
    }

    #[tokio::test]
    async fn test_health() {
        let app = TestApp::new(idle_provider());
        let (status, body) = app.send(Method::GET, "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_upload_then_register_then_list() {
        let app = TestApp::new(idle_provider());

        let (status, target) = app
            .send(Method::POST, "/api/v1/photos/upload-target", None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let blob_ref = target["blob_ref"].as_str().unwrap().to_string();
        app.blobs.put(&BlobRef::new(&blob_ref), vec![1, 2, 3], "image/jpeg");

        let (status, photo) = app
            .send(
                Method::POST,
                "/api/v1/photos",
                Some(serde_json::json!({
                    "blob_ref": blob_ref,
                    "filename": "dunes.jpg",
                    "size_bytes": 3
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(photo["status"], "pending");
        assert_eq!(photo["is_enhanced"], false);
        assert_eq!(photo["content_type"], "image/jpeg");

        let (status, list) = app.send(Method::GET, "/api/v1/photos", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["total_count"], 1);
        assert_eq!(
            list["photos"][0]["url"],
            format!("http://blobs.test/{blob_ref}")
        );
    }

    #[tokio::test]
    async fn test_register_without_blob_is_not_found() {
        let app = TestApp::new(idle_provider());
        let (status, body) = app
            .send(
                Method::POST,
                "/api/v1/photos",
                Some(serde_json::json!({ "blob_ref": "uploads/nothing", "filename": "a.jpg" })),
            )
            .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_unparseable_bodies_are_invalid_input() {
        let app = TestApp::new(idle_provider());

        let (status, body) = app
            .send(
                Method::POST,
                "/api/v1/photos",
                Some(serde_json::json!({ "filename": "a.jpg" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_INPUT");
        assert!(body["error"].as_str().unwrap().contains("blob_ref"));

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/photos")
            .header("content-type", "application/json")
            .body(Body::from("not json"))
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: ErrorResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.code, "INVALID_INPUT");

        let uri = format!("/api/v1/photos/{}/quality-score", PhotoId::new());
        let request = Request::builder()
            .method(Method::PUT)
            .uri(&uri)
            .body(Body::from(r#"{"score": 8.0}"#))
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_photo_errors() {
        let app = TestApp::new(idle_provider());

        let (status, body) = app.send(Method::GET, "/api/v1/photos/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_INPUT");

        let uri = format!("/api/v1/photos/{}", PhotoId::new());
        let (status, body) = app.send(Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_batch_cull() {
        let app = TestApp::new(idle_provider());
        app.seed(10, PhotoStatus::Pending).await;

        let (status, report) = app.send(Method::POST, "/api/v1/batch/cull", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["kind"], "cull");
        assert_eq!(report["catalog_size"], 10);
        assert_eq!(report["succeeded"], 3);
        assert_eq!(report["items"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_batch_enhance_reports_items() {
        let app = TestApp::new(working_provider());
        app.seed(2, PhotoStatus::Pending).await;
        app.seed(1, PhotoStatus::Rejected).await;

        let (status, report) = app.send(Method::POST, "/api/v1/batch/enhance", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["succeeded"], 2);
        assert_eq!(report["failed"], 0);
        for photo in app.catalog.list_all().await.unwrap() {
            if !photo.is_rejected() {
                assert_eq!(photo.quality_score.map(|s| s.value()), Some(8.8));
            }
        }
    }

    #[tokio::test]
    async fn test_batch_enhance_without_credentials() {
        let mut provider = MockEnhancementProvider::new();
        provider.expect_name().return_const("mock");
        provider
            .expect_check_credentials()
            .returning(|| Err(EnhancementError::missing_credentials()));
        provider.expect_enhance().never();
        let app = TestApp::new(provider);
        app.seed(2, PhotoStatus::Pending).await;

        let (status, body) = app.send(Method::POST, "/api/v1/batch/enhance", None).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "CONFIGURATION_ERROR");
    }

    #[tokio::test]
    async fn test_strict_enhance_of_rejected_photo_conflicts() {
        let app = TestApp::new(idle_provider());
        let photos = app.seed(1, PhotoStatus::Rejected).await;

        let uri = format!("/api/v1/photos/{}/enhance", photos[0].id);
        let (status, body) = app.send(Method::POST, &uri, None).await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "POLICY_VIOLATION");
    }

    #[tokio::test]
    async fn test_strict_enhance_provider_failure_is_bad_gateway() {
        let mut provider = MockEnhancementProvider::new();
        provider.expect_name().return_const("mock");
        provider.expect_check_credentials().returning(|| Ok(()));
        provider
            .expect_enhance()
            .returning(|_| Err(EnhancementError::http_status(500, "provider returned 500")));
        let app = TestApp::new(provider);
        let photos = app.seed(1, PhotoStatus::Pending).await;

        let uri = format!("/api/v1/photos/{}/enhance", photos[0].id);
        let (status, body) = app.send(Method::POST, &uri, None).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["code"], "PROVIDER_ERROR");
    }

    #[tokio::test]
    async fn test_quality_score_flow() {
        let app = TestApp::new(working_provider());
        let photos = app.seed(1, PhotoStatus::Pending).await;
        let score_uri = format!("/api/v1/photos/{}/quality-score", photos[0].id);

        let (status, _) = app
            .send(Method::PUT, &score_uri, Some(serde_json::json!({ "score": 9.0 })))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let enhance_uri = format!("/api/v1/photos/{}/enhance", photos[0].id);
        let (status, enhanced) = app.send(Method::POST, &enhance_uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(enhanced["is_enhanced"], true);

        let (status, updated) = app
            .send(Method::PUT, &score_uri, Some(serde_json::json!({ "score": 9.0 })))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["quality_score"], 9.0);

        let (status, body) = app
            .send(Method::PUT, &score_uri, Some(serde_json::json!({ "score": 10.5 })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_INPUT");
    }

    #[tokio::test]
    async fn test_delete_photo() {
        let app = TestApp::new(idle_provider());
        let photos = app.seed(1, PhotoStatus::Pending).await;
        let uri = format!("/api/v1/photos/{}", photos[0].id);

        let (status, _) = app.send(Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(app.blobs.is_empty());

        let (status, _) = app.send(Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&TriageError::Busy(PhotoId::new())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&TriageError::from(EnhancementError::timeout(
                std::time::Duration::from_secs(1)
            ))),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_for(&TriageError::Persistence("down".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
