use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::post;
use axum::Router;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::pipeline::pipeline::EmotionPipeline;
use crate::utils::error::PipelineError;
use crate::utils::image::{decode_color_image, to_grayscale};

/// Upload size cap for the multipart body.
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Shared read-only state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<EmotionPipeline>,
}

impl AppState {
    pub fn new(pipeline: EmotionPipeline) -> Self {
        AppState {
            pipeline: Arc::new(pipeline),
        }
    }
}

/// router assembles the application routes with permissive CORS and request
/// tracing.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/predict", post(predict))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// POST /predict: multipart form with an `image` file field.
async fn predict(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> (StatusCode, Json<Value>) {
    let mut upload: Option<(String, Vec<u8>)> = None;

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() != Some("image") {
                    continue;
                }
                // a field without a filename is a plain form value, not a file upload
                let Some(filename) = field.file_name().map(str::to_string) else {
                    continue;
                };
                match field.bytes().await {
                    Ok(data) => {
                        upload = Some((filename, data.to_vec()));
                        break;
                    }
                    Err(e) => {
                        debug!("failed to read multipart field: {e}");
                        return (
                            StatusCode::BAD_REQUEST,
                            Json(json!({ "error": "Failed to read upload" })),
                        );
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!("malformed multipart body: {e}");
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": "Failed to read upload" })),
                );
            }
        }
    }

    let Some((filename, bytes)) = upload else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "No image provided" })),
        );
    };
    if filename.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Empty filename" })),
        );
    }

    // decode and inference are CPU-bound; keep them off the async workers
    let pipeline = state.pipeline.clone();
    let result = tokio::task::spawn_blocking(move || {
        let img = decode_color_image(&bytes)?;
        let gray = to_grayscale(&img)?;
        pipeline.classify(&gray)
    })
    .await;

    match result {
        Ok(Ok(prediction)) => (StatusCode::OK, Json(json!({ "prediction": prediction }))),
        Ok(Err(err)) => error_response(err),
        Err(e) => {
            error!("classification task failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Internal server error" })),
            )
        }
    }
}

fn error_response(err: PipelineError) -> (StatusCode, Json<Value>) {
    match err {
        PipelineError::UndecodableImage(reason) => {
            debug!("rejected upload: {reason}");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Could not decode image" })),
            )
        }
        PipelineError::NoFaceDetected => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": "No face detected" })),
        ),
        other => {
            error!("prediction failed: {other}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Internal server error" })),
            )
        }
    }
}
