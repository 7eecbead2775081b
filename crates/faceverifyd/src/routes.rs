//! Request orchestration for each endpoint.
//!
//! Every handler validates its form, decodes the image off the async
//! executor, hands inference to the engine thread, and maps failures onto
//! [`ServiceError`]. The whole pipeline runs under the configured timeout.

use crate::error::{ComparisonError, ServiceError, ServiceResult};
use crate::form::{CompareFacesForm, GenerateEmbeddingForm, FACE_FIELD, STORED_EMBEDDING_FIELD};
use crate::state::AppState;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::Json;
use faceverify_core::{decode, DetectorKind, DistanceMetric, Embedding, ImageBuffer, ImagePayload};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Serialize)]
pub struct EmbeddingResponse {
    pub embedding: Vec<f64>,
}

#[derive(Debug, Serialize)]
pub struct CompareResponse {
    pub is_match: bool,
    pub distance: f64,
    pub threshold: f64,
    pub metric: DistanceMetric,
    pub model: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub model: String,
    pub detector: DetectorKind,
    pub distance_metric: DistanceMetric,
    pub threshold: f64,
    pub dimension: usize,
}

/// `POST /generate-embedding`
pub async fn generate_embedding(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ServiceResult<Json<EmbeddingResponse>> {
    let embedding = within(state.config.request_timeout, async {
        let form = GenerateEmbeddingForm::parse(multipart, state.config.max_upload_bytes).await?;
        let face = form.face.ok_or(ServiceError::MissingInput(FACE_FIELD))?;

        let image = decode_image(face).await?;
        Ok(state.engine.embed(image).await?)
    })
    .await?;

    tracing::info!(
        model = embedding.model().unwrap_or(state.engine.model_name()),
        dimension = embedding.len(),
        "embedding generated"
    );
    Ok(Json(EmbeddingResponse {
        embedding: embedding.values().to_vec(),
    }))
}

/// `POST /compare-faces`
pub async fn compare_faces(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<CompareResponse>, ComparisonError> {
    run_comparison(&state, multipart).await.map(Json).map_err(ComparisonError)
}

async fn run_comparison(
    state: &AppState,
    multipart: Result<Multipart, MultipartRejection>,
) -> ServiceResult<CompareResponse> {
    let config = &state.config;
    let result = within(config.request_timeout, async {
        let form = CompareFacesForm::parse(multipart, config.max_upload_bytes).await?;
        let face = form.face.ok_or(ServiceError::MissingInput(FACE_FIELD))?;
        let stored = form
            .stored_embedding
            .ok_or(ServiceError::MissingInput(STORED_EMBEDDING_FIELD))?;

        let image = decode_image(face).await?;
        let reference = Embedding::from_json(&stored, state.dimension())?;

        Ok(state
            .engine
            .compare(image, reference, config.distance_metric, config.threshold)
            .await?)
    })
    .await?;

    tracing::info!(
        is_match = result.matched,
        distance = result.distance,
        threshold = result.threshold,
        metric = %result.metric,
        "comparison complete"
    );

    Ok(CompareResponse {
        is_match: result.matched,
        distance: result.distance,
        threshold: result.threshold,
        metric: result.metric,
        model: state.engine.model_name().to_string(),
    })
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        model: state.engine.model_name().to_string(),
        detector: state.config.detector,
        distance_metric: state.config.distance_metric,
        threshold: state.config.threshold,
        dimension: state.dimension(),
    })
}

/// Decode on the blocking pool; image decoding is CPU-bound.
async fn decode_image(payload: ImagePayload) -> ServiceResult<ImageBuffer> {
    Ok(tokio::task::spawn_blocking(move || decode::decode(&payload)).await??)
}

async fn within<T>(limit: Duration, work: impl Future<Output = ServiceResult<T>>) -> ServiceResult<T> {
    tokio::time::timeout(limit, work)
        .await
        .map_err(|_| ServiceError::Timeout)?
}
