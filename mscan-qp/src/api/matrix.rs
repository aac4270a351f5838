//! Matrix photo analysis endpoint
//!
//! The scanning UI downsamples the camera frame client-side and posts the
//! raw RGBA pixels base64-encoded; the verdict decides whether the photo
//! enters the matrix-code catalogue flow.

use axum::{extract::State, routing::post, Json, Router};
use base64::Engine;
use serde::Deserialize;

use crate::error::ApiResult;
use crate::services::matrix_detector::{detect, MatrixDetection};
use crate::AppState;

/// POST /analyze/matrix request
#[derive(Debug, Deserialize)]
pub struct MatrixAnalysisRequest {
    pub width: u32,
    pub height: u32,
    /// Base64-encoded row-major RGBA8 pixel data
    pub pixels: String,
}

/// POST /analyze/matrix
///
/// Undecodable payloads are not an error: the contract is a
/// zero-confidence negative verdict, so the UI can fall back to treating
/// the photo as a cover shot.
pub async fn analyze_matrix(
    State(_state): State<AppState>,
    Json(request): Json<MatrixAnalysisRequest>,
) -> ApiResult<Json<MatrixDetection>> {
    let detection = match base64::engine::general_purpose::STANDARD.decode(&request.pixels) {
        Ok(pixels) => detect(&pixels, request.width, request.height),
        Err(e) => {
            tracing::debug!(error = %e, "Rejecting undecodable matrix photo payload");
            detect(&[], 0, 0)
        }
    };

    Ok(Json(detection))
}

/// Build matrix analysis routes
pub fn matrix_routes() -> Router<AppState> {
    Router::new().route("/analyze/matrix", post(analyze_matrix))
}
