use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::repository::RepositoryError;

/// ApiError
///
/// The request-level error taxonomy. Every fallible path in the handlers and
/// the service layer funnels into one of these variants, which carry enough
/// context to pick the HTTP status and a client-safe message.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or missing input: absent identity, absent file, or a file
    /// not marked as GeoJSON.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Identity present but unusable: the token failed to decode or expired,
    /// or the resolved subject does not match the network owner.
    #[error("unauthorized")]
    Unauthorized,

    /// Unknown network id, or an exact version that does not exist.
    #[error("not found")]
    NotFound,

    /// A feature carried a valid geometry of a type other than LineString.
    /// Fatal for the whole ingestion call.
    #[error("unsupported geometry type: {0}")]
    UnsupportedGeometry(String),

    /// The payload is not a valid GeoJSON FeatureCollection.
    #[error("invalid GeoJSON: {0}")]
    Parse(String),

    /// Storage-layer failure. A surfaced foreign-key violation lands here as
    /// well; given correct orchestration it should never occur.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) | ApiError::UnsupportedGeometry(_) | ApiError::Parse(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Repository(e) => {
                // Internal failures are logged with full detail but reported
                // to the client opaquely.
                tracing::error!("repository error: {:?}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = match &self {
            ApiError::Repository(_) => "internal error".to_string(),
            other => other.to_string(),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
