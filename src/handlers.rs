use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;

use crate::{
    AppState,
    auth::{self, BearerOwner},
    error::ApiError,
    models::{GeoJsonUpload, NetworkResponse},
    service,
};

// --- Request Extraction Helpers ---

/// The parts of a multipart create/update body the service cares about: the
/// GeoJSON file and an optional `authorization` form field.
#[derive(Default)]
struct UploadForm {
    file: Option<GeoJsonUpload>,
    form_token: Option<String>,
}

/// Walks the multipart stream once, collecting the `file` and `authorization`
/// parts and ignoring anything else. Stream-level failures (truncated body,
/// malformed boundaries) surface as `BadRequest`.
async fn collect_upload(multipart: &mut Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        let name = field.name().map(ToString::to_string);
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                form.file = Some(GeoJsonUpload {
                    bytes: bytes.to_vec(),
                    marked_geojson: declares_geojson(&file_name, &content_type),
                });
            }
            Some("authorization") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                form.form_token = Some(value);
            }
            _ => {}
        }
    }

    Ok(form)
}

/// Whether the uploaded part declared itself GeoJSON. A `.geojson` filename
/// or a `application/geo+json` content type always counts; plain
/// `application/json` is accepted as long as the filename doesn't contradict it.
fn declares_geojson(file_name: &str, content_type: &str) -> bool {
    let name = file_name.to_ascii_lowercase();
    if name.ends_with(".geojson") {
        return true;
    }
    if content_type.eq_ignore_ascii_case("application/geo+json") {
        return true;
    }
    content_type.eq_ignore_ascii_case("application/json")
        && (name.is_empty() || name.ends_with(".json"))
}

/// Merges the two credential transports: the `Authorization` header (already
/// decoded by the `BearerOwner` extractor) wins; otherwise the fallback token
/// from a form field or query parameter is decoded here. No credential at all
/// is not an error yet; the service decides what a missing identity means
/// for its step sequence.
fn resolve_owner(
    header_owner: Option<String>,
    fallback_token: Option<&str>,
) -> Result<Option<String>, ApiError> {
    if let Some(owner) = header_owner {
        return Ok(Some(owner));
    }
    match fallback_token {
        Some(token) => auth::owner_from_token(token).map(Some),
        None => Ok(None),
    }
}

// --- Handlers ---

/// create_network
///
/// `POST /`: submits a GeoJSON FeatureCollection as a brand-new road
/// network. The caller identity comes from the bearer token (header or
/// `authorization` form field); the file rides in the multipart `file` part.
#[utoipa::path(
    post,
    path = "/",
    responses(
        (status = 201, description = "Network created", body = NetworkResponse),
        (status = 400, description = "Missing/invalid authorization or file"),
        (status = 401, description = "Token invalid or expired")
    )
)]
pub async fn create_network(
    BearerOwner(header_owner): BearerOwner,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<NetworkResponse>), ApiError> {
    let form = collect_upload(&mut multipart).await?;
    let owner = resolve_owner(header_owner, form.form_token.as_deref())?;

    let network = service::create(
        state.repo.as_ref(),
        owner.as_deref(),
        form.file.as_ref(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(network)))
}

/// update_network
///
/// `PUT /{id}`: submits a GeoJSON FeatureCollection as the next version of
/// an existing network. Only the owner of the network may update it; the
/// previous versions stay retrievable unchanged.
#[utoipa::path(
    put,
    path = "/{id}",
    params(("id" = i64, Path, description = "Network root id")),
    responses(
        (status = 201, description = "New version created", body = NetworkResponse),
        (status = 400, description = "Missing/invalid authorization or file"),
        (status = 401, description = "Caller is not the owner"),
        (status = 404, description = "Unknown network id")
    )
)]
pub async fn update_network(
    BearerOwner(header_owner): BearerOwner,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<NetworkResponse>), ApiError> {
    let form = collect_upload(&mut multipart).await?;
    let owner = resolve_owner(header_owner, form.form_token.as_deref())?;

    let network = service::update(
        state.repo.as_ref(),
        id,
        owner.as_deref(),
        form.file.as_ref(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(network)))
}

/// GetNetworkQuery
///
/// Accepted query parameters for `GET /{id}`: an optional exact version
/// (latest otherwise), and the bearer token for callers that cannot set an
/// `Authorization` header on a body-less request.
#[derive(Deserialize, utoipa::IntoParams)]
pub struct GetNetworkQuery {
    /// Exact version to fetch; latest when absent.
    pub version: Option<i64>,
    /// Bearer token, as an alternative to the Authorization header.
    pub authorization: Option<String>,
}

/// get_network
///
/// `GET /{id}?version=N`: retrieves one network version, serialized with its
/// roads as GeoJSON features. Restricted to the network owner.
#[utoipa::path(
    get,
    path = "/{id}",
    params(("id" = i64, Path, description = "Network root id"), GetNetworkQuery),
    responses(
        (status = 200, description = "Network found", body = NetworkResponse),
        (status = 400, description = "Missing authorization"),
        (status = 401, description = "Caller is not the owner"),
        (status = 404, description = "Unknown network id or version")
    )
)]
pub async fn get_network(
    BearerOwner(header_owner): BearerOwner,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<GetNetworkQuery>,
) -> Result<Json<NetworkResponse>, ApiError> {
    let owner = resolve_owner(header_owner, query.authorization.as_deref())?;

    let network = service::get(state.repo.as_ref(), id, owner.as_deref(), query.version).await?;
    Ok(Json(network))
}
