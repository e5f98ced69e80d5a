use crate::{
    error::ApiError,
    ingest,
    models::{GeoJsonUpload, NetworkResponse, RoadDraft, RoadNetwork},
    repository::NetworkRepository,
};

/// NetworkService
///
/// The create/update/get use-cases, as stateless functions over the
/// repository trait. Each function owns its request's full step sequence
/// (presence validation, authorization, version derivation, ingestion, and
/// response assembly), so the HTTP layer stays a thin multipart/status shim.

/// create
///
/// Creates a brand-new network (fresh root id, version 1) from a GeoJSON
/// upload. Ingestion runs before any write and the network + road inserts
/// share one transaction, so an ingestion failure leaves no rows behind.
pub async fn create(
    repo: &dyn NetworkRepository,
    owner: Option<&str>,
    upload: Option<&GeoJsonUpload>,
) -> Result<NetworkResponse, ApiError> {
    let owner = require_owner(owner)?;
    let payload = require_geojson(upload)?;

    let drafts = ingest::parse_feature_collection(payload)?;
    let network = repo.create_version(owner, None, &drafts).await?;

    tracing::info!(
        network_id = network.id,
        roads = drafts.len(),
        "created road network"
    );
    Ok(assemble(network, &drafts))
}

/// update
///
/// Creates the next version of an existing network. Existence is checked
/// before input validation (an unknown id is a 404 even for a bad request),
/// and ownership is a plain equality match against the latest version's
/// owner. Prior versions are never touched.
pub async fn update(
    repo: &dyn NetworkRepository,
    network_id: i64,
    owner: Option<&str>,
    upload: Option<&GeoJsonUpload>,
) -> Result<NetworkResponse, ApiError> {
    let latest = repo
        .find_latest(network_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let owner = require_owner(owner)?;
    let payload = require_geojson(upload)?;

    if owner != latest.owner {
        return Err(ApiError::Unauthorized);
    }

    let drafts = ingest::parse_feature_collection(payload)?;
    let network = repo.create_version(owner, Some(network_id), &drafts).await?;

    tracing::info!(
        network_id = network.id,
        version = network.version,
        roads = drafts.len(),
        "created new network version"
    );
    Ok(assemble(network, &drafts))
}

/// get
///
/// Retrieves one network version: the requested one, or the latest when no
/// version is asked for. Existence of the root id is checked first, then the
/// caller's identity, then the exact version.
pub async fn get(
    repo: &dyn NetworkRepository,
    network_id: i64,
    owner: Option<&str>,
    requested_version: Option<i64>,
) -> Result<NetworkResponse, ApiError> {
    let latest = repo
        .find_latest(network_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let owner = require_owner(owner)?;
    if owner != latest.owner {
        return Err(ApiError::Unauthorized);
    }

    let network = match requested_version {
        Some(version) => repo
            .find_network(network_id, version)
            .await?
            .ok_or(ApiError::NotFound)?,
        None => latest,
    };

    let roads = repo.roads(network.id, network.version).await?;
    Ok(NetworkResponse {
        id: network.id,
        version: network.version,
        owner: network.owner,
        features: roads.iter().map(|road| road.to_feature()).collect(),
    })
}

fn require_owner(owner: Option<&str>) -> Result<&str, ApiError> {
    owner.ok_or_else(|| ApiError::BadRequest("missing authorization".to_string()))
}

/// Presence + declaration gate for the uploaded file: it must exist and must
/// mark itself as GeoJSON via filename or content type.
fn require_geojson(upload: Option<&GeoJsonUpload>) -> Result<&[u8], ApiError> {
    let upload = upload.ok_or_else(|| ApiError::BadRequest("missing file field".to_string()))?;
    if !upload.marked_geojson {
        return Err(ApiError::BadRequest(
            "file must be GeoJSON (.geojson)".to_string(),
        ));
    }
    Ok(&upload.bytes)
}

/// Serializes a freshly created network version from the drafts that were
/// just persisted, saving a read-back round trip.
fn assemble(network: RoadNetwork, drafts: &[RoadDraft]) -> NetworkResponse {
    NetworkResponse {
        id: network.id,
        version: network.version,
        owner: network.owner,
        features: drafts.iter().map(|draft| draft.to_feature()).collect(),
    }
}
