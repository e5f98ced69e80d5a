use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use utoipa::ToSchema;

// --- Core Application Schemas (Mapped to Database) ---

/// RoadNetwork
///
/// A single immutable snapshot of a road network, stored in `road_networks`.
/// The identity is the composite key `(id, version)`: an update never touches
/// an existing row, it inserts a new row at `version + 1`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, FromRow, Default)]
pub struct RoadNetwork {
    /// Root identity shared by every version of the same network.
    pub id: i64,
    /// Monotonically increasing snapshot number, starting at 1.
    pub version: i64,
    /// Opaque identity string taken from the caller's bearer-token subject
    /// claim. Ownership checks are a plain equality match against this value.
    pub owner: String,
    pub created_at: DateTime<Utc>,
}

/// Road
///
/// A persisted road row from the `roads` table. Each road belongs to exactly
/// one `(road_network_id, road_network_version)` pair and is never shared
/// across versions; an update writes wholly new rows.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct Road {
    pub id: i64,
    pub road_network_id: i64,
    pub road_network_version: i64,
    /// The GeoJSON geometry object verbatim (WGS84, lon/lat). Stored as JSONB
    /// so submitted coordinate precision survives the round trip.
    pub geometry: Value,
    /// Open-ended feature properties; no fixed schema is imposed.
    pub properties: Value,
}

impl Road {
    /// Renders the road as a GeoJSON `Feature` object for the response body.
    pub fn to_feature(&self) -> Value {
        serde_json::json!({
            "type": "Feature",
            "properties": self.properties,
            "geometry": self.geometry,
        })
    }
}

/// RoadDraft
///
/// A `(geometry, properties)` pair produced by ingestion but not yet
/// persisted. The geometry is kept as the parsed GeoJSON value rather than a
/// processed form so no coordinate precision is lost on the way in.
#[derive(Debug, Clone, PartialEq)]
pub struct RoadDraft {
    pub geometry: geojson::Geometry,
    pub properties: serde_json::Map<String, Value>,
}

impl RoadDraft {
    /// The geometry as a plain JSON value, ready for the JSONB column.
    pub fn geometry_value(&self) -> Value {
        serde_json::to_value(&self.geometry).unwrap_or(Value::Null)
    }

    /// The properties as a plain JSON object value.
    pub fn properties_value(&self) -> Value {
        Value::Object(self.properties.clone())
    }

    /// Renders the draft as a GeoJSON `Feature` object.
    pub fn to_feature(&self) -> Value {
        serde_json::json!({
            "type": "Feature",
            "properties": self.properties,
            "geometry": self.geometry,
        })
    }
}

// --- Request/Response Schemas ---

/// GeoJsonUpload
///
/// The uploaded file part of a create/update request, as collected by the
/// HTTP layer: the raw bytes plus whether the part declared itself GeoJSON
/// (via its filename or content type).
#[derive(Debug, Clone, Default)]
pub struct GeoJsonUpload {
    pub bytes: Vec<u8>,
    pub marked_geojson: bool,
}

/// NetworkResponse
///
/// The serialized representation of one network version returned by every
/// endpoint: identity, owner, and the roads as GeoJSON `Feature` objects.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct NetworkResponse {
    pub id: i64,
    pub version: i64,
    pub owner: String,
    #[schema(value_type = Vec<Object>)]
    pub features: Vec<Value>,
}
