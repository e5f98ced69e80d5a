use geo::algorithm::Validation;
use geo::algorithm::line_intersection::{LineIntersection, line_intersection};
use geo::{Geometry, Line, LineString};
use geojson::GeoJson;

use crate::error::ApiError;
use crate::models::RoadDraft;

/// parse_feature_collection
///
/// The geometry ingestor: parses a raw GeoJSON payload into the sequence of
/// road drafts a create/update request will persist. Pure transform; storage
/// is never touched here.
///
/// Filtering policy, in order, per feature:
/// 1. A feature without a usable geometry member fails the whole call
///    (`Parse`), as does a payload that is not a `FeatureCollection`.
/// 2. An *invalid* geometry (degenerate, non-finite, or a self-intersecting
///    LineString) is skipped entirely: logged, no road produced, no error.
///    This is a deliberate partial-success policy.
/// 3. A valid geometry of any type other than `LineString` aborts the whole
///    ingestion with `UnsupportedGeometry`; the caller must treat this as a
///    hard failure with nothing persisted.
///
/// The emitted drafts carry the GeoJSON geometry exactly as parsed, so the
/// submitted coordinate precision is preserved end to end.
pub fn parse_feature_collection(raw: &[u8]) -> Result<Vec<RoadDraft>, ApiError> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| ApiError::Parse("payload is not valid UTF-8".to_string()))?;

    let geojson = text
        .parse::<GeoJson>()
        .map_err(|e| ApiError::Parse(e.to_string()))?;

    let GeoJson::FeatureCollection(collection) = geojson else {
        return Err(ApiError::Parse(
            "payload is not a FeatureCollection".to_string(),
        ));
    };

    let mut drafts = Vec::with_capacity(collection.features.len());

    for feature in collection.features {
        let Some(geometry) = feature.geometry else {
            return Err(ApiError::Parse(
                "feature is missing a geometry member".to_string(),
            ));
        };

        let parsed = Geometry::<f64>::try_from(geometry.value.clone())
            .map_err(|e| ApiError::Parse(e.to_string()))?;

        // Validity gate runs before the type gate: a broken geometry of any
        // type is skipped, never fatal.
        if !is_usable(&parsed) {
            tracing::info!(
                geometry_type = geometry_type_name(&parsed),
                "skipping invalid geometry"
            );
            continue;
        }

        match parsed {
            Geometry::LineString(_) => drafts.push(RoadDraft {
                geometry,
                properties: feature.properties.unwrap_or_default(),
            }),
            other => {
                return Err(ApiError::UnsupportedGeometry(
                    geometry_type_name(&other).to_string(),
                ));
            }
        }
    }

    Ok(drafts)
}

/// Whether a geometry passes the validity gate. LineStrings get the full
/// treatment (degeneracy + OGC validity + simplicity); other types only need
/// OGC validity, since a valid non-LineString is rejected later by type.
fn is_usable(geometry: &Geometry<f64>) -> bool {
    match geometry {
        Geometry::LineString(line) => line_string_is_usable(line),
        other => other.is_valid(),
    }
}

fn line_string_is_usable(line: &LineString<f64>) -> bool {
    let coords = &line.0;
    if coords.len() < 2 {
        return false;
    }
    // All-coincident coordinates form a zero-length line: degenerate.
    let first = coords[0];
    if coords.iter().all(|c| *c == first) {
        return false;
    }
    line.is_valid() && line_string_is_simple(line)
}

/// Pairwise segment sweep rejecting self-intersections. Consecutive segments
/// may share their common endpoint, as may the first and last segment of a
/// closed ring; any other contact (proper crossing, revisited vertex,
/// collinear overlap) makes the line non-simple.
fn line_string_is_simple(line: &LineString<f64>) -> bool {
    let segments: Vec<Line<f64>> = line.lines().collect();

    for i in 0..segments.len() {
        for j in (i + 1)..segments.len() {
            let Some(hit) = line_intersection(segments[i], segments[j]) else {
                continue;
            };

            let adjacent = j == i + 1;
            let ring_closure = line.is_closed() && i == 0 && j == segments.len() - 1;

            match hit {
                LineIntersection::SinglePoint { is_proper, .. } => {
                    if is_proper {
                        return false;
                    }
                    if !adjacent && !ring_closure {
                        return false;
                    }
                }
                LineIntersection::Collinear { .. } => return false,
            }
        }
    }

    true
}

/// The GeoJSON-facing name of a geometry's type, used in skip logs and in the
/// `UnsupportedGeometry` message.
fn geometry_type_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}
