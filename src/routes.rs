use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Network Router Module
///
/// The full HTTP surface of the service. There is a single authorization
/// model (ownership equality against the bearer-token subject), so unlike a
/// role-segregated API there is nothing to split into public/authenticated
/// route groups; every data route resolves the caller identity itself.
pub fn network_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Unauthenticated liveness endpoint for monitoring and load balancers.
        .route("/health", get(|| async { "ok" }))
        // POST /
        // Submits a GeoJSON FeatureCollection as a new road network
        // (fresh id, version 1).
        .route("/", post(handlers::create_network))
        // PUT /{id}: next immutable version of an existing network.
        // GET /{id}?version=N: retrieve an exact or the latest version.
        .route(
            "/{id}",
            put(handlers::update_network).get(handlers::get_network),
        )
}
