use crate::models::{Road, RoadDraft, RoadNetwork};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Bounded retry budget for id/version allocation under contention. Every
/// conflict implies another writer committed, so a writer needs at most as
/// many attempts as there are simultaneous writers.
const MAX_ALLOC_RETRIES: u32 = 5;

/// RepositoryError
///
/// Failures surfaced by the persistence layer. Handlers map these to a 500;
/// the two named variants exist so callers and tests can distinguish
/// integrity failures from plain database errors.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A road insert referenced a `(network id, version)` pair with no
    /// network row. Given correct orchestration this should never occur.
    #[error("no network row for ({id}, {version})")]
    ForeignKeyViolation { id: i64, version: i64 },

    /// Concurrent writers kept claiming the same `(id, version)` for longer
    /// than the retry budget allows.
    #[error("id/version allocation contention exhausted retries")]
    Contention,
}

/// NetworkRepository Trait
///
/// The abstract contract for all road-network persistence: identity/version
/// assignment, network and road storage, and retrieval by `(id, version)`.
/// Handlers and the service layer depend on this trait, never on a concrete
/// store, so tests can swap in the in-memory implementation.
///
/// **Send + Sync + async_trait** are required to make the trait object
/// (`Arc<dyn NetworkRepository>`) safely shareable across Axum's
/// asynchronous task boundaries.
#[async_trait]
pub trait NetworkRepository: Send + Sync {
    /// Next free root id: `max(id) + 1`, or 1 when the store is empty.
    async fn next_root_id(&self) -> Result<i64, RepositoryError>;

    /// Highest version on record for `id`, or `None` when the id has no rows
    /// at all. "No versions yet" is an explicit absence, never a sentinel.
    async fn max_version(&self, id: i64) -> Result<Option<i64>, RepositoryError>;

    /// Exact-version lookup.
    async fn find_network(&self, id: i64, version: i64)
    -> Result<Option<RoadNetwork>, RepositoryError>;

    /// The network row at the highest version for `id`.
    async fn find_latest(&self, id: i64) -> Result<Option<RoadNetwork>, RepositoryError>;

    /// All roads attached to one network version, in insertion order.
    async fn roads(&self, id: i64, version: i64) -> Result<Vec<Road>, RepositoryError>;

    /// The transactional unit behind create and update: allocates the
    /// identity (`id = None` → fresh root id at version 1; `id = Some` →
    /// next version of that id), then inserts the network row and all road
    /// rows atomically. Allocation races with concurrent writers are
    /// resolved by the `(id, version)` unique constraint plus a bounded
    /// retry loop.
    async fn create_version(
        &self,
        owner: &str,
        id: Option<i64>,
        roads: &[RoadDraft],
    ) -> Result<RoadNetwork, RepositoryError>;

    /// Single-road insert against an existing network version. Fails with
    /// `ForeignKeyViolation` when no matching network row exists.
    async fn add_road(
        &self,
        network_id: i64,
        network_version: i64,
        geometry: Value,
        properties: Value,
    ) -> Result<Road, RepositoryError>;

    /// Removes every version of a network root and, by cascade, all of their
    /// roads. Returns whether anything was deleted. Modeled as available but
    /// not wired to an HTTP entry point.
    async fn delete_network_root(&self, id: i64) -> Result<bool, RepositoryError>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the
/// application state.
pub type RepositoryState = Arc<dyn NetworkRepository>;

/// PostgresRepository
///
/// The concrete implementation of `NetworkRepository`, backed by PostgreSQL.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

#[async_trait]
impl NetworkRepository for PostgresRepository {
    async fn next_root_id(&self) -> Result<i64, RepositoryError> {
        let next: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(id), 0) + 1 FROM road_networks")
            .fetch_one(&self.pool)
            .await?;
        Ok(next)
    }

    async fn max_version(&self, id: i64) -> Result<Option<i64>, RepositoryError> {
        let max: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM road_networks WHERE id = $1")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(max)
    }

    async fn find_network(
        &self,
        id: i64,
        version: i64,
    ) -> Result<Option<RoadNetwork>, RepositoryError> {
        let network = sqlx::query_as::<_, RoadNetwork>(
            "SELECT id, version, owner, created_at FROM road_networks \
             WHERE id = $1 AND version = $2",
        )
        .bind(id)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;
        Ok(network)
    }

    async fn find_latest(&self, id: i64) -> Result<Option<RoadNetwork>, RepositoryError> {
        let network = sqlx::query_as::<_, RoadNetwork>(
            "SELECT id, version, owner, created_at FROM road_networks \
             WHERE id = $1 ORDER BY version DESC LIMIT 1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(network)
    }

    async fn roads(&self, id: i64, version: i64) -> Result<Vec<Road>, RepositoryError> {
        let roads = sqlx::query_as::<_, Road>(
            "SELECT id, road_network_id, road_network_version, geometry, properties \
             FROM roads WHERE road_network_id = $1 AND road_network_version = $2 \
             ORDER BY id",
        )
        .bind(id)
        .bind(version)
        .fetch_all(&self.pool)
        .await?;
        Ok(roads)
    }

    /// create_version
    ///
    /// Allocation is a read-then-write over a max query, which two concurrent
    /// writers can race. The `(id, version)` primary key turns the loser's
    /// insert into a unique violation; the loop rolls back and re-reads a
    /// bounded number of times before giving up with `Contention`.
    async fn create_version(
        &self,
        owner: &str,
        id: Option<i64>,
        roads: &[RoadDraft],
    ) -> Result<RoadNetwork, RepositoryError> {
        for attempt in 1..=MAX_ALLOC_RETRIES {
            let mut tx = self.pool.begin().await?;

            let (network_id, version) = match id {
                Some(existing) => {
                    let max: Option<i64> =
                        sqlx::query_scalar("SELECT MAX(version) FROM road_networks WHERE id = $1")
                            .bind(existing)
                            .fetch_one(&mut *tx)
                            .await?;
                    (existing, max.unwrap_or(0) + 1)
                }
                None => {
                    let next: i64 =
                        sqlx::query_scalar("SELECT COALESCE(MAX(id), 0) + 1 FROM road_networks")
                            .fetch_one(&mut *tx)
                            .await?;
                    (next, 1)
                }
            };

            let inserted = sqlx::query_as::<_, RoadNetwork>(
                "INSERT INTO road_networks (id, version, owner) VALUES ($1, $2, $3) \
                 RETURNING id, version, owner, created_at",
            )
            .bind(network_id)
            .bind(version)
            .bind(owner)
            .fetch_one(&mut *tx)
            .await;

            let network = match inserted {
                Ok(network) => network,
                Err(e) if is_unique_violation(&e) => {
                    // A concurrent writer claimed the same (id, version).
                    tracing::warn!(network_id, version, attempt, "allocation conflict, retrying");
                    tx.rollback().await?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            // Road rows ride in the same transaction: a failure here aborts
            // the network row as well, never leaving a partial version.
            for draft in roads {
                sqlx::query(
                    "INSERT INTO roads (road_network_id, road_network_version, geometry, properties) \
                     VALUES ($1, $2, $3, $4)",
                )
                .bind(network.id)
                .bind(network.version)
                .bind(draft.geometry_value())
                .bind(draft.properties_value())
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            return Ok(network);
        }

        Err(RepositoryError::Contention)
    }

    async fn add_road(
        &self,
        network_id: i64,
        network_version: i64,
        geometry: Value,
        properties: Value,
    ) -> Result<Road, RepositoryError> {
        let inserted = sqlx::query_as::<_, Road>(
            "INSERT INTO roads (road_network_id, road_network_version, geometry, properties) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, road_network_id, road_network_version, geometry, properties",
        )
        .bind(network_id)
        .bind(network_version)
        .bind(geometry)
        .bind(properties)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(road) => Ok(road),
            Err(e) if is_foreign_key_violation(&e) => Err(RepositoryError::ForeignKeyViolation {
                id: network_id,
                version: network_version,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_network_root(&self, id: i64) -> Result<bool, RepositoryError> {
        // Single statement, so atomic; the roads go with it via ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM road_networks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// --- The In-Memory Implementation (For Tests) ---

/// MemoryRepository
///
/// A mock implementation of `NetworkRepository` used for unit and
/// router-level testing without a running Postgres. A single mutex guards the
/// whole state, so id/version allocation is atomic, matching the guarantee
/// the Postgres store gets from its unique constraint.
#[derive(Default)]
pub struct MemoryRepository {
    inner: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    networks: Vec<RoadNetwork>,
    roads: Vec<Road>,
    next_road_id: i64,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NetworkRepository for MemoryRepository {
    async fn next_root_id(&self) -> Result<i64, RepositoryError> {
        let state = self.inner.lock().expect("memory repository lock poisoned");
        Ok(state.networks.iter().map(|n| n.id).max().unwrap_or(0) + 1)
    }

    async fn max_version(&self, id: i64) -> Result<Option<i64>, RepositoryError> {
        let state = self.inner.lock().expect("memory repository lock poisoned");
        Ok(state
            .networks
            .iter()
            .filter(|n| n.id == id)
            .map(|n| n.version)
            .max())
    }

    async fn find_network(
        &self,
        id: i64,
        version: i64,
    ) -> Result<Option<RoadNetwork>, RepositoryError> {
        let state = self.inner.lock().expect("memory repository lock poisoned");
        Ok(state
            .networks
            .iter()
            .find(|n| n.id == id && n.version == version)
            .cloned())
    }

    async fn find_latest(&self, id: i64) -> Result<Option<RoadNetwork>, RepositoryError> {
        let state = self.inner.lock().expect("memory repository lock poisoned");
        Ok(state
            .networks
            .iter()
            .filter(|n| n.id == id)
            .max_by_key(|n| n.version)
            .cloned())
    }

    async fn roads(&self, id: i64, version: i64) -> Result<Vec<Road>, RepositoryError> {
        let state = self.inner.lock().expect("memory repository lock poisoned");
        Ok(state
            .roads
            .iter()
            .filter(|r| r.road_network_id == id && r.road_network_version == version)
            .cloned()
            .collect())
    }

    async fn create_version(
        &self,
        owner: &str,
        id: Option<i64>,
        roads: &[RoadDraft],
    ) -> Result<RoadNetwork, RepositoryError> {
        let mut state = self.inner.lock().expect("memory repository lock poisoned");

        let (network_id, version) = match id {
            Some(existing) => {
                let max = state
                    .networks
                    .iter()
                    .filter(|n| n.id == existing)
                    .map(|n| n.version)
                    .max();
                (existing, max.unwrap_or(0) + 1)
            }
            None => {
                let next = state.networks.iter().map(|n| n.id).max().unwrap_or(0) + 1;
                (next, 1)
            }
        };

        let network = RoadNetwork {
            id: network_id,
            version,
            owner: owner.to_string(),
            created_at: Utc::now(),
        };
        state.networks.push(network.clone());

        for draft in roads {
            state.next_road_id += 1;
            let road = Road {
                id: state.next_road_id,
                road_network_id: network_id,
                road_network_version: version,
                geometry: draft.geometry_value(),
                properties: draft.properties_value(),
            };
            state.roads.push(road);
        }

        Ok(network)
    }

    async fn add_road(
        &self,
        network_id: i64,
        network_version: i64,
        geometry: Value,
        properties: Value,
    ) -> Result<Road, RepositoryError> {
        let mut state = self.inner.lock().expect("memory repository lock poisoned");

        if !state
            .networks
            .iter()
            .any(|n| n.id == network_id && n.version == network_version)
        {
            return Err(RepositoryError::ForeignKeyViolation {
                id: network_id,
                version: network_version,
            });
        }

        state.next_road_id += 1;
        let road = Road {
            id: state.next_road_id,
            road_network_id: network_id,
            road_network_version: network_version,
            geometry,
            properties,
        };
        state.roads.push(road.clone());
        Ok(road)
    }

    async fn delete_network_root(&self, id: i64) -> Result<bool, RepositoryError> {
        let mut state = self.inner.lock().expect("memory repository lock poisoned");
        let before = state.networks.len();
        state.networks.retain(|n| n.id != id);
        state.roads.retain(|r| r.road_network_id != id);
        Ok(state.networks.len() < before)
    }
}
