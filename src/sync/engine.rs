//! Sync engine (C3): drives one reconciliation cycle, fanning out to
//! discovery sources with bounded concurrency and applying the resulting
//! write plans through a single serialized writer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio::task::JoinSet;
use uuid::Uuid;

use super::plan::build_plan;
use super::source::DiscoverySource;
use crate::error::retry::{with_backoff, BackoffPolicy};
use crate::store::{ChangeFilter, Direction, EdgeFilter, GraphStore, NodeFilter};

/// Options for one sync cycle.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub providers: Option<Vec<String>>,
    pub account_filter: Option<Vec<String>>,
    pub region_filter: Option<Vec<String>>,
    pub disappearance_grace_period: chrono::Duration,
    pub max_concurrent_sources: usize,
    pub per_source_timeout: StdDuration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            providers: None,
            account_filter: None,
            region_filter: None,
            // Open question: no uniform default in the source material;
            // two sync intervals (assuming a 15-minute cadence) is a
            // conservative default.
            disappearance_grace_period: chrono::Duration::minutes(30),
            max_concurrent_sources: 4,
            per_source_timeout: StdDuration::from_secs(60),
        }
    }
}

/// Per-source outcome of one sync cycle.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SourceSyncReport {
    pub source_id: String,
    pub discovered: usize,
    pub created: usize,
    pub updated: usize,
    pub disappeared: usize,
    pub edge_created: usize,
    pub edge_removed: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

/// Full result of one sync cycle.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SyncReport {
    pub per_source: Vec<SourceSyncReport>,
    pub cancelled: bool,
}

/// A single cancellation handle for one sync cycle. Cancelling aborts
/// in-flight source calls; partial results already applied by the writer
/// are retained (§5 "Cancellation & timeouts").
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn cancelled_signal(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

/// Errors raised by the sync engine itself (as opposed to a per-source
/// discovery error, which is non-fatal and collected into the report).
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("writer failure: {0}")]
    WriterFailure(String),
}

impl From<SyncError> for crate::error::KernelError {
    fn from(e: SyncError) -> Self {
        crate::error::KernelError::with_source(crate::error::Kind::Permanent, e.to_string(), e)
    }
}

/// Drives reconciliation cycles against a `GraphStore` over a set of
/// discovery sources. The store's mutating calls are additionally
/// serialized here behind `writer_lock` — the "single goroutine per
/// logical store" design note (§9) made explicit as a `tokio::sync::Mutex`.
pub struct SyncEngine<S: GraphStore> {
    store: Arc<S>,
    sources: Vec<Arc<dyn DiscoverySource>>,
    writer_lock: Mutex<()>,
}

impl<S: GraphStore + 'static> SyncEngine<S> {
    pub fn new(store: Arc<S>, sources: Vec<Arc<dyn DiscoverySource>>) -> Self {
        Self { store, sources, writer_lock: Mutex::new(()) }
    }

    /// Run one reconciliation cycle. See §4.2 for the algorithm.
    pub async fn sync(&self, options: &SyncOptions, cancel: &CancellationToken) -> SyncReport
    where
        S::Error: 'static,
    {
        let enabled: Vec<Arc<dyn DiscoverySource>> = self
            .sources
            .iter()
            .filter(|s| {
                options
                    .providers
                    .as_ref()
                    .map_or(true, |ps| ps.iter().any(|p| p == s.scope().provider.as_str()))
            })
            .cloned()
            .collect();

        let semaphore = Arc::new(Semaphore::new(options.max_concurrent_sources.max(1)));
        let mut join_set: JoinSet<SourceSyncReport> = JoinSet::new();

        for source in enabled {
            let semaphore = semaphore.clone();
            let timeout = options.per_source_timeout;
            let cancel = cancel.clone();
            let store = self.store.clone();
            let grace_period = options.disappearance_grace_period;

            join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => return SourceSyncReport { source_id: source.source_id().to_string(), ..Default::default() },
                };
                let source_id = source.source_id().to_string();
                let started = std::time::Instant::now();

                let discover_future = source.discover();
                let batch = tokio::select! {
                    biased;
                    _ = cancel.cancelled_signal() => {
                        return SourceSyncReport { source_id, errors: vec!["cancelled".into()], ..Default::default() };
                    }
                    result = tokio::time::timeout(timeout, discover_future) => {
                        match result {
                            Ok(batch) => batch,
                            Err(_) => {
                                return SourceSyncReport {
                                    source_id,
                                    errors: vec!["timeout".into()],
                                    duration_ms: started.elapsed().as_millis() as u64,
                                    ..Default::default()
                                };
                            }
                        }
                    }
                };

                let scope = batch.scope.clone();
                let owned_nodes = store
                    .query_nodes(&NodeFilter {
                        provider: Some(scope.provider.clone()),
                        ..Default::default()
                    })
                    .await
                    .map(|nodes| {
                        nodes
                            .into_iter()
                            .filter(|n| scope.owns(&n.key.provider, &n.key.account, &n.key.region))
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();

                let owned_node_ids: std::collections::BTreeSet<_> =
                    owned_nodes.iter().map(|n| n.id.clone()).collect();
                let mut owned_edges = Vec::new();
                for node in &owned_nodes {
                    if let Ok(edges) = store.get_edges_for_node(&node.id, Direction::Out).await {
                        for e in edges {
                            if owned_node_ids.contains(&e.target) {
                                owned_edges.push(e);
                            }
                        }
                    }
                }

                let correlation_id = Uuid::new_v4();
                let plan = build_plan(
                    &batch.nodes,
                    &batch.edges,
                    &owned_nodes,
                    &owned_edges,
                    grace_period,
                    batch.discovered_at,
                    &source_id,
                    correlation_id,
                );

                let created = plan
                    .changes
                    .iter()
                    .filter(|c| c.change_type == crate::types::ChangeType::NodeCreated)
                    .count();
                let disappeared = plan.node_disappearances.len();
                let edge_created = plan.edge_upserts.len();
                let edge_removed = plan.edge_removals.len();

                let mut all_upserts = plan.node_upserts;
                all_upserts.extend(plan.node_disappearances);
                let updated = all_upserts.len().saturating_sub(created).saturating_sub(disappeared);

                let mut errors: Vec<String> = batch.errors.iter().map(|e| e.message.clone()).collect();
                let backoff = BackoffPolicy::default();

                if with_backoff(backoff, || {
                    let store = store.clone();
                    let nodes = all_upserts.clone();
                    async move { store.upsert_nodes(nodes).await.map_err(Into::into) }
                })
                .await
                .is_err()
                {
                    errors.push("writer failure on node upsert".into());
                }
                if with_backoff(backoff, || {
                    let store = store.clone();
                    let edges = plan.edge_upserts.clone();
                    async move { store.upsert_edges(edges).await.map_err(Into::into) }
                })
                .await
                .is_err()
                {
                    errors.push("writer failure on edge upsert".into());
                }
                if !plan.changes.is_empty()
                    && with_backoff(backoff, || {
                        let store = store.clone();
                        let changes = plan.changes.clone();
                        async move { store.append_changes(changes).await.map_err(Into::into) }
                    })
                    .await
                    .is_err()
                {
                    errors.push("writer failure on change append".into());
                }

                SourceSyncReport {
                    source_id,
                    discovered: batch.nodes.len(),
                    created,
                    updated,
                    disappeared,
                    edge_created,
                    edge_removed,
                    errors,
                    duration_ms: started.elapsed().as_millis() as u64,
                }
            });
        }

        let mut per_source = Vec::new();
        while let Some(res) = join_set.join_next().await {
            if let Ok(report) = res {
                per_source.push(report);
            }
        }

        SyncReport { per_source, cancelled: cancel.is_cancelled() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryGraphStore;
    use crate::sync::source::{SourceScope, StaticDiscoverySource};
    use crate::types::{ResourceKey, ResourceNode, ResourceStatus};

    fn node(native_id: &str, cost: f64) -> ResourceNode {
        let key = ResourceKey {
            provider: "aws".into(),
            account: "1".into(),
            region: "us-east-1".into(),
            resource_type: "ec2".into(),
            native_id: native_id.into(),
        };
        let mut n = ResourceNode::new_discovered(key, native_id, ResourceStatus::Running, Utc::now());
        n.cost_monthly = Some(cost);
        n
    }

    fn scope() -> SourceScope {
        SourceScope { provider: "aws".into(), accounts: vec!["1".into()], regions: vec!["us-east-1".into()] }
    }

    #[tokio::test]
    async fn fresh_sync_creates_one_node() {
        let store = Arc::new(InMemoryGraphStore::new());
        let source = Arc::new(StaticDiscoverySource::new("s1", scope(), vec![node("i-1", 10.0)], vec![], Utc::now()));
        let engine = SyncEngine::new(store.clone(), vec![source]);
        let report = engine.sync(&SyncOptions::default(), &CancellationToken::new()).await;
        assert_eq!(report.per_source[0].created, 1);
        assert_eq!(store.snapshot_nodes().len(), 1);
    }

    #[tokio::test]
    async fn idempotent_resync_creates_nothing_new() {
        let store = Arc::new(InMemoryGraphStore::new());
        let source = Arc::new(StaticDiscoverySource::new("s1", scope(), vec![node("i-1", 10.0)], vec![], Utc::now()));
        let engine = SyncEngine::new(store.clone(), vec![source]);
        engine.sync(&SyncOptions::default(), &CancellationToken::new()).await;
        let report = engine.sync(&SyncOptions::default(), &CancellationToken::new()).await;
        assert_eq!(report.per_source[0].created, 0);
        assert_eq!(report.per_source[0].updated, 0);
    }

    #[tokio::test]
    async fn disappearance_with_zero_grace_terminates_node() {
        let store = Arc::new(InMemoryGraphStore::new());
        let source = Arc::new(StaticDiscoverySource::new("s1", scope(), vec![node("i-1", 10.0)], vec![], Utc::now()));
        let engine = SyncEngine::new(store.clone(), vec![source]);
        engine.sync(&SyncOptions::default(), &CancellationToken::new()).await;

        let empty_source = Arc::new(StaticDiscoverySource::new("s1", scope(), vec![], vec![], Utc::now()));
        let engine2 = SyncEngine::new(store.clone(), vec![empty_source]);
        let mut opts = SyncOptions::default();
        opts.disappearance_grace_period = chrono::Duration::zero();
        let report = engine2.sync(&opts, &CancellationToken::new()).await;
        assert_eq!(report.per_source[0].disappeared, 1);
        let nodes = store.snapshot_nodes();
        assert_eq!(nodes[0].status, ResourceStatus::Terminated);
    }
}
