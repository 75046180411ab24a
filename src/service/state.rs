//! Service state management.
//!
//! Holds the shared dependencies the query-surface handlers need: the
//! graph store, the temporal store layered over it, the discovery sources
//! a sync cycle fans out to, and the change governor.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use uuid::Uuid;

use crate::anomaly::AnomalyConfig;
use crate::drift::DriftConfig;
use crate::governance::ChangeGovernor;
use crate::store::GraphStore;
use crate::sync::DiscoverySource;
use crate::temporal::InMemoryTemporalStore;
use crate::types::ChangeRequest;

/// Shared service state, generic over the graph store backend.
pub struct ServiceState<S: GraphStore + Send + Sync + 'static> {
    pub store: Arc<S>,
    pub temporal: Arc<InMemoryTemporalStore<S>>,
    pub sources: Vec<Arc<dyn DiscoverySource>>,
    pub governor: ChangeGovernor,
    pub drift_config: DriftConfig,
    pub anomaly_config: AnomalyConfig,
    /// In-flight and resolved change requests, keyed by id. The store
    /// contract (C2) covers nodes/edges/changes; change-request tracking
    /// is the governor's own bookkeeping, kept in memory here.
    pub requests: Arc<RwLock<BTreeMap<Uuid, ChangeRequest>>>,
}

impl<S: GraphStore + Send + Sync + 'static> ServiceState<S> {
    pub fn new(store: S, sources: Vec<Arc<dyn DiscoverySource>>, governor: ChangeGovernor) -> Self {
        let store = Arc::new(store);
        Self {
            temporal: Arc::new(InMemoryTemporalStore::new(store.clone())),
            store,
            sources,
            governor,
            drift_config: DriftConfig::default(),
            anomaly_config: AnomalyConfig::default(),
            requests: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }
}

impl<S: GraphStore + Send + Sync + 'static> Clone for ServiceState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            temporal: Arc::clone(&self.temporal),
            sources: self.sources.clone(),
            governor: self.governor.clone(),
            drift_config: self.drift_config.clone(),
            anomaly_config: self.anomaly_config.clone(),
            requests: Arc::clone(&self.requests),
        }
    }
}
