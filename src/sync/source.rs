//! Discovery source capability: each cloud adapter is a value with
//! `{discover, health_check}`, composed into the sync engine at
//! construction time. No runtime reflection (§9 "Polymorphism over
//! adapters") — the engine is polymorphic over `Arc<dyn DiscoverySource>`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{Edge, ResourceNode};

/// One non-fatal error surfaced by a discovery source.
#[derive(Debug, Clone)]
pub struct DiscoveryError {
    pub resource_type: Option<String>,
    pub message: String,
    pub code: Option<String>,
}

/// The scope a discovery source claims ownership over. Used by the sync
/// engine to bound which previously-known nodes a cycle may mark
/// disappeared (ownership scoping, §4.2 step 2).
#[derive(Debug, Clone)]
pub struct SourceScope {
    pub provider: String,
    pub accounts: Vec<String>,
    pub regions: Vec<String>,
}

impl SourceScope {
    pub fn owns(&self, provider: &str, account: &str, region: &str) -> bool {
        self.provider == provider
            && self.accounts.iter().any(|a| a == account)
            && self.regions.iter().any(|r| r == region)
    }
}

/// One discovery cycle's output from a single source.
#[derive(Debug, Clone)]
pub struct DiscoveryBatch {
    pub source_id: String,
    pub provider: String,
    pub scope: SourceScope,
    pub nodes: Vec<ResourceNode>,
    pub edges: Vec<Edge>,
    pub errors: Vec<DiscoveryError>,
    pub discovered_at: DateTime<Utc>,
}

/// A cloud discovery adapter, treated as an external collaborator (§1
/// Out-of-scope: per-cloud API adapters are not part of the core).
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    fn source_id(&self) -> &str;
    fn scope(&self) -> SourceScope;
    async fn discover(&self) -> DiscoveryBatch;
    async fn health_check(&self) -> bool;
}

/// A discovery source whose result is fixed at construction time. Used by
/// tests and as the "mock adapter" referenced in §6 for the discovery
/// source contract.
pub struct StaticDiscoverySource {
    source_id: String,
    scope: SourceScope,
    batch: DiscoveryBatch,
}

impl StaticDiscoverySource {
    pub fn new(source_id: impl Into<String>, scope: SourceScope, nodes: Vec<ResourceNode>, edges: Vec<Edge>, now: DateTime<Utc>) -> Self {
        let source_id = source_id.into();
        let batch = DiscoveryBatch {
            source_id: source_id.clone(),
            provider: scope.provider.clone(),
            scope: scope.clone(),
            nodes,
            edges,
            errors: Vec::new(),
            discovered_at: now,
        };
        Self { source_id, scope, batch }
    }
}

#[async_trait]
impl DiscoverySource for StaticDiscoverySource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn scope(&self) -> SourceScope {
        self.scope.clone()
    }

    async fn discover(&self) -> DiscoveryBatch {
        self.batch.clone()
    }

    async fn health_check(&self) -> bool {
        true
    }
}
