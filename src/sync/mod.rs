//! Sync engine (C3): discovery → diff → write plan → change events.

pub mod engine;
pub mod plan;
pub mod source;

pub use engine::{CancellationToken, SourceSyncReport, SyncEngine, SyncError, SyncOptions, SyncReport};
pub use plan::{build_plan, WritePlan};
pub use source::{DiscoveryBatch, DiscoveryError, DiscoverySource, SourceScope, StaticDiscoverySource};
