//! Temporal store (C4): append-only versioned record of the graph.

pub mod store;

pub use store::{
    EdgeHistoryEntry, InMemoryTemporalStore, NodeChange, NodeHistoryEntry, PruneOptions,
    SnapshotDiff, SnapshotFilter, TemporalError,
};
