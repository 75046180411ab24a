//! Change records: the append-only audit of every observable mutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::node::NodeId;

/// The kind of mutation a change record documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeType {
    NodeCreated,
    NodeUpdated,
    NodeDisappeared,
    NodeReappeared,
    EdgeCreated,
    EdgeRemoved,
    NodeDrifted,
}

/// Who or what initiated an observed change, when known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Initiator {
    Human,
    Agent,
    System,
}

/// An immutable record of one observable mutation.
///
/// Change records are never mutated after construction and are appended to
/// the store in monotonic detection-timestamp order (invariant 5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: Uuid,
    pub target_id: NodeId,
    pub change_type: ChangeType,
    pub field: Option<String>,
    pub previous_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub detected_at: DateTime<Utc>,
    pub detection_source: String,
    pub correlation_id: Uuid,
    pub initiator: Option<Initiator>,
}

impl ChangeRecord {
    /// Construct a change record for a field-level mutation (`node-drifted`,
    /// `node-updated`). Use the dedicated constructors below for
    /// lifecycle events that carry no field delta.
    pub fn field_change(
        target_id: NodeId,
        change_type: ChangeType,
        field: impl Into<String>,
        previous_value: Option<serde_json::Value>,
        new_value: Option<serde_json::Value>,
        detected_at: DateTime<Utc>,
        detection_source: impl Into<String>,
        correlation_id: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_id,
            change_type,
            field: Some(field.into()),
            previous_value,
            new_value,
            detected_at,
            detection_source: detection_source.into(),
            correlation_id,
            initiator: None,
        }
    }

    /// Construct a lifecycle event (`node-created`, `node-disappeared`,
    /// `node-reappeared`, `edge-created`, `edge-removed`) with no field delta.
    pub fn lifecycle_event(
        target_id: NodeId,
        change_type: ChangeType,
        detected_at: DateTime<Utc>,
        detection_source: impl Into<String>,
        correlation_id: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_id,
            change_type,
            field: None,
            previous_value: None,
            new_value: None,
            detected_at,
            detection_source: detection_source.into(),
            correlation_id,
            initiator: None,
        }
    }
}
