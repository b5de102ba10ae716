//! Abstract preemption store.
//!
//! The trait lets the engine run against the in-memory backend in production
//! and against wrapped or failing backends in tests.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::network::JunctionId;
use crate::priority::Priority;
use crate::vehicle::VehicleId;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No entry for the junction.
    #[error("No preemption entry for junction: {0}")]
    JunctionNotFound(JunctionId),

    /// Junction already has an entry.
    #[error("Junction already preempted: {0}")]
    DuplicateJunction(JunctionId),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),
}

/// Active override of one junction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRecord {
    /// Overridden junction.
    pub junction: JunctionId,
    /// Vehicle holding the override.
    pub vehicle: VehicleId,
    /// Priority of the holder.
    pub priority: Priority,
    /// Controlled link index given green.
    pub approach: usize,
}

/// Signal program state captured before the first override of a junction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Junction the snapshot belongs to.
    pub junction: JunctionId,
    /// Program id running before the override.
    pub program: String,
    /// Phase index running before the override.
    pub phase: usize,
    /// Nominal duration of that phase, in seconds.
    pub phase_duration: f64,
    /// Time that was left until the next phase switch, in seconds.
    pub remaining: f64,
}

/// Record and snapshot for one junction, stored and removed as a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreemptionEntry {
    /// Current holder of the override.
    pub record: OverrideRecord,
    /// Baseline to return to on release.
    pub snapshot: Snapshot,
    /// Restore commands were already issued; only deletion is outstanding.
    #[serde(default)]
    pub restored: bool,
}

impl PreemptionEntry {
    /// Creates a fresh entry for a first override.
    #[must_use]
    pub fn new(record: OverrideRecord, snapshot: Snapshot) -> Self {
        Self {
            record,
            snapshot,
            restored: false,
        }
    }

    /// Junction this entry belongs to.
    #[must_use]
    pub fn junction(&self) -> &JunctionId {
        &self.record.junction
    }
}

/// Storage for per-junction preemption state.
///
/// # Invariants
/// - At most one entry per junction (the junction id is the key).
/// - `retarget` never touches the snapshot.
pub trait PreemptionStore: Send + Sync {
    /// Get the entry for a junction.
    fn get(&self, junction: &JunctionId) -> Result<Option<PreemptionEntry>, StorageError>;

    /// Insert an entry for a free junction. Returns error if one already exists.
    fn insert(&self, entry: PreemptionEntry) -> Result<(), StorageError>;

    /// Replace the override record of an existing entry, keeping its snapshot.
    fn retarget(&self, record: OverrideRecord) -> Result<(), StorageError>;

    /// Flag an entry as restored. Returns error if not found.
    fn mark_restored(&self, junction: &JunctionId) -> Result<(), StorageError>;

    /// Remove and return the entry for a junction.
    fn remove(&self, junction: &JunctionId) -> Result<Option<PreemptionEntry>, StorageError>;

    /// Junctions with an entry, ascending by id.
    fn junctions(&self) -> Result<Vec<JunctionId>, StorageError>;

    /// Number of entries.
    fn len(&self) -> Result<usize, StorageError>;

    /// True if no junction is preempted.
    fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}
