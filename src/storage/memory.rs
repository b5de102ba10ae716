//! In-memory storage backend.
//!
//! Thread-safe implementation of `PreemptionStore` backed by a single map keyed
//! by junction id. Every operation takes the lock once, so a junction's record
//! and snapshot are always read and written together.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::network::JunctionId;
use crate::storage::traits::{OverrideRecord, PreemptionEntry, PreemptionStore, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Thread-safe in-memory preemption store.
#[derive(Debug, Default)]
pub struct InMemoryPreemptionStore {
    entries: RwLock<BTreeMap<JunctionId, PreemptionEntry>>,
}

impl InMemoryPreemptionStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreemptionStore for InMemoryPreemptionStore {
    fn get(&self, junction: &JunctionId) -> Result<Option<PreemptionEntry>, StorageError> {
        let entries = self.entries.read().map_err(|_| lock_err("preemption.get"))?;
        Ok(entries.get(junction).cloned())
    }

    fn insert(&self, entry: PreemptionEntry) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| lock_err("preemption.insert"))?;
        if entry.record.junction != entry.snapshot.junction {
            return Err(StorageError::BackendError(format!(
                "record/snapshot junction mismatch: record={} snapshot={}",
                entry.record.junction, entry.snapshot.junction
            )));
        }
        if entries.contains_key(entry.junction()) {
            return Err(StorageError::DuplicateJunction(entry.junction().clone()));
        }
        entries.insert(entry.junction().clone(), entry);
        Ok(())
    }

    fn retarget(&self, record: OverrideRecord) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| lock_err("preemption.retarget"))?;
        let entry = entries
            .get_mut(&record.junction)
            .ok_or_else(|| StorageError::JunctionNotFound(record.junction.clone()))?;
        entry.record = record;
        Ok(())
    }

    fn mark_restored(&self, junction: &JunctionId) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| lock_err("preemption.mark_restored"))?;
        let entry = entries
            .get_mut(junction)
            .ok_or_else(|| StorageError::JunctionNotFound(junction.clone()))?;
        entry.restored = true;
        Ok(())
    }

    fn remove(&self, junction: &JunctionId) -> Result<Option<PreemptionEntry>, StorageError> {
        let mut entries = self.entries.write().map_err(|_| lock_err("preemption.remove"))?;
        Ok(entries.remove(junction))
    }

    fn junctions(&self) -> Result<Vec<JunctionId>, StorageError> {
        let entries = self.entries.read().map_err(|_| lock_err("preemption.junctions"))?;
        Ok(entries.keys().cloned().collect())
    }

    fn len(&self) -> Result<usize, StorageError> {
        let entries = self.entries.read().map_err(|_| lock_err("preemption.len"))?;
        Ok(entries.len())
    }
}
