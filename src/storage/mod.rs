//! Preemption state storage.
//!
//! The store is the only owner of override records and their snapshots. Each
//! junction maps to at most one `PreemptionEntry`, which carries the record and
//! the snapshot together, so neither can exist without the other.

mod memory;
mod traits;

pub use memory::InMemoryPreemptionStore;
pub use traits::{OverrideRecord, PreemptionEntry, PreemptionStore, Snapshot, StorageError};
