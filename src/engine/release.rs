//! Release of overrides whose triggering condition has ended.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{PreemptResult, SimulationError};
use crate::events::{EventBus, EventPayload, PreemptionEvent, ReleaseReason};
use crate::geometry::LaneResolver;
use crate::network::JunctionId;
use crate::simulation::Simulation;
use crate::storage::{PreemptionEntry, PreemptionStore, Snapshot, StorageError};
use crate::vehicle::VehicleId;

/// Watches overridden junctions and hands them back to their programs.
pub struct ReleaseMonitor {
    resolver: LaneResolver,
    store: Arc<dyn PreemptionStore>,
    events: Arc<EventBus>,
}

impl ReleaseMonitor {
    /// Create a release monitor on a shared store.
    #[must_use]
    pub fn new(resolver: LaneResolver, store: Arc<dyn PreemptionStore>, events: Arc<EventBus>) -> Self {
        Self { resolver, store, events }
    }

    /// Why `junction` should be released now, or `None` if its override still holds.
    ///
    /// `live` is the set of vehicles present this tick.
    ///
    /// # Errors
    ///
    /// Returns storage errors and non-stale simulation errors.
    pub fn release_reason(
        &self,
        sim: &mut dyn Simulation,
        junction: &JunctionId,
        live: &HashSet<VehicleId>,
    ) -> PreemptResult<Option<ReleaseReason>> {
        let Some(entry) = self.store.get(junction)? else {
            return Ok(None);
        };
        if entry.restored {
            return Ok(Some(ReleaseReason::CleanupRetry));
        }

        let holder = &entry.record.vehicle;
        if !live.contains(holder) {
            return Ok(Some(ReleaseReason::Departed));
        }

        let position = match sim.vehicle_position(holder) {
            Ok(position) => position,
            Err(e) if e.is_stale() => return Ok(Some(ReleaseReason::Departed)),
            Err(e) => return Err(e.into()),
        };
        let centre = match sim.junction_position(junction) {
            Ok(centre) => centre,
            Err(e) if e.is_stale() => return Ok(Some(ReleaseReason::JunctionGone)),
            Err(e) => return Err(e.into()),
        };

        if self.resolver.in_range(position.distance_to(&centre)) {
            Ok(None)
        } else {
            Ok(Some(ReleaseReason::ClearedZone))
        }
    }

    /// Returns true if the override on `junction` should be released.
    ///
    /// # Errors
    ///
    /// Same as [`release_reason`](Self::release_reason).
    pub fn check_release(
        &self,
        sim: &mut dyn Simulation,
        junction: &JunctionId,
        live: &HashSet<VehicleId>,
    ) -> PreemptResult<bool> {
        Ok(self.release_reason(sim, junction, live)?.is_some())
    }

    /// Restore the captured program state and forget the override.
    ///
    /// Returns `false` if the junction was not overridden. Restore commands are
    /// skipped when an earlier attempt already issued them.
    ///
    /// # Errors
    ///
    /// A failed restore command leaves the entry untouched so the whole restore
    /// is retried. A failed deletion leaves the entry flagged as restored so
    /// only the deletion is retried.
    pub fn release(
        &self,
        sim: &mut dyn Simulation,
        junction: &JunctionId,
        reason: ReleaseReason,
        now: f64,
    ) -> PreemptResult<bool> {
        let Some(mut entry) = self.store.get(junction)? else {
            return Ok(false);
        };

        if !entry.restored {
            match restore(sim, &entry.snapshot) {
                Ok(()) => {}
                Err(SimulationError::JunctionNotFound { .. }) => {
                    warn!(junction = %junction, "junction vanished, dropping its override");
                }
                Err(e) => return Err(e.into()),
            }
            self.store.mark_restored(junction)?;
            entry.restored = true;
        }

        finish_release(self.store.as_ref(), &self.events, &entry, reason, now)?;
        Ok(true)
    }
}

fn restore(sim: &mut dyn Simulation, snapshot: &Snapshot) -> Result<(), SimulationError> {
    sim.set_program(&snapshot.junction, &snapshot.program)?;
    sim.set_phase(&snapshot.junction, snapshot.phase)?;
    sim.set_phase_duration(&snapshot.junction, snapshot.remaining)
}

/// Deletes a restored entry and announces the release.
pub(super) fn finish_release(
    store: &dyn PreemptionStore,
    events: &EventBus,
    entry: &PreemptionEntry,
    reason: ReleaseReason,
    now: f64,
) -> Result<(), StorageError> {
    store.remove(entry.junction())?;

    let snapshot = &entry.snapshot;
    info!(
        junction = %snapshot.junction,
        vehicle = %entry.record.vehicle,
        reason = ?reason,
        program = %snapshot.program,
        phase = snapshot.phase,
        "junction released"
    );
    events.publish(PreemptionEvent::new(
        now,
        EventPayload::Released {
            junction: snapshot.junction.clone(),
            vehicle: entry.record.vehicle.clone(),
            reason,
            program: snapshot.program.clone(),
            phase: snapshot.phase,
            remaining: snapshot.remaining,
        },
    ));
    Ok(())
}
