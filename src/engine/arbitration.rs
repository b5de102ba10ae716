//! Priority arbitration and signal override.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{InvariantError, PreemptError, PreemptResult};
use crate::events::{EventBus, EventPayload, PreemptionEvent, ReleaseReason};
use crate::network::{ControlledLink, Junction, JunctionId};
use crate::priority::Priority;
use crate::signal::{SignalColor, SignalState};
use crate::simulation::Simulation;
use crate::storage::{OverrideRecord, PreemptionEntry, PreemptionStore, Snapshot, StorageError};
use crate::vehicle::VehicleId;

use super::release::finish_release;

/// Outcome of one override attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Arbitration {
    /// The junction was free and is now overridden.
    Applied,
    /// A less urgent holder was displaced.
    Displaced {
        /// The record that was replaced.
        previous: OverrideRecord,
    },
    /// The requester already holds the junction.
    Held,
    /// The current holder is at least as urgent, or the junction is busy with cleanup.
    Rejected,
}

impl Arbitration {
    /// Returns true if signals were changed.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied | Self::Displaced { .. })
    }
}

/// Green for the approach and for every link that can move alongside it; red elsewhere.
///
/// Indices past the end of `links` are ignored.
#[must_use]
pub fn override_pattern(links: &[ControlledLink], approach: usize) -> SignalState {
    let mut state = SignalState::all_red(links.len());
    for (index, link) in links.iter().enumerate() {
        if index == approach || link.compatible {
            state.set(index, SignalColor::Green);
        }
    }
    state
}

/// Decides who holds each junction and applies overrides.
pub struct OverrideEngine {
    store: Arc<dyn PreemptionStore>,
    events: Arc<EventBus>,
}

impl OverrideEngine {
    /// Create an override engine on a shared store.
    #[must_use]
    pub fn new(store: Arc<dyn PreemptionStore>, events: Arc<EventBus>) -> Self {
        Self { store, events }
    }

    /// Attempt to override `junction` for a requester arriving on `approach`.
    ///
    /// A free junction is always overridden; its program state is captured
    /// first. An overridden junction only changes hands when `priority`
    /// strictly outranks the holder, and keeps its original snapshot.
    ///
    /// # Errors
    ///
    /// Returns `InvariantError::ApproachOutOfRange` if `approach` does not
    /// address a controlled link, `InvariantError::StoreDesync` if the store
    /// contradicts what was read at the start of the attempt, and simulation or
    /// storage errors as they occur.
    ///
    /// The store is written before the signal command. If the command fails
    /// the write is undone: a new entry is dropped, a retargeted record points
    /// back at the previous holder. If undoing fails too, the entry stays and
    /// still carries the snapshot, so a later release restores the program.
    pub fn arbitrate(
        &self,
        sim: &mut dyn Simulation,
        junction: &Junction,
        approach: usize,
        vehicle: &VehicleId,
        priority: Priority,
        now: f64,
    ) -> PreemptResult<Arbitration> {
        if approach >= junction.link_count() {
            return Err(InvariantError::ApproachOutOfRange {
                junction: junction.id.clone(),
                approach,
                links: junction.link_count(),
            }
            .into());
        }

        let existing = match self.store.get(&junction.id)? {
            Some(entry) if entry.restored => {
                // Signals are already back on their program; only the entry is left over.
                if let Err(e) = finish_release(self.store.as_ref(), &self.events, &entry, ReleaseReason::CleanupRetry, now)
                {
                    warn!(junction = %junction.id, error = %e, "pending cleanup failed, skipping junction");
                    return Ok(Arbitration::Rejected);
                }
                None
            }
            other => other,
        };

        let state = override_pattern(&junction.links, approach);
        let record = OverrideRecord {
            junction: junction.id.clone(),
            vehicle: vehicle.clone(),
            priority,
            approach,
        };

        match existing {
            None => {
                let snapshot = capture_snapshot(sim, &junction.id, now)?;
                self.store
                    .insert(PreemptionEntry::new(record, snapshot))
                    .map_err(|e| desync(&junction.id, e))?;
                if let Err(e) = sim.set_signal_state(&junction.id, &state) {
                    if let Err(undo) = self.store.remove(&junction.id) {
                        warn!(junction = %junction.id, error = %undo, "cannot drop entry after failed override");
                    }
                    return Err(e.into());
                }

                info!(junction = %junction.id, vehicle = %vehicle, priority = %priority, state = %state, "junction preempted");
                self.events.publish(PreemptionEvent::new(
                    now,
                    EventPayload::Preempted {
                        junction: junction.id.clone(),
                        vehicle: vehicle.clone(),
                        priority,
                        approach,
                        state,
                    },
                ));
                Ok(Arbitration::Applied)
            }
            Some(entry) if entry.record.vehicle == *vehicle => Ok(Arbitration::Held),
            Some(entry) if !priority.outranks(entry.record.priority) => {
                debug!(
                    junction = %junction.id,
                    vehicle = %vehicle,
                    priority = %priority,
                    holder = %entry.record.vehicle,
                    holder_priority = %entry.record.priority,
                    "override rejected"
                );
                Ok(Arbitration::Rejected)
            }
            Some(entry) => {
                let previous = entry.record;
                self.store.retarget(record).map_err(|e| desync(&junction.id, e))?;
                if let Err(e) = sim.set_signal_state(&junction.id, &state) {
                    if let Err(undo) = self.store.retarget(previous.clone()) {
                        warn!(junction = %junction.id, error = %undo, "cannot restore previous holder after failed override");
                    }
                    return Err(e.into());
                }

                info!(
                    junction = %junction.id,
                    vehicle = %vehicle,
                    priority = %priority,
                    previous = %previous.vehicle,
                    state = %state,
                    "junction override displaced"
                );
                self.events.publish(PreemptionEvent::new(
                    now,
                    EventPayload::Displaced {
                        junction: junction.id.clone(),
                        vehicle: vehicle.clone(),
                        priority,
                        approach,
                        state,
                        previous_vehicle: previous.vehicle.clone(),
                        previous_priority: previous.priority,
                    },
                ));
                Ok(Arbitration::Displaced { previous })
            }
        }
    }

    /// Like [`arbitrate`](Self::arbitrate), reporting only whether signals changed.
    ///
    /// # Errors
    ///
    /// Same as [`arbitrate`](Self::arbitrate).
    pub fn try_override(
        &self,
        sim: &mut dyn Simulation,
        junction: &Junction,
        approach: usize,
        vehicle: &VehicleId,
        priority: Priority,
        now: f64,
    ) -> PreemptResult<bool> {
        Ok(self.arbitrate(sim, junction, approach, vehicle, priority, now)?.is_applied())
    }
}

fn capture_snapshot(sim: &mut dyn Simulation, junction: &JunctionId, now: f64) -> PreemptResult<Snapshot> {
    let program = sim.program(junction)?;
    let phase = sim.phase(junction)?;
    let phase_duration = sim.phase_duration(junction)?;
    let next_switch = sim.next_switch(junction)?;
    Ok(Snapshot {
        junction: junction.clone(),
        program,
        phase,
        phase_duration,
        remaining: (next_switch - now).max(0.0),
    })
}

fn desync(junction: &JunctionId, err: StorageError) -> PreemptError {
    match err {
        StorageError::DuplicateJunction(_) | StorageError::JunctionNotFound(_) => InvariantError::StoreDesync {
            junction: junction.clone(),
            reason: err.to_string(),
        }
        .into(),
        StorageError::BackendError(_) => err.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Position;
    use crate::simulation::{Command, Fault, InMemorySimulation, Phase, Program, Simulation, ONLINE_PROGRAM};
    use crate::storage::InMemoryPreemptionStore;

    fn links() -> Vec<ControlledLink> {
        vec![
            ControlledLink::new("north", "south"),
            ControlledLink::new("east", "west"),
            ControlledLink::new("south", "north"),
            ControlledLink::compatible("south", "east"),
        ]
    }

    fn sim() -> InMemorySimulation {
        InMemorySimulation::builder()
            .junction(
                "J",
                Position::new(0.0, 0.0),
                links(),
                vec![Program::new(
                    "0",
                    vec![Phase::new("grrr", 30.0).unwrap(), Phase::new("rgrr", 20.0).unwrap()],
                )],
            )
            .build()
            .unwrap()
    }

    fn setup() -> (InMemorySimulation, Junction, OverrideEngine, Arc<InMemoryPreemptionStore>) {
        let mut sim = sim();
        let junction = sim.junction(&JunctionId::from("J")).unwrap();
        let store = Arc::new(InMemoryPreemptionStore::new());
        let engine = OverrideEngine::new(store.clone(), Arc::new(EventBus::default()));
        (sim, junction, engine, store)
    }

    #[test]
    fn pattern_greens_approach_and_compatible_links() {
        assert_eq!(override_pattern(&links(), 0).to_string(), "grrg");
        assert_eq!(override_pattern(&links(), 2).to_string(), "rrgg");
        assert_eq!(override_pattern(&[], 0).to_string(), "");
    }

    #[test]
    fn free_junction_is_overridden_with_snapshot() {
        let (mut sim, junction, engine, store) = setup();
        for _ in 0..12 {
            sim.step().unwrap();
        }

        let outcome = engine
            .arbitrate(&mut sim, &junction, 2, &VehicleId::from("amb"), Priority::new(1), 12.0)
            .unwrap();
        assert_eq!(outcome, Arbitration::Applied);
        assert_eq!(sim.signal_state(&junction.id).unwrap().to_string(), "rrgg");
        assert_eq!(sim.program(&junction.id).unwrap(), ONLINE_PROGRAM);

        let entry = store.get(&junction.id).unwrap().unwrap();
        assert_eq!(entry.snapshot.program, "0");
        assert_eq!(entry.snapshot.phase, 0);
        assert_eq!(entry.snapshot.phase_duration, 30.0);
        assert_eq!(entry.snapshot.remaining, 18.0);
        assert_eq!(entry.record.approach, 2);
    }

    #[test]
    fn equal_or_lower_priority_is_rejected_without_side_effects() {
        let (mut sim, junction, engine, store) = setup();
        engine
            .arbitrate(&mut sim, &junction, 0, &VehicleId::from("fire"), Priority::new(2), 0.0)
            .unwrap();
        sim.clear_commands();

        for rank in [2, 3] {
            let outcome = engine
                .arbitrate(&mut sim, &junction, 2, &VehicleId::from("other"), Priority::new(rank), 0.0)
                .unwrap();
            assert_eq!(outcome, Arbitration::Rejected);
        }
        assert!(sim.commands().is_empty());
        assert_eq!(store.get(&junction.id).unwrap().unwrap().record.vehicle.as_str(), "fire");
    }

    #[test]
    fn holder_asking_again_is_held() {
        let (mut sim, junction, engine, _store) = setup();
        let amb = VehicleId::from("amb");
        engine.arbitrate(&mut sim, &junction, 0, &amb, Priority::new(1), 0.0).unwrap();
        let outcome = engine.arbitrate(&mut sim, &junction, 2, &amb, Priority::new(1), 1.0).unwrap();
        assert_eq!(outcome, Arbitration::Held);
        assert!(!outcome.is_applied());
    }

    #[test]
    fn displacement_keeps_first_snapshot() {
        let (mut sim, junction, engine, store) = setup();
        engine
            .arbitrate(&mut sim, &junction, 0, &VehicleId::from("police"), Priority::new(3), 0.0)
            .unwrap();
        let first = store.get(&junction.id).unwrap().unwrap().snapshot;

        for _ in 0..5 {
            sim.step().unwrap();
        }
        let outcome = engine
            .arbitrate(&mut sim, &junction, 1, &VehicleId::from("amb"), Priority::new(1), 5.0)
            .unwrap();
        let Arbitration::Displaced { previous } = outcome else {
            panic!("expected displacement, got {outcome:?}");
        };
        assert_eq!(previous.vehicle.as_str(), "police");

        let entry = store.get(&junction.id).unwrap().unwrap();
        assert_eq!(entry.snapshot, first);
        assert_eq!(entry.record.vehicle.as_str(), "amb");
        assert_eq!(sim.signal_state(&junction.id).unwrap().to_string(), "rggg");
    }

    #[test]
    fn approach_out_of_range_is_an_invariant_violation() {
        let (mut sim, junction, engine, store) = setup();
        let err = engine
            .arbitrate(&mut sim, &junction, 9, &VehicleId::from("amb"), Priority::new(1), 0.0)
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn rejected_command_writes_no_record() {
        let (mut sim, junction, engine, store) = setup();
        sim.inject_fault(Fault::Reject {
            junction: junction.id.clone(),
            command: Command::SetSignalState,
        });
        let err = engine
            .try_override(&mut sim, &junction, 0, &VehicleId::from("amb"), Priority::new(1), 0.0)
            .unwrap_err();
        assert!(!err.is_fatal());
        assert!(store.is_empty().unwrap());
        assert_eq!(sim.program(&junction.id).unwrap(), "0");
    }

    #[test]
    fn rejected_displacement_keeps_previous_holder() {
        let (mut sim, junction, engine, store) = setup();
        engine
            .arbitrate(&mut sim, &junction, 0, &VehicleId::from("police"), Priority::new(3), 0.0)
            .unwrap();
        sim.inject_fault(Fault::Reject {
            junction: junction.id.clone(),
            command: Command::SetSignalState,
        });

        let err = engine
            .arbitrate(&mut sim, &junction, 1, &VehicleId::from("amb"), Priority::new(1), 1.0)
            .unwrap_err();
        assert!(!err.is_fatal());
        let entry = store.get(&junction.id).unwrap().unwrap();
        assert_eq!(entry.record.vehicle.as_str(), "police");
        assert_eq!(entry.record.approach, 0);
        assert_eq!(sim.signal_state(&junction.id).unwrap().to_string(), "grrg");
    }

    #[test]
    fn restored_entry_is_cleaned_up_before_new_override() {
        let (mut sim, junction, engine, store) = setup();
        engine
            .arbitrate(&mut sim, &junction, 0, &VehicleId::from("police"), Priority::new(3), 0.0)
            .unwrap();
        store.mark_restored(&junction.id).unwrap();

        let outcome = engine
            .arbitrate(&mut sim, &junction, 1, &VehicleId::from("fire"), Priority::new(2), 3.0)
            .unwrap();
        assert_eq!(outcome, Arbitration::Applied);
        let entry = store.get(&junction.id).unwrap().unwrap();
        assert!(!entry.restored);
        assert_eq!(entry.record.vehicle.as_str(), "fire");
    }
}
