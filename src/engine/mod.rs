//! Preemption control loop.
//!
//! `PreemptionEngine::tick` runs one full detect, arbitrate, apply, release
//! cycle against a simulation. It is called once per simulation step, after the
//! step has completed.

mod arbitration;
mod release;

/// Run driver with reconnect handling.
pub mod runtime;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::candidate;
use crate::config::PreemptionConfig;
use crate::error::{InvariantError, PreemptError, PreemptResult};
use crate::events::{EventBus, EventStream, ReleaseReason};
use crate::geometry::LaneResolver;
use crate::network::{Junction, JunctionId};
use crate::priority::{Priority, PriorityRegistry};
use crate::simulation::Simulation;
use crate::storage::{InMemoryPreemptionStore, PreemptionStore};
use crate::vehicle::{VehicleClass, VehicleId};

pub use arbitration::{override_pattern, Arbitration, OverrideEngine};
pub use release::ReleaseMonitor;

/// Counters for one tick, or accumulated over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// Free junctions overridden.
    pub overrides: u64,
    /// Overrides taken over by a more urgent vehicle.
    pub displacements: u64,
    /// Requests refused because the holder was at least as urgent.
    pub rejections: u64,
    /// Junctions returned to their program.
    pub releases: u64,
    /// Vehicles that vanished while being observed.
    pub skipped_vehicles: u64,
    /// Junctions that vanished while being observed.
    pub skipped_junctions: u64,
    /// Recoverable errors (rejected commands, storage failures).
    pub failures: u64,
}

impl TickReport {
    /// Adds another report's counters to this one.
    pub fn absorb(&mut self, other: &Self) {
        self.overrides += other.overrides;
        self.displacements += other.displacements;
        self.rejections += other.rejections;
        self.releases += other.releases;
        self.skipped_vehicles += other.skipped_vehicles;
        self.skipped_junctions += other.skipped_junctions;
        self.failures += other.failures;
    }

    fn record(&mut self, outcome: &Arbitration) {
        match outcome {
            Arbitration::Applied => self.overrides += 1,
            Arbitration::Displaced { .. } => self.displacements += 1,
            Arbitration::Rejected => self.rejections += 1,
            Arbitration::Held => {}
        }
    }
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "overrides={} displacements={} rejections={} releases={} skipped_vehicles={} skipped_junctions={} failures={}",
            self.overrides,
            self.displacements,
            self.rejections,
            self.releases,
            self.skipped_vehicles,
            self.skipped_junctions,
            self.failures
        )
    }
}

/// Lets transport failures and fatal errors through; everything else is
/// handed back for the loop to log and skip.
fn escalate(err: PreemptError) -> PreemptResult<PreemptError> {
    if err.is_transport() || err.is_fatal() {
        Err(err)
    } else {
        Ok(err)
    }
}

/// The preemption controller.
pub struct PreemptionEngine {
    resolver: LaneResolver,
    registry: PriorityRegistry,
    store: Arc<dyn PreemptionStore>,
    overrides: OverrideEngine,
    releases: ReleaseMonitor,
    events: Arc<EventBus>,
    stats: TickReport,
}

impl PreemptionEngine {
    /// Create an engine on the given store.
    #[must_use]
    pub fn new(config: &PreemptionConfig, store: Arc<dyn PreemptionStore>) -> Self {
        let resolver = LaneResolver::new(config.detection_radius);
        let events = Arc::new(EventBus::new(config.event_queue_capacity));
        Self {
            resolver,
            registry: config.classes.clone(),
            overrides: OverrideEngine::new(Arc::clone(&store), Arc::clone(&events)),
            releases: ReleaseMonitor::new(resolver, Arc::clone(&store), Arc::clone(&events)),
            store,
            events,
            stats: TickReport::default(),
        }
    }

    /// Create an engine with an in-memory store.
    #[must_use]
    pub fn in_memory(config: &PreemptionConfig) -> Self {
        Self::new(config, Arc::new(InMemoryPreemptionStore::new()))
    }

    /// Subscribe to preemption events.
    pub fn subscribe(&self) -> EventStream {
        self.events.subscribe()
    }

    /// The shared event bus.
    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// The shared preemption store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn PreemptionStore> {
        &self.store
    }

    /// Counters accumulated over every tick so far.
    #[must_use]
    pub const fn stats(&self) -> &TickReport {
        &self.stats
    }

    /// Run one control cycle.
    ///
    /// Overrides are applied before releases. Vehicles or junctions that vanish
    /// mid-tick, rejected commands and storage failures are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns transport errors, which abort the tick, and invariant violations,
    /// which are fatal.
    pub fn tick(&mut self, sim: &mut dyn Simulation) -> PreemptResult<TickReport> {
        let mut report = TickReport::default();
        let now = sim.time()?;
        let vehicles = sim.vehicle_ids()?;
        let junctions = self.observe_junctions(sim, &mut report)?;

        for (priority, vehicle, class) in self.prioritized(sim, &vehicles, &mut report)? {
            let requester = match sim.requester(&vehicle, class) {
                Ok(requester) => requester,
                Err(e) => {
                    let e = escalate(e.into())?;
                    warn!(vehicle = %vehicle, error = %e, "skipping vehicle");
                    report.skipped_vehicles += 1;
                    continue;
                }
            };

            for candidate in candidate::rank(&self.resolver, &requester, &junctions) {
                let Some(junction) = junctions.iter().find(|j| j.id == candidate.junction) else {
                    continue;
                };
                match self
                    .overrides
                    .arbitrate(sim, junction, candidate.approach, &vehicle, priority, now)
                {
                    Ok(outcome) => report.record(&outcome),
                    Err(e) => {
                        let e = escalate(e)?;
                        warn!(junction = %junction.id, vehicle = %vehicle, error = %e, "override failed");
                        report.failures += 1;
                    }
                }
            }
        }

        let live: HashSet<VehicleId> = vehicles.into_iter().collect();
        let overridden = match self.store.junctions() {
            Ok(overridden) => overridden,
            Err(e) => {
                let e = escalate(e.into())?;
                warn!(error = %e, "cannot enumerate overridden junctions");
                report.failures += 1;
                Vec::new()
            }
        };
        for junction in overridden {
            match self.settle(sim, &junction, &live, now) {
                Ok(true) => report.releases += 1,
                Ok(false) => {}
                Err(e) => {
                    let e = escalate(e)?;
                    warn!(junction = %junction, error = %e, "release failed, will retry");
                    report.failures += 1;
                }
            }
        }

        debug!(time = now, report = %report, "tick complete");
        self.stats.absorb(&report);
        Ok(report)
    }

    /// Release every override regardless of the release check.
    ///
    /// The control loop never calls this; the run driver does only when
    /// `release_on_shutdown` is configured.
    ///
    /// Returns the number of junctions released.
    ///
    /// # Errors
    ///
    /// Returns transport errors and invariant violations; other failures are
    /// logged and the junction stays overridden.
    pub fn release_all(&mut self, sim: &mut dyn Simulation) -> PreemptResult<u64> {
        let now = sim.time()?;
        let mut released = 0;
        for junction in self.store.junctions()? {
            match self.releases.release(sim, &junction, ReleaseReason::Shutdown, now) {
                Ok(true) => released += 1,
                Ok(false) => {}
                Err(e) => {
                    let e = escalate(e)?;
                    warn!(junction = %junction, error = %e, "shutdown release failed");
                }
            }
        }
        self.stats.releases += released;
        Ok(released)
    }

    fn settle(
        &self,
        sim: &mut dyn Simulation,
        junction: &JunctionId,
        live: &HashSet<VehicleId>,
        now: f64,
    ) -> PreemptResult<bool> {
        match self.releases.release_reason(sim, junction, live)? {
            Some(reason) => self.releases.release(sim, junction, reason, now),
            None => Ok(false),
        }
    }

    fn observe_junctions(&self, sim: &mut dyn Simulation, report: &mut TickReport) -> PreemptResult<Vec<Junction>> {
        let ids = sim.junction_ids()?;
        let mut junctions = Vec::with_capacity(ids.len());
        for id in ids {
            match sim.junction(&id) {
                Ok(junction) if junction.state.len() != junction.link_count() => {
                    let (expected, actual) = (junction.link_count(), junction.state.len());
                    return Err(InvariantError::StateLengthMismatch {
                        junction: junction.id,
                        expected,
                        actual,
                    }
                    .into());
                }
                Ok(junction) => junctions.push(junction),
                Err(e) => {
                    let e = escalate(e.into())?;
                    warn!(junction = %id, error = %e, "skipping junction");
                    report.skipped_junctions += 1;
                }
            }
        }
        Ok(junctions)
    }

    /// Prioritized vehicles, most urgent first; ties keep live-list order.
    fn prioritized(
        &self,
        sim: &mut dyn Simulation,
        vehicles: &[VehicleId],
        report: &mut TickReport,
    ) -> PreemptResult<Vec<(Priority, VehicleId, VehicleClass)>> {
        let mut out = Vec::new();
        for vehicle in vehicles {
            let class = match sim.vehicle_type(vehicle) {
                Ok(class) => class,
                Err(e) => {
                    let e = escalate(e.into())?;
                    warn!(vehicle = %vehicle, error = %e, "skipping vehicle");
                    report.skipped_vehicles += 1;
                    continue;
                }
            };
            if let Some(priority) = self.registry.lookup(&class) {
                out.push((priority, vehicle.clone(), class));
            }
        }
        out.sort_by_key(|(priority, _, _)| *priority);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{ControlledLink, Position};
    use crate::simulation::{Fault, InMemorySimulation, Phase, Program, VehicleSpec};

    /// One junction at the origin with four approaches.
    fn cross() -> InMemorySimulation {
        InMemorySimulation::builder()
            .segment("w", Position::new(-200.0, 0.0), Position::new(0.0, 0.0))
            .segment("e", Position::new(0.0, 0.0), Position::new(200.0, 0.0))
            .segment("n", Position::new(0.0, 200.0), Position::new(0.0, 0.0))
            .segment("s", Position::new(0.0, 0.0), Position::new(0.0, -200.0))
            .junction(
                "J",
                Position::new(0.0, 0.0),
                vec![
                    ControlledLink::new("w", "e"),
                    ControlledLink::new("n", "s"),
                    ControlledLink::new("e", "w"),
                    ControlledLink::new("s", "n"),
                ],
                vec![Program::new(
                    "0",
                    vec![Phase::new("grgr", 30.0).unwrap(), Phase::new("rgrg", 30.0).unwrap()],
                )],
            )
            .vehicle(VehicleSpec::new("police", "veh_police", &["w", "e"]))
            .vehicle(VehicleSpec::new("amb", "veh_ambulance", &["n", "s"]))
            .vehicle(VehicleSpec::new("car", "veh_passenger", &["w", "e"]))
            .build()
            .unwrap()
    }

    fn engine() -> PreemptionEngine {
        PreemptionEngine::in_memory(&PreemptionConfig::default())
    }

    #[test]
    fn most_urgent_vehicle_wins_within_one_tick() {
        let mut sim = cross();
        let mut engine = engine();
        sim.step().unwrap();
        sim.place_vehicle(&VehicleId::from("police"), 0, Position::new(-30.0, 0.0)).unwrap();
        sim.place_vehicle(&VehicleId::from("amb"), 0, Position::new(0.0, 40.0)).unwrap();

        let report = engine.tick(&mut sim).unwrap();
        // Ambulance is processed first, so police is simply rejected.
        assert_eq!(report.overrides, 1);
        assert_eq!(report.rejections, 1);
        assert_eq!(report.displacements, 0);

        let j = JunctionId::from("J");
        let entry = engine.store().get(&j).unwrap().unwrap();
        assert_eq!(entry.record.vehicle.as_str(), "amb");
        assert_eq!(sim.signal_state(&j).unwrap().to_string(), "rgrr");
    }

    #[test]
    fn unprioritized_vehicles_are_ignored() {
        let mut sim = cross();
        let mut engine = engine();
        sim.step().unwrap();
        sim.place_vehicle(&VehicleId::from("car"), 0, Position::new(-10.0, 0.0)).unwrap();
        sim.remove_vehicle(&VehicleId::from("police"));
        sim.remove_vehicle(&VehicleId::from("amb"));

        assert_eq!(engine.tick(&mut sim).unwrap(), TickReport::default());
        assert!(sim.commands().is_empty());
    }

    #[test]
    fn vanished_vehicle_is_skipped() {
        let mut sim = cross();
        let mut engine = engine();
        sim.step().unwrap();
        sim.place_vehicle(&VehicleId::from("police"), 0, Position::new(-30.0, 0.0)).unwrap();
        sim.remove_vehicle(&VehicleId::from("amb"));
        sim.inject_fault(Fault::VehicleGone(VehicleId::from("police")));

        let report = engine.tick(&mut sim).unwrap();
        assert_eq!(report.skipped_vehicles, 1);
        assert!(engine.store().is_empty().unwrap());
    }

    #[test]
    fn vanished_junction_is_skipped() {
        let mut sim = cross();
        let mut engine = engine();
        sim.step().unwrap();
        sim.inject_fault(Fault::JunctionGone(JunctionId::from("J")));

        let report = engine.tick(&mut sim).unwrap();
        assert_eq!(report.skipped_junctions, 1);
        assert_eq!(report.overrides, 0);
    }

    #[test]
    fn disconnect_aborts_tick() {
        let mut sim = cross();
        let mut engine = engine();
        sim.step().unwrap();
        sim.inject_fault(Fault::Disconnect);
        assert!(engine.tick(&mut sim).unwrap_err().is_transport());
    }

    #[test]
    fn release_all_restores_everything() {
        let mut sim = cross();
        let mut engine = engine();
        sim.step().unwrap();
        sim.place_vehicle(&VehicleId::from("amb"), 0, Position::new(0.0, 40.0)).unwrap();
        engine.tick(&mut sim).unwrap();

        assert_eq!(engine.release_all(&mut sim).unwrap(), 1);
        assert!(engine.store().is_empty().unwrap());
        assert_eq!(sim.program(&JunctionId::from("J")).unwrap(), "0");
        assert_eq!(engine.stats().releases, 1);
    }

    #[test]
    fn stats_accumulate_across_ticks() {
        let mut a = TickReport {
            overrides: 1,
            releases: 2,
            ..TickReport::default()
        };
        a.absorb(&TickReport {
            overrides: 3,
            failures: 1,
            ..TickReport::default()
        });
        assert_eq!(a.overrides, 4);
        assert_eq!(a.releases, 2);
        assert_eq!(a.failures, 1);
        assert!(a.to_string().contains("overrides=4"));
    }
}
