//! Boundary to the traffic-simulation engine.
//!
//! The controller never moves vehicles or advances time itself. It queries the
//! engine through `Simulation` and issues signal commands back through it.
//! `InMemorySimulation` is a small deterministic engine used by tests, the
//! bench and the demo binary.

mod memory;
/// Built-in demo network.
pub mod scenario;

pub use memory::{
    Command, Fault, InMemorySimulation, InMemorySimulationBuilder, Phase, Program, VehicleSpec, ONLINE_PROGRAM,
};

use crate::error::SimulationError;
use crate::network::{ControlledLink, Junction, JunctionId, Position, SegmentId};
use crate::signal::SignalState;
use crate::vehicle::{Requester, VehicleClass, VehicleId};

/// Result type for collaborator calls.
pub type SimResult<T> = Result<T, SimulationError>;

/// Queries and commands the controller needs from a running simulation.
///
/// All calls are synchronous and must not be issued while the engine is
/// advancing a step.
pub trait Simulation {
    /// Current simulation time in seconds.
    fn time(&mut self) -> SimResult<f64>;

    /// Advance the simulation by one step.
    fn step(&mut self) -> SimResult<()>;

    /// Vehicles still running or waiting to depart.
    fn min_expected_vehicles(&mut self) -> SimResult<usize>;

    /// Tear the session down. Must be safe to call on a broken session.
    fn close(&mut self) -> SimResult<()>;

    /// Re-attach to the running simulation after the session was lost.
    fn reconnect(&mut self) -> SimResult<()>;

    /// Live vehicles, in the order the engine reports them.
    fn vehicle_ids(&mut self) -> SimResult<Vec<VehicleId>>;

    /// Vehicle type name.
    fn vehicle_type(&mut self, id: &VehicleId) -> SimResult<VehicleClass>;

    /// Vehicle position.
    fn vehicle_position(&mut self, id: &VehicleId) -> SimResult<Position>;

    /// Segment the vehicle is on.
    fn vehicle_segment(&mut self, id: &VehicleId) -> SimResult<SegmentId>;

    /// Planned route.
    fn vehicle_route(&mut self, id: &VehicleId) -> SimResult<Vec<SegmentId>>;

    /// Index of the current leg in the route.
    fn vehicle_route_index(&mut self, id: &VehicleId) -> SimResult<usize>;

    /// Signal-controlled junctions.
    fn junction_ids(&mut self) -> SimResult<Vec<JunctionId>>;

    /// Junction centre.
    fn junction_position(&mut self, id: &JunctionId) -> SimResult<Position>;

    /// Controlled links in signal-index order.
    fn controlled_links(&mut self, id: &JunctionId) -> SimResult<Vec<ControlledLink>>;

    /// Current signal state.
    fn signal_state(&mut self, id: &JunctionId) -> SimResult<SignalState>;

    /// Id of the running program.
    fn program(&mut self, id: &JunctionId) -> SimResult<String>;

    /// Index of the running phase.
    fn phase(&mut self, id: &JunctionId) -> SimResult<usize>;

    /// Nominal duration of the running phase, in seconds.
    fn phase_duration(&mut self, id: &JunctionId) -> SimResult<f64>;

    /// Absolute simulation time of the next scheduled phase switch.
    fn next_switch(&mut self, id: &JunctionId) -> SimResult<f64>;

    /// Replace the full signal state in one command.
    fn set_signal_state(&mut self, id: &JunctionId, state: &SignalState) -> SimResult<()>;

    /// Switch to a program.
    fn set_program(&mut self, id: &JunctionId, program: &str) -> SimResult<()>;

    /// Jump to a phase of the running program.
    fn set_phase(&mut self, id: &JunctionId, phase: usize) -> SimResult<()>;

    /// Set the remaining duration of the running phase, in seconds.
    fn set_phase_duration(&mut self, id: &JunctionId, duration: f64) -> SimResult<()>;

    /// Reads everything the controller needs about one vehicle.
    fn requester(&mut self, id: &VehicleId, class: VehicleClass) -> SimResult<Requester> {
        Ok(Requester {
            id: id.clone(),
            class,
            position: self.vehicle_position(id)?,
            segment: self.vehicle_segment(id)?,
            route: self.vehicle_route(id)?,
            route_index: self.vehicle_route_index(id)?,
        })
    }

    /// Reads everything the controller needs about one junction.
    fn junction(&mut self, id: &JunctionId) -> SimResult<Junction> {
        Ok(Junction {
            id: id.clone(),
            position: self.junction_position(id)?,
            links: self.controlled_links(id)?,
            state: self.signal_state(id)?,
        })
    }
}
