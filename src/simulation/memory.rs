//! In-memory reference simulation.
//!
//! A deliberately small engine: vehicles drive at constant speed along routes
//! made of straight segments, and every junction cycles through the phases of
//! a fixed-time program. Signal commands follow the usual semantics of
//! microscopic simulators:
//!
//! - `set_signal_state` puts the junction on a manual ("online") state that
//!   stays until a program is selected again,
//! - `set_program` resumes a program at its first phase,
//! - `set_phase_duration` sets the time left in the running phase.
//!
//! Faults can be injected to exercise the controller's recovery paths.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{SimulationError, ValidationError};
use crate::network::{ControlledLink, JunctionId, Position, SegmentId};
use crate::signal::SignalState;
use crate::vehicle::{VehicleClass, VehicleId};

use super::{SimResult, Simulation};

/// Program id reported while a junction runs on a manual state.
pub const ONLINE_PROGRAM: &str = "online";

/// Phase duration reported while a junction runs on a manual state.
const MANUAL_PHASE_DURATION: f64 = 1.0e6;

/// One phase of a fixed-time program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    /// Signal state shown during the phase.
    pub state: SignalState,
    /// Phase length in seconds.
    pub duration: f64,
}

impl Phase {
    /// Parses a phase from its textual state.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidSignalColor` for unknown colours.
    pub fn new(state: &str, duration: f64) -> Result<Self, ValidationError> {
        Ok(Self {
            state: state.parse()?,
            duration,
        })
    }
}

/// A fixed-time signal program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// Program id.
    pub id: String,
    /// Phases in cycle order.
    pub phases: Vec<Phase>,
}

impl Program {
    /// Creates a program.
    #[must_use]
    pub fn new(id: impl Into<String>, phases: Vec<Phase>) -> Self {
        Self { id: id.into(), phases }
    }
}

/// Vehicle to insert into the simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleSpec {
    /// Vehicle id.
    pub id: VehicleId,
    /// Vehicle type.
    pub class: VehicleClass,
    /// Route as a list of segments.
    pub route: Vec<SegmentId>,
    /// Constant speed in distance units per second.
    pub speed: f64,
    /// Departure time in seconds.
    pub depart: f64,
}

impl VehicleSpec {
    /// Vehicle departing at time zero with speed 10.
    #[must_use]
    pub fn new(id: &str, class: &str, route: &[&str]) -> Self {
        Self {
            id: VehicleId::from(id),
            class: VehicleClass::from(class),
            route: route.iter().map(|s| SegmentId::from(*s)).collect(),
            speed: 10.0,
            depart: 0.0,
        }
    }

    /// Sets the speed.
    #[must_use]
    pub const fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    /// Sets the departure time.
    #[must_use]
    pub const fn departing_at(mut self, depart: f64) -> Self {
        self.depart = depart;
        self
    }
}

/// Signal commands, used for fault injection and the command log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// `set_signal_state`.
    SetSignalState,
    /// `set_program`.
    SetProgram,
    /// `set_phase`.
    SetPhase,
    /// `set_phase_duration`.
    SetPhaseDuration,
}

impl Command {
    const fn name(self) -> &'static str {
        match self {
            Self::SetSignalState => "set_signal_state",
            Self::SetProgram => "set_program",
            Self::SetPhase => "set_phase",
            Self::SetPhaseDuration => "set_phase_duration",
        }
    }
}

/// One-shot failures for the next matching call.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// The next query about this vehicle reports it missing.
    VehicleGone(VehicleId),
    /// The next query or command about this junction reports it missing.
    JunctionGone(JunctionId),
    /// The next matching command is rejected.
    Reject {
        /// Target junction.
        junction: JunctionId,
        /// Command to reject.
        command: Command,
    },
    /// The next call of any kind loses the connection.
    Disconnect,
}

#[derive(Debug, Clone, Copy)]
struct SegmentGeometry {
    from: Position,
    to: Position,
}

impl SegmentGeometry {
    fn length(&self) -> f64 {
        self.from.distance_to(&self.to)
    }

    fn point_at(&self, offset: f64) -> Position {
        let len = self.length();
        if len <= 0.0 {
            return self.from;
        }
        self.from.lerp(&self.to, offset / len)
    }
}

#[derive(Debug, Clone)]
struct Pin {
    position: Position,
    segment: Option<SegmentId>,
}

#[derive(Debug, Clone)]
struct VehicleState {
    spec: VehicleSpec,
    route_index: usize,
    offset: f64,
    pin: Option<Pin>,
}

#[derive(Debug, Clone)]
struct JunctionState {
    id: JunctionId,
    position: Position,
    links: Vec<ControlledLink>,
    programs: Vec<Program>,
    program: usize,
    phase: usize,
    next_switch: f64,
    manual: Option<SignalState>,
}

impl JunctionState {
    fn phases(&self) -> &[Phase] {
        &self.programs[self.program].phases
    }

    fn advance(&mut self, now: f64) {
        if self.manual.is_some() {
            return;
        }
        while now >= self.next_switch {
            self.phase = (self.phase + 1) % self.phases().len();
            self.next_switch += self.phases()[self.phase].duration;
        }
    }
}

/// Builder for `InMemorySimulation`.
#[derive(Debug, Clone, Default)]
pub struct InMemorySimulationBuilder {
    step_length: Option<f64>,
    segments: Vec<(SegmentId, SegmentGeometry)>,
    junctions: Vec<(JunctionId, Position, Vec<ControlledLink>, Vec<Program>)>,
    vehicles: Vec<VehicleSpec>,
}

impl InMemorySimulationBuilder {
    /// Seconds per step (default 1.0).
    #[must_use]
    pub const fn step_length(mut self, seconds: f64) -> Self {
        self.step_length = Some(seconds);
        self
    }

    /// Adds a straight segment.
    #[must_use]
    pub fn segment(mut self, id: &str, from: Position, to: Position) -> Self {
        self.segments.push((SegmentId::from(id), SegmentGeometry { from, to }));
        self
    }

    /// Adds a signal-controlled junction. The first program starts running.
    #[must_use]
    pub fn junction(mut self, id: &str, position: Position, links: Vec<ControlledLink>, programs: Vec<Program>) -> Self {
        self.junctions.push((JunctionId::from(id), position, links, programs));
        self
    }

    /// Adds a vehicle.
    #[must_use]
    pub fn vehicle(mut self, spec: VehicleSpec) -> Self {
        self.vehicles.push(spec);
        self
    }

    /// Validates the network and builds the simulation.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` when a junction has no program,
    /// a phase does not cover every controlled link, a duration or speed is not
    /// positive, or a route uses an unknown segment.
    pub fn build(self) -> Result<InMemorySimulation, ValidationError> {
        let step_length = self.step_length.unwrap_or(1.0);
        if !(step_length.is_finite() && step_length > 0.0) {
            return Err(ValidationError::MustBePositive {
                field: "step_length".to_string(),
            });
        }

        let segments: HashMap<SegmentId, SegmentGeometry> = self.segments.into_iter().collect();

        let mut junctions = Vec::with_capacity(self.junctions.len());
        for (id, position, links, programs) in self.junctions {
            if programs.is_empty() {
                return Err(invalid(format!("junction {id} has no program")));
            }
            for program in &programs {
                if program.phases.is_empty() {
                    return Err(invalid(format!("program {} of junction {id} has no phases", program.id)));
                }
                if program.id == ONLINE_PROGRAM {
                    return Err(invalid(format!("program id '{ONLINE_PROGRAM}' is reserved")));
                }
                for phase in &program.phases {
                    if phase.state.len() != links.len() {
                        return Err(invalid(format!(
                            "phase '{}' of junction {id} covers {} links, expected {}",
                            phase.state,
                            phase.state.len(),
                            links.len()
                        )));
                    }
                    if !(phase.duration.is_finite() && phase.duration > 0.0) {
                        return Err(invalid(format!("phase duration {} of junction {id}", phase.duration)));
                    }
                }
            }
            let next_switch = programs[0].phases[0].duration;
            junctions.push(JunctionState {
                id,
                position,
                links,
                programs,
                program: 0,
                phase: 0,
                next_switch,
                manual: None,
            });
        }

        for spec in &self.vehicles {
            validate_vehicle(spec, &segments)?;
        }
        let mut pending = self.vehicles;
        pending.sort_by(|a, b| a.depart.total_cmp(&b.depart));

        Ok(InMemorySimulation {
            time: 0.0,
            step_length,
            segments,
            junctions,
            pending,
            vehicles: Vec::new(),
            faults: Vec::new(),
            connected: true,
            refused_reconnects: 0,
            closes: 0,
            commands: Vec::new(),
        })
    }
}

fn invalid(reason: String) -> ValidationError {
    ValidationError::InvalidConfig { reason }
}

fn validate_vehicle(spec: &VehicleSpec, segments: &HashMap<SegmentId, SegmentGeometry>) -> Result<(), ValidationError> {
    if spec.route.is_empty() {
        return Err(invalid(format!("vehicle {} has an empty route", spec.id)));
    }
    if let Some(unknown) = spec.route.iter().find(|s| !segments.contains_key(*s)) {
        return Err(invalid(format!("vehicle {} uses unknown segment {unknown}", spec.id)));
    }
    if !(spec.speed.is_finite() && spec.speed > 0.0) {
        return Err(invalid(format!("vehicle {} speed {}", spec.id, spec.speed)));
    }
    Ok(())
}

/// Deterministic in-process simulation.
#[derive(Debug, Clone)]
pub struct InMemorySimulation {
    time: f64,
    step_length: f64,
    segments: HashMap<SegmentId, SegmentGeometry>,
    junctions: Vec<JunctionState>,
    pending: Vec<VehicleSpec>,
    vehicles: Vec<VehicleState>,
    faults: Vec<Fault>,
    connected: bool,
    refused_reconnects: u32,
    closes: u32,
    commands: Vec<(JunctionId, Command)>,
}

impl InMemorySimulation {
    /// Starts a builder.
    #[must_use]
    pub fn builder() -> InMemorySimulationBuilder {
        InMemorySimulationBuilder::default()
    }

    /// Queues a one-shot fault.
    pub fn inject_fault(&mut self, fault: Fault) {
        self.faults.push(fault);
    }

    /// Makes the next `n` reconnect attempts fail.
    pub fn refuse_reconnects(&mut self, n: u32) {
        self.refused_reconnects = n;
    }

    /// Number of `close` calls so far.
    #[must_use]
    pub const fn close_count(&self) -> u32 {
        self.closes
    }

    /// Successful signal commands, in issue order.
    #[must_use]
    pub fn commands(&self) -> &[(JunctionId, Command)] {
        &self.commands
    }

    /// Clears the command log.
    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Inserts a vehicle; it appears immediately if its departure time has passed.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` for bad routes or speeds.
    pub fn add_vehicle(&mut self, spec: VehicleSpec) -> Result<(), ValidationError> {
        validate_vehicle(&spec, &self.segments)?;
        if spec.depart <= self.time {
            self.vehicles.push(VehicleState {
                spec,
                route_index: 0,
                offset: 0.0,
                pin: None,
            });
        } else {
            let at = self.pending.partition_point(|p| p.depart <= spec.depart);
            self.pending.insert(at, spec);
        }
        Ok(())
    }

    /// Pins a vehicle at a position on a leg of its route. Pinned vehicles do not move.
    ///
    /// # Errors
    ///
    /// Returns `SimulationError::VehicleNotFound` if the vehicle is not live.
    pub fn place_vehicle(&mut self, id: &VehicleId, route_index: usize, position: Position) -> SimResult<()> {
        let v = self.live_vehicle_mut(id)?;
        v.route_index = route_index.min(v.spec.route.len() - 1);
        v.offset = 0.0;
        v.pin = Some(Pin {
            position,
            segment: None,
        });
        Ok(())
    }

    /// Pins a vehicle on an arbitrary segment (e.g. inside a junction), keeping its route index.
    ///
    /// # Errors
    ///
    /// Returns `SimulationError::VehicleNotFound` if the vehicle is not live.
    pub fn place_vehicle_on(&mut self, id: &VehicleId, segment: SegmentId, position: Position) -> SimResult<()> {
        let v = self.live_vehicle_mut(id)?;
        v.pin = Some(Pin {
            position,
            segment: Some(segment),
        });
        Ok(())
    }

    /// Lets a pinned vehicle drive again from the start of its current leg.
    ///
    /// # Errors
    ///
    /// Returns `SimulationError::VehicleNotFound` if the vehicle is not live.
    pub fn unpin_vehicle(&mut self, id: &VehicleId) -> SimResult<()> {
        let v = self.live_vehicle_mut(id)?;
        v.pin = None;
        v.offset = 0.0;
        Ok(())
    }

    /// Removes a vehicle from the simulation.
    pub fn remove_vehicle(&mut self, id: &VehicleId) -> bool {
        let before = self.vehicles.len();
        self.vehicles.retain(|v| v.spec.id != *id);
        before != self.vehicles.len()
    }

    fn live_vehicle_mut(&mut self, id: &VehicleId) -> SimResult<&mut VehicleState> {
        self.vehicles
            .iter_mut()
            .find(|v| v.spec.id == *id)
            .ok_or_else(|| SimulationError::VehicleNotFound { id: id.clone() })
    }

    fn gate(&mut self) -> SimResult<()> {
        if let Some(at) = self.faults.iter().position(|f| matches!(f, Fault::Disconnect)) {
            self.faults.remove(at);
            self.connected = false;
        }
        if self.connected {
            Ok(())
        } else {
            Err(SimulationError::Disconnected {
                message: "session closed".to_string(),
            })
        }
    }

    fn vehicle_index(&mut self, id: &VehicleId) -> SimResult<usize> {
        self.gate()?;
        if let Some(at) = self
            .faults
            .iter()
            .position(|f| matches!(f, Fault::VehicleGone(v) if v == id))
        {
            self.faults.remove(at);
            return Err(SimulationError::VehicleNotFound { id: id.clone() });
        }
        self.vehicles
            .iter()
            .position(|v| v.spec.id == *id)
            .ok_or_else(|| SimulationError::VehicleNotFound { id: id.clone() })
    }

    fn junction_index(&mut self, id: &JunctionId) -> SimResult<usize> {
        self.gate()?;
        if let Some(at) = self
            .faults
            .iter()
            .position(|f| matches!(f, Fault::JunctionGone(j) if j == id))
        {
            self.faults.remove(at);
            return Err(SimulationError::JunctionNotFound { id: id.clone() });
        }
        self.junctions
            .iter()
            .position(|j| j.id == *id)
            .ok_or_else(|| SimulationError::JunctionNotFound { id: id.clone() })
    }

    fn command_index(&mut self, id: &JunctionId, command: Command) -> SimResult<usize> {
        let idx = self.junction_index(id)?;
        if let Some(at) = self
            .faults
            .iter()
            .position(|f| matches!(f, Fault::Reject { junction, command: c } if junction == id && *c == command))
        {
            self.faults.remove(at);
            return Err(rejected(id, command, "injected fault"));
        }
        Ok(idx)
    }

    fn vehicle_position_at(&self, v: &VehicleState) -> Position {
        if let Some(pin) = &v.pin {
            return pin.position;
        }
        self.segments
            .get(&v.spec.route[v.route_index])
            .map_or_else(Position::default, |geom| geom.point_at(v.offset))
    }
}

fn rejected(id: &JunctionId, command: Command, reason: &str) -> SimulationError {
    SimulationError::CommandRejected {
        command: command.name().to_string(),
        junction: id.clone(),
        reason: reason.to_string(),
    }
}

/// Moves a vehicle forward; returns false once it has finished its route.
fn drive(v: &mut VehicleState, segments: &HashMap<SegmentId, SegmentGeometry>, dt: f64) -> bool {
    if v.pin.is_some() {
        return true;
    }
    v.offset += v.spec.speed * dt;
    loop {
        let len = segments.get(&v.spec.route[v.route_index]).map_or(0.0, SegmentGeometry::length);
        if v.offset < len {
            return true;
        }
        v.offset -= len;
        v.route_index += 1;
        if v.route_index >= v.spec.route.len() {
            return false;
        }
    }
}

impl Simulation for InMemorySimulation {
    fn time(&mut self) -> SimResult<f64> {
        self.gate()?;
        Ok(self.time)
    }

    fn step(&mut self) -> SimResult<()> {
        self.gate()?;
        self.time += self.step_length;
        let dt = self.step_length;

        let segments = &self.segments;
        self.vehicles.retain_mut(|v| drive(v, segments, dt));

        let departing = self.pending.partition_point(|p| p.depart <= self.time);
        for spec in self.pending.drain(..departing) {
            self.vehicles.push(VehicleState {
                spec,
                route_index: 0,
                offset: 0.0,
                pin: None,
            });
        }

        let now = self.time;
        for junction in &mut self.junctions {
            junction.advance(now);
        }
        Ok(())
    }

    fn min_expected_vehicles(&mut self) -> SimResult<usize> {
        self.gate()?;
        Ok(self.vehicles.len() + self.pending.len())
    }

    fn close(&mut self) -> SimResult<()> {
        self.connected = false;
        self.closes += 1;
        Ok(())
    }

    fn reconnect(&mut self) -> SimResult<()> {
        if self.refused_reconnects > 0 {
            self.refused_reconnects -= 1;
            return Err(SimulationError::Disconnected {
                message: "connection refused".to_string(),
            });
        }
        self.connected = true;
        Ok(())
    }

    fn vehicle_ids(&mut self) -> SimResult<Vec<VehicleId>> {
        self.gate()?;
        Ok(self.vehicles.iter().map(|v| v.spec.id.clone()).collect())
    }

    fn vehicle_type(&mut self, id: &VehicleId) -> SimResult<VehicleClass> {
        let idx = self.vehicle_index(id)?;
        Ok(self.vehicles[idx].spec.class.clone())
    }

    fn vehicle_position(&mut self, id: &VehicleId) -> SimResult<Position> {
        let idx = self.vehicle_index(id)?;
        Ok(self.vehicle_position_at(&self.vehicles[idx]))
    }

    fn vehicle_segment(&mut self, id: &VehicleId) -> SimResult<SegmentId> {
        let idx = self.vehicle_index(id)?;
        let v = &self.vehicles[idx];
        Ok(v.pin
            .as_ref()
            .and_then(|p| p.segment.clone())
            .unwrap_or_else(|| v.spec.route[v.route_index].clone()))
    }

    fn vehicle_route(&mut self, id: &VehicleId) -> SimResult<Vec<SegmentId>> {
        let idx = self.vehicle_index(id)?;
        Ok(self.vehicles[idx].spec.route.clone())
    }

    fn vehicle_route_index(&mut self, id: &VehicleId) -> SimResult<usize> {
        let idx = self.vehicle_index(id)?;
        Ok(self.vehicles[idx].route_index)
    }

    fn junction_ids(&mut self) -> SimResult<Vec<JunctionId>> {
        self.gate()?;
        Ok(self.junctions.iter().map(|j| j.id.clone()).collect())
    }

    fn junction_position(&mut self, id: &JunctionId) -> SimResult<Position> {
        let idx = self.junction_index(id)?;
        Ok(self.junctions[idx].position)
    }

    fn controlled_links(&mut self, id: &JunctionId) -> SimResult<Vec<ControlledLink>> {
        let idx = self.junction_index(id)?;
        Ok(self.junctions[idx].links.clone())
    }

    fn signal_state(&mut self, id: &JunctionId) -> SimResult<SignalState> {
        let idx = self.junction_index(id)?;
        let j = &self.junctions[idx];
        Ok(j.manual.clone().unwrap_or_else(|| j.phases()[j.phase].state.clone()))
    }

    fn program(&mut self, id: &JunctionId) -> SimResult<String> {
        let idx = self.junction_index(id)?;
        let j = &self.junctions[idx];
        if j.manual.is_some() {
            return Ok(ONLINE_PROGRAM.to_string());
        }
        Ok(j.programs[j.program].id.clone())
    }

    fn phase(&mut self, id: &JunctionId) -> SimResult<usize> {
        let idx = self.junction_index(id)?;
        let j = &self.junctions[idx];
        Ok(if j.manual.is_some() { 0 } else { j.phase })
    }

    fn phase_duration(&mut self, id: &JunctionId) -> SimResult<f64> {
        let idx = self.junction_index(id)?;
        let j = &self.junctions[idx];
        if j.manual.is_some() {
            return Ok(MANUAL_PHASE_DURATION);
        }
        Ok(j.phases()[j.phase].duration)
    }

    fn next_switch(&mut self, id: &JunctionId) -> SimResult<f64> {
        let idx = self.junction_index(id)?;
        let j = &self.junctions[idx];
        if j.manual.is_some() {
            return Ok(self.time + MANUAL_PHASE_DURATION);
        }
        Ok(j.next_switch)
    }

    fn set_signal_state(&mut self, id: &JunctionId, state: &SignalState) -> SimResult<()> {
        let command = Command::SetSignalState;
        let idx = self.command_index(id, command)?;
        let j = &mut self.junctions[idx];
        if state.len() != j.links.len() {
            return Err(rejected(id, command, "state length does not match controlled links"));
        }
        j.manual = Some(state.clone());
        self.commands.push((id.clone(), command));
        Ok(())
    }

    fn set_program(&mut self, id: &JunctionId, program: &str) -> SimResult<()> {
        let command = Command::SetProgram;
        let idx = self.command_index(id, command)?;
        let now = self.time;
        let j = &mut self.junctions[idx];
        let Some(p) = j.programs.iter().position(|p| p.id == program) else {
            return Err(rejected(id, command, "unknown program"));
        };
        j.program = p;
        j.phase = 0;
        j.next_switch = now + j.phases()[0].duration;
        j.manual = None;
        self.commands.push((id.clone(), command));
        Ok(())
    }

    fn set_phase(&mut self, id: &JunctionId, phase: usize) -> SimResult<()> {
        let command = Command::SetPhase;
        let idx = self.command_index(id, command)?;
        let now = self.time;
        let j = &mut self.junctions[idx];
        if j.manual.is_some() {
            return Err(rejected(id, command, "no program running"));
        }
        if phase >= j.phases().len() {
            return Err(rejected(id, command, "phase index out of range"));
        }
        j.phase = phase;
        j.next_switch = now + j.phases()[phase].duration;
        self.commands.push((id.clone(), command));
        Ok(())
    }

    fn set_phase_duration(&mut self, id: &JunctionId, duration: f64) -> SimResult<()> {
        let command = Command::SetPhaseDuration;
        let idx = self.command_index(id, command)?;
        let now = self.time;
        let j = &mut self.junctions[idx];
        if j.manual.is_some() {
            return Err(rejected(id, command, "no program running"));
        }
        if !(duration.is_finite() && duration >= 0.0) {
            return Err(rejected(id, command, "duration must be finite and non-negative"));
        }
        j.next_switch = now + duration;
        self.commands.push((id.clone(), command));
        Ok(())
    }
}
