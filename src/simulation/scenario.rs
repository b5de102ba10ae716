//! Built-in demo network: two signalised crossroads on an east-west arterial.
//!
//! ```text
//!              N1            N2
//!              |             |
//!   W1 ----> [J1] --C12--> [J2] ----> E2
//!   W1out <-  |   <-C21--   |   <---- E2in
//!              S1            S2
//! ```

use crate::network::{ControlledLink, Position};

use super::memory::{InMemorySimulation, Phase, Program, VehicleSpec};

fn phase(state: &str, duration: f64) -> Phase {
    match Phase::new(state, duration) {
        Ok(phase) => phase,
        Err(e) => unreachable!("built-in phase '{state}' is invalid: {e}"),
    }
}

fn arterial_program() -> Program {
    Program::new(
        "0",
        vec![
            phase("ggrg", 30.0),
            phase("yyry", 4.0),
            phase("rrgr", 25.0),
            phase("rryr", 4.0),
        ],
    )
}

/// Network with two junctions, an ambulance, a fire engine, a police car and
/// background traffic.
///
/// The ambulance drives the arterial west to east through both junctions; the
/// police car approaches `J1` from the north while the ambulance holds it.
#[must_use]
pub fn crossroads() -> InMemorySimulation {
    let built = InMemorySimulation::builder()
        .step_length(1.0)
        .segment("W1", Position::new(-300.0, 0.0), Position::new(0.0, 0.0))
        .segment("W1out", Position::new(0.0, 0.0), Position::new(-300.0, 0.0))
        .segment("C12", Position::new(0.0, 0.0), Position::new(200.0, 0.0))
        .segment("C21", Position::new(200.0, 0.0), Position::new(0.0, 0.0))
        .segment("E2", Position::new(200.0, 0.0), Position::new(500.0, 0.0))
        .segment("E2in", Position::new(500.0, 0.0), Position::new(200.0, 0.0))
        .segment("N1", Position::new(0.0, 300.0), Position::new(0.0, 0.0))
        .segment("S1", Position::new(0.0, 0.0), Position::new(0.0, -300.0))
        .segment("N2", Position::new(200.0, 300.0), Position::new(200.0, 0.0))
        .segment("S2", Position::new(200.0, 0.0), Position::new(200.0, -300.0))
        .junction(
            "J1",
            Position::new(0.0, 0.0),
            vec![
                ControlledLink::new("W1", "C12"),
                ControlledLink::compatible("W1", "S1"),
                ControlledLink::new("N1", "S1"),
                ControlledLink::new("C21", "W1out"),
            ],
            vec![arterial_program()],
        )
        .junction(
            "J2",
            Position::new(200.0, 0.0),
            vec![
                ControlledLink::new("C12", "E2"),
                ControlledLink::compatible("C12", "S2"),
                ControlledLink::new("N2", "S2"),
                ControlledLink::new("E2in", "C21"),
            ],
            vec![arterial_program()],
        )
        .vehicle(VehicleSpec::new("car_0", "veh_passenger", &["W1", "C12", "E2"]).with_speed(9.0))
        .vehicle(VehicleSpec::new("car_1", "veh_passenger", &["E2in", "C21", "W1out"]).departing_at(3.0))
        .vehicle(
            VehicleSpec::new("fire_0", "veh_firefighter", &["N2", "S2"])
                .with_speed(11.0)
                .departing_at(2.0),
        )
        .vehicle(
            VehicleSpec::new("ambulance_0", "veh_ambulance", &["W1", "C12", "E2"])
                .with_speed(12.0)
                .departing_at(5.0),
        )
        .vehicle(
            VehicleSpec::new("police_0", "veh_police", &["N1", "S1"])
                .with_speed(10.0)
                .departing_at(4.0),
        )
        .vehicle(
            VehicleSpec::new("car_2", "veh_passenger", &["N1", "S1"])
                .with_speed(8.0)
                .departing_at(8.0),
        )
        .build();

    match built {
        Ok(sim) => sim,
        Err(e) => unreachable!("built-in scenario is invalid: {e}"),
    }
}
