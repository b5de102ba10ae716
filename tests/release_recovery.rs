use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use signal_preempt::simulation::{scenario, Command, Fault, InMemorySimulation, Phase, Program, VehicleSpec};
use signal_preempt::{
    ControlledLink, EventPayload, InMemoryPreemptionStore, JunctionId, OverrideRecord, PreemptionConfig,
    PreemptionEngine, PreemptionEntry, PreemptionRuntime, PreemptionRuntimeConfig, PreemptionStore, Position,
    ReleaseReason, Simulation, StorageError, VehicleId,
};

/// Store whose `insert` or `remove` fails a configurable number of times.
struct FlakyStore {
    inner: InMemoryPreemptionStore,
    failing_inserts: AtomicU32,
    failing_removes: AtomicU32,
    duplicate_on_insert: bool,
}

impl FlakyStore {
    fn new(failing_removes: u32) -> Self {
        Self::with_failures(0, failing_removes)
    }

    fn with_failures(failing_inserts: u32, failing_removes: u32) -> Self {
        Self {
            inner: InMemoryPreemptionStore::new(),
            failing_inserts: AtomicU32::new(failing_inserts),
            failing_removes: AtomicU32::new(failing_removes),
            duplicate_on_insert: false,
        }
    }

    /// Failing inserts claim the junction is already taken.
    fn reporting_duplicates(mut self) -> Self {
        self.duplicate_on_insert = true;
        self
    }
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

impl PreemptionStore for FlakyStore {
    fn get(&self, junction: &JunctionId) -> Result<Option<PreemptionEntry>, StorageError> {
        self.inner.get(junction)
    }

    fn insert(&self, entry: PreemptionEntry) -> Result<(), StorageError> {
        if take_failure(&self.failing_inserts) {
            if self.duplicate_on_insert {
                return Err(StorageError::DuplicateJunction(entry.record.junction));
            }
            return Err(StorageError::BackendError("write timeout".to_string()));
        }
        self.inner.insert(entry)
    }

    fn retarget(&self, record: OverrideRecord) -> Result<(), StorageError> {
        self.inner.retarget(record)
    }

    fn mark_restored(&self, junction: &JunctionId) -> Result<(), StorageError> {
        self.inner.mark_restored(junction)
    }

    fn remove(&self, junction: &JunctionId) -> Result<Option<PreemptionEntry>, StorageError> {
        if take_failure(&self.failing_removes) {
            return Err(StorageError::BackendError("disk full".to_string()));
        }
        self.inner.remove(junction)
    }

    fn junctions(&self) -> Result<Vec<JunctionId>, StorageError> {
        self.inner.junctions()
    }

    fn len(&self) -> Result<usize, StorageError> {
        self.inner.len()
    }
}

fn approach_sim() -> InMemorySimulation {
    let mut sim = InMemorySimulation::builder()
        .segment("in", Position::new(-100.0, 0.0), Position::new(0.0, 0.0))
        .segment("out", Position::new(0.0, 0.0), Position::new(100.0, 0.0))
        .junction(
            "J",
            Position::new(0.0, 0.0),
            vec![ControlledLink::new("in", "out"), ControlledLink::new("cross", "out")],
            vec![Program::new(
                "0",
                vec![Phase::new("rg", 30.0).unwrap(), Phase::new("gr", 30.0).unwrap()],
            )],
        )
        .vehicle(VehicleSpec::new("amb", "veh_ambulance", &["in", "out"]))
        .build()
        .unwrap();
    sim.step().unwrap();
    sim.place_vehicle(&VehicleId::from("amb"), 0, Position::new(-20.0, 0.0)).unwrap();
    sim
}

fn issued(sim: &InMemorySimulation) -> Vec<Command> {
    sim.commands().iter().map(|(_, c)| *c).collect()
}

#[test]
fn holder_vanishing_mid_tick_is_released() {
    let mut sim = approach_sim();
    let mut engine = PreemptionEngine::in_memory(&PreemptionConfig::default());
    engine.tick(&mut sim).unwrap();

    sim.step().unwrap();
    // One for the type query, one for the release check's position query.
    sim.inject_fault(Fault::VehicleGone(VehicleId::from("amb")));
    sim.inject_fault(Fault::VehicleGone(VehicleId::from("amb")));
    let report = engine.tick(&mut sim).unwrap();

    assert_eq!(report.skipped_vehicles, 1);
    assert_eq!(report.releases, 1);
    assert!(engine.store().is_empty().unwrap());
}

#[test]
fn rejected_restore_command_is_retried_in_full() {
    let mut sim = approach_sim();
    let mut engine = PreemptionEngine::in_memory(&PreemptionConfig::default());
    let j = JunctionId::from("J");
    engine.tick(&mut sim).unwrap();
    assert_eq!(sim.signal_state(&j).unwrap().to_string(), "gr");

    sim.step().unwrap();
    assert!(sim.remove_vehicle(&VehicleId::from("amb")));
    sim.inject_fault(Fault::Reject {
        junction: j.clone(),
        command: Command::SetPhaseDuration,
    });
    sim.clear_commands();
    let report = engine.tick(&mut sim).unwrap();
    assert_eq!(report.failures, 1);
    assert_eq!(report.releases, 0);
    assert!(!engine.store().get(&j).unwrap().unwrap().restored);

    sim.step().unwrap();
    sim.clear_commands();
    let report = engine.tick(&mut sim).unwrap();
    assert_eq!(report.releases, 1);
    assert_eq!(
        issued(&sim),
        vec![Command::SetProgram, Command::SetPhase, Command::SetPhaseDuration]
    );
    assert!(engine.store().is_empty().unwrap());
}

#[test]
fn failed_deletion_is_retried_without_restoring_again() {
    let mut sim = approach_sim();
    let store = Arc::new(FlakyStore::new(1));
    let mut engine = PreemptionEngine::new(&PreemptionConfig::default(), store.clone());
    let stream = engine.subscribe();
    let j = JunctionId::from("J");
    engine.tick(&mut sim).unwrap();

    sim.step().unwrap();
    assert!(sim.remove_vehicle(&VehicleId::from("amb")));
    sim.clear_commands();
    let report = engine.tick(&mut sim).unwrap();
    assert_eq!(report.failures, 1);
    assert_eq!(issued(&sim).len(), 3);
    assert!(store.get(&j).unwrap().unwrap().restored);

    sim.step().unwrap();
    sim.clear_commands();
    let report = engine.tick(&mut sim).unwrap();
    assert_eq!(report.releases, 1);
    assert!(issued(&sim).is_empty());
    assert!(store.is_empty().unwrap());

    let released: Vec<ReleaseReason> = stream
        .drain()
        .into_iter()
        .filter_map(|ev| match ev.payload {
            EventPayload::Released { reason, .. } => Some(reason),
            _ => None,
        })
        .collect();
    assert_eq!(released, vec![ReleaseReason::CleanupRetry]);
}

#[test]
fn failed_entry_write_leaves_signals_on_their_program() {
    let mut sim = approach_sim();
    let store = Arc::new(FlakyStore::with_failures(1, 0));
    let mut engine = PreemptionEngine::new(&PreemptionConfig::default(), store.clone());
    let j = JunctionId::from("J");

    let report = engine.tick(&mut sim).unwrap();
    assert_eq!(report.failures, 1);
    assert_eq!(report.overrides, 0);
    assert!(store.is_empty().unwrap());
    assert_eq!(sim.program(&j).unwrap(), "0");
    assert!(issued(&sim).is_empty());

    // The next tick retries and the override stays reversible.
    sim.step().unwrap();
    assert_eq!(engine.tick(&mut sim).unwrap().overrides, 1);
    assert_eq!(sim.signal_state(&j).unwrap().to_string(), "gr");

    sim.step().unwrap();
    assert!(sim.remove_vehicle(&VehicleId::from("amb")));
    assert_eq!(engine.tick(&mut sim).unwrap().releases, 1);
    assert_eq!(sim.program(&j).unwrap(), "0");
    assert!(store.is_empty().unwrap());
}

#[test]
fn run_survives_a_dropped_connection() {
    let mut sim = scenario::crossroads();
    for _ in 0..30 {
        sim.step().unwrap();
    }
    sim.inject_fault(Fault::Disconnect);
    sim.refuse_reconnects(1);

    let mut runtime = PreemptionRuntime::new(&PreemptionConfig::default());
    let summary = runtime.run(&mut sim).unwrap();
    assert_eq!(summary.reconnects, 1);
    assert!(runtime.store().is_empty().unwrap());
}

#[test]
fn run_gives_up_when_reconnects_are_exhausted() {
    let mut sim = scenario::crossroads();
    sim.inject_fault(Fault::Disconnect);
    sim.refuse_reconnects(u32::MAX);

    let config = PreemptionConfig {
        max_reconnect_attempts: 2,
        ..PreemptionConfig::default()
    };
    let mut runtime = PreemptionRuntime::new(&config);
    let err = runtime.run(&mut sim).unwrap_err();
    assert!(err.is_retryable());
    assert!(!err.is_fatal());
}

#[test]
fn run_closes_the_session_after_a_fatal_error() {
    let mut sim = approach_sim();
    let store = Arc::new(FlakyStore::with_failures(1, 0).reporting_duplicates());
    let engine = PreemptionEngine::new(&PreemptionConfig::default(), store.clone());
    let mut runtime = PreemptionRuntime::with_engine(engine, PreemptionRuntimeConfig::default());

    let err = runtime.run(&mut sim).unwrap_err();
    assert!(err.is_fatal());
    assert!(store.is_empty().unwrap());
    assert!(issued(&sim).is_empty());
    assert_eq!(sim.close_count(), 1);
}
