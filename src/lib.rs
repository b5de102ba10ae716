//! # signal-preempt - Emergency Vehicle Signal Preemption
//!
//! A controller that gives prioritized vehicles (ambulances, fire engines,
//! police) right of way at signal-controlled junctions of a traffic
//! simulation, and hands every junction back to its program once the vehicle
//! is through.
//!
//! ## Core Concepts
//!
//! - **Requester**: A prioritized vehicle observed fresh every tick
//! - **Candidate**: A junction the requester is approaching, with the approach link it uses
//! - **Override**: A manual signal state giving the approach green; at most one per junction
//! - **Snapshot**: The program state captured before the first override, restored on release
//!
//! ## Usage
//!
//! ```rust,ignore
//! use signal_preempt::{PreemptionConfig, PreemptionRuntime};
//! use signal_preempt::simulation::scenario;
//!
//! let mut sim = scenario::crossroads();
//! let mut runtime = PreemptionRuntime::new(&PreemptionConfig::default());
//! let summary = runtime.run(&mut sim)?;
//! println!("{summary}");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod error;
pub mod network;
pub mod priority;
pub mod signal;
pub mod vehicle;

// Detection
pub mod candidate;
pub mod geometry;

// State, control and collaborators
pub mod config;
pub mod engine;
pub mod events;
pub mod simulation;
pub mod storage;

// Re-export primary types at crate root for convenience
pub use candidate::{rank, Candidate};
pub use config::{ConfigError, PreemptionConfig};
pub use engine::runtime::{PreemptionRuntime, PreemptionRuntimeConfig, RunSummary};
pub use engine::{override_pattern, Arbitration, OverrideEngine, PreemptionEngine, ReleaseMonitor, TickReport};
pub use error::{InvariantError, PreemptError, PreemptResult, SimulationError, ValidationError};
pub use events::{EventBus, EventPayload, EventStream, EventStreamError, PreemptionEvent, ReleaseReason};
pub use geometry::{LaneResolver, DEFAULT_DETECTION_RADIUS};
pub use network::{ControlledLink, Junction, JunctionId, Position, SegmentId};
pub use priority::{Priority, PriorityRegistry};
pub use signal::{SignalColor, SignalState};
pub use simulation::{InMemorySimulation, Simulation};
pub use storage::{InMemoryPreemptionStore, OverrideRecord, PreemptionEntry, PreemptionStore, Snapshot, StorageError};
pub use vehicle::{Requester, VehicleClass, VehicleId};
