//! Run driver.
//!
//! Steps the simulation until it drains (or a step limit is hit), runs one
//! control cycle after every step, and survives transport failures by
//! reconnecting a bounded number of times. The session is closed on every
//! exit.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::PreemptionConfig;
use crate::error::PreemptResult;
use crate::events::EventStream;
use crate::simulation::Simulation;
use crate::storage::PreemptionStore;

use super::{PreemptionEngine, TickReport};

/// Runtime configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreemptionRuntimeConfig {
    /// Reconnect attempts per outage before giving up.
    pub max_reconnect_attempts: u32,
    /// Stop after this many steps.
    pub max_steps: Option<u64>,
    /// Restore overridden junctions when the loop stops normally.
    pub release_on_shutdown: bool,
}

impl Default for PreemptionRuntimeConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 3,
            max_steps: None,
            release_on_shutdown: false,
        }
    }
}

impl From<&PreemptionConfig> for PreemptionRuntimeConfig {
    fn from(config: &PreemptionConfig) -> Self {
        Self {
            max_reconnect_attempts: config.max_reconnect_attempts,
            max_steps: config.max_steps,
            release_on_shutdown: config.release_on_shutdown,
        }
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Simulation steps taken.
    pub steps: u64,
    /// Simulation time at the end of the run, in seconds.
    pub sim_time: f64,
    /// Successful reconnects.
    pub reconnects: u32,
    /// Overrides released when the loop stopped. Zero unless
    /// `release_on_shutdown` is set.
    pub released_on_shutdown: u64,
    /// Overrides still in place when the run ended.
    pub left_active: u64,
    /// Counters accumulated over every tick.
    pub totals: TickReport,
    /// Events published.
    pub events_published: u64,
    /// Event deliveries lost to full subscriber queues.
    pub events_dropped: u64,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "steps:              {}", self.steps)?;
        writeln!(f, "simulation time:    {:.1}s", self.sim_time)?;
        writeln!(f, "overrides:          {}", self.totals.overrides)?;
        writeln!(f, "displacements:      {}", self.totals.displacements)?;
        writeln!(f, "rejections:         {}", self.totals.rejections)?;
        writeln!(f, "releases:           {}", self.totals.releases)?;
        writeln!(f, "shutdown releases:  {}", self.released_on_shutdown)?;
        writeln!(f, "left active:        {}", self.left_active)?;
        writeln!(
            f,
            "skipped:            {} vehicles, {} junctions",
            self.totals.skipped_vehicles, self.totals.skipped_junctions
        )?;
        writeln!(f, "failures:           {}", self.totals.failures)?;
        writeln!(f, "reconnects:         {}", self.reconnects)?;
        write!(
            f,
            "events:             {} published, {} dropped",
            self.events_published, self.events_dropped
        )
    }
}

/// Drives a `PreemptionEngine` against a simulation until it drains.
pub struct PreemptionRuntime {
    engine: PreemptionEngine,
    config: PreemptionRuntimeConfig,
}

impl PreemptionRuntime {
    /// Create a runtime with an in-memory store.
    #[must_use]
    pub fn new(config: &PreemptionConfig) -> Self {
        Self::with_engine(PreemptionEngine::in_memory(config), PreemptionRuntimeConfig::from(config))
    }

    /// Create a runtime around an existing engine.
    #[must_use]
    pub const fn with_engine(engine: PreemptionEngine, config: PreemptionRuntimeConfig) -> Self {
        Self { engine, config }
    }

    /// The controlled engine.
    #[must_use]
    pub const fn engine(&self) -> &PreemptionEngine {
        &self.engine
    }

    /// The engine's preemption store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn PreemptionStore> {
        self.engine.store()
    }

    /// Subscribe to preemption events.
    pub fn subscribe(&self) -> EventStream {
        self.engine.subscribe()
    }

    /// Run until no vehicles remain or the step limit is reached, then close
    /// the session.
    ///
    /// Overrides still active at the end stay in place unless
    /// `release_on_shutdown` is set. The session is closed whether the run
    /// succeeds or fails; a failing close is logged, not returned.
    ///
    /// # Errors
    ///
    /// Returns the transport error once reconnecting has failed
    /// `max_reconnect_attempts` times in a row, and any fatal error
    /// immediately. Overrides are never released on the error path.
    pub fn run(&mut self, sim: &mut dyn Simulation) -> PreemptResult<RunSummary> {
        let outcome = self.drive(sim);
        if let Err(e) = sim.close() {
            warn!(error = %e, "closing simulation session failed");
        }
        outcome
    }

    fn drive(&mut self, sim: &mut dyn Simulation) -> PreemptResult<RunSummary> {
        let mut steps = 0_u64;
        let mut reconnects = 0_u32;
        let mut failed_attempts = 0_u32;

        loop {
            if self.config.max_steps.is_some_and(|max| steps >= max) {
                info!(steps, "step limit reached");
                break;
            }

            match self.advance(sim, &mut steps) {
                Ok(true) => failed_attempts = 0,
                Ok(false) => break,
                Err(e) if e.is_transport() => {
                    if failed_attempts >= self.config.max_reconnect_attempts {
                        error!(error = %e, attempts = failed_attempts, "giving up on simulation");
                        return Err(e);
                    }
                    failed_attempts += 1;
                    warn!(error = %e, attempt = failed_attempts, "simulation connection lost, reconnecting");

                    if let Err(close_err) = sim.close() {
                        debug!(error = %close_err, "close failed");
                    }
                    match sim.reconnect() {
                        Ok(()) => {
                            reconnects += 1;
                            info!(attempt = failed_attempts, "reconnected to simulation");
                        }
                        Err(reconnect_err) => {
                            warn!(error = %reconnect_err, attempt = failed_attempts, "reconnect failed");
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "preemption run aborted");
                    return Err(e);
                }
            }
        }

        let released_on_shutdown = if self.config.release_on_shutdown {
            self.engine.release_all(sim)?
        } else {
            0
        };
        let left_active = self.engine.store().len()? as u64;
        if left_active > 0 {
            info!(left_active, "overrides left in place");
        }
        let sim_time = sim.time()?;
        let events = self.engine.events();
        let summary = RunSummary {
            steps,
            sim_time,
            reconnects,
            released_on_shutdown,
            left_active,
            totals: *self.engine.stats(),
            events_published: events.published(),
            events_dropped: events.dropped(),
        };
        info!(steps, sim_time, overrides = summary.totals.overrides, releases = summary.totals.releases, "run complete");
        Ok(summary)
    }

    /// One step plus one tick. Returns false once the simulation has drained.
    fn advance(&mut self, sim: &mut dyn Simulation, steps: &mut u64) -> PreemptResult<bool> {
        if sim.min_expected_vehicles()? == 0 {
            return Ok(false);
        }
        sim.step()?;
        *steps += 1;
        self.engine.tick(sim)?;
        Ok(true)
    }
}
