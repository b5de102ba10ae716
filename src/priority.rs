//! Priority registry: vehicle class to priority rank.
//!
//! Smaller ranks are more urgent. Classes outside the registry are normal
//! traffic and never take part in arbitration.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::vehicle::VehicleClass;

/// Priority rank; lower is more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(u32);

impl Priority {
    /// Creates a priority rank.
    #[must_use]
    pub const fn new(rank: u32) -> Self {
        Self(rank)
    }

    /// Numeric rank.
    #[must_use]
    pub const fn rank(self) -> u32 {
        self.0
    }

    /// True if `self` is strictly more urgent than `other`.
    #[must_use]
    pub const fn outranks(self, other: Self) -> bool {
        self.0 < other.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lookup table from vehicle class to priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriorityRegistry {
    classes: BTreeMap<VehicleClass, Priority>,
}

impl Default for PriorityRegistry {
    fn default() -> Self {
        let mut classes = BTreeMap::new();
        classes.insert(VehicleClass::from("veh_ambulance"), Priority::new(1));
        classes.insert(VehicleClass::from("veh_firefighter"), Priority::new(2));
        classes.insert(VehicleClass::from("veh_police"), Priority::new(3));
        Self { classes }
    }
}

impl PriorityRegistry {
    /// An empty registry: nothing is prioritized.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            classes: BTreeMap::new(),
        }
    }

    /// Builder-style insertion.
    #[must_use]
    pub fn with_class(mut self, class: impl Into<String>, rank: u32) -> Self {
        self.insert(VehicleClass::new(class), Priority::new(rank));
        self
    }

    /// Registers (or re-ranks) a class.
    pub fn insert(&mut self, class: VehicleClass, priority: Priority) {
        self.classes.insert(class, priority);
    }

    /// Priority for a class, or `None` for non-prioritized traffic.
    #[must_use]
    pub fn lookup(&self, class: &VehicleClass) -> Option<Priority> {
        self.classes.get(class).copied()
    }

    /// Number of registered classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// True if no class is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Checks class names and ranks.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyClassName` for blank class names and
    /// `ValidationError::ZeroPriority` for rank 0, which is reserved for
    /// normal traffic.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (class, priority) in &self.classes {
            if class.as_str().trim().is_empty() {
                return Err(ValidationError::EmptyClassName);
            }
            if priority.rank() == 0 {
                return Err(ValidationError::ZeroPriority {
                    class: class.to_string(),
                });
            }
        }
        Ok(())
    }
}
